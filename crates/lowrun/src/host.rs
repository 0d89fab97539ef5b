//! # Host Buffer Mapping
//!
//! Exposes VM buffers to host code as shaped, typed arrays without copying.
//!
//! ## Philosophy
//!
//! - **Zero copy**: a [`HostArray`] reads the mapped bytes directly.
//! - **Scoped mapping**: the mapping lives in a [`MappedBuffer`] shared by every array alias
//!   and is unmapped when the last alias drops.
//! - **Checked views**: typed access checks element format and alignment first.

use std::sync::Arc;

use lowsig::ScalarType;

use crate::buffer::Buffer;
use crate::buffer::BufferUsage;
use crate::buffer::HeapBuffer;
use crate::buffer::MappedMemory;
use crate::buffer::MemoryAccess;
use crate::buffer::MemoryType;
use crate::error::CheckStatus;
use crate::error::Error;
use crate::error::Result;

/// Struct-module style format tag for each scalar type. Half precision types
/// have no host representation.
pub fn format_tag(scalar_type: ScalarType) -> Option<&'static str> {
    match scalar_type {
        ScalarType::Float32 => Some("f"),
        ScalarType::Float16 => None,
        ScalarType::Float64 => Some("d"),
        ScalarType::Bfloat16 => None,
        ScalarType::Sint8 => Some("b"),
        ScalarType::Sint16 => Some("h"),
        ScalarType::Sint32 => Some("i"),
        ScalarType::Sint64 => Some("q"),
        ScalarType::Uint8 => Some("B"),
        ScalarType::Uint16 => Some("H"),
        ScalarType::Uint32 => Some("I"),
        ScalarType::Uint64 => Some("Q"),
    }
}

/// Shape and layout of a dense row-major array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub scalar_type: ScalarType,
    pub element_size: usize,
    pub format: &'static str,
    pub dims: Vec<usize>,
    /// Byte strides, outermost first.
    pub strides: Vec<usize>,
}

impl Layout {
    pub fn element_count(&self) -> usize {
        self.dims.iter().fold(1, |acc, d| acc.saturating_mul(*d))
    }

    /// Bytes covered by the array. Never overflows for layouts from [`describe`].
    pub fn byte_extent(&self) -> usize {
        self.element_count().saturating_mul(self.element_size)
    }
}

/// Describes a dense array of `scalar_type` with static `dims`.
///
/// Fails if any stride or the total byte extent does not fit in `usize`.
pub fn describe(scalar_type: ScalarType, dims: &[i32]) -> Result<Layout> {
    let format = format_tag(scalar_type)
        .ok_or_else(|| Error::Unimplemented("Unimplemented ScalarType".to_string()))?;
    let element_size = scalar_type.size();

    let shape = dims;
    let dims = shape
        .iter()
        .map(|d| usize::try_from(*d))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|_| {
            Error::InvalidArgument(format!("Dynamic dimension in host array shape {:?}", shape))
        })?;

    let mut strides = vec![0; dims.len()];
    let mut stride = element_size;
    for (i, d) in dims.iter().enumerate().rev() {
        strides[i] = stride;
        stride = stride.checked_mul(*d).ok_or_else(|| {
            let msg = format!("Host array shape {:?} overflows its byte extent", shape);
            Error::InvalidArgument(msg)
        })?;
    }

    Ok(Layout { scalar_type, element_size, format, dims, strides })
}

/// A buffer mapped read-only for the host. Unmaps once, on drop.
pub struct MappedBuffer {
    layout: Layout,
    mapping: MappedMemory,
    buffer: Arc<dyn Buffer>,
}

impl MappedBuffer {
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn buffer(&self) -> &Arc<dyn Buffer> {
        &self.buffer
    }

    /// The array bytes, without any trailing slack in the buffer.
    pub fn bytes(&self) -> &[u8] {
        &self.mapping.as_slice()[..self.layout.byte_extent()]
    }
}

impl Drop for MappedBuffer {
    fn drop(&mut self) {
        if let Err(status) = self.buffer.unmap(&self.mapping) {
            tracing::error!(%status, "Error unmapping memory");
        }
    }
}

/// Maps all of `buffer` for reading under `layout`.
pub fn map_for_read(layout: Layout, buffer: Arc<dyn Buffer>) -> Result<MappedBuffer> {
    let byte_length = buffer.byte_length();
    if layout.byte_extent() > byte_length {
        return Err(Error::InvalidArgument(format!(
            "Buffer of {} bytes is too small for a {:?} array of {} bytes",
            byte_length,
            layout.dims,
            layout.byte_extent()
        )));
    }
    let mapping = buffer
        .map(MemoryAccess::Read, 0, byte_length)
        .check("Could not map memory")?;
    Ok(MappedBuffer { layout, mapping, buffer })
}

pub fn expose_as_host_array(mapped: MappedBuffer) -> HostArray {
    HostArray(Arc::new(mapped))
}

mod sealed {
    pub trait Sealed {}
}

/// Plain numeric types a host array can be viewed as.
pub trait Element: sealed::Sealed + Copy + 'static {
    const SCALAR_TYPE: ScalarType;
}

macro_rules! element {
    ($($t:ty => $st:ident),* $(,)?) => {
        $(
            impl sealed::Sealed for $t {}
            impl Element for $t {
                const SCALAR_TYPE: ScalarType = ScalarType::$st;
            }
        )*
    };
}

element! {
    f32 => Float32,
    f64 => Float64,
    i8 => Sint8,
    i16 => Sint16,
    i32 => Sint32,
    i64 => Sint64,
    u8 => Uint8,
    u16 => Uint16,
    u32 => Uint32,
    u64 => Uint64,
}

/// A shaped, read-only view of mapped VM memory. Clones alias the same mapping.
#[derive(Clone)]
pub struct HostArray(Arc<MappedBuffer>);

impl HostArray {
    /// Copies `data` into a fresh heap buffer and maps it as an array.
    pub fn from_slice<T: Element>(data: &[T], shape: &[usize]) -> Result<Self> {
        let dims = shape
            .iter()
            .map(|d| i32::try_from(*d))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|_| {
                Error::InvalidArgument(format!("Host array dimension too large in {:?}", shape))
            })?;
        let layout = describe(T::SCALAR_TYPE, &dims)?;
        if layout.element_count() != data.len() {
            return Err(Error::InvalidArgument(format!(
                "Shape {:?} holds {} elements but {} were given",
                shape,
                layout.element_count(),
                data.len()
            )));
        }

        // SAFETY: `Element` is only implemented for padding-free numeric types.
        let bytes = unsafe {
            std::slice::from_raw_parts(data.as_ptr().cast::<u8>(), std::mem::size_of_val(data))
        };
        let buffer = HeapBuffer::allocate(
            MemoryType::HOST_LOCAL | MemoryType::DEVICE_VISIBLE,
            BufferUsage::ALL,
            bytes.len(),
        )
        .check("Error allocating host array")?;
        buffer.write_data(0, bytes).check("Error writing to host array")?;
        Ok(expose_as_host_array(map_for_read(layout, Arc::new(buffer))?))
    }

    pub fn layout(&self) -> &Layout {
        &self.0.layout
    }

    pub fn shape(&self) -> &[usize] {
        &self.0.layout.dims
    }

    pub fn strides(&self) -> &[usize] {
        &self.0.layout.strides
    }

    pub fn element_size(&self) -> usize {
        self.0.layout.element_size
    }

    pub fn format(&self) -> &'static str {
        self.0.layout.format
    }

    pub fn scalar_type(&self) -> ScalarType {
        self.0.layout.scalar_type
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.bytes()
    }

    /// The mapping keeping this array's memory alive.
    pub fn base(&self) -> &Arc<MappedBuffer> {
        &self.0
    }

    pub fn as_slice<T: Element>(&self) -> Result<&[T]> {
        let layout = &self.0.layout;
        if T::SCALAR_TYPE != layout.scalar_type {
            return Err(Error::InvalidArgument(format!(
                "Mismatched element format (array: {}, requested: {})",
                layout.format,
                format_tag(T::SCALAR_TYPE).unwrap_or("?")
            )));
        }
        let bytes = self.as_bytes();
        if bytes.as_ptr().align_offset(std::mem::align_of::<T>()) != 0 {
            return Err(Error::InvalidArgument(
                "Host array memory is misaligned for its element type".to_string(),
            ));
        }
        // SAFETY: scalar type and alignment match and the length is a whole
        // number of elements; the mapping outlives the borrow of `self`.
        Ok(unsafe {
            std::slice::from_raw_parts(bytes.as_ptr().cast::<T>(), layout.element_count())
        })
    }
}

impl std::fmt::Debug for HostArray {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HostArray({}{:?})", self.scalar_type(), self.shape())
    }
}
