//! # Engine Buffers
//!
//! The memory the VM reads and writes. A [`Buffer`] is mapped into host
//! address space for a while and unmapped again; between those two calls the
//! host may touch the bytes through the returned [`MappedMemory`].
//!
//! [`HeapBuffer`] is the host-memory implementation used for packed
//! arguments, statically allocated results and anything parsed from text.

use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use crate::status::Status;

static NEXT_MAPPING_ID: AtomicU64 = AtomicU64::new(1);

const HEAP_ALIGNMENT: usize = 16;

/// Where a buffer lives and who can see it.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub struct MemoryType(u32);

impl MemoryType {
    pub const HOST_LOCAL: Self = Self(1 << 1);
    pub const HOST_VISIBLE: Self = Self(1 << 2);
    pub const DEVICE_LOCAL: Self = Self(1 << 4);
    pub const DEVICE_VISIBLE: Self = Self(1 << 5);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for MemoryType {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// What a buffer may be used for.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub struct BufferUsage(u32);

impl BufferUsage {
    pub const TRANSFER: Self = Self(1 << 0);
    pub const MAPPING: Self = Self(1 << 1);
    pub const DISPATCH: Self = Self(1 << 2);
    pub const ALL: Self = Self(0b111);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub enum MemoryAccess {
    Read,
    Write,
    ReadWrite,
}

impl MemoryAccess {
    pub fn writes(self) -> bool {
        !matches!(self, MemoryAccess::Read)
    }
}

/// A live mapping of part of a buffer.
#[derive(Debug)]
pub struct MappedMemory {
    id: u64,
    ptr: NonNull<u8>,
    len: usize,
    access: MemoryAccess,
}

// SAFETY: a mapping is a plain pointer range; the buffer that produced it
// guarantees validity until unmap and arbitrates writers.
unsafe impl Send for MappedMemory {}
unsafe impl Sync for MappedMemory {}

impl MappedMemory {
    /// # Safety
    ///
    /// `ptr` must be valid for `len` bytes with the given access until the
    /// mapping is passed back to the buffer's `unmap`.
    pub unsafe fn new(ptr: NonNull<u8>, len: usize, access: MemoryAccess) -> Self {
        Self {
            id: NEXT_MAPPING_ID.fetch_add(1, Ordering::Relaxed),
            ptr,
            len,
            access,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn access(&self) -> MemoryAccess {
        self.access
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: guaranteed by the contract of `MappedMemory::new`.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

/// A VM buffer.
///
/// # Safety
///
/// Implementations must hand out mappings whose memory stays valid until the
/// mapping is unmapped, and must not mutate read-mapped bytes.
pub unsafe trait Buffer: Send + Sync {
    fn byte_length(&self) -> usize;

    fn memory_type(&self) -> MemoryType;

    fn usage(&self) -> BufferUsage;

    fn map(&self, access: MemoryAccess, offset: usize, length: usize)
    -> Result<MappedMemory, Status>;

    fn unmap(&self, mapping: &MappedMemory) -> Result<(), Status>;

    /// Copies `data` into the buffer at `offset`.
    fn write_data(&self, offset: usize, data: &[u8]) -> Result<(), Status> {
        let mapping = self.map(MemoryAccess::Write, offset, data.len())?;
        // SAFETY: the mapping covers exactly `data.len()` writable bytes.
        unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), mapping.as_ptr(), data.len()) };
        self.unmap(&mapping)
    }

    /// Copies bytes at `offset` out into `out`.
    fn read_data(&self, offset: usize, out: &mut [u8]) -> Result<(), Status> {
        let mapping = self.map(MemoryAccess::Read, offset, out.len())?;
        out.copy_from_slice(mapping.as_slice());
        self.unmap(&mapping)
    }

    fn fill_zero(&self, offset: usize, length: usize) -> Result<(), Status> {
        let mapping = self.map(MemoryAccess::Write, offset, length)?;
        // SAFETY: the mapping covers exactly `length` writable bytes.
        unsafe { std::ptr::write_bytes(mapping.as_ptr(), 0, length) };
        self.unmap(&mapping)
    }
}

/// Source of new buffers.
pub trait Allocator: Send + Sync {
    fn allocate(
        &self,
        memory_type: MemoryType,
        usage: BufferUsage,
        size: usize,
    ) -> Result<Arc<dyn Buffer>, Status>;
}

/// Allocates [`HeapBuffer`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeapAllocator;

impl Allocator for HeapAllocator {
    fn allocate(
        &self,
        memory_type: MemoryType,
        usage: BufferUsage,
        size: usize,
    ) -> Result<Arc<dyn Buffer>, Status> {
        Ok(Arc::new(HeapBuffer::allocate(memory_type, usage, size)?))
    }
}

#[derive(Default)]
struct MapState {
    readers: usize,
    writer: bool,
    live: Vec<(u64, MemoryAccess)>,
}

/// A zero-initialized buffer in host memory.
pub struct HeapBuffer {
    ptr: NonNull<u8>,
    layout: Layout,
    len: usize,
    memory_type: MemoryType,
    usage: BufferUsage,
    state: Mutex<MapState>,
}

// SAFETY: all access to the allocation goes through mappings arbitrated by
// `state`.
unsafe impl Send for HeapBuffer {}
unsafe impl Sync for HeapBuffer {}

impl HeapBuffer {
    pub fn allocate(
        memory_type: MemoryType,
        usage: BufferUsage,
        size: usize,
    ) -> Result<Self, Status> {
        let layout = Layout::from_size_align(size.max(1), HEAP_ALIGNMENT)
            .map_err(|_| Status::resource_exhausted(format!("cannot allocate {} bytes", size)))?;
        // SAFETY: layout has a non-zero size.
        let raw = unsafe { std::alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw)
            .ok_or_else(|| {
                Status::resource_exhausted(format!("out of memory allocating {} bytes", size))
            })?;
        Ok(Self {
            ptr,
            layout,
            len: size,
            memory_type,
            usage,
            state: Mutex::new(MapState::default()),
        })
    }

    /// Allocates a host-local buffer holding a copy of `data`.
    pub fn from_bytes(data: &[u8]) -> Result<Self, Status> {
        let buffer = Self::allocate(
            MemoryType::HOST_LOCAL | MemoryType::DEVICE_VISIBLE,
            BufferUsage::ALL,
            data.len(),
        )?;
        buffer.write_data(0, data)?;
        Ok(buffer)
    }

    /// Number of mappings currently live.
    pub fn live_mappings(&self) -> usize {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).live.len()
    }
}

unsafe impl Buffer for HeapBuffer {
    fn byte_length(&self) -> usize {
        self.len
    }

    fn memory_type(&self) -> MemoryType {
        self.memory_type
    }

    fn usage(&self) -> BufferUsage {
        self.usage
    }

    fn map(
        &self,
        access: MemoryAccess,
        offset: usize,
        length: usize,
    ) -> Result<MappedMemory, Status> {
        if offset.checked_add(length).is_none_or(|end| end > self.len) {
            return Err(Status::out_of_range(format!(
                "mapping [{}, +{}) exceeds buffer of {} bytes",
                offset, length, self.len
            )));
        }

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if access.writes() && (state.readers > 0 || state.writer) {
            return Err(Status::failed_precondition("buffer is already mapped"));
        }
        if !access.writes() && state.writer {
            return Err(Status::failed_precondition("buffer is mapped for writing"));
        }

        // SAFETY: offset + length is within the allocation, which lives as
        // long as `self`.
        let mapping = unsafe { MappedMemory::new(self.ptr.add(offset), length, access) };
        if access.writes() {
            state.writer = true;
        } else {
            state.readers += 1;
        }
        state.live.push((mapping.id(), access));
        tracing::trace!(id = mapping.id(), ?access, offset, length, "mapped heap buffer");
        Ok(mapping)
    }

    fn unmap(&self, mapping: &MappedMemory) -> Result<(), Status> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let pos = state
            .live
            .iter()
            .position(|(id, _)| *id == mapping.id())
            .ok_or_else(|| Status::invalid_argument("mapping does not belong to this buffer"))?;
        let (_, access) = state.live.remove(pos);
        if access.writes() {
            state.writer = false;
        } else {
            state.readers -= 1;
        }
        tracing::trace!(id = mapping.id(), "unmapped heap buffer");
        Ok(())
    }
}

impl Drop for HeapBuffer {
    fn drop(&mut self) {
        // SAFETY: allocated in `allocate` with this exact layout.
        unsafe { std::alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

impl std::fmt::Debug for HeapBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapBuffer")
            .field("len", &self.len)
            .field("memory_type", &self.memory_type)
            .finish_non_exhaustive()
    }
}
