//! # Function ABI
//!
//! Discovers how to call a function from its reflection metadata and moves
//! values across the call boundary.
//!
//! ## Reflection keys
//!
//! - `fv`: raw ABI version; only `1` is understood.
//! - `f`: raw signature, decoded with [`lowsig`].

use std::sync::Arc;

use lowsig::Description;
use lowsig::Kind;
use lowsig::Signature;

use crate::buffer::Allocator;
use crate::buffer::Buffer;
use crate::buffer::BufferUsage;
use crate::buffer::MemoryType;
use crate::error::CheckStatus;
use crate::error::Error;
use crate::error::Result;
use crate::host;
use crate::host::HostArray;
use crate::module::Function;
use crate::status::Status;
use crate::variant::Value;
use crate::variant::Variant;
use crate::variant::VariantList;

/// Lazily walks a function's reflection attributes.
///
/// Stops at the first `NotFound`. Any other failing status is yielded once and
/// ends the walk.
pub struct ReflectionAttrs<'a> {
    function: &'a Function,
    index: usize,
    done: bool,
}

impl<'a> ReflectionAttrs<'a> {
    pub fn new(function: &'a Function) -> Self {
        Self { function, index: 0, done: false }
    }
}

impl Iterator for ReflectionAttrs<'_> {
    type Item = std::result::Result<(String, String), Status>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let f = self.function;
        match f.module.raw().reflection_attr(f.linkage, f.ordinal, self.index) {
            Ok(attr) => {
                self.index += 1;
                Some(Ok(attr))
            }
            Err(status) => {
                self.done = true;
                if status.is_not_found() { None } else { Some(Err(status)) }
            }
        }
    }
}

/// Collected reflection attributes. The first occurrence of a key wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reflection {
    attrs: Vec<(String, String)>,
}

impl Reflection {
    pub fn from_function(function: &Function) -> Result<Self> {
        let attrs = ReflectionAttrs::new(function)
            .collect::<std::result::Result<Vec<_>, Status>>()
            .check("Error getting reflection attr")?;
        Ok(Self { attrs })
    }

    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            attrs: pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.attrs.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }
}

/// A value on the host side of a call.
#[derive(Debug, Clone)]
pub enum HostValue {
    Scalar(Value),
    Array(HostArray),
}

impl HostValue {
    pub fn as_array(&self) -> Option<&HostArray> {
        match self {
            HostValue::Array(a) => Some(a),
            HostValue::Scalar(_) => None,
        }
    }

    pub fn as_scalar(&self) -> Option<Value> {
        match self {
            HostValue::Scalar(v) => Some(*v),
            HostValue::Array(_) => None,
        }
    }
}

impl From<Value> for HostValue {
    fn from(v: Value) -> Self {
        HostValue::Scalar(v)
    }
}

impl From<HostArray> for HostValue {
    fn from(a: HostArray) -> Self {
        HostValue::Array(a)
    }
}

/// Builds [`FunctionAbi`]s, handing them the allocator they pack with.
#[derive(Clone)]
pub struct FunctionAbiResolver {
    allocator: Arc<dyn Allocator>,
}

impl FunctionAbiResolver {
    pub fn new(allocator: Arc<dyn Allocator>) -> Self {
        Self { allocator }
    }

    pub fn resolve(&self, function: &Function) -> Result<FunctionAbi> {
        let reflection = Reflection::from_function(function)?;
        let abi = self.resolve_reflection(&reflection)?;
        tracing::debug!(function = ?function, %abi, "resolved function abi");
        Ok(abi)
    }

    pub fn resolve_reflection(&self, reflection: &Reflection) -> Result<FunctionAbi> {
        let signature = reflection
            .get("f")
            .ok_or_else(|| {
                Error::InvalidArgument("No raw abi reflection metadata for function".to_string())
            })?;
        if reflection.get("fv") != Some("1") {
            return Err(Error::InvalidArgument("Unsupported raw function ABI version".to_string()));
        }
        let parsed = lowsig::parse(signature).map_err(|e| {
            let msg = format!("Error parsing raw ABI signature: {} ('{}')", e, signature);
            Error::InvalidArgument(msg)
        })?;
        Ok(FunctionAbi {
            raw: signature.to_string(),
            signature: parsed,
            allocator: Arc::clone(&self.allocator),
        })
    }
}

/// The raw calling convention of one function.
#[derive(Clone)]
pub struct FunctionAbi {
    raw: String,
    signature: Signature,
    allocator: Arc<dyn Allocator>,
}

impl FunctionAbi {
    /// The raw signature string this ABI was decoded from.
    pub fn raw_signature(&self) -> &str {
        &self.raw
    }

    pub fn inputs(&self) -> &[Description] {
        &self.signature.inputs
    }

    pub fn results(&self) -> &[Description] {
        &self.signature.results
    }

    /// Packs host values into a new argument list, copying array data into
    /// fresh VM buffers.
    pub fn raw_pack(&self, args: &[HostValue]) -> Result<VariantList> {
        if args.len() != self.inputs().len() {
            return Err(Error::InvalidArgument("Mismatched RawPack() input arity".to_string()));
        }

        let mut list = VariantList::new(args.len());
        for (i, (desc, arg)) in self.inputs().iter().zip(args).enumerate() {
            let slot = match desc.kind {
                Kind::Buffer => self.pack_buffer(desc, arg)?,
                Kind::Scalar => pack_scalar(desc, arg)?,
                Kind::RefObject => return Err(unsupported_ref()),
            };
            list.set(i, slot).check("Error packing argument")?;
        }
        Ok(list)
    }

    fn pack_buffer(&self, desc: &Description, arg: &HostValue) -> Result<Variant> {
        let array = arg
            .as_array()
            .ok_or_else(|| {
                Error::InvalidArgument(format!("Expected an array argument for {}", desc))
            })?;

        if array.shape().len() != desc.dims.len() {
            return Err(Error::InvalidArgument(format!(
                "Mismatched buffer rank (received: {}, expected: {})",
                array.shape().len(),
                desc.dims.len()
            )));
        }

        let item_size = desc.scalar_type.size();
        if array.element_size() != item_size {
            return Err(Error::InvalidArgument(format!(
                "Mismatched buffer item size (received: {}, expected: {})",
                array.element_size(),
                item_size
            )));
        }

        // Advisory only where the type has a host format.
        if let Some(expected) = host::format_tag(desc.scalar_type) {
            if array.format() != expected {
                return Err(Error::InvalidArgument(format!(
                    "Mismatched buffer format (received: {}, expected: {})",
                    array.format(),
                    expected
                )));
            }
        }

        let mut dynamic_dims = Vec::new();
        for (received, expected) in array.shape().iter().zip(&desc.dims) {
            if *expected < 0 {
                dynamic_dims.push(*received);
            } else if *received != *expected as usize {
                return Err(Error::InvalidArgument(format!(
                    "Mismatched buffer dim (received: {}, expected: {})",
                    received, expected
                )));
            }
        }
        if !dynamic_dims.is_empty() {
            return Err(Error::Unimplemented(
                "Dynamic argument dimensions not implemented".to_string(),
            ));
        }

        let bytes = array.as_bytes();
        let buffer = self
            .allocator
            .allocate(
                MemoryType::HOST_LOCAL | MemoryType::DEVICE_VISIBLE,
                BufferUsage::ALL,
                bytes.len(),
            )
            .check("Failed to allocate device visible buffer")?;
        buffer.write_data(0, bytes).check("Error writing to input buffer")?;
        Ok(Variant::buffer(buffer))
    }

    /// Prepares the result list for an invocation.
    ///
    /// With `static_alloc`, every statically shaped buffer result gets a
    /// host-visible buffer up front. Everything else is left for the callee.
    pub fn allocate_results(&self, args: &VariantList, static_alloc: bool) -> Result<VariantList> {
        if args.len() != self.inputs().len() {
            return Err(Error::InvalidArgument(
                "Mismatched AllocateResults() input arity".to_string(),
            ));
        }

        let mut results = VariantList::new(self.results().len());
        if !static_alloc {
            return Ok(results);
        }

        for (i, desc) in self.results().iter().enumerate() {
            match desc.kind {
                Kind::Buffer => {
                    if desc.is_dynamic() {
                        continue;
                    }
                    let size = desc
                        .static_element_count()
                        .and_then(|count| count.checked_mul(desc.scalar_type.size()))
                        .ok_or_else(|| {
                            let msg = format!("Result {} overflows its byte size", desc);
                            Error::InvalidArgument(msg)
                        })?;
                    let buffer = self
                        .allocator
                        .allocate(
                            MemoryType::DEVICE_LOCAL | MemoryType::HOST_VISIBLE,
                            BufferUsage::ALL,
                            size,
                        )
                        .check("Error allocating host visible buffer")?;
                    results.set(i, Variant::buffer(buffer)).check("Error moving buffer")?;
                }
                Kind::Scalar => {}
                Kind::RefObject => return Err(unsupported_ref()),
            }
        }
        Ok(results)
    }

    /// Turns a populated result list into host values.
    pub fn raw_unpack(&self, results: &VariantList) -> Result<Vec<HostValue>> {
        if results.len() != self.results().len() {
            return Err(Error::InvalidArgument("Mismatched RawUnpack() result arity".to_string()));
        }

        self.results()
            .iter()
            .zip(results)
            .map(|(desc, slot)| match desc.kind {
                Kind::Buffer => {
                    let buffer = slot.as_buffer().ok_or_else(|| {
                        let msg = "Could not deref result buffer (wrong type?)";
                        Error::InvalidArgument(msg.to_string())
                    })?;
                    if desc.is_dynamic() {
                        return Err(Error::Unimplemented(
                            "Dynamic result dimensions not implemented".to_string(),
                        ));
                    }
                    let layout = host::describe(desc.scalar_type, &desc.dims)?;
                    let mapped = host::map_for_read(layout, Arc::clone(buffer))?;
                    Ok(HostValue::Array(host::expose_as_host_array(mapped)))
                }
                Kind::Scalar => slot
                    .as_value()
                    .map(HostValue::Scalar)
                    .ok_or_else(|| {
                        Error::InvalidArgument(format!("Expected a {} result", desc.scalar_type))
                    }),
                Kind::RefObject => Err(unsupported_ref()),
            })
            .collect()
    }
}

fn unsupported_ref() -> Error {
    Error::Unimplemented("Ref objects not yet supported".to_string())
}

fn pack_scalar(desc: &Description, arg: &HostValue) -> Result<Variant> {
    let value = arg
        .as_scalar()
        .ok_or_else(|| {
            Error::InvalidArgument(format!("Expected a {} argument", desc.scalar_type))
        })?;
    if value.scalar_type() != desc.scalar_type {
        return Err(Error::InvalidArgument(format!(
            "Mismatched scalar type (received: {}, expected: {})",
            value.scalar_type(),
            desc.scalar_type
        )));
    }
    Ok(Variant::Value(value))
}

impl std::fmt::Display for FunctionAbi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<FunctionAbi {}>", self.signature)
    }
}

impl std::fmt::Debug for FunctionAbi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}
