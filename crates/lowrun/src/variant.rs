//! Invocation argument and result lists.

use std::sync::Arc;

use lowsig::ScalarType;

use crate::buffer::Buffer;
use crate::status::Status;

/// A primitive VM value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

impl Value {
    pub fn scalar_type(self) -> ScalarType {
        match self {
            Value::I32(_) => ScalarType::Sint32,
            Value::I64(_) => ScalarType::Sint64,
            Value::F32(_) => ScalarType::Float32,
            Value::F64(_) => ScalarType::Float64,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::I32(v) => write!(f, "{}", v),
            Value::I64(v) => write!(f, "{}", v),
            Value::F32(v) => write!(f, "{}", v),
            Value::F64(v) => write!(f, "{}", v),
        }
    }
}

/// A reference-counted VM object other than a buffer.
pub trait RefObject: Send + Sync {
    fn type_name(&self) -> &str;
}

#[derive(Clone)]
pub enum VmRef {
    Buffer(Arc<dyn Buffer>),
    Object(Arc<dyn RefObject>),
}

impl std::fmt::Debug for VmRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VmRef::Buffer(b) => write!(f, "Buffer({})", b.byte_length()),
            VmRef::Object(o) => write!(f, "Unknown({})", o.type_name()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub enum Variant {
    #[default]
    Empty,
    Value(Value),
    Ref(VmRef),
}

impl Variant {
    pub fn buffer(buffer: Arc<dyn Buffer>) -> Self {
        Variant::Ref(VmRef::Buffer(buffer))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Variant::Empty)
    }

    pub fn as_value(&self) -> Option<Value> {
        match self {
            Variant::Value(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_buffer(&self) -> Option<&Arc<dyn Buffer>> {
        match self {
            Variant::Ref(VmRef::Buffer(b)) => Some(b),
            _ => None,
        }
    }
}

impl From<Value> for Variant {
    fn from(v: Value) -> Self {
        Variant::Value(v)
    }
}

/// A fixed-size list of variants. Every slot exists from creation on.
#[derive(Debug, Clone, Default)]
pub struct VariantList {
    slots: Vec<Variant>,
}

impl VariantList {
    pub fn new(capacity: usize) -> Self {
        Self { slots: vec![Variant::Empty; capacity] }
    }

    pub fn from_variants(slots: Vec<Variant>) -> Self {
        Self { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Variant> {
        self.slots.get(index)
    }

    pub fn set(&mut self, index: usize, variant: impl Into<Variant>) -> Result<(), Status> {
        let len = self.slots.len();
        let slot = self
            .slots
            .get_mut(index)
            .ok_or_else(|| {
                Status::out_of_range(format!("slot {} of list with {} slots", index, len))
            })?;
        *slot = variant.into();
        Ok(())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Variant> {
        self.slots.iter()
    }
}

impl std::fmt::Display for VariantList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<VariantList({}): [", self.slots.len())?;
        for (i, slot) in self.slots.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            match slot {
                Variant::Empty => f.write_str("None")?,
                Variant::Value(v) => write!(f, "{}", v)?,
                Variant::Ref(r) => write!(f, "{:?}", r)?,
            }
        }
        f.write_str("]>")
    }
}

impl<'a> IntoIterator for &'a VariantList {
    type Item = &'a Variant;
    type IntoIter = std::slice::Iter<'a, Variant>;

    fn into_iter(self) -> Self::IntoIter {
        self.slots.iter()
    }
}
