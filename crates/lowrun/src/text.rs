//! Text form of argument and result lists.
//!
//! Scalars read and print as `i32=42`. Buffers carry their shape and element
//! type: `2x2xi32=[42 43][44 45]`. Brackets only group for readability; the
//! parser ignores them.

use std::fmt::Write;
use std::sync::Arc;

use lowsig::Description;
use lowsig::Kind;
use lowsig::ScalarType;

use crate::buffer::Allocator;
use crate::buffer::Buffer;
use crate::buffer::BufferUsage;
use crate::buffer::MemoryType;
use crate::error::CheckStatus;
use crate::error::Error;
use crate::error::Result;
use crate::host;
use crate::variant::Value;
use crate::variant::Variant;
use crate::variant::VariantList;

fn type_tag(scalar_type: ScalarType) -> Result<&'static str> {
    match scalar_type {
        ScalarType::Float32 => Ok("f32"),
        ScalarType::Float64 => Ok("f64"),
        ScalarType::Sint8 => Ok("i8"),
        ScalarType::Sint16 => Ok("i16"),
        ScalarType::Sint32 => Ok("i32"),
        ScalarType::Sint64 => Ok("i64"),
        ScalarType::Uint8 => Ok("u8"),
        ScalarType::Uint16 => Ok("u16"),
        ScalarType::Uint32 => Ok("u32"),
        ScalarType::Uint64 => Ok("u64"),
        ScalarType::Float16 | ScalarType::Bfloat16 => {
            Err(Error::Unimplemented(format!("No text form for {}", scalar_type)))
        }
    }
}

macro_rules! for_each_element {
    ($scalar_type:expr, $t:ident => $body:expr) => {
        match $scalar_type {
            ScalarType::Float32 => { type $t = f32; $body }
            ScalarType::Float64 => { type $t = f64; $body }
            ScalarType::Sint8 => { type $t = i8; $body }
            ScalarType::Sint16 => { type $t = i16; $body }
            ScalarType::Sint32 => { type $t = i32; $body }
            ScalarType::Sint64 => { type $t = i64; $body }
            ScalarType::Uint8 => { type $t = u8; $body }
            ScalarType::Uint16 => { type $t = u16; $body }
            ScalarType::Uint32 => { type $t = u32; $body }
            ScalarType::Uint64 => { type $t = u64; $body }
            other => Err(Error::Unimplemented(format!("No text form for {}", other))),
        }
    };
}

fn encode_elements(scalar_type: ScalarType, tokens: &[&str]) -> Result<Vec<u8>> {
    for_each_element!(scalar_type, T => {
        let mut out = Vec::with_capacity(tokens.len() * std::mem::size_of::<T>());
        for token in tokens {
            let v: T = token.parse().map_err(|_| {
                Error::InvalidArgument(format!("Could not parse '{}' as {}", token, scalar_type))
            })?;
            out.extend_from_slice(&v.to_ne_bytes());
        }
        Ok(out)
    })
}

fn decode_elements(scalar_type: ScalarType, bytes: &[u8]) -> Result<Vec<String>> {
    for_each_element!(scalar_type, T => {
        Ok(bytes
            .chunks_exact(std::mem::size_of::<T>())
            .map(|chunk| {
                let mut raw = [0u8; std::mem::size_of::<T>()];
                raw.copy_from_slice(chunk);
                T::from_ne_bytes(raw).to_string()
            })
            .collect())
    })
}

/// Parses one text value per description into a new argument list.
pub fn parse_to_variant_list<S: AsRef<str>>(
    allocator: &dyn Allocator,
    descs: &[Description],
    inputs: &[S],
) -> Result<VariantList> {
    if descs.len() != inputs.len() {
        return Err(Error::InvalidArgument(format!(
            "Signature mismatch; expected {} buffer strings but received {}",
            descs.len(),
            inputs.len()
        )));
    }

    let mut list = VariantList::new(descs.len());
    for (i, (desc, input)) in descs.iter().zip(inputs).enumerate() {
        let text = input.as_ref().trim().trim_matches(|c| c == '"' || c == '\'').trim();
        let variant = match desc.kind {
            Kind::Scalar => parse_scalar(desc, text)?,
            Kind::Buffer => parse_buffer(allocator, desc, text)?,
            Kind::RefObject => {
                return Err(Error::Unimplemented("Ref objects not yet supported".to_string()));
            }
        };
        list.set(i, variant).check("Error parsing inputs")?;
    }
    Ok(list)
}

fn parse_scalar(desc: &Description, text: &str) -> Result<Variant> {
    if desc.scalar_type != ScalarType::Sint32 {
        return Err(Error::Unimplemented(format!("Unsupported scalar type {}", desc.scalar_type)));
    }
    let value = text
        .strip_prefix("i32=")
        .ok_or_else(|| {
            Error::InvalidArgument(format!("Expected 'i32=<value>' but got '{}'", text))
        })?;
    let value: i32 = value
        .trim()
        .parse()
        .map_err(|_| Error::InvalidArgument(format!("Could not parse '{}' as sint32", value)))?;
    Ok(Variant::Value(Value::I32(value)))
}

fn parse_buffer(allocator: &dyn Allocator, desc: &Description, text: &str) -> Result<Variant> {
    let (shape, values) = text
        .split_once('=')
        .ok_or_else(|| {
            let msg = format!("Expected '<shape>x<type>=<values>' but got '{}'", text);
            Error::InvalidArgument(msg)
        })?;

    let mut parts: Vec<&str> = shape.split('x').collect();
    let tag = parts.pop().unwrap_or_default();
    let expected_tag = type_tag(desc.scalar_type)?;
    if tag != expected_tag {
        return Err(Error::InvalidArgument(format!(
            "Mismatched element type (received: {}, expected: {})",
            tag, expected_tag
        )));
    }
    let dims = parts
        .iter()
        .map(|d| d.parse::<i32>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|_| Error::InvalidArgument(format!("Malformed shape '{}'", shape)))?;
    if dims != desc.dims {
        return Err(Error::InvalidArgument(format!(
            "Mismatched buffer shape (received: {:?}, expected: {:?})",
            dims, desc.dims
        )));
    }

    let layout = host::describe(desc.scalar_type, &dims)?;
    let cleaned = values.replace(['[', ']'], " ");
    let tokens: Vec<&str> = cleaned.split_whitespace().collect();
    if tokens.len() != layout.element_count() {
        return Err(Error::InvalidArgument(format!(
            "Expected {} elements but got {}",
            layout.element_count(),
            tokens.len()
        )));
    }

    let bytes = encode_elements(desc.scalar_type, &tokens)?;
    let buffer = allocator
        .allocate(
            MemoryType::HOST_LOCAL | MemoryType::DEVICE_VISIBLE,
            BufferUsage::ALL,
            bytes.len(),
        )
        .check("Error allocating input buffer")?;
    buffer.write_data(0, &bytes).check("Error writing to input buffer")?;
    Ok(Variant::buffer(buffer))
}

/// Prints each slot of `list` on its own line.
pub fn print_variant_list(descs: &[Description], list: &VariantList) -> Result<String> {
    if descs.len() != list.len() {
        return Err(Error::InvalidArgument(format!(
            "Signature mismatch; expected {} values but received {}",
            descs.len(),
            list.len()
        )));
    }

    let mut lines = Vec::with_capacity(descs.len());
    for (desc, slot) in descs.iter().zip(list) {
        match (desc.kind, slot) {
            (Kind::Scalar, Variant::Value(v)) => {
                lines.push(format!("{}={}", type_tag(v.scalar_type())?, v));
            }
            (Kind::Buffer, Variant::Ref(_)) => {
                let buffer = slot
                    .as_buffer()
                    .ok_or_else(|| {
                        let msg = "Could not deref result buffer (wrong type?)";
                        Error::InvalidArgument(msg.to_string())
                    })?;
                lines.push(print_buffer(desc, buffer)?);
            }
            (_, Variant::Empty) => lines.push("None".to_string()),
            (kind, _) => {
                let msg = format!("Value does not match its {:?} description", kind);
                return Err(Error::InvalidArgument(msg));
            }
        }
    }
    Ok(lines.join("\n"))
}

fn print_buffer(desc: &Description, buffer: &Arc<dyn Buffer>) -> Result<String> {
    let layout = host::describe(desc.scalar_type, &desc.dims)?;
    let mapped = host::map_for_read(layout, Arc::clone(buffer))?;
    let elements = decode_elements(desc.scalar_type, mapped.bytes())?;

    let mut out = String::new();
    for d in &mapped.layout().dims {
        let _ = write!(out, "{}x", d);
    }
    out.push_str(type_tag(desc.scalar_type)?);
    out.push('=');
    write_nested(&mut out, &mapped.layout().dims, &elements);
    Ok(out)
}

/// Writes elements grouped by every dim but the outermost.
fn write_nested(out: &mut String, dims: &[usize], elements: &[String]) {
    match dims {
        [] => out.push_str(elements.first().map(String::as_str).unwrap_or_default()),
        [_] => {
            out.push('[');
            out.push_str(&elements.join(" "));
            out.push(']');
        }
        [_, inner @ ..] => {
            let stride: usize = inner.iter().product();
            for chunk in elements.chunks(stride.max(1)) {
                if inner.len() > 1 {
                    out.push('[');
                }
                write_nested(out, inner, chunk);
                if inner.len() > 1 {
                    out.push(']');
                }
            }
        }
    }
}
