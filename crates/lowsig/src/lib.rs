//! # Lowsig
//!
//! A small, strict codec for the raw function signatures that compiled modules
//! carry in their reflection metadata (under the `f` key).
//!
//! ## Format
//!
//! - **Signature**: `I<len>!<items>R<len>!<items>`
//! - **Buffer**: `B<len>!` then an optional `t<scalar>` and any number of `d<dim>`
//! - **Scalar**: `S<len>!` then an optional `t<scalar>`
//! - **Ref object**: `O<len>!`
//!
//! `<len>` counts every byte of the span starting at the `!`. Dims are signed
//! and a negative dim is dynamic. A missing `t` means float32.
//!
//! For example `I15!B11!d10d128d64R15!B11!t6d32d8d64` reads as
//! `(Buffer<float32[10x128x64]>) -> (Buffer<sint32[32x8x64]>)`.

use std::fmt;


/// Signature decoding errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Input exhausted in the middle of a token.
    UnexpectedEnd,
    /// Byte that does not start any token valid at this position.
    UnexpectedChar { pos: usize, found: char },
    /// Integer is malformed or does not fit its target.
    InvalidInteger(usize),
    /// A span claims more bytes than its enclosing span holds.
    SpanOverrun { pos: usize, len: usize },
    /// Scalar type tag outside the known table.
    UnknownScalarType(i64),
    /// The top-level input (`I`) or result (`R`) section is absent.
    MissingSection(char),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::UnexpectedEnd => write!(f, "unexpected end of signature"),
            Error::UnexpectedChar { pos, found } => {
                write!(f, "unexpected '{}' at offset {}", found, pos)
            }
            Error::InvalidInteger(pos) => write!(f, "invalid integer at offset {}", pos),
            Error::SpanOverrun { pos, len } => {
                write!(f, "span of length {} at offset {} overruns its parent", len, pos)
            }
            Error::UnknownScalarType(t) => write!(f, "unknown scalar type {}", t),
            Error::MissingSection(tag) => write!(f, "missing '{}' section", tag),
        }
    }
}

impl std::error::Error for Error {}

/// Specialized `Result` for signature operations.
pub type Result<T> = std::result::Result<T, Error>;

// ============================================================================
//  TYPES
// ============================================================================

/// Element type of a buffer or scalar, numbered as on the wire.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    Float32 = 0,
    Float16 = 1,
    Float64 = 2,
    Bfloat16 = 3,
    Sint8 = 4,
    Sint16 = 5,
    Sint32 = 6,
    Sint64 = 7,
    Uint8 = 8,
    Uint16 = 9,
    Uint32 = 10,
    Uint64 = 11,
}

impl ScalarType {
    /// Every scalar type, in wire order.
    pub const ALL: [ScalarType; 12] = [
        ScalarType::Float32,
        ScalarType::Float16,
        ScalarType::Float64,
        ScalarType::Bfloat16,
        ScalarType::Sint8,
        ScalarType::Sint16,
        ScalarType::Sint32,
        ScalarType::Sint64,
        ScalarType::Uint8,
        ScalarType::Uint16,
        ScalarType::Uint32,
        ScalarType::Uint64,
    ];

    /// Returns the scalar type for a wire tag, or `None` if unknown.
    pub fn from_u8(b: u8) -> Option<Self> {
        Self::ALL.get(b as usize).copied()
    }

    /// Size of one element in bytes.
    pub fn size(self) -> usize {
        match self {
            ScalarType::Sint8 | ScalarType::Uint8 => 1,
            ScalarType::Float16 | ScalarType::Bfloat16 => 2,
            ScalarType::Sint16 | ScalarType::Uint16 => 2,
            ScalarType::Float32 | ScalarType::Sint32 | ScalarType::Uint32 => 4,
            ScalarType::Float64 | ScalarType::Sint64 | ScalarType::Uint64 => 8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ScalarType::Float32 => "float32",
            ScalarType::Float16 => "float16",
            ScalarType::Float64 => "float64",
            ScalarType::Bfloat16 => "bfloat16",
            ScalarType::Sint8 => "sint8",
            ScalarType::Sint16 => "sint16",
            ScalarType::Sint32 => "sint32",
            ScalarType::Sint64 => "sint64",
            ScalarType::Uint8 => "uint8",
            ScalarType::Uint16 => "uint16",
            ScalarType::Uint32 => "uint32",
            ScalarType::Uint64 => "uint64",
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a signature slot carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Buffer,
    Scalar,
    RefObject,
}

/// One input or result of a function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Description {
    pub kind: Kind,
    pub scalar_type: ScalarType,
    /// Buffer dims, outermost first. Empty for scalars and ref objects.
    pub dims: Vec<i32>,
}

impl Description {
    pub fn buffer(scalar_type: ScalarType, dims: &[i32]) -> Self {
        Self { kind: Kind::Buffer, scalar_type, dims: dims.to_vec() }
    }

    pub fn scalar(scalar_type: ScalarType) -> Self {
        Self { kind: Kind::Scalar, scalar_type, dims: Vec::new() }
    }

    pub fn ref_object() -> Self {
        Self { kind: Kind::RefObject, scalar_type: ScalarType::Float32, dims: Vec::new() }
    }

    /// True if any dim is only known at runtime.
    pub fn is_dynamic(&self) -> bool {
        self.dims.iter().any(|d| *d < 0)
    }

    /// Number of elements when every dim is static.
    pub fn static_element_count(&self) -> Option<usize> {
        self.dims.iter().try_fold(1usize, |acc, d| {
            let d = usize::try_from(*d).ok()?;
            acc.checked_mul(d)
        })
    }
}

impl fmt::Display for Description {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            Kind::Buffer => {
                write!(f, "Buffer<{}[", self.scalar_type)?;
                for (i, d) in self.dims.iter().enumerate() {
                    if i > 0 {
                        f.write_str("x")?;
                    }
                    if *d < 0 {
                        f.write_str("?")?;
                    } else {
                        write!(f, "{}", d)?;
                    }
                }
                f.write_str("]>")
            }
            Kind::Scalar => write!(f, "{}", self.scalar_type),
            Kind::RefObject => f.write_str("RefObject"),
        }
    }
}

/// A decoded raw signature.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Signature {
    pub inputs: Vec<Description>,
    pub results: Vec<Description>,
}

impl Signature {
    /// Encodes back into the canonical raw form.
    pub fn encode(&self) -> String {
        let builder = self.inputs.iter().fold(SignatureBuilder::new(), |b, d| b.input(d));
        self.results.iter().fold(builder, |b, d| b.result(d)).build()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_list(f, &self.inputs)?;
        f.write_str(" -> ")?;
        write_list(f, &self.results)
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, descs: &[Description]) -> fmt::Result {
    f.write_str("(")?;
    for (i, d) in descs.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", d)?;
    }
    f.write_str(")")
}

// ============================================================================
//  DECODING
// ============================================================================

/// Decodes a full raw signature.
pub fn parse(sig: &str) -> Result<Signature> {
    let bytes = sig.as_bytes();
    let mut cur = Cursor { src: bytes, pos: 0, end: bytes.len() };

    if cur.peek() != Some(b'I') {
        return Err(Error::MissingSection('I'));
    }
    let inputs = parse_items(cur.span(b'I')?)?;

    if cur.peek() != Some(b'R') {
        return Err(Error::MissingSection('R'));
    }
    let results = parse_items(cur.span(b'R')?)?;

    cur.finish()?;
    Ok(Signature { inputs, results })
}

/// Decodes only the input descriptions.
pub fn parse_inputs(sig: &str) -> Result<Vec<Description>> {
    parse(sig).map(|s| s.inputs)
}

/// Decodes only the result descriptions.
pub fn parse_results(sig: &str) -> Result<Vec<Description>> {
    parse(sig).map(|s| s.results)
}

fn parse_items(mut cur: Cursor<'_>) -> Result<Vec<Description>> {
    let mut out = Vec::new();
    while let Some(tag) = cur.peek() {
        let desc = match tag {
            b'B' => {
                let mut body = cur.span(b'B')?;
                let scalar_type = body.scalar_type()?;
                let mut dims = Vec::new();
                while body.peek() == Some(b'd') {
                    body.pos += 1;
                    dims.push(body.dim()?);
                }
                body.finish()?;
                Description { kind: Kind::Buffer, scalar_type, dims }
            }
            b'S' => {
                let mut body = cur.span(b'S')?;
                let scalar_type = body.scalar_type()?;
                body.finish()?;
                Description::scalar(scalar_type)
            }
            b'O' => {
                cur.span(b'O')?.finish()?;
                Description::ref_object()
            }
            other => return Err(Error::UnexpectedChar { pos: cur.pos, found: other as char }),
        };
        out.push(desc);
    }
    Ok(out)
}

/// Bounded view over the signature bytes. Positions stay absolute for errors.
struct Cursor<'a> {
    src: &'a [u8],
    pos: usize,
    end: usize,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Option<u8> {
        if self.pos < self.end { Some(self.src[self.pos]) } else { None }
    }

    fn expect(&mut self, tag: u8) -> Result<()> {
        match self.peek() {
            Some(b) if b == tag => {
                self.pos += 1;
                Ok(())
            }
            Some(b) => Err(Error::UnexpectedChar { pos: self.pos, found: b as char }),
            None => Err(Error::UnexpectedEnd),
        }
    }

    fn finish(&self) -> Result<()> {
        match self.peek() {
            Some(b) => Err(Error::UnexpectedChar { pos: self.pos, found: b as char }),
            None => Ok(()),
        }
    }

    /// Consumes `<tag><len>` plus the `len` bytes that follow and returns a
    /// cursor over the span body (after the `!`).
    fn span(&mut self, tag: u8) -> Result<Cursor<'a>> {
        self.expect(tag)?;
        let len_pos = self.pos;
        let len = self.integer()?;
        let len = usize::try_from(len)
            .ok()
            .filter(|l| *l >= 1)
            .ok_or(Error::InvalidInteger(len_pos))?;

        let open = self.pos;
        if len > self.end - open {
            return Err(Error::SpanOverrun { pos: open, len });
        }
        if self.src[open] != b'!' {
            return Err(Error::UnexpectedChar { pos: open, found: self.src[open] as char });
        }
        self.pos = open + len;
        Ok(Cursor { src: self.src, pos: open + 1, end: open + len })
    }

    fn integer(&mut self) -> Result<i64> {
        let start = self.pos;
        let negative = self.peek() == Some(b'-');
        if negative {
            self.pos += 1;
        }

        let mut value: i64 = 0;
        let mut digits = 0;
        while let Some(b) = self.peek().filter(u8::is_ascii_digit) {
            value = value
                .checked_mul(10)
                .and_then(|v| v.checked_add(i64::from(b - b'0')))
                .ok_or(Error::InvalidInteger(start))?;
            digits += 1;
            self.pos += 1;
        }

        if digits == 0 {
            return match self.peek() {
                Some(_) => Err(Error::InvalidInteger(start)),
                None => Err(Error::UnexpectedEnd),
            };
        }
        Ok(if negative { -value } else { value })
    }

    fn scalar_type(&mut self) -> Result<ScalarType> {
        if self.peek() != Some(b't') {
            return Ok(ScalarType::Float32);
        }
        self.pos += 1;
        let tag = self.integer()?;
        u8::try_from(tag)
            .ok()
            .and_then(ScalarType::from_u8)
            .ok_or(Error::UnknownScalarType(tag))
    }

    fn dim(&mut self) -> Result<i32> {
        let start = self.pos;
        let d = self.integer()?;
        i32::try_from(d).map_err(|_| Error::InvalidInteger(start))
    }
}

// ============================================================================
//  ENCODING
// ============================================================================

/// Builds canonical raw signatures.
///
/// ```
/// use lowsig::{Description, ScalarType, SignatureBuilder};
///
/// let sig = SignatureBuilder::new()
///     .input(&Description::buffer(ScalarType::Float32, &[10, 128, 64]))
///     .result(&Description::buffer(ScalarType::Sint32, &[32, 8, 64]))
///     .build();
/// assert_eq!(sig, "I15!B11!d10d128d64R15!B11!t6d32d8d64");
/// ```
#[derive(Debug, Clone, Default)]
pub struct SignatureBuilder {
    inputs: String,
    results: String,
}

impl SignatureBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input(mut self, desc: &Description) -> Self {
        encode_item(&mut self.inputs, desc);
        self
    }

    pub fn result(mut self, desc: &Description) -> Self {
        encode_item(&mut self.results, desc);
        self
    }

    pub fn build(self) -> String {
        let mut out = String::new();
        write_span(&mut out, 'I', &self.inputs);
        write_span(&mut out, 'R', &self.results);
        out
    }
}

fn encode_item(out: &mut String, desc: &Description) {
    let mut body = String::new();
    if desc.kind != Kind::RefObject && desc.scalar_type != ScalarType::Float32 {
        body.push('t');
        body.push_str(&(desc.scalar_type as u8).to_string());
    }
    match desc.kind {
        Kind::Buffer => {
            for d in &desc.dims {
                body.push('d');
                body.push_str(&d.to_string());
            }
            write_span(out, 'B', &body);
        }
        Kind::Scalar => write_span(out, 'S', &body),
        Kind::RefObject => write_span(out, 'O', ""),
    }
}

fn write_span(out: &mut String, tag: char, body: &str) {
    out.push(tag);
    out.push_str(&(body.len() + 1).to_string());
    out.push('!');
    out.push_str(body);
}
