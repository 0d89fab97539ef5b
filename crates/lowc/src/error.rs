//! Compiler bridge errors.
//!
//! Each variant carries fully rendered text: the failure prefix followed by
//! every diagnostic captured while the failing call ran.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Module source did not parse.
    Parse(String),
    /// A pass pipeline spec is malformed. Nothing was run.
    Validation(String),
    /// A pass pipeline failed while running.
    Compile(String),
    /// The module could not be translated to bytecode.
    Serialization(String),
}

impl Error {
    /// The rendered message, without the variant name.
    pub fn message(&self) -> &str {
        match self {
            Self::Parse(m) | Self::Validation(m) | Self::Compile(m) | Self::Serialization(m) => m,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;
