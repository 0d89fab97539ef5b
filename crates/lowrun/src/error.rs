//! Runtime bridge errors.

use crate::status::Status;
use crate::status::StatusCode;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The engine returned a failing status.
    Runtime { context: String, status: Status },
    /// The bridge does not support this yet.
    Unimplemented(String),
    /// A caller-provided value does not fit what the function expects.
    InvalidArgument(String),
}

impl Error {
    pub fn runtime(context: impl Into<String>, status: Status) -> Self {
        Self::Runtime { context: context.into(), status }
    }

    /// The engine status code, for runtime errors.
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            Self::Runtime { status, .. } => Some(status.code),
            _ => None,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Runtime { context, status } => write!(f, "{}: {}", context, status),
            Self::Unimplemented(msg) => write!(f, "{}", msg),
            Self::InvalidArgument(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Attaches a context string to a failing engine status.
pub(crate) trait CheckStatus<T> {
    fn check(self, context: &str) -> Result<T>;
}

impl<T> CheckStatus<T> for std::result::Result<T, Status> {
    fn check(self, context: &str) -> Result<T> {
        self.map_err(|status| Error::runtime(context, status))
    }
}
