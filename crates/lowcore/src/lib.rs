//! # Lowcore
//!
//! Primitives shared by `lowc` and `lowrun`:
//!
//! - [`OpaqueBlob`]: an immutable byte region handed across the compiler/runtime boundary.
//! - [`Retain`] / [`Retained`]: an ownership token that keeps external memory alive
//!   for as long as an engine reads it in place.
//!
//! ## Philosophy
//!
//! - **Zero copy**: bytes are read where they live. Nothing here clones payloads.
//! - **Balanced ownership**: every retain has exactly one matching release, on every path.

pub mod blob;
pub mod retain;

pub use blob::OpaqueBlob;
pub use retain::ByteSource;
pub use retain::Retain;
pub use retain::Retained;
