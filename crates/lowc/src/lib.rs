//! # Lowc
//!
//! Host-side bridge to an ahead-of-time compiler toolkit. The toolkit itself
//! (parsing, passes, bytecode translation) sits behind the [`Engine`] trait;
//! this crate owns everything around it:
//!
//! - **Diagnostics**: scoped, nestable capture with readable location output.
//! - **Context**: one engine, its default diagnostic capture and crash-reproducer settings.
//! - **Modules**: parsed module roots that can be printed, transformed and compiled.
//!
//! ## Philosophy
//!
//! - **Scoped**: every engine call runs inside a [`DiagnosticSink`] that is torn down on every
//!   path.
//! - **Readable errors**: failures carry the rendered diagnostics, not an opaque code.
//! - **Engine agnostic**: nothing here knows what a pass does.

pub mod context;
pub mod diagnostic;
pub mod engine;
pub mod error;
pub mod module;
pub mod options;
pub mod sink;

pub use context::CompilerContext;
pub use diagnostic::Diagnostic;
pub use diagnostic::Location;
pub use diagnostic::Severity;
pub use engine::Engine;
pub use error::Error;
pub use error::Result;
pub use module::CompiledModule;
pub use options::CompileOptions;
pub use options::OutputFormat;
pub use options::PrintOptions;
pub use sink::DiagnosticHost;
pub use sink::DiagnosticSink;
pub use sink::Diagnostics;
pub use sink::HandlerStack;

pub use lowcore::OpaqueBlob;
