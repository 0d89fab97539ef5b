//! # Lowrun
//!
//! Host-side bridge to a bytecode virtual machine. The VM itself sits behind
//! the [`Vm`] and [`ModuleImpl`] traits; this crate owns the way in and out:
//!
//! - **Loading**: modules are created from bytecode that stays owned by the caller.
//! - **Linking**: contexts group modules and resolve their imports.
//! - **Calling**: reflection metadata tells [`FunctionAbi`] how to pack arguments and unpack
//!   results.
//! - **Reading results**: result buffers are mapped and exposed as [`HostArray`]s without a copy.
//!
//! ## Philosophy
//!
//! - **Synchronous**: no internal threads; every call blocks until the VM returns.
//! - **Balanced**: every retain, map and handler registration is undone in `Drop`.
//! - **Statuses, not panics**: engine failures surface as [`Error::Runtime`] with context.

pub mod abi;
pub mod buffer;
pub mod context;
pub mod engine;
pub mod error;
pub mod host;
pub mod instance;
pub mod module;
pub mod native;
pub mod status;
pub mod system;
pub mod text;
pub mod variant;

pub use abi::FunctionAbi;
pub use abi::FunctionAbiResolver;
pub use abi::HostValue;
pub use abi::Reflection;
pub use buffer::Buffer;
pub use buffer::HeapAllocator;
pub use buffer::HeapBuffer;
pub use context::ContextId;
pub use context::RuntimeContext;
pub use engine::Linkage;
pub use engine::ModuleImpl;
pub use engine::Vm;
pub use error::Error;
pub use error::Result;
pub use host::HostArray;
pub use instance::RuntimeInstance;
pub use module::ExecutableModule;
pub use module::Function;
pub use native::NativeModule;
pub use status::Status;
pub use status::StatusCode;
pub use system::SystemConfig;
pub use system::SystemContext;
pub use variant::Value;
pub use variant::Variant;
pub use variant::VariantList;

pub use lowsig::ScalarType;

#[cfg(test)]
mod tests;
