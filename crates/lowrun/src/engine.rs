//! The bytecode VM as seen from the bridge.
//!
//! The bridge never interprets bytecode. A [`Vm`] turns bytes into
//! [`ModuleImpl`]s and a module executes its own functions.

use std::sync::Arc;

use lowcore::ByteSource;
use lowcore::Retained;

use crate::context::Imports;
use crate::status::Status;
use crate::variant::VariantList;

/// How a function is visible from outside its module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Linkage {
    Internal,
    Import,
    Export,
}

impl std::fmt::Display for Linkage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Linkage::Internal => write!(f, "internal"),
            Linkage::Import => write!(f, "import"),
            Linkage::Export => write!(f, "export"),
        }
    }
}

pub trait Vm: Send + Sync {
    /// Prepares VM-wide state. Called once per [`crate::RuntimeInstance`].
    fn create_instance(&self) -> Result<(), Status>;

    /// Validates and loads a bytecode module.
    ///
    /// The returned module reads `source` in place and keeps it for as long as
    /// it lives. On failure `source` is simply dropped.
    fn load_bytecode(
        &self,
        source: Retained<dyn ByteSource>,
    ) -> Result<Arc<dyn ModuleImpl>, Status>;
}

/// A loaded module.
pub trait ModuleImpl: Send + Sync {
    fn name(&self) -> &str;

    /// Functions this module calls, as `module.function`.
    fn imports(&self) -> &[String];

    /// Resolves a function to its ordinal within `linkage`. `NotFound` if absent.
    fn lookup_function(&self, linkage: Linkage, name: &str) -> Result<u32, Status>;

    /// The `index`th reflection attribute of a function. `NotFound` past the end.
    fn reflection_attr(
        &self,
        linkage: Linkage,
        ordinal: u32,
        index: usize,
    ) -> Result<(String, String), Status>;

    /// Runs a function. `outputs` arrives sized to the function's results.
    fn call(
        &self,
        linkage: Linkage,
        ordinal: u32,
        imports: &Imports<'_>,
        inputs: &VariantList,
        outputs: &mut VariantList,
    ) -> Result<(), Status>;
}
