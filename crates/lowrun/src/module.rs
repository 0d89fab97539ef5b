//! Executable modules and function handles.

use std::sync::Arc;

use lowcore::ByteSource;
use lowcore::Retained;

use crate::engine::Linkage;
use crate::engine::ModuleImpl;
use crate::error::CheckStatus;
use crate::error::Error;
use crate::error::Result;
use crate::instance::RuntimeInstance;

/// A loaded module, shared by every context it is registered in.
#[derive(Clone)]
pub struct ExecutableModule {
    inner: Arc<dyn ModuleImpl>,
}

impl ExecutableModule {
    /// Loads bytecode that stays owned by `owner`.
    ///
    /// The owner is retained for as long as the module reads its bytes and
    /// released exactly once afterwards, even when loading fails.
    pub fn from_bytecode(instance: &RuntimeInstance, owner: Arc<dyn ByteSource>) -> Result<Self> {
        let source = Retained::new(owner);
        let len = source.bytes().len();
        let inner = instance
            .vm()
            .load_bytecode(source)
            .check("Error creating vm module from flatbuffer")?;
        tracing::debug!(name = inner.name(), bytes = len, "loaded bytecode module");
        Ok(Self { inner })
    }

    /// Wraps a module implemented on the host side.
    pub fn synthesized(inner: Arc<dyn ModuleImpl>) -> Self {
        Self { inner }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn imports(&self) -> &[String] {
        self.inner.imports()
    }

    /// Looks up a function. A missing function is `Ok(None)`.
    pub fn lookup_function(&self, name: &str, linkage: Linkage) -> Result<Option<Function>> {
        match self.inner.lookup_function(linkage, name) {
            Ok(ordinal) => Ok(Some(Function {
                module: self.clone(),
                name: name.to_string(),
                linkage,
                ordinal,
            })),
            Err(status) if status.is_not_found() => Ok(None),
            Err(status) => Err(Error::runtime("Error looking up function", status)),
        }
    }

    pub fn lookup_export(&self, name: &str) -> Result<Option<Function>> {
        self.lookup_function(name, Linkage::Export)
    }

    pub(crate) fn raw(&self) -> &Arc<dyn ModuleImpl> {
        &self.inner
    }

    pub fn ptr_eq(&self, other: &ExecutableModule) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for ExecutableModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<ExecutableModule '{}'>", self.name())
    }
}

/// A resolved function of a module.
#[derive(Clone)]
pub struct Function {
    pub module: ExecutableModule,
    pub name: String,
    pub linkage: Linkage,
    pub ordinal: u32,
}

impl std::fmt::Debug for Function {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "<Function {}.{} ({} #{})>",
            self.module.name(),
            self.name,
            self.linkage,
            self.ordinal
        )
    }
}
