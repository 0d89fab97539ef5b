//! # Runtime Contexts
//!
//! A [`RuntimeContext`] is an ordered set of modules linked against each
//! other, plus the state functions need while running.
//!
//! ## Philosophy
//!
//! - **Open or closed**: a context created without modules accepts more later; one created
//!   with a module list never changes.
//! - **All or nothing**: registration links the whole new set first and commits only if every
//!   import resolves.
//! - **Serialized**: registration takes the write lock, invocation the read lock.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::PoisonError;
use std::sync::RwLock;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use crate::engine::Linkage;
use crate::error::CheckStatus;
use crate::error::Error;
use crate::error::Result;
use crate::instance::RuntimeInstance;
use crate::module::ExecutableModule;
use crate::module::Function;
use crate::status::Status;
use crate::variant::VariantList;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Strong type for context identifiers. Unique within the process.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub struct ContextId(pub u64);

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "context-{}", self.0)
    }
}

/// A module set with every import resolved.
#[derive(Default)]
struct Linked {
    modules: Vec<ExecutableModule>,
    /// Per module, per import: (module index, export ordinal).
    imports: Vec<Vec<(usize, u32)>>,
}

impl Linked {
    fn link(modules: Vec<ExecutableModule>) -> std::result::Result<Self, Status> {
        let mut seen = HashSet::new();
        for m in &modules {
            if !seen.insert(m.name()) {
                let msg = format!("module '{}' registered twice", m.name());
                return Err(Status::already_exists(msg));
            }
        }

        let mut imports = Vec::with_capacity(modules.len());
        for m in &modules {
            let mut resolved = Vec::with_capacity(m.imports().len());
            for import in m.imports() {
                let (module_name, function_name) = import
                    .split_once('.')
                    .ok_or_else(|| {
                        Status::invalid_argument(format!("malformed import '{}'", import))
                    })?;
                let target = modules
                    .iter()
                    .position(|t| t.name() == module_name)
                    .ok_or_else(|| {
                        Status::not_found(format!(
                            "module '{}' imported by '{}' is not registered",
                            module_name,
                            m.name()
                        ))
                    })?;
                let ordinal = modules[target]
                    .raw()
                    .lookup_function(Linkage::Export, function_name)
                    .map_err(|s| {
                        if s.is_not_found() {
                            Status::not_found(format!(
                                "unresolved import '{}' in module '{}'",
                                import,
                                m.name()
                            ))
                        } else {
                            s
                        }
                    })?;
                resolved.push((target, ordinal));
            }
            imports.push(resolved);
        }

        Ok(Self { modules, imports })
    }

    fn position(&self, module: &ExecutableModule) -> Option<usize> {
        self.modules.iter().position(|m| m.ptr_eq(module))
    }
}

/// The imports of one module within a linked context, callable while that
/// module runs.
pub struct Imports<'a> {
    linked: &'a Linked,
    module: usize,
}

impl Imports<'_> {
    pub fn len(&self) -> usize {
        self.linked.imports[self.module].len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Calls the `index`th import of the running module.
    pub fn call(
        &self,
        index: usize,
        inputs: &VariantList,
        outputs: &mut VariantList,
    ) -> std::result::Result<(), Status> {
        let (target, ordinal) = *self.linked.imports[self.module]
            .get(index)
            .ok_or_else(|| Status::out_of_range(format!("import #{} does not exist", index)))?;
        let callee = Imports { linked: self.linked, module: target };
        self.linked.modules[target]
            .raw()
            .call(Linkage::Export, ordinal, &callee, inputs, outputs)
    }

    /// Calls an import by its `module.function` name.
    pub fn call_by_name(
        &self,
        name: &str,
        inputs: &VariantList,
        outputs: &mut VariantList,
    ) -> std::result::Result<(), Status> {
        let index = self.linked.modules[self.module]
            .imports()
            .iter()
            .position(|i| i == name)
            .ok_or_else(|| Status::not_found(format!("no import named '{}'", name)))?;
        self.call(index, inputs, outputs)
    }
}

struct ContextInner {
    id: ContextId,
    instance: RuntimeInstance,
    open: bool,
    linked: RwLock<Linked>,
}

/// A set of linked modules functions run against. Cheap to clone.
#[derive(Clone)]
pub struct RuntimeContext {
    inner: Arc<ContextInner>,
}

impl RuntimeContext {
    /// Creates an open context with `None`, or a closed one linked from `modules`.
    pub fn create(
        instance: &RuntimeInstance,
        modules: Option<&[ExecutableModule]>,
    ) -> Result<Self> {
        let (open, linked) = match modules {
            None => (true, Linked::default()),
            Some(modules) => {
                let linked = Linked::link(modules.to_vec())
                    .check("Error creating vm context with modules")?;
                (false, linked)
            }
        };
        let id = ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(%id, open, modules = linked.modules.len(), "created runtime context");
        Ok(Self {
            inner: Arc::new(ContextInner {
                id,
                instance: instance.clone(),
                open,
                linked: RwLock::new(linked),
            }),
        })
    }

    pub fn id(&self) -> ContextId {
        self.inner.id
    }

    pub fn is_open(&self) -> bool {
        self.inner.open
    }

    pub fn instance(&self) -> &RuntimeInstance {
        &self.inner.instance
    }

    /// The registered modules, in registration order.
    pub fn modules(&self) -> Vec<ExecutableModule> {
        self.inner.linked.read().unwrap_or_else(PoisonError::into_inner).modules.clone()
    }

    /// Appends modules to an open context.
    pub fn register_modules(&self, modules: &[ExecutableModule]) -> Result<()> {
        if !self.inner.open {
            return Err(Error::runtime(
                "Error registering modules",
                Status::failed_precondition("context was created with a closed module set"),
            ));
        }

        let mut linked = self.inner.linked.write().unwrap_or_else(PoisonError::into_inner);
        let mut all = linked.modules.clone();
        all.extend(modules.iter().cloned());
        *linked = Linked::link(all).check("Error registering modules")?;

        tracing::debug!(
            id = %self.inner.id,
            added = modules.len(),
            total = linked.modules.len(),
            "registered modules"
        );
        Ok(())
    }

    /// Runs `function` synchronously. Results land in `outputs` in order.
    pub fn invoke(
        &self,
        function: &Function,
        inputs: &VariantList,
        outputs: &mut VariantList,
    ) -> Result<()> {
        let linked = self.inner.linked.read().unwrap_or_else(PoisonError::into_inner);
        let module = linked.position(&function.module).ok_or_else(|| {
            Error::runtime(
                "Error invoking function",
                Status::failed_precondition(format!(
                    "module '{}' is not registered in {}",
                    function.module.name(),
                    self.inner.id
                )),
            )
        })?;

        tracing::debug!(
            id = %self.inner.id,
            function = ?function,
            inputs = inputs.len(),
            "invoking function"
        );
        let imports = Imports { linked: &linked, module };
        function
            .module
            .raw()
            .call(function.linkage, function.ordinal, &imports, inputs, outputs)
            .check("Error invoking function")
    }
}

impl std::fmt::Debug for RuntimeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeContext")
            .field("id", &self.inner.id)
            .field("open", &self.inner.open)
            .finish_non_exhaustive()
    }
}
