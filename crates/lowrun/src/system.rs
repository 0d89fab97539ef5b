//! # System API
//!
//! The high-level way to run compiled modules: a [`SystemContext`] owns a
//! runtime context, binds every registered module by name and resolves
//! functions on first use.
//!
//! ## Philosophy
//!
//! - **Dynamic or static**: without an explicit module list the context stays open and takes
//!   modules later; with one it is closed at creation.
//! - **Lazy**: a function's ABI is resolved the first time it is asked for, then cached.

use std::sync::Arc;

use dashmap::DashMap;

use crate::abi::FunctionAbi;
use crate::abi::FunctionAbiResolver;
use crate::abi::HostValue;
use crate::buffer::Allocator;
use crate::buffer::HeapAllocator;
use crate::context::RuntimeContext;
use crate::error::Error;
use crate::error::Result;
use crate::instance::RuntimeInstance;
use crate::module::ExecutableModule;
use crate::module::Function;
use crate::status::Status;

/// What every [`SystemContext`] starts from.
#[derive(Clone)]
pub struct SystemConfig {
    pub instance: RuntimeInstance,
    pub allocator: Arc<dyn Allocator>,
    /// Registered ahead of any user module, e.g. device bindings.
    pub default_modules: Vec<ExecutableModule>,
}

impl SystemConfig {
    pub fn new(instance: RuntimeInstance) -> Self {
        Self {
            instance,
            allocator: Arc::new(HeapAllocator),
            default_modules: Vec::new(),
        }
    }

    pub fn allocator(mut self, allocator: Arc<dyn Allocator>) -> Self {
        self.allocator = allocator;
        self
    }

    pub fn default_module(mut self, module: ExecutableModule) -> Self {
        self.default_modules.push(module);
        self
    }
}

pub struct SystemContext {
    config: SystemConfig,
    context: RuntimeContext,
    resolver: FunctionAbiResolver,
    dynamic: bool,
    modules: DashMap<String, Arc<BoundModule>>,
}

impl SystemContext {
    pub fn new(config: SystemConfig, modules: Option<Vec<ExecutableModule>>) -> Result<Self> {
        let resolver = FunctionAbiResolver::new(Arc::clone(&config.allocator));
        let dynamic = modules.is_none();

        let (context, bound) = match modules {
            Some(modules) => {
                let mut all = config.default_modules.clone();
                all.extend(modules);
                let context = RuntimeContext::create(&config.instance, Some(&all))?;
                (context, all)
            }
            None => {
                let context = RuntimeContext::create(&config.instance, None)?;
                context.register_modules(&config.default_modules)?;
                (context, config.default_modules.clone())
            }
        };

        let system = Self {
            config,
            context,
            resolver,
            dynamic,
            modules: DashMap::new(),
        };
        for m in bound {
            system.bind(m);
        }
        tracing::debug!(
            id = %system.context.id(),
            dynamic,
            modules = system.modules.len(),
            "created system context"
        );
        Ok(system)
    }

    fn bind(&self, module: ExecutableModule) {
        let bound = BoundModule {
            context: self.context.clone(),
            resolver: self.resolver.clone(),
            module,
            functions: DashMap::new(),
        };
        self.modules.insert(bound.name().to_string(), Arc::new(bound));
    }

    pub fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    pub fn context(&self) -> &RuntimeContext {
        &self.context
    }

    pub fn module(&self, name: &str) -> Option<Arc<BoundModule>> {
        self.modules.get(name).map(|m| Arc::clone(m.value()))
    }

    pub fn module_names(&self) -> Vec<String> {
        self.modules.iter().map(|m| m.key().clone()).collect()
    }

    /// Registers more modules with a dynamic context.
    pub fn add_modules(&self, modules: &[ExecutableModule]) -> Result<()> {
        if !self.dynamic {
            return Err(Error::runtime(
                "Cannot add modules to a static context",
                Status::failed_precondition("context was created with a closed module set"),
            ));
        }

        let mut incoming = std::collections::HashSet::new();
        for m in modules {
            if self.modules.contains_key(m.name()) || !incoming.insert(m.name()) {
                return Err(Error::InvalidArgument(format!(
                    "Attempt to register duplicate module: '{}'",
                    m.name()
                )));
            }
        }

        self.context.register_modules(modules)?;
        for m in modules {
            self.bind(m.clone());
        }
        Ok(())
    }

    pub fn add_module(&self, module: ExecutableModule) -> Result<()> {
        self.add_modules(std::slice::from_ref(&module))
    }
}

/// Loads modules into a new static context and returns them bound, in order.
pub fn load_modules(
    config: SystemConfig,
    modules: Vec<ExecutableModule>,
) -> Result<Vec<Arc<BoundModule>>> {
    let names: Vec<String> = modules.iter().map(|m| m.name().to_string()).collect();
    let system = SystemContext::new(config, Some(modules))?;
    names
        .iter()
        .map(|name| {
            system
                .module(name)
                .ok_or_else(|| Error::InvalidArgument(format!("Module '{}' was not bound", name)))
        })
        .collect()
}

pub fn load_module(config: SystemConfig, module: ExecutableModule) -> Result<Arc<BoundModule>> {
    let name = module.name().to_string();
    load_modules(config, vec![module])?
        .pop()
        .ok_or_else(|| Error::InvalidArgument(format!("Module '{}' was not bound", name)))
}

/// A module bound to the context it was registered in.
pub struct BoundModule {
    context: RuntimeContext,
    resolver: FunctionAbiResolver,
    module: ExecutableModule,
    functions: DashMap<String, Arc<BoundFunction>>,
}

impl BoundModule {
    pub fn name(&self) -> &str {
        self.module.name()
    }

    pub fn module(&self) -> &ExecutableModule {
        &self.module
    }

    /// Resolves an exported function, caching it for later calls.
    pub fn function(&self, name: &str) -> Result<Arc<BoundFunction>> {
        if let Some(f) = self.functions.get(name) {
            return Ok(Arc::clone(f.value()));
        }

        let function = self.module.lookup_export(name)?.ok_or_else(|| {
            let msg = format!("Function '{}' not found in module '{}'", name, self.name());
            Error::InvalidArgument(msg)
        })?;
        let abi = self.resolver.resolve(&function)?;
        let bound = Arc::new(BoundFunction {
            context: self.context.clone(),
            function,
            abi,
        });
        let entry = self.functions.entry(name.to_string()).or_insert(bound);
        Ok(Arc::clone(entry.value()))
    }
}

impl std::fmt::Debug for BoundModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<BoundModule {:?}>", self.module)
    }
}

/// A function ready to call with host values.
pub struct BoundFunction {
    context: RuntimeContext,
    function: Function,
    abi: FunctionAbi,
}

impl BoundFunction {
    pub fn abi(&self) -> &FunctionAbi {
        &self.abi
    }

    pub fn function(&self) -> &Function {
        &self.function
    }

    /// Packs `args`, invokes synchronously and unpacks the results.
    pub fn call(&self, args: &[HostValue]) -> Result<Vec<HostValue>> {
        let inputs = self.abi.raw_pack(args)?;
        let mut results = self.abi.allocate_results(&inputs, false)?;
        self.context.invoke(&self.function, &inputs, &mut results)?;
        self.abi.raw_unpack(&results)
    }
}

impl std::fmt::Debug for BoundFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<BoundFunction {} ({:?})>", self.abi, self.function)
    }
}
