//! Host-defined modules.
//!
//! A [`NativeModule`] implements [`ModuleImpl`] with Rust closures. Device
//! bindings and test doubles are built this way and registered next to
//! bytecode modules.
//!
//! # Example
//!
//! ```
//! use lowrun::NativeModule;
//! use lowrun::Value;
//!
//! let module = NativeModule::builder("math")
//!     .export_with_signature("double", "I5!S3!t6R5!S3!t6", |_imports, inputs, outputs| {
//!         let Some(Value::I32(x)) = inputs.get(0).and_then(|v| v.as_value()) else {
//!             return Err(lowrun::Status::invalid_argument("expected an i32"));
//!         };
//!         outputs.set(0, Value::I32(x * 2))
//!     })
//!     .build();
//! assert_eq!(module.name(), "math");
//! ```

use std::sync::Arc;

use crate::context::Imports;
use crate::engine::Linkage;
use crate::engine::ModuleImpl;
use crate::module::ExecutableModule;
use crate::status::Status;
use crate::variant::VariantList;

pub type NativeFn =
    Box<dyn Fn(&Imports<'_>, &VariantList, &mut VariantList) -> Result<(), Status> + Send + Sync>;

struct NativeFunction {
    name: String,
    attrs: Vec<(String, String)>,
    handler: NativeFn,
}

pub struct NativeModule {
    name: String,
    imports: Vec<String>,
    exports: Vec<NativeFunction>,
}

impl NativeModule {
    pub fn builder(name: impl Into<String>) -> NativeModuleBuilder {
        NativeModuleBuilder {
            module: NativeModule {
                name: name.into(),
                imports: Vec::new(),
                exports: Vec::new(),
            },
        }
    }

    fn export(&self, linkage: Linkage, ordinal: u32) -> Result<&NativeFunction, Status> {
        if linkage != Linkage::Export {
            return Err(Status::not_found(format!("native modules have no {} functions", linkage)));
        }
        self.exports
            .get(ordinal as usize)
            .ok_or_else(|| {
                Status::out_of_range(format!("export ordinal {} in '{}'", ordinal, self.name))
            })
    }
}

impl ModuleImpl for NativeModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn imports(&self) -> &[String] {
        &self.imports
    }

    fn lookup_function(&self, linkage: Linkage, name: &str) -> Result<u32, Status> {
        let position = match linkage {
            Linkage::Export => self.exports.iter().position(|f| f.name == name),
            Linkage::Import => self.imports.iter().position(|i| i == name),
            Linkage::Internal => None,
        };
        position
            .map(|p| p as u32)
            .ok_or_else(|| Status::not_found(format!("{} '{}' in '{}'", linkage, name, self.name)))
    }

    fn reflection_attr(
        &self,
        linkage: Linkage,
        ordinal: u32,
        index: usize,
    ) -> Result<(String, String), Status> {
        let function = self.export(linkage, ordinal)?;
        function
            .attrs
            .get(index)
            .cloned()
            .ok_or_else(|| Status::not_found("no more reflection attributes"))
    }

    fn call(
        &self,
        linkage: Linkage,
        ordinal: u32,
        imports: &Imports<'_>,
        inputs: &VariantList,
        outputs: &mut VariantList,
    ) -> Result<(), Status> {
        let function = self.export(linkage, ordinal)?;
        (function.handler)(imports, inputs, outputs)
    }
}

pub struct NativeModuleBuilder {
    module: NativeModule,
}

impl NativeModuleBuilder {
    /// Declares an import, as `module.function`.
    pub fn import(mut self, name: impl Into<String>) -> Self {
        self.module.imports.push(name.into());
        self
    }

    /// Adds an export with explicit reflection attributes.
    pub fn export<F>(mut self, name: impl Into<String>, attrs: &[(&str, &str)], handler: F) -> Self
    where
        F: Fn(&Imports<'_>, &VariantList, &mut VariantList) -> Result<(), Status>
            + Send
            + Sync
            + 'static,
    {
        self.module.exports.push(NativeFunction {
            name: name.into(),
            attrs: attrs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            handler: Box::new(handler),
        });
        self
    }

    /// Adds an export carrying a raw signature in the current ABI version.
    pub fn export_with_signature<F>(
        self,
        name: impl Into<String>,
        signature: &str,
        handler: F,
    ) -> Self
    where
        F: Fn(&Imports<'_>, &VariantList, &mut VariantList) -> Result<(), Status>
            + Send
            + Sync
            + 'static,
    {
        self.export(name, &[("fv", "1"), ("f", signature)], handler)
    }

    pub fn build(self) -> ExecutableModule {
        tracing::debug!(
            name = %self.module.name,
            exports = self.module.exports.len(),
            "built native module"
        );
        ExecutableModule::synthesized(Arc::new(self.module))
    }
}
