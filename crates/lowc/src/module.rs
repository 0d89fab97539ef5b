//! Parsed modules.

use std::sync::Arc;

use lowcore::OpaqueBlob;

use crate::context::CompilerContext;
use crate::engine::Engine;
use crate::engine::Lowering;
use crate::engine::PassPlan;
use crate::error::Error;
use crate::error::Result;
use crate::options::CompileOptions;
use crate::options::PrintOptions;

/// A module root owned by its context's engine.
///
/// Holds the context alive for as long as the module exists.
pub struct CompiledModule<E: Engine> {
    context: Arc<CompilerContext<E>>,
    module: E::Module,
}

impl<E: Engine> CompiledModule<E> {
    pub(crate) fn new(context: Arc<CompilerContext<E>>, module: E::Module) -> Self {
        Self { context, module }
    }

    pub fn context(&self) -> &Arc<CompilerContext<E>> {
        &self.context
    }

    pub fn module(&self) -> &E::Module {
        &self.module
    }

    pub fn to_text(&self, options: &PrintOptions) -> String {
        self.context.engine().print_module(&self.module, options)
    }

    /// Runs textual pass pipelines over the module in place.
    ///
    /// Every spec is parsed before anything runs. A failed run may leave the
    /// module partially transformed.
    pub fn run_pipelines<S: AsRef<str>>(&mut self, pipelines: &[S]) -> Result<()> {
        let engine = self.context.engine();
        let stages = pipelines
            .iter()
            .map(|spec| engine.parse_pipeline(spec.as_ref()))
            .collect::<std::result::Result<Vec<_>, String>>()
            .map_err(Error::Validation)?;

        let plan = PassPlan {
            stages,
            crash_reproducer: self.context.effective_crash_reproducer(),
        };

        let sink = self.context.capture_diagnostics();
        if engine.run_pipelines(&plan, &mut self.module).is_err() {
            return Err(Error::Compile(sink.render(Some("Error running pass pipelines:"))));
        }
        tracing::debug!(count = pipelines.len(), "ran pass pipelines");
        Ok(())
    }

    /// Lowers the module for `target_backends` and serializes it to bytecode.
    pub fn compile<S: AsRef<str>>(
        &mut self,
        options: &CompileOptions,
        target_backends: &[S],
    ) -> Result<OpaqueBlob> {
        let engine = self.context.engine();
        let targets: Vec<String> = target_backends.iter().map(|t| t.as_ref().to_string()).collect();
        let plan = PassPlan {
            stages: vec![
                engine.lowering_pipeline(Lowering::Generic),
                engine.lowering_pipeline(Lowering::Backend { targets: &targets }),
                engine.lowering_pipeline(Lowering::Bytecode),
            ],
            crash_reproducer: self.context.effective_crash_reproducer(),
        };

        let sink = self.context.capture_diagnostics();
        if engine.run_pipelines(&plan, &mut self.module).is_err() {
            return Err(Error::Compile(sink.render(Some("Error compiling module:"))));
        }

        let bytes = match engine.translate_to_bytecode(&self.module, options) {
            Ok(bytes) => bytes,
            Err(_) => {
                let rendered = sink.render(Some("Error serializing to bytecode:"));
                return Err(Error::Serialization(rendered));
            }
        };
        tracing::debug!(
            ?targets,
            format = ?options.output_format,
            bytes = bytes.len(),
            "compiled module"
        );
        Ok(OpaqueBlob::from_vec(bytes))
    }
}
