//! The compiler toolkit as seen from the bridge.
//!
//! An [`Engine`] owns the compiler's global state (what a toolkit usually
//! calls its context). Everything it reports goes through its
//! [`DiagnosticHost`] half.

use std::borrow::Cow;
use std::path::PathBuf;

use crate::options::CompileOptions;
use crate::options::PrintOptions;
use crate::sink::DiagnosticHost;

/// The failure of an engine call. Details were already emitted as diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Failure;

/// A built-in lowering stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lowering<'a> {
    /// Target independent dataflow lowering.
    Generic,
    /// Lowering to executables for the given backends.
    Backend { targets: &'a [String] },
    /// Lowering to the bytecode dialect.
    Bytecode,
}

/// An ordered set of pipelines run as a single pass manager invocation.
#[derive(Debug)]
pub struct PassPlan<P> {
    pub stages: Vec<P>,
    /// Where to write a crash reproducer, if enabled.
    pub crash_reproducer: Option<PathBuf>,
}

/// Module source text that always ends in a NUL terminator.
///
/// Text that already carries one is borrowed. Anything else is copied once
/// with a terminator appended.
#[derive(Debug, Clone)]
pub struct SourceBuffer<'a> {
    data: Cow<'a, str>,
}

impl<'a> SourceBuffer<'a> {
    pub fn new(text: &'a str) -> Self {
        let data = if text.ends_with('\0') {
            Cow::Borrowed(text)
        } else {
            let mut owned = String::with_capacity(text.len() + 1);
            owned.push_str(text);
            owned.push('\0');
            Cow::Owned(owned)
        };
        Self { data }
    }

    /// The source with its terminator removed.
    pub fn text(&self) -> &str {
        &self.data[..self.data.len() - 1]
    }

    pub fn with_nul(&self) -> &str {
        &self.data
    }

    pub fn is_borrowed(&self) -> bool {
        matches!(self.data, Cow::Borrowed(_))
    }
}

/// A compiler toolkit.
pub trait Engine: DiagnosticHost + 'static {
    /// The root of a parsed module.
    type Module: Send;
    /// A parsed, runnable pass pipeline.
    type Pipeline: Send;

    /// Parses module source. On failure, returns `None` after emitting diagnostics.
    fn parse_source(&self, source: &SourceBuffer<'_>) -> Option<Self::Module>;

    fn print_module(&self, module: &Self::Module, options: &PrintOptions) -> String;

    /// Parses a textual pipeline spec. Errors carry the parser's own text.
    fn parse_pipeline(&self, spec: &str) -> Result<Self::Pipeline, String>;

    /// Builds one of the built-in lowering pipelines.
    fn lowering_pipeline(&self, stage: Lowering<'_>) -> Self::Pipeline;

    fn run_pipelines(
        &self,
        plan: &PassPlan<Self::Pipeline>,
        module: &mut Self::Module,
    ) -> Result<(), Failure>;

    fn translate_to_bytecode(
        &self,
        module: &Self::Module,
        options: &CompileOptions,
    ) -> Result<Vec<u8>, Failure>;
}
