//! # Compiler Context
//!
//! One [`CompilerContext`] wraps one [`Engine`]. It keeps a default capture
//! registered for its whole life so that nothing the engine reports is lost,
//! and it decides where crash reproducers go.
//!
//! ## Crash reproducers
//!
//! A process-wide default can be set with
//! [`CompilerContext::set_default_crash_reproducer_path`]. Each context
//! snapshots that default when it is built; an explicit per-context override
//! takes precedence. An empty path disables generation.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use crate::engine::Engine;
use crate::engine::SourceBuffer;
use crate::error::Error;
use crate::error::Result;
use crate::module::CompiledModule;
use crate::sink::DiagnosticHost;
use crate::sink::DiagnosticSink;
use crate::sink::Diagnostics;
use crate::sink::HandlerId;

static DEFAULT_CRASH_REPRODUCER_PATH: Mutex<Option<PathBuf>> = Mutex::new(None);

pub struct CompilerContext<E: Engine> {
    engine: E,
    default_capture: Diagnostics,
    default_handler: HandlerId,
    crash_reproducer: Mutex<Option<PathBuf>>,
    default_crash_reproducer: Option<PathBuf>,
}

impl<E: Engine> CompilerContext<E> {
    pub fn new(engine: E) -> Arc<Self> {
        let default_capture = Diagnostics::new();
        let default_handler = engine.register_handler(default_capture.handler());
        let default_crash_reproducer = Self::default_crash_reproducer_path();
        tracing::debug!(?default_crash_reproducer, "created compiler context");
        Arc::new(Self {
            engine,
            default_capture,
            default_handler,
            crash_reproducer: Mutex::new(None),
            default_crash_reproducer,
        })
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Parses module source text. A trailing NUL is accepted.
    pub fn parse_module(self: &Arc<Self>, text: &str) -> Result<CompiledModule<E>> {
        let source = SourceBuffer::new(text);
        let sink = self.capture_diagnostics();
        match self.engine.parse_source(&source) {
            Some(module) => {
                tracing::debug!(bytes = source.text().len(), "parsed module source");
                drop(sink);
                Ok(CompiledModule::new(Arc::clone(self), module))
            }
            None => {
                let rendered = sink.render(Some("Error parsing source:"));
                tracing::debug!("module source failed to parse");
                Err(Error::Parse(rendered))
            }
        }
    }

    /// Starts a capture scope whose leftovers land in the context diagnostics.
    pub fn capture_diagnostics(&self) -> DiagnosticSink<'_> {
        DiagnosticSink::begin(&self.engine, Some(&self.default_capture))
    }

    /// Renders and clears the context diagnostics.
    pub fn diagnostics(&self) -> String {
        self.default_capture.render(None)
    }

    pub fn clear_diagnostics(&self) {
        self.default_capture.clear();
    }

    /// The override if set, else the default captured at construction.
    pub fn crash_reproducer_path(&self) -> Option<PathBuf> {
        let over = self.crash_reproducer.lock().unwrap_or_else(PoisonError::into_inner);
        over.clone().or_else(|| self.default_crash_reproducer.clone())
    }

    pub fn set_crash_reproducer_path(&self, path: Option<PathBuf>) {
        *self.crash_reproducer.lock().unwrap_or_else(PoisonError::into_inner) = path;
    }

    /// The path pass plans should use, with empty paths treated as disabled.
    pub(crate) fn effective_crash_reproducer(&self) -> Option<PathBuf> {
        self.crash_reproducer_path().filter(|p| p != Path::new(""))
    }

    pub fn default_crash_reproducer_path() -> Option<PathBuf> {
        DEFAULT_CRASH_REPRODUCER_PATH
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Sets the default for contexts created from now on.
    pub fn set_default_crash_reproducer_path(path: Option<PathBuf>) {
        *DEFAULT_CRASH_REPRODUCER_PATH.lock().unwrap_or_else(PoisonError::into_inner) = path;
    }
}

impl<E: Engine> Drop for CompilerContext<E> {
    fn drop(&mut self) {
        self.engine.erase_handler(self.default_handler);
    }
}
