//! # Diagnostic Sinks
//!
//! Engines report diagnostics to whichever handler was registered last.
//! A [`DiagnosticSink`] registers one such handler for a lexical scope and
//! collects everything emitted while it is the innermost.
//!
//! ## Philosophy
//!
//! - **Scoped**: the handler is erased when the sink drops, on every path.
//! - **Nestable**: a sink with a parent hands its leftover records up on drop, in order, once.
//! - **Infallible**: registration never fails and a poisoned lock is still usable.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use crate::diagnostic;
use crate::diagnostic::Diagnostic;

/// Strong type for registered handler identifiers.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub struct HandlerId(pub u64);

impl std::fmt::Display for HandlerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "handler-{}", self.0)
    }
}

pub type Handler = Box<dyn FnMut(Diagnostic) + Send>;

/// Anything diagnostics can be routed out of.
pub trait DiagnosticHost: Send + Sync {
    /// Installs `handler` as the newest handler.
    fn register_handler(&self, handler: Handler) -> HandlerId;

    /// Removes a handler. Unknown ids are ignored.
    fn erase_handler(&self, id: HandlerId);
}

/// A handler registry engines can embed to implement [`DiagnosticHost`].
pub struct HandlerStack {
    handlers: Mutex<Vec<(HandlerId, Handler)>>,
    next_id: AtomicU64,
}

impl HandlerStack {
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Routes a diagnostic to the newest handler.
    pub fn emit(&self, diagnostic: Diagnostic) {
        let mut handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        match handlers.last_mut() {
            Some((_, handler)) => handler(diagnostic),
            None => tracing::warn!(
                severity = diagnostic.severity.tag(),
                message = %diagnostic.message,
                "diagnostic emitted with no handler registered"
            ),
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for HandlerStack {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagnosticHost for HandlerStack {
    fn register_handler(&self, handler: Handler) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, handler));
        tracing::trace!(%id, "registered diagnostic handler");
        id
    }

    fn erase_handler(&self, id: HandlerId) {
        let mut handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pos) = handlers.iter().position(|(h, _)| *h == id) {
            handlers.remove(pos);
            tracing::trace!(%id, "erased diagnostic handler");
        }
    }
}

/// An ordered, shared list of captured diagnostics.
#[derive(Clone, Default)]
pub struct Diagnostics(Arc<Mutex<Vec<Diagnostic>>>);

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Diagnostic>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, diagnostic: Diagnostic) {
        self.lock().push(diagnostic);
    }

    /// Moves `records` onto the end, keeping their order.
    pub fn append(&self, mut records: Vec<Diagnostic>) {
        self.lock().append(&mut records);
    }

    pub fn take(&self) -> Vec<Diagnostic> {
        std::mem::take(&mut *self.lock())
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copies the current records without consuming them.
    pub fn snapshot(&self) -> Vec<Diagnostic> {
        self.lock().clone()
    }

    /// Renders and clears.
    pub fn render(&self, prefix: Option<&str>) -> String {
        diagnostic::render(prefix, &self.take())
    }

    /// A handler appending into this list.
    pub fn handler(&self) -> Handler {
        let records = self.clone();
        Box::new(move |d| records.push(d))
    }
}

impl std::fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.lock().iter()).finish()
    }
}

/// Captures diagnostics for as long as it lives.
pub struct DiagnosticSink<'a> {
    host: &'a dyn DiagnosticHost,
    handler: Option<HandlerId>,
    captured: Diagnostics,
    parent: Option<&'a Diagnostics>,
}

impl<'a> DiagnosticSink<'a> {
    /// Starts capturing on `host`. With a parent, records still held when the
    /// sink ends are moved to it.
    pub fn begin(host: &'a dyn DiagnosticHost, parent: Option<&'a Diagnostics>) -> Self {
        let captured = Diagnostics::new();
        let handler = host.register_handler(captured.handler());
        Self { host, handler: Some(handler), captured, parent }
    }

    /// Starts a child sink that forwards into this one.
    pub fn nested(&self) -> DiagnosticSink<'_> {
        DiagnosticSink::begin(self.host, Some(&self.captured))
    }

    /// Ends capture now. Same as dropping.
    pub fn end(self) {}

    /// Renders the captured diagnostics after `prefix` and clears them.
    pub fn render(&self, prefix: Option<&str>) -> String {
        self.captured.render(prefix)
    }

    pub fn clear(&self) {
        self.captured.clear();
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.captured
    }

    pub fn is_active(&self) -> bool {
        self.handler.is_some()
    }
}

impl Drop for DiagnosticSink<'_> {
    fn drop(&mut self) {
        let Some(id) = self.handler.take() else {
            return;
        };
        self.host.erase_handler(id);
        if let Some(parent) = self.parent {
            parent.append(self.captured.take());
        }
    }
}
