//! Ownership tokens for memory that crosses the host/engine boundary.

use std::ops::Deref;
use std::sync::Arc;

/// An object with an external reference count.
///
/// Engines that keep a pointer into host memory take a retain for the
/// duration and give it back with a release. The Rust `Arc` count keeps the
/// allocation alive; this count is what the owner observes.
pub trait Retain: Send + Sync {
    fn retain(&self);
    fn release(&self);
}

/// Something whose bytes an engine may read in place.
pub trait ByteSource: Retain {
    fn bytes(&self) -> &[u8];
}

/// A held retain on `T`.
///
/// Construction retains, every clone retains, every drop releases. The
/// release runs in `Drop`, so it happens exactly once no matter how the
/// holder goes away.
pub struct Retained<T: ?Sized + Retain> {
    inner: Arc<T>,
}

impl<T: ?Sized + Retain> Retained<T> {
    pub fn new(inner: Arc<T>) -> Self {
        inner.retain();
        Self { inner }
    }

    /// The underlying shared handle.
    pub fn shared(&self) -> &Arc<T> {
        &self.inner
    }
}

impl<T: ?Sized + Retain> Clone for Retained<T> {
    fn clone(&self) -> Self {
        Self::new(Arc::clone(&self.inner))
    }
}

impl<T: ?Sized + Retain> Drop for Retained<T> {
    fn drop(&mut self) {
        self.inner.release();
    }
}

impl<T: ?Sized + Retain> Deref for Retained<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T: ?Sized + Retain> std::fmt::Debug for Retained<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retained").finish_non_exhaustive()
    }
}
