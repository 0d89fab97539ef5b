//! Immutable byte regions.

use std::ops::Deref;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use crate::retain::ByteSource;
use crate::retain::Retain;

type Region = Box<dyn AsRef<[u8]> + Send + Sync>;
type ReleaseFn = Box<dyn FnOnce() + Send + Sync>;

enum Storage {
    Owned(Box<[u8]>),
    External {
        region: Region,
        on_release: Option<ReleaseFn>,
    },
}

/// A read-only byte region with no interpretation attached.
///
/// Compiler output lands here, and the runtime loads modules straight out of
/// it. The bytes are either owned or borrowed from an external producer whose
/// release callback fires once when the blob is dropped.
pub struct OpaqueBlob {
    storage: Storage,
    retains: AtomicUsize,
}

impl OpaqueBlob {
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self {
            storage: Storage::Owned(bytes.into_boxed_slice()),
            retains: AtomicUsize::new(0),
        }
    }

    pub fn from_string(text: String) -> Self {
        Self::from_vec(text.into_bytes())
    }

    /// Wraps memory owned elsewhere. `on_release` runs when the blob drops.
    pub fn external<R, F>(region: R, on_release: F) -> Self
    where
        R: AsRef<[u8]> + Send + Sync + 'static,
        F: FnOnce() + Send + Sync + 'static,
    {
        Self {
            storage: Storage::External {
                region: Box::new(region),
                on_release: Some(Box::new(on_release)),
            },
            retains: AtomicUsize::new(0),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        match &self.storage {
            Storage::Owned(b) => b,
            Storage::External { region, .. } => (**region).as_ref(),
        }
    }

    /// The bytes as UTF-8, for text output formats.
    pub fn as_text(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(self.bytes())
    }

    pub fn len(&self) -> usize {
        self.bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes().is_empty()
    }

    /// Outstanding retains taken by engines reading this blob in place.
    pub fn ref_count(&self) -> usize {
        self.retains.load(Ordering::Acquire)
    }
}

impl Retain for OpaqueBlob {
    fn retain(&self) {
        self.retains.fetch_add(1, Ordering::AcqRel);
    }

    fn release(&self) {
        self.retains.fetch_sub(1, Ordering::AcqRel);
    }
}

impl ByteSource for OpaqueBlob {
    fn bytes(&self) -> &[u8] {
        OpaqueBlob::bytes(self)
    }
}

impl Deref for OpaqueBlob {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.bytes()
    }
}

impl AsRef<[u8]> for OpaqueBlob {
    fn as_ref(&self) -> &[u8] {
        self.bytes()
    }
}

impl Drop for OpaqueBlob {
    fn drop(&mut self) {
        if let Storage::External { on_release, .. } = &mut self.storage {
            if let Some(release) = on_release.take() {
                release();
            }
        }
    }
}

impl std::fmt::Debug for OpaqueBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpaqueBlob")
            .field("len", &self.len())
            .field("ref_count", &self.ref_count())
            .finish()
    }
}
