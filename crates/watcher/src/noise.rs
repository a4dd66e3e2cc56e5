//! Noise suppression
//!
//! Some raw events are side effects of registering a watch, or duplicate an
//! event that will arrive on another watch. They are matched on the exact
//! canonical kind set of the raw event: a superset or subset is never noise.

use crate::kind::KindSet;
use crate::source::RawEvent;

/// Why a raw event is noise
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoiseSignature {
    /// `{close_nowrite, isdir}`, closing a directory opened to watch it
    DirectoryClosed,
    /// `{isdir, open}`, opening a directory to watch it
    DirectoryOpened,
    /// `{ignored}`, the kernel invalidated a watch
    WatchInvalidated,
    /// `{delete, isdir}` on a parent, the subdirectory's own watch reports it
    SubdirectoryDeleted,
}

const SIGNATURES: [(&[&str], NoiseSignature); 4] = [
    (&["close_nowrite", "isdir"], NoiseSignature::DirectoryClosed),
    (&["isdir", "open"], NoiseSignature::DirectoryOpened),
    (&["ignored"], NoiseSignature::WatchInvalidated),
    (&["delete", "isdir"], NoiseSignature::SubdirectoryDeleted),
];

/// Match a raw kind set against the noise signatures
pub fn noise_signature(kinds: &KindSet) -> Option<NoiseSignature> {
    let canonical = kinds.canonical();
    SIGNATURES
        .iter()
        .find(|(names, _)| canonical.as_slice() == *names)
        .map(|(_, signature)| *signature)
}

/// Noise filter for one notifier
#[derive(Debug, Clone, Copy)]
pub struct NoiseFilter {
    recursive: bool,
}

impl NoiseFilter {
    pub fn new(recursive: bool) -> Self {
        Self { recursive }
    }

    /// Signature that makes `raw` noise, if any
    ///
    /// A subdirectory delete reported on its parent is only redundant when
    /// recursing: otherwise the subdirectory has no watch of its own. Even
    /// then the notifier keeps it when the subdirectory was never watched.
    pub fn classify(&self, raw: &RawEvent) -> Option<NoiseSignature> {
        match noise_signature(&raw.kinds())? {
            NoiseSignature::SubdirectoryDeleted if !self.recursive => None,
            signature => Some(signature),
        }
    }

    pub fn is_noise(&self, raw: &RawEvent) -> bool {
        self.classify(raw).is_some()
    }
}
