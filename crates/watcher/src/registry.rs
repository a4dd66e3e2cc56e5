//! Watch registry
//!
//! In-memory map of live watch handles to what they watch. It is shared by the
//! event loop (removals), the population thread, and delayed-add threads
//! (insertions), so every mutation goes through one mutex.

use crate::error::SourceError;
use crate::source::{RawEventSource, WatchHandle};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, warn};

/// One registered watch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Watch {
    pub handle: WatchHandle,
    /// Absolute path being watched
    pub path: PathBuf,
    /// Captured at registration, the path may be gone later
    pub is_dir: bool,
    pub registered_at: SystemTime,
}

impl fmt::Display for Watch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Watch[{} {} dir={}]",
            self.handle,
            self.path.display(),
            self.is_dir
        )
    }
}

#[derive(Default)]
struct Entries {
    by_handle: HashMap<WatchHandle, Watch>,
    by_path: HashMap<PathBuf, WatchHandle>,
    /// Set by `unregister_all`; no watch is added afterwards
    closed: bool,
}

impl Entries {
    fn remove_handle(&mut self, handle: WatchHandle) -> Option<Watch> {
        let watch = self.by_handle.remove(&handle)?;
        if self.by_path.get(&watch.path) == Some(&handle) {
            self.by_path.remove(&watch.path);
        }
        Some(watch)
    }
}

/// Registry of active watches
pub struct WatchRegistry {
    source: Arc<dyn RawEventSource>,
    /// Mask every watch is registered with
    mask: u32,
    entries: Mutex<Entries>,
}

impl WatchRegistry {
    pub fn new(source: Arc<dyn RawEventSource>, mask: u32) -> Self {
        Self {
            source,
            mask,
            entries: Mutex::new(Entries::default()),
        }
    }

    pub fn mask(&self) -> u32 {
        self.mask
    }

    /// Watch `path`, replacing any entry for the same path or handle
    ///
    /// Fails with [`SourceError::Closed`] once the registry was torn down,
    /// releasing a watch the kernel handed out in the meantime.
    pub fn register(&self, path: &Path) -> Result<WatchHandle, SourceError> {
        let is_dir = path.is_dir();
        let handle = self.source.add_watch(path, self.mask)?;

        let mut entries = self.entries.lock();
        if entries.closed {
            drop(entries);
            self.release(handle);
            return Err(SourceError::Closed);
        }
        if let Some(old) = entries.by_path.get(path).copied() {
            entries.remove_handle(old);
        }
        if let Some(stale) = entries.remove_handle(handle) {
            debug!("Handle {} reassigned from {}", handle, stale.path.display());
        }
        entries.by_path.insert(path.to_path_buf(), handle);
        entries.by_handle.insert(
            handle,
            Watch {
                handle,
                path: path.to_path_buf(),
                is_dir,
                registered_at: SystemTime::now(),
            },
        );

        debug!("Watching {} ({})", path.display(), handle);
        Ok(handle)
    }

    /// Drop the entry and release the kernel watch
    ///
    /// A watch the kernel already invalidated is not an error.
    pub fn unregister(&self, handle: WatchHandle) -> Option<Watch> {
        let watch = self.entries.lock().remove_handle(handle)?;
        self.release(handle);
        Some(watch)
    }

    /// Drop the entry only; the kernel has already released the watch
    pub fn forget(&self, handle: WatchHandle) -> Option<Watch> {
        let watch = self.entries.lock().remove_handle(handle);
        if let Some(watch) = &watch {
            debug!("Forgot watch on {} ({})", watch.path.display(), handle);
        }
        watch
    }

    /// Unregister the watch on `root` and every watch below it
    pub fn unregister_under(&self, root: &Path) -> Vec<Watch> {
        let removed: Vec<Watch> = {
            let mut entries = self.entries.lock();
            let handles: Vec<WatchHandle> = entries
                .by_handle
                .values()
                .filter(|w| w.path.starts_with(root))
                .map(|w| w.handle)
                .collect();
            handles
                .into_iter()
                .filter_map(|h| entries.remove_handle(h))
                .collect()
        };

        for watch in &removed {
            self.release(watch.handle);
        }
        removed
    }

    /// Unregister everything and refuse later registrations, returning how
    /// many watches were dropped
    pub fn unregister_all(&self) -> usize {
        let drained: Vec<WatchHandle> = {
            let mut entries = self.entries.lock();
            entries.closed = true;
            entries.by_path.clear();
            entries.by_handle.drain().map(|(h, _)| h).collect()
        };

        for handle in &drained {
            self.release(*handle);
        }
        drained.len()
    }

    pub fn lookup(&self, handle: WatchHandle) -> Option<Watch> {
        self.entries.lock().by_handle.get(&handle).cloned()
    }

    pub fn handle_for(&self, path: &Path) -> Option<WatchHandle> {
        self.entries.lock().by_path.get(path).copied()
    }

    pub fn is_watched(&self, path: &Path) -> bool {
        self.entries.lock().by_path.contains_key(path)
    }

    pub fn all_paths(&self) -> BTreeSet<PathBuf> {
        self.entries.lock().by_path.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().by_handle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.entries.lock().closed
    }

    fn release(&self, handle: WatchHandle) {
        match self.source.remove_watch(handle) {
            Ok(()) => debug!("Released watch {}", handle),
            Err(e) if e.is_invalid_handle() => debug!("Watch {} already invalid", handle),
            Err(e) => warn!("Failed to release watch {}: {}", handle, e),
        }
    }
}

impl fmt::Debug for WatchRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchRegistry")
            .field("mask", &format_args!("{:#x}", self.mask))
            .field("watches", &self.len())
            .finish()
    }
}
