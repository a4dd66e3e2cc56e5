//! Raw event source
//!
//! The kernel side of the watcher: register/unregister a watch on a path with
//! a raw interest mask and read raw events. [`InotifySource`] is the Linux
//! implementation; the notifier only sees the [`RawEventSource`] trait.

use crate::error::SourceError;
use crate::kind::{mask, KindSet};
use dashmap::DashMap;
use nix::errno::Errno;
use nix::sys::inotify::{AddWatchFlags, InitFlags, Inotify, WatchDescriptor};
use std::ffi::OsString;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::trace;

/// Opaque identifier of one registered watch
///
/// Registering the same inode twice yields the same handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchHandle(u64);

impl WatchHandle {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One unprocessed notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    /// Watch the event belongs to; `None` for queue overflow or a watch the
    /// source no longer tracks
    pub handle: Option<WatchHandle>,
    /// Raw inotify bits
    pub mask: u32,
    /// Pairs `moved_from` with `moved_to`
    pub cookie: u32,
    /// Child entry name, present only when the change happened inside a
    /// watched directory
    pub name: Option<OsString>,
}

impl RawEvent {
    pub fn new(handle: WatchHandle, mask: u32) -> Self {
        Self {
            handle: Some(handle),
            mask,
            cookie: 0,
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<OsString>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Decoded kind set of the raw mask
    pub fn kinds(&self) -> KindSet {
        KindSet::from_mask(self.mask)
    }

    pub fn is_dir(&self) -> bool {
        self.mask & mask::ISDIR != 0
    }
}

impl fmt::Display for RawEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handle = self
            .handle
            .map(|h| h.to_string())
            .unwrap_or_else(|| "-".to_string());
        write!(
            f,
            "raw {} name={:?} kinds={} mask={:#x}",
            handle,
            self.name.as_deref().unwrap_or_default(),
            self.kinds(),
            self.mask
        )
    }
}

/// Kernel-backed watch primitive
pub trait RawEventSource: Send + Sync {
    /// Register a watch; fails with [`SourceError::NotFound`] if the path is missing
    fn add_watch(&self, path: &Path, mask: u32) -> Result<WatchHandle, SourceError>;

    /// Release a watch; fails with [`SourceError::InvalidHandle`] if it is already gone
    fn remove_watch(&self, handle: WatchHandle) -> Result<(), SourceError>;

    /// Wait up to `timeout` for events, returning them in delivery order
    ///
    /// Returns an empty batch when nothing arrived in time.
    fn next_events(&self, timeout: Duration) -> Result<Vec<RawEvent>, SourceError>;
}

/// [`RawEventSource`] over a non-blocking inotify instance
pub struct InotifySource {
    inotify: Inotify,
    /// Kernel descriptor -> stable handle
    handles: DashMap<WatchDescriptor, WatchHandle>,
    /// Stable handle -> kernel descriptor
    descriptors: DashMap<WatchHandle, WatchDescriptor>,
    next_handle: AtomicU64,
}

impl InotifySource {
    pub fn new() -> Result<Self, SourceError> {
        let inotify = Inotify::init(InitFlags::IN_NONBLOCK | InitFlags::IN_CLOEXEC)
            .map_err(|source| SourceError::Sys {
                op: "inotify_init",
                source,
            })?;

        Ok(Self {
            inotify,
            handles: DashMap::new(),
            descriptors: DashMap::new(),
            next_handle: AtomicU64::new(1),
        })
    }

    /// Number of kernel watches this source still tracks
    pub fn tracked(&self) -> usize {
        self.descriptors.len()
    }

    fn handle_for(&self, wd: WatchDescriptor) -> WatchHandle {
        *self.handles.entry(wd).or_insert_with(|| {
            let handle = WatchHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
            self.descriptors.insert(handle, wd);
            handle
        })
    }

    fn forget_descriptor(&self, wd: WatchDescriptor) {
        if let Some((_, handle)) = self.handles.remove(&wd) {
            self.descriptors.remove(&handle);
        }
    }
}

impl fmt::Debug for InotifySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InotifySource")
            .field("tracked", &self.tracked())
            .finish()
    }
}

impl RawEventSource for InotifySource {
    fn add_watch(&self, path: &Path, mask: u32) -> Result<WatchHandle, SourceError> {
        let flags = AddWatchFlags::from_bits_truncate(mask);
        match self.inotify.add_watch(path, flags) {
            Ok(wd) => Ok(self.handle_for(wd)),
            Err(Errno::ENOENT) => Err(SourceError::NotFound(path.to_path_buf())),
            Err(source) => Err(SourceError::Sys {
                op: "inotify_add_watch",
                source,
            }),
        }
    }

    fn remove_watch(&self, handle: WatchHandle) -> Result<(), SourceError> {
        let Some((_, wd)) = self.descriptors.remove(&handle) else {
            return Err(SourceError::InvalidHandle(handle));
        };
        self.handles.remove(&wd);

        match self.inotify.rm_watch(wd) {
            Ok(()) => Ok(()),
            // kernel already dropped it (path deleted or unmounted)
            Err(Errno::EINVAL) => Err(SourceError::InvalidHandle(handle)),
            Err(source) => Err(SourceError::Sys {
                op: "inotify_rm_watch",
                source,
            }),
        }
    }

    fn next_events(&self, timeout: Duration) -> Result<Vec<RawEvent>, SourceError> {
        let events = match self.inotify.read_events() {
            Ok(events) => events,
            Err(Errno::EAGAIN) => {
                std::thread::sleep(timeout);
                return Ok(Vec::new());
            }
            Err(Errno::EINTR) => return Ok(Vec::new()),
            Err(source) => {
                return Err(SourceError::Sys {
                    op: "read inotify events",
                    source,
                })
            }
        };

        let mut batch = Vec::with_capacity(events.len());
        for event in events {
            let bits = event.mask.bits();
            let handle = self.handles.get(&event.wd).map(|h| *h);
            if bits & mask::IGNORED != 0 {
                // the kernel freed this descriptor, it may be handed out again
                self.forget_descriptor(event.wd);
            }
            trace!("inotify {:?} mask={:#x} name={:?}", event.wd, bits, event.name);
            batch.push(RawEvent {
                handle,
                mask: bits,
                cookie: event.cookie,
                name: event.name,
            });
        }
        Ok(batch)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted source for driving the pipeline without a kernel

    use super::*;
    use crossbeam_channel::{Receiver, Sender};
    use parking_lot::Mutex;
    use std::collections::{HashMap, HashSet};
    use std::path::PathBuf;

    pub struct ScriptedSource {
        watches: Mutex<HashMap<PathBuf, WatchHandle>>,
        missing: Mutex<HashSet<PathBuf>>,
        removed: Mutex<Vec<WatchHandle>>,
        next: AtomicU64,
        tx: Sender<RawEvent>,
        rx: Receiver<RawEvent>,
    }

    impl ScriptedSource {
        pub fn new() -> Self {
            let (tx, rx) = crossbeam_channel::unbounded();
            Self {
                watches: Mutex::new(HashMap::new()),
                missing: Mutex::new(HashSet::new()),
                removed: Mutex::new(Vec::new()),
                next: AtomicU64::new(1),
                tx,
                rx,
            }
        }

        /// Make `add_watch` fail with NotFound for this path
        pub fn mark_missing(&self, path: impl Into<PathBuf>) {
            self.missing.lock().insert(path.into());
        }

        pub fn push(&self, event: RawEvent) {
            let _ = self.tx.send(event);
        }

        pub fn handle_of(&self, path: &Path) -> Option<WatchHandle> {
            self.watches.lock().get(path).copied()
        }

        pub fn removed(&self) -> Vec<WatchHandle> {
            self.removed.lock().clone()
        }
    }

    impl RawEventSource for ScriptedSource {
        fn add_watch(&self, path: &Path, _mask: u32) -> Result<WatchHandle, SourceError> {
            if self.missing.lock().contains(path) {
                return Err(SourceError::NotFound(path.to_path_buf()));
            }
            let mut watches = self.watches.lock();
            let handle = *watches
                .entry(path.to_path_buf())
                .or_insert_with(|| WatchHandle(self.next.fetch_add(1, Ordering::Relaxed)));
            Ok(handle)
        }

        fn remove_watch(&self, handle: WatchHandle) -> Result<(), SourceError> {
            let mut watches = self.watches.lock();
            let before = watches.len();
            watches.retain(|_, h| *h != handle);
            if watches.len() == before {
                return Err(SourceError::InvalidHandle(handle));
            }
            self.removed.lock().push(handle);
            Ok(())
        }

        fn next_events(&self, timeout: Duration) -> Result<Vec<RawEvent>, SourceError> {
            let mut batch = Vec::new();
            if let Ok(first) = self.rx.recv_timeout(timeout) {
                batch.push(first);
                batch.extend(self.rx.try_iter());
            }
            Ok(batch)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_same_inode_same_handle() {
        let temp_dir = TempDir::new().unwrap();
        let source = InotifySource::new().unwrap();

        let first = source.add_watch(temp_dir.path(), mask::CREATE).unwrap();
        let second = source.add_watch(temp_dir.path(), mask::CREATE).unwrap();
        assert_eq!(first, second);
        assert_eq!(source.tracked(), 1);
    }

    #[test]
    fn test_missing_path_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let source = InotifySource::new().unwrap();

        let err = source
            .add_watch(&temp_dir.path().join("nope"), mask::CREATE)
            .unwrap_err();
        assert!(matches!(err, SourceError::NotFound(_)));
    }

    #[test]
    fn test_remove_twice_is_invalid_handle() {
        let temp_dir = TempDir::new().unwrap();
        let source = InotifySource::new().unwrap();

        let handle = source.add_watch(temp_dir.path(), mask::CREATE).unwrap();
        source.remove_watch(handle).unwrap();
        assert!(source.remove_watch(handle).unwrap_err().is_invalid_handle());
    }

    #[test]
    fn test_reads_child_create() {
        let temp_dir = TempDir::new().unwrap();
        let source = InotifySource::new().unwrap();
        let handle = source.add_watch(temp_dir.path(), mask::CREATE).unwrap();

        fs::write(temp_dir.path().join("sinotify-test"), b"x").unwrap();

        let mut events = Vec::new();
        for _ in 0..40 {
            events.extend(source.next_events(Duration::from_millis(25)).unwrap());
            if !events.is_empty() {
                break;
            }
        }

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].handle, Some(handle));
        assert_eq!(events[0].mask, mask::CREATE);
        assert_eq!(events[0].name.as_deref(), Some(std::ffi::OsStr::new("sinotify-test")));
    }
}
