//! Raw event to semantic event translation
//!
//! inotify reports "something changed inside directory D" on D's watch with a
//! child name, and "D itself changed" without one. A semantic [`Event`] always
//! names the entity that actually changed.

use crate::kind::{EventKind, KindSet};
use crate::registry::Watch;
use crate::source::{RawEvent, WatchHandle};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::time::SystemTime;

/// A change to one path, as handed to subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    /// Entity that changed
    pub path: PathBuf,
    pub is_dir: bool,
    pub kinds: KindSet,
    /// Capture time, not kernel time
    pub timestamp: SystemTime,
    /// Watch that reported the change
    #[serde(skip)]
    pub handle: Option<WatchHandle>,
}

impl Event {
    pub fn has_kind(&self, kind: EventKind) -> bool {
        self.kinds.contains(kind)
    }

    pub fn is_create(&self) -> bool {
        self.has_kind(EventKind::Create)
    }

    pub fn is_delete(&self) -> bool {
        self.has_kind(EventKind::Delete)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Event[{} dir={} kinds={}]",
            self.path.display(),
            self.is_dir,
            self.kinds
        )
    }
}

/// Build the semantic event for `raw`, which arrived on `watch`
pub fn translate(raw: &RawEvent, watch: &Watch) -> Event {
    let (path, is_dir) = match raw.name.as_deref() {
        Some(name) if !name.is_empty() => (watch.path.join(name), raw.is_dir()),
        _ => (watch.path.clone(), watch.is_dir),
    };

    let mut kinds = raw.kinds();
    collapse(&mut kinds, is_dir);

    Event {
        path,
        is_dir,
        kinds,
        timestamp: SystemTime::now(),
        handle: raw.handle,
    }
}

/// Apply the collapse rules in place
///
/// - a directory's `delete_self` becomes `delete`
/// - `close_write`/`close_nowrite` imply `close`
///
/// Running it twice gives the same set.
pub fn collapse(kinds: &mut KindSet, is_dir: bool) {
    if is_dir && kinds.remove(EventKind::DeleteSelf) {
        kinds.insert(EventKind::Delete);
    }
    if kinds.contains(EventKind::CloseWrite) || kinds.contains(EventKind::CloseNowrite) {
        kinds.insert(EventKind::Close);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::mask;
    use std::path::Path;

    fn watch(path: &str, is_dir: bool) -> Watch {
        Watch {
            handle: WatchHandle::from_raw(1),
            path: PathBuf::from(path),
            is_dir,
            registered_at: SystemTime::now(),
        }
    }

    #[test]
    fn test_self_event_uses_watch_path() {
        let raw = RawEvent::new(WatchHandle::from_raw(1), mask::MODIFY);
        let event = translate(&raw, &watch("/tmp/file.txt", false));

        assert_eq!(event.path, Path::new("/tmp/file.txt"));
        assert!(!event.is_dir);
        assert_eq!(event.kinds.canonical(), vec!["modify"]);
    }

    #[test]
    fn test_child_event_joins_name() {
        let raw = RawEvent::new(WatchHandle::from_raw(1), mask::CREATE).with_name("n");
        let event = translate(&raw, &watch("/tmp/dir", true));

        assert_eq!(event.path, Path::new("/tmp/dir/n"));
        // child is a file even though the watch is a directory
        assert!(!event.is_dir);
    }

    #[test]
    fn test_child_directory_flag_from_raw_mask() {
        let raw = RawEvent::new(WatchHandle::from_raw(1), mask::CREATE | mask::ISDIR)
            .with_name("sub");
        let event = translate(&raw, &watch("/tmp/dir", true));

        assert!(event.is_dir);
        assert!(event.is_create());
    }

    #[test]
    fn test_directory_delete_self_becomes_delete() {
        let raw = RawEvent::new(WatchHandle::from_raw(1), mask::DELETE_SELF);
        let event = translate(&raw, &watch("/tmp", true));

        assert!(event.has_kind(EventKind::Delete));
        assert!(!event.has_kind(EventKind::DeleteSelf));
        assert_eq!(event.kinds.len(), 1);
    }

    #[test]
    fn test_file_delete_self_is_kept() {
        let raw = RawEvent::new(WatchHandle::from_raw(1), mask::DELETE_SELF);
        let event = translate(&raw, &watch("/tmp/file", false));

        assert!(event.has_kind(EventKind::DeleteSelf));
        assert!(!event.has_kind(EventKind::Delete));
    }

    #[test]
    fn test_collapse_is_idempotent() {
        let mut kinds = KindSet::from([EventKind::DeleteSelf, EventKind::CloseWrite]);
        collapse(&mut kinds, true);
        let once = kinds.clone();
        collapse(&mut kinds, true);

        assert_eq!(kinds, once);
        assert_eq!(kinds.canonical(), vec!["close", "close_write", "delete"]);
    }

    #[test]
    fn test_close_added_once() {
        for bits in [mask::CLOSE_WRITE, mask::CLOSE_NOWRITE, mask::CLOSE] {
            let raw = RawEvent::new(WatchHandle::from_raw(1), bits);
            let event = translate(&raw, &watch("/tmp/f", false));
            let closes = event.kinds.iter().filter(|k| *k == EventKind::Close).count();
            assert_eq!(closes, 1, "mask {:#x}", bits);
        }
    }

    #[test]
    fn test_empty_name_is_self_event() {
        let raw = RawEvent::new(WatchHandle::from_raw(1), mask::ATTRIB).with_name("");
        let event = translate(&raw, &watch("/tmp/dir", true));

        assert_eq!(event.path, Path::new("/tmp/dir"));
        assert!(event.is_dir);
    }
}
