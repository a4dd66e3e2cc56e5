//! Shared helpers for notifier integration tests

#![allow(dead_code)]

use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use treewatch::{Event, EventKind, HandlerError, Notifier, NotifierConfig};

/// Config tuned for quick tests
pub fn fast_config(path: &Path) -> NotifierConfig {
    let mut config = NotifierConfig::new(path);
    config.cycle_ms = 10;
    config.poll_interval_ms = 10;
    config.create_delay_ms = 20;
    config
}

/// Poll `cond` until it holds or five seconds pass
pub fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    cond()
}

/// Give the kernel and delivery thread time to report anything pending
pub fn settle() {
    std::thread::sleep(Duration::from_millis(150));
}

/// Events delivered to one subscriber
#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<Event>>>,
}

impl Recorder {
    pub fn attach(notifier: &Notifier) -> Self {
        let recorder = Self::default();
        let sink = recorder.events.clone();
        notifier.subscribe(move |event: &Event| -> Result<(), HandlerError> {
            sink.lock().push(event.clone());
            Ok(())
        });
        recorder
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Events for `path` carrying `kind`
    pub fn matching(&self, path: &Path, kind: EventKind) -> Vec<Event> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.path == path && e.has_kind(kind))
            .cloned()
            .collect()
    }

    pub fn wait_for(&self, path: &Path, kind: EventKind) -> bool {
        wait_until(|| !self.matching(path, kind).is_empty())
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.events.lock().iter().map(|e| e.path.clone()).collect()
    }
}

/// Start `notifier` and wait for the initial walk to register `expected` watches
pub fn start_and_populate(notifier: &Notifier, expected: usize) {
    notifier.start().unwrap();
    assert!(
        wait_until(|| notifier.watch_count() == expected),
        "expected {} watches, found {}",
        expected,
        notifier.watch_count()
    );
}
