//! Recursive watch management
//!
//! Registers the initial tree with a throttled walk, then keeps the registry
//! in step with the tree as directories are created, moved, and deleted.

use crate::error::SourceError;
use crate::exclude::ExcludeRules;
use crate::kind::EventKind;
use crate::registry::WatchRegistry;
use crate::translate::Event;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Tuning for the walk and for delayed registrations
#[derive(Debug, Clone, Copy)]
pub struct RecurseSettings {
    pub recurse: bool,
    /// Registrations between pauses
    pub throttle: usize,
    pub pause: Duration,
    /// Wait before watching a directory reported as created
    pub create_delay: Duration,
    /// Extra attempts for a delayed registration
    pub add_retries: u32,
}

/// Keeps one registry covering a directory tree
pub struct RecursiveWatchManager {
    registry: Arc<WatchRegistry>,
    exclude: ExcludeRules,
    settings: RecurseSettings,
    closed: Arc<AtomicBool>,
}

impl RecursiveWatchManager {
    pub fn new(
        registry: Arc<WatchRegistry>,
        exclude: ExcludeRules,
        settings: RecurseSettings,
        closed: Arc<AtomicBool>,
    ) -> Self {
        Self {
            registry,
            exclude,
            settings,
            closed,
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Register `root` and, when recursing, every directory below it
    ///
    /// Pauses after every `throttle` registrations and stops early when the
    /// notifier closes. Only failing to watch the root is an error.
    pub fn populate(&self, root: &Path) -> Result<usize, SourceError> {
        if self.is_closed() {
            return Ok(0);
        }
        self.registry.register(root)?;
        let mut registered = 1;

        if !self.settings.recurse {
            return Ok(registered);
        }

        let walker = WalkDir::new(root)
            .min_depth(1)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| {
                e.file_type().is_dir() && !self.exclude.is_excluded(e.path(), true)
            });

        for entry in walker {
            if self.is_closed() {
                debug!("Closed during initial walk of {}", root.display());
                break;
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("Skipping unreadable entry under {}: {}", root.display(), e);
                    continue;
                }
            };

            match self.registry.register(entry.path()) {
                Ok(_) => {
                    registered += 1;
                    if registered % self.settings.throttle == 0 {
                        std::thread::sleep(self.settings.pause);
                    }
                }
                Err(SourceError::Closed) => break,
                Err(e) => warn!("Could not watch {}: {}", entry.path().display(), e),
            }
        }

        info!(
            "Watching {} director{} under {}",
            registered,
            if registered == 1 { "y" } else { "ies" },
            root.display()
        );
        Ok(registered)
    }

    /// Register `dir` and any subdirectories not yet watched
    fn register_subtree(&self, dir: &Path) -> Result<usize, SourceError> {
        self.registry.register(dir)?;
        let mut registered = 1;

        let walker = WalkDir::new(dir)
            .min_depth(1)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| {
                e.file_type().is_dir() && !self.exclude.is_excluded(e.path(), true)
            })
            .filter_map(|e| e.ok());

        for entry in walker {
            if self.is_closed() {
                break;
            }
            if self.registry.is_watched(entry.path()) {
                continue;
            }
            match self.registry.register(entry.path()) {
                Ok(_) => registered += 1,
                Err(SourceError::Closed) => break,
                Err(e) => debug!("Could not watch {}: {}", entry.path().display(), e),
            }
        }
        Ok(registered)
    }

    /// Keep the registry in step with a translated event
    pub fn on_event(self: &Arc<Self>, event: &Event) {
        if !event.is_dir {
            return;
        }

        if event.has_kind(EventKind::Delete) {
            // the kernel dropped the watch along with the directory
            if let Some(handle) = self.registry.handle_for(&event.path) {
                self.registry.forget(handle);
            }
        }

        if !self.settings.recurse || self.exclude.is_excluded(&event.path, true) {
            return;
        }

        if event.has_kind(EventKind::MovedFrom) {
            let removed = self.registry.unregister_under(&event.path);
            if !removed.is_empty() {
                debug!(
                    "{} moved away, dropped {} watches",
                    event.path.display(),
                    removed.len()
                );
            }
        }

        if event.has_kind(EventKind::Create) || event.has_kind(EventKind::MovedTo) {
            self.schedule_add(event.path.clone());
        }
    }

    /// Watch `path` after the create delay, on its own thread
    ///
    /// The create notification can arrive before the directory can be
    /// opened, so registering right away may fail.
    pub fn schedule_add(self: &Arc<Self>, path: PathBuf) {
        let manager = self.clone();
        let spawned = std::thread::Builder::new()
            .name("treewatch-add".to_string())
            .spawn(move || manager.delayed_add(&path));

        if let Err(e) = spawned {
            warn!("Failed to spawn delayed watch thread: {}", e);
        }
    }

    fn delayed_add(&self, path: &Path) {
        let mut delay = self.settings.create_delay;
        let mut attempt = 0;

        loop {
            std::thread::sleep(delay);
            if self.is_closed() {
                return;
            }

            match self.register_subtree(path) {
                Ok(count) => {
                    debug!("Now watching {} ({} new)", path.display(), count);
                    return;
                }
                Err(SourceError::Closed) => {
                    debug!("Closed before {} could be watched", path.display());
                    return;
                }
                Err(e) if attempt < self.settings.add_retries => {
                    attempt += 1;
                    delay *= 2;
                    debug!(
                        "Retrying watch on {} in {:?} ({}): {}",
                        path.display(),
                        delay,
                        attempt,
                        e
                    );
                }
                Err(e) => {
                    // usually the directory vanished before the delay elapsed
                    debug!("Could not watch new directory {}: {}", path.display(), e);
                    return;
                }
            }
        }
    }
}
