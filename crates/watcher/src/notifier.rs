//! Notifier
//!
//! Owns one watched tree: the registry, the recursive manager, the
//! announcement queue and the event loop thread. Lifecycle is
//! `Created -> Watching -> Closed`, and closed is terminal.

use crate::config::{NotifierConfig, ValidatedConfig};
use crate::error::{Result, SourceError, WatchError};
use crate::exclude::ExcludeRules;
use crate::kind::{mask, KindSet};
use crate::noise::{NoiseFilter, NoiseSignature};
use crate::queue::{AnnouncementQueue, Handler, QueueSettings, QueueStats, Subscription};
use crate::recurse::{RecurseSettings, RecursiveWatchManager};
use crate::registry::WatchRegistry;
use crate::source::{InotifySource, RawEvent, RawEventSource};
use crate::translate::{translate, Event};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, trace, warn, Level};

/// Kinds the recursive manager needs whatever the caller asked for
const BOOKKEEPING_MASK: u32 = mask::CREATE | mask::DELETE_SELF | mask::MOVED_FROM | mask::MOVED_TO;

/// Lifecycle state of a [`Notifier`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifierState {
    Created,
    Watching,
    Closed,
}

/// What the diagnostic spy sees
#[derive(Debug, Clone, Copy)]
pub enum SpyEvent<'a> {
    /// Every raw event, with the noise signature it matched
    Raw {
        event: &'a RawEvent,
        noise: Option<NoiseSignature>,
    },
    /// Every event handed to the queue
    Announced(&'a Event),
}

/// Diagnostic observer, called inline on the event loop
pub trait Spy: Send + Sync {
    fn observe(&self, event: &SpyEvent<'_>);
}

impl<F> Spy for F
where
    F: Fn(&SpyEvent<'_>) + Send + Sync,
{
    fn observe(&self, event: &SpyEvent<'_>) {
        self(event)
    }
}

/// Spy that logs through `tracing` at a fixed level
#[derive(Debug, Clone, Copy)]
pub struct TracingSpy {
    level: Level,
}

impl TracingSpy {
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    fn log(&self, message: fmt::Arguments<'_>) {
        match self.level {
            Level::ERROR => error!("{}", message),
            Level::WARN => warn!("{}", message),
            Level::INFO => info!("{}", message),
            Level::DEBUG => debug!("{}", message),
            _ => trace!("{}", message),
        }
    }
}

impl Default for TracingSpy {
    fn default() -> Self {
        Self::new(Level::DEBUG)
    }
}

impl Spy for TracingSpy {
    fn observe(&self, event: &SpyEvent<'_>) {
        match event {
            SpyEvent::Raw {
                event,
                noise: Some(signature),
            } => self.log(format_args!("{} (noise: {:?})", event, signature)),
            SpyEvent::Raw { event, noise: None } => self.log(format_args!("{}", event)),
            SpyEvent::Announced(event) => self.log(format_args!("announce {}", event)),
        }
    }
}

/// Counters for one notifier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotifierStats {
    /// Raw events read from the source
    pub raw_events: u64,
    /// Raw events matching a noise signature
    pub noise: u64,
    /// Events for excluded paths
    pub excluded: u64,
    /// Raw events whose watch was unknown
    pub unmatched: u64,
    /// Kernel queue overflows
    pub overflows: u64,
    pub queue: QueueStats,
}

#[derive(Default)]
struct LoopCounters {
    raw_events: AtomicU64,
    noise: AtomicU64,
    excluded: AtomicU64,
    unmatched: AtomicU64,
    overflows: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// State shared with the background threads
struct Shared {
    config: ValidatedConfig,
    source: Arc<dyn RawEventSource>,
    registry: Arc<WatchRegistry>,
    manager: Arc<RecursiveWatchManager>,
    queue: AnnouncementQueue,
    noise: NoiseFilter,
    exclude: ExcludeRules,
    closed: Arc<AtomicBool>,
    spy: RwLock<Option<Arc<dyn Spy>>>,
    counters: LoopCounters,
    /// Raw mask of the requested kinds
    requested_mask: u32,
    /// Subdirectories whose own watch already reported their deletion
    self_deleted: Mutex<HashSet<PathBuf>>,
}

impl Shared {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn observe(&self, event: SpyEvent<'_>) {
        let spy = self.spy.read().clone();
        if let Some(spy) = spy {
            spy.observe(&event);
        }
    }

    fn run_event_loop(&self) -> std::result::Result<(), SourceError> {
        while !self.is_closed() {
            let batch = self.source.next_events(self.config.poll_interval)?;
            for raw in &batch {
                if self.is_closed() {
                    break;
                }
                self.process(raw);
            }
        }
        Ok(())
    }

    /// Whether a subdirectory delete seen on its parent is covered by the
    /// subdirectory's own watch
    fn reported_by_own_watch(&self, raw: &RawEvent) -> bool {
        let Some(name) = raw.name.as_deref() else {
            return false;
        };
        let Some(parent) = raw.handle.and_then(|h| self.registry.lookup(h)) else {
            return false;
        };
        let child = parent.path.join(name);
        self.self_deleted.lock().remove(&child) || self.registry.is_watched(&child)
    }

    fn process(&self, raw: &RawEvent) {
        bump(&self.counters.raw_events);

        let mut noise = self.noise.classify(raw);
        if noise == Some(NoiseSignature::SubdirectoryDeleted) && !self.reported_by_own_watch(raw) {
            // never watched (removed before its delayed add), the parent is the only report
            noise = None;
        }
        self.observe(SpyEvent::Raw { event: raw, noise });
        if let Some(signature) = noise {
            bump(&self.counters.noise);
            if signature == NoiseSignature::WatchInvalidated {
                if let Some(handle) = raw.handle {
                    self.registry.forget(handle);
                }
            }
            return;
        }

        if raw.mask & mask::Q_OVERFLOW != 0 {
            bump(&self.counters.overflows);
            warn!("Kernel event queue overflowed, changes under {} were lost", self.config.path.display());
            return;
        }

        let Some(watch) = raw.handle.and_then(|h| self.registry.lookup(h)) else {
            bump(&self.counters.unmatched);
            warn!("No watch for {}, skipping", raw);
            return;
        };

        let event = translate(raw, &watch);
        if raw.name.is_none() && watch.is_dir && raw.mask & mask::DELETE_SELF != 0 {
            let parent_watched = event
                .path
                .parent()
                .is_some_and(|p| self.registry.is_watched(p));
            if parent_watched {
                self.self_deleted.lock().insert(event.path.clone());
            }
        }

        if self.exclude.is_excluded(&event.path, event.is_dir) {
            bump(&self.counters.excluded);
            trace!("Excluded {}", event.path.display());
            return;
        }

        self.manager.on_event(&event);

        // raw bits cover kinds the collapse rules rewrite (`delete_self`) and
        // derived kinds never decoded (`move`)
        if raw.mask & self.requested_mask != 0 || event.kinds.intersects(&self.config.kinds) {
            self.observe(SpyEvent::Announced(&event));
            self.queue.announce(event);
        }
    }
}

/// Watches a file or directory tree and announces changes to subscribers
pub struct Notifier {
    shared: Arc<Shared>,
    state: Mutex<NotifierState>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Notifier {
    /// Validate `config` and prepare an inotify-backed notifier
    pub fn new(config: NotifierConfig) -> Result<Self> {
        let validated = config.validate()?;
        let source = InotifySource::new()?;
        Self::from_validated(validated, Arc::new(source))
    }

    /// Like [`Notifier::new`], reading raw events from `source`
    pub fn with_source(config: NotifierConfig, source: Arc<dyn RawEventSource>) -> Result<Self> {
        Self::from_validated(config.validate()?, source)
    }

    fn from_validated(config: ValidatedConfig, source: Arc<dyn RawEventSource>) -> Result<Self> {
        let exclude = ExcludeRules::build(&config.path, &config.exclude)?;
        let registry = Arc::new(WatchRegistry::new(
            source.clone(),
            kernel_mask(&config.kinds, config.recurse),
        ));
        let closed = Arc::new(AtomicBool::new(false));

        let manager = Arc::new(RecursiveWatchManager::new(
            registry.clone(),
            exclude.clone(),
            RecurseSettings {
                recurse: config.recurse,
                throttle: config.recurse_throttle,
                pause: config.throttle_pause,
                create_delay: config.create_delay,
                add_retries: config.add_retries,
            },
            closed.clone(),
        ));

        let queue = AnnouncementQueue::new(QueueSettings {
            batch_size: config.batch_size,
            cycle: config.cycle,
            capacity: config.queue_capacity,
            shutdown: config.shutdown,
            drain_grace: config.drain_grace,
        });

        Ok(Self {
            shared: Arc::new(Shared {
                noise: NoiseFilter::new(config.recurse),
                requested_mask: config.kinds.mask(),
                config,
                source,
                registry,
                manager,
                queue,
                exclude,
                closed,
                spy: RwLock::new(None),
                counters: LoopCounters::default(),
                self_deleted: Mutex::new(HashSet::new()),
            }),
            state: Mutex::new(NotifierState::Created),
            threads: Mutex::new(Vec::new()),
        })
    }

    /// Start delivery, the initial walk and the event loop
    pub fn start(&self) -> Result<()> {
        let mut state = self.state.lock();
        match *state {
            NotifierState::Watching => return Err(WatchError::AlreadyStarted),
            NotifierState::Closed => return Err(WatchError::Closed),
            NotifierState::Created => {}
        }

        info!(
            "Starting notifier on {} (recursive: {}, kinds: {})",
            self.shared.config.path.display(),
            self.shared.config.recurse,
            self.shared.config.kinds
        );

        self.shared.queue.start()?;
        *state = NotifierState::Watching;

        let shared = self.shared.clone();
        let events = spawn("treewatch-events", "event loop", move || {
            if let Err(e) = shared.run_event_loop() {
                error!(
                    "Event loop for {} stopped: {}",
                    shared.config.path.display(),
                    e
                );
            }
        });

        let shared = self.shared.clone();
        let populate = spawn("treewatch-populate", "population", move || {
            let root = shared.config.path.clone();
            match shared.manager.populate(&root) {
                Ok(_) | Err(SourceError::Closed) => {}
                Err(e) => error!("Failed to watch {}: {}", root.display(), e),
            }
        });

        let mut threads = self.threads.lock();
        for spawned in [events, populate] {
            match spawned {
                Ok(handle) => threads.push(handle),
                Err(e) => {
                    drop(threads);
                    drop(state);
                    self.close();
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Stop watching and release every watch
    ///
    /// Joins the event loop, unregisters all watches, then stops delivery
    /// per the shutdown policy. Safe to call more than once. Must not be
    /// called from inside a handler.
    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            if *state == NotifierState::Closed {
                return;
            }
            *state = NotifierState::Closed;
        }
        self.shared.closed.store(true, Ordering::SeqCst);

        let threads: Vec<JoinHandle<()>> = self.threads.lock().drain(..).collect();
        for thread in threads {
            let name = thread.thread().name().unwrap_or("watcher").to_string();
            if thread.join().is_err() {
                error!("Thread {} panicked", name);
            }
        }

        let released = self.shared.registry.unregister_all();
        self.shared.self_deleted.lock().clear();
        self.shared.queue.stop();
        info!(
            "Closed notifier on {} ({} watches released)",
            self.shared.config.path.display(),
            released
        );
    }

    pub fn subscribe(&self, handler: impl Handler + 'static) -> Subscription {
        self.shared.queue.subscribe(handler)
    }

    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        self.shared.queue.unsubscribe(subscription)
    }

    /// Install a diagnostic spy, replacing any previous one
    pub fn spy(&self, spy: impl Spy + 'static) {
        self.set_spy(Some(Arc::new(spy)));
    }

    pub fn set_spy(&self, spy: Option<Arc<dyn Spy>>) {
        *self.shared.spy.write() = spy;
    }

    pub fn state(&self) -> NotifierState {
        *self.state.lock()
    }

    pub fn watch_count(&self) -> usize {
        self.shared.registry.len()
    }

    pub fn watched_paths(&self) -> BTreeSet<PathBuf> {
        self.shared.registry.all_paths()
    }

    /// Mask every watch is registered with
    pub fn raw_mask(&self) -> u32 {
        self.shared.registry.mask()
    }

    pub fn requested_kinds(&self) -> &KindSet {
        &self.shared.config.kinds
    }

    pub fn path(&self) -> &Path {
        self.shared.config.path()
    }

    pub fn is_recursive(&self) -> bool {
        self.shared.config.recurse
    }

    pub fn config(&self) -> &ValidatedConfig {
        &self.shared.config
    }

    pub fn stats(&self) -> NotifierStats {
        let c = &self.shared.counters;
        NotifierStats {
            raw_events: c.raw_events.load(Ordering::Relaxed),
            noise: c.noise.load(Ordering::Relaxed),
            excluded: c.excluded.load(Ordering::Relaxed),
            unmatched: c.unmatched.load(Ordering::Relaxed),
            overflows: c.overflows.load(Ordering::Relaxed),
            queue: self.shared.queue.stats(),
        }
    }
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("path", &self.shared.config.path)
            .field("recursive", &self.shared.config.recurse)
            .field("state", &self.state())
            .field("watches", &self.watch_count())
            .finish()
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        self.close();
    }
}

/// Mask registered with the kernel for `kinds`
fn kernel_mask(kinds: &KindSet, recurse: bool) -> u32 {
    let requested = kinds.mask();
    if recurse {
        requested | BOOKKEEPING_MASK
    } else {
        requested
    }
}

fn spawn<F>(name: &str, thread: &'static str, body: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(body)
        .map_err(|source| WatchError::Spawn { thread, source })
}
