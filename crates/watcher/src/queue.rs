//! Asynchronous announcement queue
//!
//! The event loop announces into a bounded buffer without blocking. A
//! delivery thread wakes on a fixed cycle, takes up to `batch_size` events,
//! and hands each one to every subscribed handler in announcement order. A
//! handler that fails or panics is logged and skipped; it never stops
//! delivery.

use crate::config::ShutdownPolicy;
use crate::error::{HandlerError, Result, WatchError};
use crate::translate::Event;
use crossbeam_channel::{select, tick, Receiver, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Receives announced events
pub trait Handler: Send + Sync {
    fn handle(&self, event: &Event) -> std::result::Result<(), HandlerError>;
}

impl<F> Handler for F
where
    F: Fn(&Event) -> std::result::Result<(), HandlerError> + Send + Sync,
{
    fn handle(&self, event: &Event) -> std::result::Result<(), HandlerError> {
        self(event)
    }
}

/// Token returned by `subscribe`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

/// Delivery tuning
#[derive(Debug, Clone, Copy)]
pub struct QueueSettings {
    pub batch_size: usize,
    pub cycle: Duration,
    pub capacity: usize,
    pub shutdown: ShutdownPolicy,
    pub drain_grace: Duration,
}

/// Counters for one queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Events accepted by `announce`
    pub announced: u64,
    /// Events taken off the buffer and dispatched
    pub delivered: u64,
    /// Events rejected because the buffer was full or the queue stopped
    pub dropped: u64,
    /// Handler calls that returned an error or panicked
    pub handler_failures: u64,
}

#[derive(Default)]
struct Counters {
    announced: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    handler_failures: AtomicU64,
}

struct Shared {
    rx: Receiver<Arc<Event>>,
    handlers: RwLock<Vec<(Subscription, Arc<dyn Handler>)>>,
    settings: QueueSettings,
    counters: Counters,
}

impl Shared {
    /// Dispatch up to `batch_size` events, returning how many were taken
    fn deliver_batch(&self) -> usize {
        let handlers = self.handlers.read().clone();
        let mut taken = 0;

        while taken < self.settings.batch_size {
            let Ok(event) = self.rx.try_recv() else {
                break;
            };
            taken += 1;

            for (subscription, handler) in &handlers {
                self.dispatch(*subscription, handler.as_ref(), &event);
            }
        }

        self.counters
            .delivered
            .fetch_add(taken as u64, Ordering::Relaxed);
        taken
    }

    fn dispatch(&self, subscription: Subscription, handler: &dyn Handler, event: &Event) {
        match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(event))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.counters.handler_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Handler {:?} failed on {}: {}",
                    subscription,
                    event.path.display(),
                    e
                );
            }
            Err(payload) => {
                self.counters.handler_failures.fetch_add(1, Ordering::Relaxed);
                error!(
                    "Handler {:?} panicked on {}: {}",
                    subscription,
                    event.path.display(),
                    panic_message(&*payload)
                );
            }
        }
    }

    fn run(&self, shutdown: Receiver<()>) {
        let ticker = tick(self.settings.cycle);

        loop {
            select! {
                recv(ticker) -> _ => {
                    self.deliver_batch();
                }
                recv(shutdown) -> _ => break,
            }
        }

        match self.settings.shutdown {
            ShutdownPolicy::Drain => {
                let deadline = Instant::now() + self.settings.drain_grace;
                while Instant::now() < deadline && self.deliver_batch() > 0 {}

                let left = self.rx.len();
                if left > 0 {
                    warn!("Drain grace elapsed with {} undelivered announcements", left);
                    self.discard();
                }
            }
            ShutdownPolicy::Immediate => {
                let discarded = self.discard();
                if discarded > 0 {
                    debug!("Discarded {} queued announcements", discarded);
                }
            }
        }
    }

    fn discard(&self) -> usize {
        let discarded = self.rx.try_iter().count();
        self.counters
            .dropped
            .fetch_add(discarded as u64, Ordering::Relaxed);
        discarded
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Order-preserving, batched fan-out of events to handlers
pub struct AnnouncementQueue {
    tx: Sender<Arc<Event>>,
    shared: Arc<Shared>,
    next_id: AtomicU64,
    stopped: AtomicBool,
    shutdown_tx: Mutex<Option<Sender<()>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AnnouncementQueue {
    pub fn new(settings: QueueSettings) -> Self {
        let (tx, rx) = crossbeam_channel::bounded(settings.capacity);
        Self {
            tx,
            shared: Arc::new(Shared {
                rx,
                handlers: RwLock::new(Vec::new()),
                settings,
                counters: Counters::default(),
            }),
            next_id: AtomicU64::new(1),
            stopped: AtomicBool::new(false),
            shutdown_tx: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    /// Spawn the delivery thread
    pub fn start(&self) -> Result<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(WatchError::Closed);
        }
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Err(WatchError::AlreadyStarted);
        }

        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(1);
        let shared = self.shared.clone();
        let handle = std::thread::Builder::new()
            .name("treewatch-deliver".to_string())
            .spawn(move || shared.run(shutdown_rx))
            .map_err(|source| WatchError::Spawn {
                thread: "delivery",
                source,
            })?;

        *self.shutdown_tx.lock() = Some(shutdown_tx);
        *worker = Some(handle);
        Ok(())
    }

    /// Enqueue without blocking; `false` if the event was dropped
    pub fn announce(&self, event: Event) -> bool {
        if self.stopped.load(Ordering::SeqCst) {
            self.shared.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        match self.tx.try_send(Arc::new(event)) {
            Ok(()) => {
                self.shared.counters.announced.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(event)) | Err(TrySendError::Disconnected(event)) => {
                self.shared.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Announcement queue full ({}), dropping event for {}",
                    self.shared.settings.capacity,
                    event.path.display()
                );
                false
            }
        }
    }

    pub fn subscribe(&self, handler: impl Handler + 'static) -> Subscription {
        let subscription = Subscription(self.next_id.fetch_add(1, Ordering::Relaxed));
        let handler: Arc<dyn Handler> = Arc::new(handler);
        self.shared.handlers.write().push((subscription, handler));
        subscription
    }

    /// Remove a handler; it may still see the batch being delivered
    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        let mut handlers = self.shared.handlers.write();
        let before = handlers.len();
        handlers.retain(|(s, _)| *s != subscription);
        handlers.len() != before
    }

    pub fn handler_count(&self) -> usize {
        self.shared.handlers.read().len()
    }

    /// Announcements waiting for delivery
    pub fn pending(&self) -> usize {
        self.shared.rx.len()
    }

    pub fn stats(&self) -> QueueStats {
        let c = &self.shared.counters;
        QueueStats {
            announced: c.announced.load(Ordering::Relaxed),
            delivered: c.delivered.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            handler_failures: c.handler_failures.load(Ordering::Relaxed),
        }
    }

    /// Stop delivery according to the shutdown policy and join the thread
    ///
    /// Once this returns no handler is called again. Calling it twice is a no-op.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        // dropping the sender wakes the delivery thread
        self.shutdown_tx.lock().take();
        let worker = self.worker.lock().take();
        match worker {
            Some(worker) => {
                if worker.join().is_err() {
                    error!("Delivery thread panicked");
                }
            }
            None => {
                self.shared.discard();
            }
        }
    }
}

impl fmt::Debug for AnnouncementQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnnouncementQueue")
            .field("settings", &self.shared.settings)
            .field("handlers", &self.handler_count())
            .field("pending", &self.pending())
            .finish()
    }
}

impl Drop for AnnouncementQueue {
    fn drop(&mut self) {
        self.stop();
    }
}
