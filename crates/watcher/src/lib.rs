//! Recursive inotify file watching
//!
//! This crate watches a file or a whole directory tree and announces
//! changes to subscribers:
//! - Recursive watches, maintained as directories come and go
//! - Noise suppression for events caused by watching itself
//! - Child-relative paths, so each event names what actually changed
//! - Batched, ordered delivery on a dedicated thread
//!
//! ```no_run
//! use treewatch::{Event, HandlerError, Notifier, NotifierConfig};
//!
//! # fn main() -> treewatch::Result<()> {
//! let notifier = Notifier::new(NotifierConfig::new("/srv/data").kinds(["create", "delete"]))?;
//! notifier.subscribe(|event: &Event| -> Result<(), HandlerError> {
//!     println!("{}", event);
//!     Ok(())
//! });
//! notifier.start()?;
//! # notifier.close();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod exclude;
pub mod group;
pub mod kind;
pub mod noise;
pub mod notifier;
pub mod queue;
pub mod recurse;
pub mod registry;
pub mod source;
pub mod translate;

pub use config::{NotifierConfig, ShutdownPolicy, ValidatedConfig};
pub use error::{HandlerError, Result, SourceError, WatchError};
pub use exclude::ExcludeRules;
pub use group::NotifierGroup;
pub use kind::{mask, EventKind, KindSet, ALL_EVENTS_NAME};
pub use noise::{noise_signature, NoiseFilter, NoiseSignature};
pub use notifier::{Notifier, NotifierState, NotifierStats, Spy, SpyEvent, TracingSpy};
pub use queue::{AnnouncementQueue, Handler, QueueSettings, QueueStats, Subscription};
pub use registry::{Watch, WatchRegistry};
pub use source::{InotifySource, RawEvent, RawEventSource, WatchHandle};
pub use translate::{collapse, translate, Event};
