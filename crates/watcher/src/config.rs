//! Notifier configuration
//!
//! Every recognized option is a named field. Durations are stored as
//! milliseconds so the struct round-trips through TOML unchanged.

use crate::error::{Result, WatchError};
use crate::kind::KindSet;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// What happens to queued announcements when the notifier closes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownPolicy {
    /// Deliver what is already queued, bounded by `drain_grace_ms`
    #[default]
    Drain,
    /// Discard the backlog and stop at once
    Immediate,
}

/// Configuration for one [`Notifier`](crate::Notifier)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotifierConfig {
    /// File or directory to watch
    pub path: PathBuf,

    /// Watch subdirectories (default: true iff `path` is a directory)
    #[serde(default)]
    pub recurse: Option<bool>,

    /// Registrations between throttle pauses during the initial walk
    #[serde(default = "default_recurse_throttle")]
    pub recurse_throttle: usize,

    /// Length of each throttle pause
    #[serde(default = "default_throttle_pause_ms")]
    pub throttle_pause_ms: u64,

    /// Requested event kinds, by name
    #[serde(default = "default_kinds")]
    pub kinds: Vec<String>,

    /// Delay before watching a newly created directory
    #[serde(default = "default_create_delay_ms")]
    pub create_delay_ms: u64,

    /// Extra attempts, with doubling backoff, when watching a new directory
    /// fails (0 keeps the single delayed attempt)
    #[serde(default)]
    pub add_retries: u32,

    /// Announcements delivered per cycle
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Delivery cycle interval
    #[serde(default = "default_cycle_ms")]
    pub cycle_ms: u64,

    /// Announcements buffered before new ones are dropped
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default)]
    pub shutdown: ShutdownPolicy,

    /// Upper bound on delivering the backlog at close with [`ShutdownPolicy::Drain`]
    #[serde(default = "default_drain_grace_ms")]
    pub drain_grace_ms: u64,

    /// Longest wait on the kernel before checking for close
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Gitignore-style patterns kept out of the watch
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl NotifierConfig {
    /// Defaults for watching `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            recurse: None,
            recurse_throttle: default_recurse_throttle(),
            throttle_pause_ms: default_throttle_pause_ms(),
            kinds: default_kinds(),
            create_delay_ms: default_create_delay_ms(),
            add_retries: 0,
            batch_size: default_batch_size(),
            cycle_ms: default_cycle_ms(),
            queue_capacity: default_queue_capacity(),
            shutdown: ShutdownPolicy::default(),
            drain_grace_ms: default_drain_grace_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            exclude: Vec::new(),
        }
    }

    pub fn recurse(mut self, recurse: bool) -> Self {
        self.recurse = Some(recurse);
        self
    }

    pub fn kinds<I, S>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.kinds = kinds.into_iter().map(Into::into).collect();
        self
    }

    pub fn exclude<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn shutdown(mut self, policy: ShutdownPolicy) -> Self {
        self.shutdown = policy;
        self
    }

    /// Check every option, returning the settings the notifier runs with
    pub fn validate(&self) -> Result<ValidatedConfig> {
        if !self.path.exists() {
            return Err(WatchError::NotFound(self.path.clone()));
        }
        let is_dir = self.path.is_dir();
        let recurse = self.recurse.unwrap_or(is_dir);
        if recurse && !is_dir {
            return Err(WatchError::NotADirectory(self.path.clone()));
        }

        let kinds = KindSet::parse(&self.kinds)?;
        if kinds.is_empty() {
            return Err(WatchError::InvalidConfig(
                "at least one event kind is required".to_string(),
            ));
        }

        ensure_positive("recurse_throttle", self.recurse_throttle as u64)?;
        ensure_positive("batch_size", self.batch_size as u64)?;
        ensure_positive("cycle_ms", self.cycle_ms)?;
        ensure_positive("queue_capacity", self.queue_capacity as u64)?;
        ensure_positive("poll_interval_ms", self.poll_interval_ms)?;

        // kernel paths in events are joined onto this, keep it absolute
        let path = std::path::absolute(&self.path)
            .map_err(|e| WatchError::InvalidConfig(format!("cannot resolve path: {}", e)))?;

        Ok(ValidatedConfig {
            path,
            is_dir,
            recurse,
            kinds,
            recurse_throttle: self.recurse_throttle,
            throttle_pause: Duration::from_millis(self.throttle_pause_ms),
            create_delay: Duration::from_millis(self.create_delay_ms),
            add_retries: self.add_retries,
            batch_size: self.batch_size,
            cycle: Duration::from_millis(self.cycle_ms),
            queue_capacity: self.queue_capacity,
            shutdown: self.shutdown,
            drain_grace: Duration::from_millis(self.drain_grace_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            exclude: self.exclude.clone(),
        })
    }
}

fn ensure_positive(name: &str, value: u64) -> Result<()> {
    if value == 0 {
        return Err(WatchError::InvalidConfig(format!("{} must be greater than 0", name)));
    }
    Ok(())
}

/// Settings after validation, with types resolved
#[derive(Debug, Clone)]
pub struct ValidatedConfig {
    pub path: PathBuf,
    pub is_dir: bool,
    pub recurse: bool,
    pub kinds: KindSet,
    pub recurse_throttle: usize,
    pub throttle_pause: Duration,
    pub create_delay: Duration,
    pub add_retries: u32,
    pub batch_size: usize,
    pub cycle: Duration,
    pub queue_capacity: usize,
    pub shutdown: ShutdownPolicy,
    pub drain_grace: Duration,
    pub poll_interval: Duration,
    pub exclude: Vec<String>,
}

impl ValidatedConfig {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn default_recurse_throttle() -> usize {
    10
}

fn default_throttle_pause_ms() -> u64 {
    100
}

fn default_kinds() -> Vec<String> {
    vec!["create".to_string(), "modify".to_string(), "delete".to_string()]
}

fn default_create_delay_ms() -> u64 {
    100
}

fn default_batch_size() -> usize {
    50
}

fn default_cycle_ms() -> u64 {
    50
}

fn default_queue_capacity() -> usize {
    65_536
}

fn default_drain_grace_ms() -> u64 {
    1_000
}

fn default_poll_interval_ms() -> u64 {
    50
}
