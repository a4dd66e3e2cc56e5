//! Error types for the watcher
//!
//! Configuration and lifecycle errors are returned synchronously to the caller.
//! Failures on background threads are logged and never cross thread boundaries.

use crate::source::WatchHandle;
use nix::errno::Errno;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for watcher operations
pub type Result<T> = std::result::Result<T, WatchError>;

/// Error returned by subscribed handlers
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by the notifier and its configuration
#[derive(Debug, Error)]
pub enum WatchError {
    /// Target path does not exist
    #[error("could not find {}", .0.display())]
    NotFound(PathBuf),

    /// Recursion requested on something that is not a directory
    #[error("cannot recurse, {} is not a directory", .0.display())]
    NotADirectory(PathBuf),

    /// Event kind name is not one of the recognized kinds
    #[error("unrecognized event kind '{0}'")]
    UnknownKind(String),

    /// A numeric or structural option is out of range
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An exclusion pattern failed to compile
    #[error("invalid exclude pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: ignore::Error,
    },

    /// `start` called on a notifier that is already watching
    #[error("already watching")]
    AlreadyStarted,

    /// Operation on a closed notifier
    #[error("notifier is closed, create a new one instead")]
    Closed,

    /// Raw event source failure
    #[error(transparent)]
    Source(#[from] SourceError),

    /// A background thread could not be spawned
    #[error("failed to spawn {thread} thread: {source}")]
    Spawn {
        thread: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from the raw event source
#[derive(Debug, Error)]
pub enum SourceError {
    /// Path to watch does not exist
    #[error("no such file or directory: {}", .0.display())]
    NotFound(PathBuf),

    /// Handle is unknown or was already invalidated by the kernel
    #[error("watch handle {0} is not valid")]
    InvalidHandle(WatchHandle),

    /// The registry was torn down while the watch was being added
    #[error("watch registry is closed")]
    Closed,

    /// Any other system call failure
    #[error("{op} failed: {source}")]
    Sys {
        op: &'static str,
        #[source]
        source: Errno,
    },
}

impl SourceError {
    /// Whether this error means the watch was already gone
    pub fn is_invalid_handle(&self) -> bool {
        matches!(self, SourceError::InvalidHandle(_))
    }
}
