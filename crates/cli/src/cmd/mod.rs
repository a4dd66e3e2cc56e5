//! CLI command implementations

pub mod config;
pub mod kinds;
pub mod watch;
