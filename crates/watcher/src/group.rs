//! Caller-owned collection of notifiers

use crate::config::NotifierConfig;
use crate::error::Result;
use crate::notifier::Notifier;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Tracks every notifier an application created so they can be closed together
#[derive(Debug, Default)]
pub struct NotifierGroup {
    notifiers: Vec<Arc<Notifier>>,
}

impl NotifierGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of `notifier`, returning a shared handle to it
    pub fn add(&mut self, notifier: Notifier) -> Arc<Notifier> {
        let notifier = Arc::new(notifier);
        self.notifiers.push(notifier.clone());
        notifier
    }

    /// Create, start and track a notifier for `config`
    pub fn watch(&mut self, config: NotifierConfig) -> Result<Arc<Notifier>> {
        let notifier = Notifier::new(config)?;
        notifier.start()?;
        Ok(self.add(notifier))
    }

    /// Notifier watching `path`; relative paths resolve against the
    /// current directory the same way configs do
    pub fn get(&self, path: &Path) -> Option<Arc<Notifier>> {
        let path = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        self.notifiers.iter().find(|n| n.path() == path).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Notifier>> {
        self.notifiers.iter()
    }

    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }

    /// Close every notifier and forget them
    pub fn close_all(&mut self) -> usize {
        let count = self.notifiers.len();
        for notifier in self.notifiers.drain(..) {
            notifier.close();
        }
        if count > 0 {
            info!("Closed {} notifiers", count);
        }
        count
    }
}

impl Drop for NotifierGroup {
    fn drop(&mut self) {
        self.close_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::NotifierState;
    use crate::source::testing::ScriptedSource;
    use std::fs;
    use tempfile::TempDir;

    fn scripted(path: &Path) -> Notifier {
        let notifier =
            Notifier::with_source(NotifierConfig::new(path), Arc::new(ScriptedSource::new()))
                .unwrap();
        notifier.start().unwrap();
        notifier
    }

    #[test]
    fn test_close_all() {
        let temp_dir = TempDir::new().unwrap();
        let first = temp_dir.path().join("first");
        let second = temp_dir.path().join("second");
        fs::create_dir(&first).unwrap();
        fs::create_dir(&second).unwrap();

        let mut group = NotifierGroup::new();
        let a = group.add(scripted(&first));
        let b = group.add(scripted(&second));
        assert_eq!(group.len(), 2);
        assert!(group.get(&second).is_some());

        assert_eq!(group.close_all(), 2);
        assert!(group.is_empty());
        assert_eq!(a.state(), NotifierState::Closed);
        assert_eq!(b.state(), NotifierState::Closed);
        assert_eq!(a.watch_count(), 0);
    }

    #[test]
    fn test_get_resolves_relative_path() {
        let notifier = Notifier::with_source(
            NotifierConfig::new(".").recurse(false),
            Arc::new(ScriptedSource::new()),
        )
        .unwrap();

        let mut group = NotifierGroup::new();
        group.add(notifier);
        assert!(group.get(Path::new(".")).is_some());
        assert!(group.get(&std::env::current_dir().unwrap()).is_some());
        assert!(group.get(Path::new("elsewhere")).is_none());
    }

    #[test]
    fn test_watch_propagates_config_errors() {
        let temp_dir = TempDir::new().unwrap();
        let mut group = NotifierGroup::new();

        assert!(group
            .watch(NotifierConfig::new(temp_dir.path().join("missing")))
            .is_err());
        assert!(group.is_empty());
    }
}
