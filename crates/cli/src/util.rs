//! Shared utilities for CLI commands

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use owo_colors::OwoColorize;
use serde::Serialize;
use std::path::Path;
use treewatch::{Event, EventKind, KindSet, NotifierConfig};

/// Command-line flags that override the config file
#[derive(Debug, Default)]
pub struct Overrides {
    pub no_recurse: bool,
    pub kinds: Vec<String>,
    pub exclude: Vec<String>,
    pub batch_size: Option<usize>,
    pub cycle_ms: Option<u64>,
}

/// Build the notifier config for `path` from an optional TOML file plus flags
pub fn load_config(
    path: &Path,
    config_file: Option<&Path>,
    overrides: Overrides,
) -> Result<NotifierConfig> {
    let mut config = match config_file {
        Some(file) => {
            let contents = std::fs::read_to_string(file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            parse_config(path, &contents)
                .with_context(|| format!("Invalid config file {}", file.display()))?
        }
        None => NotifierConfig::new(path),
    };

    if overrides.no_recurse {
        config.recurse = Some(false);
    }
    if !overrides.kinds.is_empty() {
        config.kinds = overrides.kinds;
    }
    config.exclude.extend(overrides.exclude);
    if let Some(batch_size) = overrides.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(cycle_ms) = overrides.cycle_ms {
        config.cycle_ms = cycle_ms;
    }

    Ok(config)
}

/// Parse TOML options; the watched path always comes from the command line
fn parse_config(path: &Path, contents: &str) -> Result<NotifierConfig> {
    let mut table: toml::Table = toml::from_str(contents)?;
    table.insert(
        "path".to_string(),
        toml::Value::String(path.to_string_lossy().into_owned()),
    );
    Ok(toml::Value::Table(table).try_into()?)
}

/// Format an event as one colored line
pub fn format_event(event: &Event) -> String {
    let time: DateTime<Local> = event.timestamp.into();
    let kinds = event.kinds.to_string();
    let kinds = if event.has_kind(EventKind::Create) {
        kinds.green().to_string()
    } else if event.has_kind(EventKind::Delete) || event.has_kind(EventKind::DeleteSelf) {
        kinds.red().to_string()
    } else if event.has_kind(EventKind::Modify) {
        kinds.yellow().to_string()
    } else {
        kinds.cyan().to_string()
    };

    let mut path = event.path.display().to_string();
    if event.is_dir {
        path.push('/');
    }

    format!(
        "{} {} {}",
        time.format("%H:%M:%S%.3f").to_string().dimmed(),
        kinds,
        path
    )
}

#[derive(Serialize)]
struct JsonEvent<'a> {
    time: String,
    path: &'a Path,
    is_dir: bool,
    kinds: &'a KindSet,
}

/// Format an event as a single-line JSON object
pub fn format_event_json(event: &Event) -> Result<String> {
    let time: DateTime<Local> = event.timestamp.into();
    let json = JsonEvent {
        time: time.to_rfc3339(),
        path: &event.path,
        is_dir: event.is_dir,
        kinds: &event.kinds,
    };
    Ok(serde_json::to_string(&json)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::SystemTime;
    use tempfile::TempDir;

    #[test]
    fn test_flags_without_file() {
        let config = load_config(
            Path::new("/srv"),
            None,
            Overrides {
                no_recurse: true,
                kinds: vec!["create".to_string()],
                exclude: vec!["target/".to_string()],
                batch_size: Some(5),
                cycle_ms: None,
            },
        )
        .unwrap();

        assert_eq!(config.path, PathBuf::from("/srv"));
        assert_eq!(config.recurse, Some(false));
        assert_eq!(config.kinds, vec!["create".to_string()]);
        assert_eq!(config.exclude, vec!["target/".to_string()]);
        assert_eq!(config.batch_size, 5);
        assert_eq!(config.cycle_ms, 50);
    }

    #[test]
    fn test_file_then_flags() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("tw.toml");
        std::fs::write(
            &file,
            "kinds = [\"all_events\"]\nexclude = [\"*.log\"]\nshutdown = \"immediate\"\ncycle_ms = 20\n",
        )
        .unwrap();

        let overrides = Overrides {
            exclude: vec!["tmp/".to_string()],
            cycle_ms: Some(10),
            ..Overrides::default()
        };
        let config = load_config(temp_dir.path(), Some(&file), overrides).unwrap();

        assert_eq!(config.path, temp_dir.path());
        assert_eq!(config.kinds, vec!["all_events".to_string()]);
        assert_eq!(config.exclude, vec!["*.log".to_string(), "tmp/".to_string()]);
        assert_eq!(config.shutdown, treewatch::ShutdownPolicy::Immediate);
        assert_eq!(config.cycle_ms, 10);
        assert_eq!(config.batch_size, 50);
    }

    #[test]
    fn test_unknown_file_option_type_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("tw.toml");
        std::fs::write(&file, "batch_size = \"lots\"\n").unwrap();

        assert!(load_config(temp_dir.path(), Some(&file), Overrides::default()).is_err());
    }

    #[test]
    fn test_misspelled_file_option_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("tw.toml");
        std::fs::write(&file, "exlude = [\"target/\"]\n").unwrap();

        let err = load_config(temp_dir.path(), Some(&file), Overrides::default()).unwrap_err();
        assert!(format!("{:#}", err).contains("exlude"));
    }

    #[test]
    fn test_json_event() {
        let event = Event {
            path: PathBuf::from("/srv/new"),
            is_dir: true,
            kinds: KindSet::from([EventKind::Create, EventKind::Isdir]),
            timestamp: SystemTime::now(),
            handle: None,
        };

        let line = format_event_json(&event).unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["path"], "/srv/new");
        assert_eq!(value["is_dir"], true);
        assert_eq!(value["kinds"], serde_json::json!(["create", "isdir"]));
        assert!(format_event(&event).contains("/srv/new/"));
    }
}
