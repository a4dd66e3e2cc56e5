//! Watch a tree and print events until Ctrl-C

use crate::util::{self, Overrides};
use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use std::path::Path;
use std::sync::Arc;
use tracing::Level;
use treewatch::{Event, HandlerError, Notifier, TracingSpy};

pub async fn run(
    path: &Path,
    config_file: Option<&Path>,
    overrides: Overrides,
    json: bool,
    spy: bool,
) -> Result<()> {
    let config = util::load_config(path, config_file, overrides)?;
    let notifier = Notifier::new(config)
        .with_context(|| format!("Failed to watch {}", path.display()))?;

    notifier.subscribe(move |event: &Event| -> Result<(), HandlerError> {
        if json {
            println!("{}", util::format_event_json(event)?);
        } else {
            println!("{}", util::format_event(event));
        }
        Ok(())
    });
    if spy {
        notifier.spy(TracingSpy::new(Level::INFO));
    }

    notifier.start().context("Failed to start watching")?;

    if !json {
        eprintln!(
            "{} {} {}",
            "Watching".bold(),
            notifier.path().display().to_string().cyan(),
            format!(
                "({}, kinds {}) - press Ctrl-C to stop",
                if notifier.is_recursive() { "recursive" } else { "single" },
                notifier.requested_kinds()
            )
            .dimmed()
        );
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    // close joins the watcher threads
    let notifier = Arc::new(notifier);
    let closing = notifier.clone();
    tokio::task::spawn_blocking(move || closing.close())
        .await
        .context("Failed to close notifier")?;

    if !json {
        let stats = notifier.stats();
        eprintln!(
            "{} {} announced, {} delivered, {} dropped, {} noise",
            "Stopped:".bold(),
            stats.queue.announced,
            stats.queue.delivered,
            stats.queue.dropped,
            stats.noise
        );
    }

    Ok(())
}
