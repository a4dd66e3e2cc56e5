//! treewatch CLI - tw command

use clap::{Parser, Subcommand};
use anyhow::Result;
use std::path::PathBuf;

mod cmd;
mod util;

/// treewatch - Recursive file change notifications
#[derive(Parser)]
#[command(name = "tw")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch a file or directory tree and print every change
    Watch {
        /// File or directory to watch
        path: PathBuf,

        /// TOML file with notifier options (command-line flags win)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Only watch the top-level directory
        #[arg(long)]
        no_recurse: bool,

        /// Event kinds to report (e.g. create,delete or all_events)
        #[arg(long, value_delimiter = ',')]
        kinds: Vec<String>,

        /// Gitignore-style pattern to leave unwatched (repeatable)
        #[arg(long)]
        exclude: Vec<String>,

        /// Print one JSON object per event
        #[arg(long)]
        json: bool,

        /// Log raw events and noise decisions
        #[arg(long)]
        spy: bool,

        /// Events delivered per cycle
        #[arg(long)]
        batch_size: Option<usize>,

        /// Delivery cycle in milliseconds
        #[arg(long)]
        cycle_ms: Option<u64>,
    },
    /// List recognized event kinds
    Kinds,
    /// Print the default configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Watch {
            path,
            config,
            no_recurse,
            kinds,
            exclude,
            json,
            spy,
            batch_size,
            cycle_ms,
        } => {
            let overrides = util::Overrides {
                no_recurse,
                kinds,
                exclude,
                batch_size,
                cycle_ms,
            };
            cmd::watch::run(&path, config.as_deref(), overrides, json, spy).await
        }
        Commands::Kinds => cmd::kinds::run(),
        Commands::Config => cmd::config::run(),
    }
}
