//! Print the default configuration
//!
//! The output is a valid `--config` file; `path` is ignored there since the
//! watched path always comes from the command line.

use anyhow::{Context, Result};
use treewatch::NotifierConfig;

pub fn run() -> Result<()> {
    let config = NotifierConfig::new(".");
    let rendered = toml::to_string_pretty(&config)
        .context("Failed to render default configuration")?;
    print!("{}", rendered);
    Ok(())
}
