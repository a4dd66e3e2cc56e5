//! List recognized event kinds

use anyhow::Result;
use owo_colors::OwoColorize;
use treewatch::{EventKind, ALL_EVENTS_NAME};

pub fn run() -> Result<()> {
    println!("{}", "Event Kinds".bold());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    for kind in EventKind::ALL {
        let note = if kind.is_derived() { "(derived)" } else { "" };
        println!(
            "  {:<14} {} {}",
            kind.name().cyan(),
            format!("{:#010x}", kind.mask()).dimmed(),
            note.dimmed()
        );
    }

    println!();
    println!(
        "{} expands to every change kind",
        ALL_EVENTS_NAME.yellow()
    );
    Ok(())
}
