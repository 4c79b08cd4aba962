//! Status command for showing what has been imported.

use std::io::Write;

use anyhow::Result;

use crate::Config;
use crate::commands::util::open_database;

pub fn run<W: Write>(writer: &mut W, config: &Config) -> Result<()> {
    let db = open_database(config)?;
    let summary = db.event_summary()?;

    writeln!(writer, "Run report status")?;
    writeln!(writer, "Database: {}", config.database_path.display())?;

    let Some(last_event_at) = summary.last_event_at else {
        writeln!(writer, "No events recorded.")?;
        return Ok(());
    };

    writeln!(
        writer,
        "Events:   {} on, {} off",
        summary.on_events, summary.off_events
    )?;
    writeln!(writer, "Last event: {last_event_at}")?;

    Ok(())
}
