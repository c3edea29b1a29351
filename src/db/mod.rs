//! SQLite persistence for processing state and run events.
//!
//! Raw SQL with rusqlite, no ORM. The database is the single source of
//! truth for dedup; a corrupt or unreadable file is rebuilt empty rather
//! than blocking all future runs (re-processing is recoverable, silent
//! data loss is not).

use anyhow::{Context, Result};
use rusqlite::Connection;
use tracing::warn;

pub fn init_db() -> Result<Connection> {
    open_at(&crate::global::db_file()?)
}

/// Open (or rebuild) the state database at an explicit path.
pub fn open_at(db_path: &std::path::Path) -> Result<Connection> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }

    match open_and_migrate(db_path) {
        Ok(conn) => Ok(conn),
        Err(e) => {
            warn!(
                "State database at {:?} is unusable ({}); rebuilding empty",
                db_path, e
            );
            std::fs::remove_file(db_path).ok();
            open_and_migrate(db_path)
        }
    }
}

fn open_and_migrate(db_path: &std::path::Path) -> Result<Connection> {
    let conn = Connection::open(db_path).context("Failed to open database connection")?;
    migrate(&conn)?;
    Ok(conn)
}

pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS processing_records (
            meeting_id TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            first_seen TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            attempts INTEGER NOT NULL DEFAULT 0,
            last_reason TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )
    .context("Failed to create processing_records table")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS run_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT NOT NULL,
            outcome TEXT NOT NULL,
            meeting_id TEXT,
            detail TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )
    .context("Failed to create run_events table")?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_run_events_created_at ON run_events(created_at DESC)",
        [],
    )
    .context("Failed to create index on run_events")?;

    Ok(())
}
