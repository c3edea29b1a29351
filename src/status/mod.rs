//! Run observability: status snapshot and append-only event log.
//!
//! The snapshot is a single JSON file overwritten atomically each run
//! (write to temp, rename) for the status viewer to read; history lives
//! in the `run_events` table, one row per run outcome.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use crate::config::Config;

/// Terminal outcome of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// A draft was created and committed.
    Drafted,
    /// Content was not ready; the meeting waits for the next trigger.
    Deferred,
    /// Only terminal skips this run.
    Skipped,
    /// Nothing inside the window to work on.
    Idle,
    /// No metadata source was found.
    SourceUnavailable,
    /// A collaborator or internal failure aborted the meeting.
    Failed,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Drafted => "drafted",
            Self::Deferred => "deferred",
            Self::Skipped => "skipped",
            Self::Idle => "idle",
            Self::SourceUnavailable => "source_unavailable",
            Self::Failed => "failed",
        }
    }
}

/// Credential/availability probe for one collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl HealthCheck {
    fn ok() -> Self {
        Self {
            ok: true,
            detail: None,
        }
    }

    fn failing(detail: impl Into<String>) -> Self {
        Self {
            ok: false,
            detail: Some(detail.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub source: HealthCheck,
    pub content_api: HealthCheck,
    pub mail_store: HealthCheck,
    pub generator: HealthCheck,
}

/// Snapshot of the last run, overwritten whole every run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStatus {
    pub last_run: DateTime<Utc>,
    pub outcome: RunOutcome,
    pub processed: u32,
    pub deferred: u32,
    pub skipped: u32,
    pub health: HealthReport,
}

/// Probe collaborator credentials without calling anyone.
pub fn check_health(config: &Config) -> HealthReport {
    let source = match &config.source.cache_dir {
        None => HealthCheck::failing("cache_dir not configured"),
        Some(dir) if !Path::new(dir).is_dir() => {
            HealthCheck::failing(format!("cache_dir {} does not exist", dir))
        }
        Some(_) => HealthCheck::ok(),
    };

    let content_api = match &config.source.auth_file {
        None => HealthCheck::failing("auth_file not configured"),
        Some(file) => match crate::content::NotesApiProvider::new(
            &config.source.notes_endpoint,
            Path::new(file),
            config.source.min_notes_chars,
        ) {
            Ok(_) => HealthCheck::ok(),
            Err(e) => HealthCheck::failing(e.to_string()),
        },
    };

    let mail_store = match &config.mail.token_file {
        None => HealthCheck::failing("token_file not configured"),
        Some(file) if !Path::new(file).is_file() => {
            HealthCheck::failing(format!("token file {} does not exist", file))
        }
        Some(_) => HealthCheck::ok(),
    };

    let generator = match std::env::var(&config.generation.api_key_env) {
        Ok(key) if !key.is_empty() => HealthCheck::ok(),
        _ => HealthCheck::failing(format!("{} not set", config.generation.api_key_env)),
    };

    HealthReport {
        source,
        content_api,
        mail_store,
        generator,
    }
}

/// Atomically overwrite the status snapshot: write a temp file in the
/// same directory, then rename over the target. Readers never observe a
/// partial write.
pub fn write_snapshot(path: &Path, status: &RunStatus) -> Result<()> {
    let parent = path
        .parent()
        .context("Status snapshot path missing parent directory")?;
    std::fs::create_dir_all(parent).context("Failed to create status directory")?;

    let content =
        serde_json::to_string_pretty(status).context("Failed to serialize status snapshot")?;

    let temp = tempfile::NamedTempFile::new_in(parent)
        .context("Failed to create temporary snapshot file")?;
    std::fs::write(temp.path(), content).context("Failed to write snapshot")?;
    temp.persist(path)
        .with_context(|| format!("Failed to replace snapshot at {:?}", path))?;

    debug!("Status snapshot written to {:?}", path);
    Ok(())
}

pub fn read_snapshot(path: &Path) -> Result<Option<RunStatus>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path).context("Failed to read status snapshot")?;
    let status = serde_json::from_str(&content).context("Failed to parse status snapshot")?;
    Ok(Some(status))
}

// ============================================================================
// Event log
// ============================================================================

/// One appended run-outcome record.
#[derive(Debug, Clone)]
pub struct RunEvent {
    pub run_id: String,
    pub outcome: RunOutcome,
    pub meeting_id: Option<String>,
    pub detail: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RunEventRow {
    pub id: i64,
    pub run_id: String,
    pub outcome: String,
    pub meeting_id: Option<String>,
    pub detail: Option<String>,
    pub created_at: String,
}

pub struct RunEventRepository;

impl RunEventRepository {
    pub fn append(conn: &Connection, event: &RunEvent) -> Result<()> {
        conn.execute(
            "INSERT INTO run_events (run_id, outcome, meeting_id, detail) \
             VALUES (?1, ?2, ?3, ?4)",
            params![
                event.run_id,
                event.outcome.as_str(),
                event.meeting_id,
                event.detail
            ],
        )
        .context("Failed to append run event")?;
        Ok(())
    }

    /// Recent events, newest first.
    pub fn recent(conn: &Connection, limit: usize) -> Result<Vec<RunEventRow>> {
        let mut stmt = conn
            .prepare(
                "SELECT id, run_id, outcome, meeting_id, detail, created_at \
                 FROM run_events ORDER BY id DESC LIMIT ?1",
            )
            .context("Failed to prepare run event query")?;

        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok(RunEventRow {
                    id: row.get(0)?,
                    run_id: row.get(1)?,
                    outcome: row.get(2)?,
                    meeting_id: row.get(3)?,
                    detail: row.get(4)?,
                    created_at: row.get(5)?,
                })
            })
            .context("Failed to query run events")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("Failed to map run events")?;

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrate;

    fn sample_status(outcome: RunOutcome) -> RunStatus {
        RunStatus {
            last_run: Utc::now(),
            outcome,
            processed: 1,
            deferred: 0,
            skipped: 2,
            health: HealthReport {
                source: HealthCheck::ok(),
                content_api: HealthCheck::ok(),
                mail_store: HealthCheck::failing("token file missing"),
                generator: HealthCheck::ok(),
            },
        }
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.json");

        let status = sample_status(RunOutcome::Drafted);
        write_snapshot(&path, &status).unwrap();

        let loaded = read_snapshot(&path).unwrap().unwrap();
        assert_eq!(loaded.outcome, RunOutcome::Drafted);
        assert_eq!(loaded.processed, 1);
        assert_eq!(loaded.skipped, 2);
        assert!(!loaded.health.mail_store.ok);
    }

    #[test]
    fn test_snapshot_overwrites_whole() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.json");

        write_snapshot(&path, &sample_status(RunOutcome::Drafted)).unwrap();
        write_snapshot(&path, &sample_status(RunOutcome::Idle)).unwrap();

        let loaded = read_snapshot(&path).unwrap().unwrap();
        assert_eq!(loaded.outcome, RunOutcome::Idle);
    }

    #[test]
    fn test_missing_snapshot_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_snapshot(&dir.path().join("nope.json"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_event_log_appends_and_lists_newest_first() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();

        RunEventRepository::append(
            &conn,
            &RunEvent {
                run_id: "run-1".to_string(),
                outcome: RunOutcome::Deferred,
                meeting_id: Some("m-1".to_string()),
                detail: Some("notes not ready".to_string()),
            },
        )
        .unwrap();
        RunEventRepository::append(
            &conn,
            &RunEvent {
                run_id: "run-2".to_string(),
                outcome: RunOutcome::Drafted,
                meeting_id: Some("m-1".to_string()),
                detail: None,
            },
        )
        .unwrap();

        let events = RunEventRepository::recent(&conn, 10).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].run_id, "run-2");
        assert_eq!(events[0].outcome, "drafted");
        assert_eq!(events[1].detail, Some("notes not ready".to_string()));
    }

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_string(&RunOutcome::SourceUnavailable).unwrap();
        assert_eq!(json, "\"source_unavailable\"");
    }
}
