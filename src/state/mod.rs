//! Processing-state store: which meetings have been drafted, which are
//! waiting on content.
//!
//! One record per meeting ID. `deferred → processed` is the only legal
//! transition; `processed` is terminal and short-circuits all later runs
//! for that meeting.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};

/// Result of a dedup lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupStatus {
    /// Never seen before.
    Unseen,
    /// Waiting on content; `attempts` fetches have been deferred so far.
    Deferred { attempts: i64 },
    /// Draft already created. Terminal.
    Processed,
}

#[derive(Debug, Clone)]
pub struct ProcessingRecord {
    pub meeting_id: String,
    pub status: String,
    pub first_seen: String,
    pub attempts: i64,
    pub last_reason: Option<String>,
}

const STATUS_DEFERRED: &str = "deferred";
const STATUS_PROCESSED: &str = "processed";

/// Repository for processing records.
pub struct StateStore;

impl StateStore {
    pub fn lookup(conn: &Connection, meeting_id: &str) -> Result<LookupStatus> {
        let row: Option<(String, i64)> = conn
            .query_row(
                "SELECT status, attempts FROM processing_records WHERE meeting_id = ?1",
                params![meeting_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .context("Failed to look up processing record")?;

        Ok(match row {
            None => LookupStatus::Unseen,
            Some((status, _)) if status == STATUS_PROCESSED => LookupStatus::Processed,
            Some((_, attempts)) => LookupStatus::Deferred { attempts },
        })
    }

    /// Upsert a deferral: first deferral creates the record, later ones
    /// bump the attempt count and reason. A processed record is never
    /// downgraded.
    pub fn record_deferred(conn: &Connection, meeting_id: &str, reason: &str) -> Result<()> {
        conn.execute(
            "INSERT INTO processing_records (meeting_id, status, attempts, last_reason) \
             VALUES (?1, ?2, 1, ?3) \
             ON CONFLICT(meeting_id) DO UPDATE SET \
                 attempts = processing_records.attempts + 1, \
                 last_reason = excluded.last_reason, \
                 updated_at = CURRENT_TIMESTAMP \
             WHERE processing_records.status = ?2",
            params![meeting_id, STATUS_DEFERRED, reason],
        )
        .context("Failed to record deferral")?;
        Ok(())
    }

    /// Mark a meeting processed. Valid from unseen or deferred.
    pub fn record_processed(conn: &Connection, meeting_id: &str) -> Result<()> {
        conn.execute(
            "INSERT INTO processing_records (meeting_id, status) VALUES (?1, ?2) \
             ON CONFLICT(meeting_id) DO UPDATE SET \
                 status = ?2, \
                 last_reason = NULL, \
                 updated_at = CURRENT_TIMESTAMP",
            params![meeting_id, STATUS_PROCESSED],
        )
        .context("Failed to record processed meeting")?;
        Ok(())
    }

    pub fn get(conn: &Connection, meeting_id: &str) -> Result<Option<ProcessingRecord>> {
        conn.query_row(
            "SELECT meeting_id, status, first_seen, attempts, last_reason \
             FROM processing_records WHERE meeting_id = ?1",
            params![meeting_id],
            |row| {
                Ok(ProcessingRecord {
                    meeting_id: row.get(0)?,
                    status: row.get(1)?,
                    first_seen: row.get(2)?,
                    attempts: row.get(3)?,
                    last_reason: row.get(4)?,
                })
            },
        )
        .optional()
        .context("Failed to fetch processing record")
    }

    /// Meeting IDs still worth retrying, most recently touched first.
    /// Records past the attempt cutoff stay deferred but are no longer
    /// offered for retry; operators can clear the store to reset.
    pub fn deferred_candidates(conn: &Connection, max_deferrals: i64) -> Result<Vec<String>> {
        let mut stmt = conn
            .prepare(
                "SELECT meeting_id FROM processing_records \
                 WHERE status = ?1 AND attempts < ?2 \
                 ORDER BY updated_at DESC",
            )
            .context("Failed to prepare deferred query")?;

        let ids = stmt
            .query_map(params![STATUS_DEFERRED, max_deferrals], |row| row.get(0))
            .context("Failed to query deferred meetings")?
            .collect::<std::result::Result<Vec<String>, _>>()
            .context("Failed to map deferred meetings")?;

        Ok(ids)
    }

    pub fn count_records(conn: &Connection) -> Result<i64> {
        conn.query_row("SELECT COUNT(*) FROM processing_records", [], |row| {
            row.get(0)
        })
        .context("Failed to count processing records")
    }
}
