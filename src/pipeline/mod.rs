//! Pipeline orchestrator.
//!
//! One invocation, run to completion: lock, discover, select, dedup,
//! poll for content, label speakers, gather context, generate, emit,
//! commit, record. All collaborators are injected so the whole flow runs
//! against fakes in tests.

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::Connection;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::content::{poll_for_content, ContentSource, PollOutcome, PollPolicy};
use crate::context::gather_context;
use crate::generator::{generate_email, PromptInput, TextGenerator};
use crate::lock::{LockError, RunLock};
use crate::mailstore::{MailStore, OutgoingDraft};
use crate::meeting::{select_meeting, Meeting, SelectionCounts};
use crate::source::{load_meetings, SourceError};
use crate::speaker::label_transcript;
use crate::state::StateStore;
use crate::status::{
    check_health, write_snapshot, RunEvent, RunEventRepository, RunOutcome, RunStatus,
};

/// Injected external collaborators.
pub struct Collaborators {
    pub content: Box<dyn ContentSource>,
    pub mail: Box<dyn MailStore>,
    pub generator: Box<dyn TextGenerator>,
}

/// Filesystem locations for one run; defaults come from the app dirs.
#[derive(Debug, Clone)]
pub struct RunPaths {
    pub lock_file: PathBuf,
    pub db_file: PathBuf,
    pub status_file: PathBuf,
}

impl RunPaths {
    pub fn from_global() -> Result<Self> {
        Ok(Self {
            lock_file: crate::global::run_lock_file()?,
            db_file: crate::global::db_file()?,
            status_file: crate::global::status_file()?,
        })
    }
}

/// Observational record of a successful draft.
#[derive(Debug, Clone)]
pub struct DraftResult {
    pub meeting_id: String,
    pub draft_id: String,
    pub generation_ms: u128,
    pub transcript_chars: usize,
}

/// What one run did.
#[derive(Debug)]
pub struct RunReport {
    pub run_id: String,
    pub outcome: RunOutcome,
    pub processed: u32,
    pub deferred: u32,
    pub skipped: u32,
    pub meeting_id: Option<String>,
    pub draft: Option<DraftResult>,
    pub detail: Option<String>,
}

/// How processing the selected meeting ended.
enum MeetingOutcome {
    Drafted(DraftResult),
    Deferred { reason: String },
    Failed { detail: String, deferred: bool },
}

/// Execute one pipeline run.
///
/// Returns `None` when another run holds the lock: that invocation is a
/// no-op by design and leaves no trace beyond a log line. Every other
/// terminal outcome is recorded in the event log and status snapshot.
/// An `Err` is an unexpected internal failure and maps to a non-zero
/// exit in `main`.
pub async fn run(
    config: &Config,
    collaborators: &Collaborators,
    paths: &RunPaths,
) -> Result<Option<RunReport>> {
    let _lock = match RunLock::acquire(&paths.lock_file) {
        Ok(lock) => lock,
        Err(LockError::AlreadyRunning) => {
            info!("Another run is in progress, exiting");
            return Ok(None);
        }
        Err(e) => return Err(e).context("Failed to acquire run lock"),
    };

    let conn = crate::db::open_at(&paths.db_file)?;
    let report = execute(config, collaborators, &conn).await?;

    RunEventRepository::append(
        &conn,
        &RunEvent {
            run_id: report.run_id.clone(),
            outcome: report.outcome,
            meeting_id: report.meeting_id.clone(),
            detail: report.detail.clone(),
        },
    )?;

    let status = RunStatus {
        last_run: Utc::now(),
        outcome: report.outcome,
        processed: report.processed,
        deferred: report.deferred,
        skipped: report.skipped,
        health: check_health(config),
    };
    write_snapshot(&paths.status_file, &status)?;

    info!(
        "Run {} finished: {} (processed={}, deferred={}, skipped={})",
        report.run_id,
        report.outcome.as_str(),
        report.processed,
        report.deferred,
        report.skipped
    );

    Ok(Some(report))
}

async fn execute(
    config: &Config,
    collaborators: &Collaborators,
    conn: &Connection,
) -> Result<RunReport> {
    let run_id = uuid::Uuid::new_v4().to_string();
    let now = Utc::now();
    info!("Run {} triggered", run_id);

    let mut report = RunReport {
        run_id,
        outcome: RunOutcome::Idle,
        processed: 0,
        deferred: 0,
        skipped: 0,
        meeting_id: None,
        draft: None,
        detail: None,
    };

    // --- Source discovery ---
    let Some(cache_dir) = config.source.cache_dir.as_deref() else {
        warn!("No cache_dir configured, nothing to discover");
        report.outcome = RunOutcome::SourceUnavailable;
        report.detail = Some("cache_dir not configured".to_string());
        return Ok(report);
    };

    let meetings = match load_meetings(std::path::Path::new(cache_dir)) {
        Ok(meetings) => meetings,
        Err(SourceError::Unavailable(dir)) => {
            info!("No metadata source under {:?}, exiting cleanly", dir);
            report.outcome = RunOutcome::SourceUnavailable;
            report.detail = Some(format!("no source under {:?}", dir));
            return Ok(report);
        }
        Err(e) => return Err(e).context("Failed to load metadata source"),
    };

    // --- Selection and dedup ---
    let selection = select_meeting(
        conn,
        &meetings,
        &config.selection,
        config.state.max_deferrals,
        now,
    )?;
    report.skipped = selection.counts.internal_skips + selection.counts.speakerphone_skips;
    report.detail = skip_detail(&selection.counts);

    let Some(meeting) = selection.meeting else {
        report.outcome = if report.skipped > 0 {
            RunOutcome::Skipped
        } else {
            RunOutcome::Idle
        };
        return Ok(report);
    };
    report.meeting_id = Some(meeting.id.clone());

    match process_meeting(config, collaborators, conn, &meeting).await? {
        MeetingOutcome::Drafted(result) => {
            report.outcome = RunOutcome::Drafted;
            report.processed = 1;
            report.detail = Some(format!(
                "draft {} ({} transcript chars, generated in {}ms)",
                result.draft_id, result.transcript_chars, result.generation_ms
            ));
            report.draft = Some(result);
        }
        MeetingOutcome::Deferred { reason } => {
            report.outcome = RunOutcome::Deferred;
            report.deferred = 1;
            report.detail = Some(reason);
        }
        MeetingOutcome::Failed { detail, deferred } => {
            report.outcome = RunOutcome::Failed;
            report.deferred = deferred as u32;
            report.detail = Some(detail);
        }
    }

    Ok(report)
}

/// Take the selected meeting through fetch, labeling, context,
/// generation, and emission.
async fn process_meeting(
    config: &Config,
    collaborators: &Collaborators,
    conn: &Connection,
    meeting: &Meeting,
) -> Result<MeetingOutcome> {
    // --- Content fetch with bounded polling ---
    let policy = PollPolicy::from_config(&config.polling);
    let content = match poll_for_content(collaborators.content.as_ref(), &meeting.id, &policy).await
    {
        Ok(PollOutcome::Ready(content)) => content,
        Ok(PollOutcome::TimedOut { reason }) => {
            warn!(
                "Content for {} not ready ({}), deferring to next trigger",
                meeting.id, reason
            );
            StateStore::record_deferred(conn, &meeting.id, &reason)?;
            return Ok(MeetingOutcome::Deferred { reason });
        }
        Err(e) => {
            error!("Content API failed for {}: {}", meeting.id, e);
            return Ok(MeetingOutcome::Failed {
                detail: format!("content fetch: {}", e),
                deferred: false,
            });
        }
    };

    // --- Speaker attribution ---
    // Channel count was checked at selection; a mismatch here is an
    // upstream filtering bug and must fail loudly, not classify as a skip.
    let transcript = label_transcript(&content.segments, &config.selection.capture_channel)
        .with_context(|| format!("Speaker labeling failed for meeting {}", meeting.id))?;

    let recipients = meeting.recipients(
        &config.selection.internal_domains,
        &config.selection.self_email,
    );

    // --- Prior correspondence ---
    let context = match gather_context(
        collaborators.mail.as_ref(),
        &recipients.to,
        &config.mail,
        Utc::now(),
    )
    .await
    {
        Ok(context) => context,
        Err(e) => {
            error!("Context lookup failed for {}: {}", meeting.id, e);
            return Ok(MeetingOutcome::Failed {
                detail: format!("context lookup: {}", e),
                deferred: false,
            });
        }
    };

    // --- Generation ---
    let started = Instant::now();
    let email = match generate_email(
        collaborators.generator.as_ref(),
        &PromptInput {
            meeting,
            recipients: &recipients,
            transcript: &transcript,
            notes: &content.notes,
            context: &context,
            sender_name: &config.generation.sender_name,
        },
    )
    .await
    {
        Ok(email) => email,
        Err(e) => {
            error!("Generation failed for {}: {}", meeting.id, e);
            return Ok(MeetingOutcome::Failed {
                detail: format!("generation: {}", e),
                deferred: false,
            });
        }
    };
    let generation_ms = started.elapsed().as_millis();

    // --- Draft emission ---
    let draft = OutgoingDraft {
        to: recipients.to,
        cc: recipients.cc,
        subject: email.subject,
        body: email.body,
    };

    let draft_id = match collaborators.mail.create_draft(&draft).await {
        Ok(id) => id,
        Err(e) => {
            error!("Draft creation failed for {}: {}", meeting.id, e);
            // Deferred, not processed: the next trigger retries
            StateStore::record_deferred(
                conn,
                &meeting.id,
                &format!("draft creation failed: {}", e),
            )?;
            return Ok(MeetingOutcome::Failed {
                detail: format!("draft creation: {}", e),
                deferred: true,
            });
        }
    };

    // Commit after emission. A crash between the two leaves the meeting
    // unprocessed, so the next trigger may create one duplicate draft;
    // that window is accepted.
    StateStore::record_processed(conn, &meeting.id)?;

    info!(
        "Draft {} created for meeting {} ({})",
        draft_id, meeting.id, meeting.title
    );

    Ok(MeetingOutcome::Drafted(DraftResult {
        meeting_id: meeting.id.clone(),
        draft_id,
        generation_ms,
        transcript_chars: transcript.char_count(),
    }))
}

fn skip_detail(counts: &SelectionCounts) -> Option<String> {
    if counts.internal_skips + counts.speakerphone_skips == 0 {
        return None;
    }
    Some(format!(
        "{} internal, {} speakerphone",
        counts.internal_skips, counts.speakerphone_skips
    ))
}
