//! End-to-end pipeline runs against fake collaborators.
//!
//! Everything on disk (cache, state db, lock, snapshot) lives in a temp
//! directory; the content source, mail store, and generator are scripted
//! fakes that count their calls.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use followup::config::Config;
use followup::content::{ContentError, ContentSource, Readiness, TranscriptSegment};
use followup::db;
use followup::generator::{GenerationError, TextGenerator};
use followup::lock::RunLock;
use followup::mailstore::{MailStore, MailStoreError, OutgoingDraft, ThreadMessage};
use followup::pipeline::{run, Collaborators, RunPaths};
use followup::state::{LookupStatus, StateStore};
use followup::status::{read_snapshot, RunOutcome};

// ============================================================================
// Fakes
// ============================================================================

#[derive(Default)]
struct Counters {
    content_calls: AtomicU32,
    mail_calls: AtomicU32,
    generator_calls: AtomicU32,
}

struct FakeContent {
    counters: Arc<Counters>,
    /// Poll attempt (1-based) on which notes become ready. 0 = never.
    notes_ready_on: u32,
    attempts: AtomicU32,
}

#[async_trait]
impl ContentSource for FakeContent {
    async fn transcript(
        &self,
        _meeting_id: &str,
    ) -> Result<Readiness<Vec<TranscriptSegment>>, ContentError> {
        self.counters.content_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Readiness::Ready(vec![
            TranscriptSegment {
                channel: "microphone".to_string(),
                text: "Thanks for the walkthrough, I'll send the revised schedule".to_string(),
                offset_ms: 0,
            },
            TranscriptSegment {
                channel: "system".to_string(),
                text: "Sounds good, the timeline works for us".to_string(),
                offset_ms: 2000,
            },
        ]))
    }

    async fn notes(&self, _meeting_id: &str) -> Result<Readiness<String>, ContentError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.notes_ready_on > 0 && attempt >= self.notes_ready_on {
            Ok(Readiness::Ready(
                "Summary:\n- Phased rollout agreed\n- Revised schedule due Thursday".to_string(),
            ))
        } else {
            Ok(Readiness::NotReady)
        }
    }
}

struct FakeMail {
    counters: Arc<Counters>,
    drafts: Arc<Mutex<Vec<OutgoingDraft>>>,
    fail_draft: bool,
}

#[async_trait]
impl MailStore for FakeMail {
    async fn list_thread(
        &self,
        _address: &str,
        _since: DateTime<Utc>,
        _max_count: usize,
    ) -> Result<Vec<ThreadMessage>, MailStoreError> {
        self.counters.mail_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Vec::new())
    }

    async fn create_draft(&self, draft: &OutgoingDraft) -> Result<String, MailStoreError> {
        self.counters.mail_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_draft {
            return Err(MailStoreError::Unavailable("draft endpoint down".to_string()));
        }
        let mut drafts = self.drafts.lock().unwrap();
        drafts.push(draft.clone());
        Ok(format!("draft-{}", drafts.len()))
    }
}

struct FakeGenerator {
    counters: Arc<Counters>,
}

#[async_trait]
impl TextGenerator for FakeGenerator {
    async fn generate(&self, _prompt: &str) -> Result<String, GenerationError> {
        self.counters.generator_calls.fetch_add(1, Ordering::SeqCst);
        Ok(r#"{"subject": "re: our call today", "body": "Hi Sam,\n\nGreat speaking earlier. It sounds like the phased rollout is the right shape for your team. We agreed to start with the pilot group. I will send the revised schedule by Thursday. What does your calendar look like early next week?\n\nBest,\nMatthew"}"#.to_string())
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    _dir: tempfile::TempDir,
    cache_dir: std::path::PathBuf,
    config: Config,
    paths: RunPaths,
    counters: Arc<Counters>,
    drafts: Arc<Mutex<Vec<OutgoingDraft>>>,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let cache_dir = dir.path().join("cache");
        std::fs::create_dir_all(&cache_dir).unwrap();

        let mut config = Config::default();
        config.source.cache_dir = Some(cache_dir.to_string_lossy().into_owned());
        config.selection.internal_domains = vec!["co.com".to_string()];
        config.selection.self_email = "me@co.com".to_string();
        config.selection.lookback_hours = 8;
        // Three fast attempts per run
        config.polling.interval_seconds = 1;
        config.polling.max_wait_seconds = 3;
        config.generation.sender_name = "Matthew".to_string();

        let paths = RunPaths {
            lock_file: dir.path().join("run.lock"),
            db_file: dir.path().join("followup.db"),
            status_file: dir.path().join("status.json"),
        };

        Self {
            cache_dir,
            config,
            paths,
            counters: Arc::new(Counters::default()),
            drafts: Arc::new(Mutex::new(Vec::new())),
            _dir: dir,
        }
    }

    fn collaborators(&self, notes_ready_on: u32, fail_draft: bool) -> Collaborators {
        Collaborators {
            content: Box::new(FakeContent {
                counters: self.counters.clone(),
                notes_ready_on,
                attempts: AtomicU32::new(0),
            }),
            mail: Box::new(FakeMail {
                counters: self.counters.clone(),
                drafts: self.drafts.clone(),
                fail_draft,
            }),
            generator: Box::new(FakeGenerator {
                counters: self.counters.clone(),
            }),
        }
    }

    fn write_cache(&self, documents: &[String]) {
        let docs = documents.join(",");
        std::fs::write(
            self.cache_dir.join("cache-v3.json"),
            format!(r#"{{"cache": {{"state": {{"documents": {{{docs}}}}}}}}}"#),
        )
        .unwrap();
    }

    fn total_collaborator_calls(&self) -> u32 {
        self.counters.content_calls.load(Ordering::SeqCst)
            + self.counters.mail_calls.load(Ordering::SeqCst)
            + self.counters.generator_calls.load(Ordering::SeqCst)
    }
}

fn document(id: &str, ended_at: DateTime<Utc>, emails: &[&str], channels: &[&str]) -> String {
    let attendees = emails
        .iter()
        .map(|e| format!(r#"{{"email": "{e}"}}"#))
        .collect::<Vec<_>>()
        .join(",");
    let channels = channels
        .iter()
        .map(|c| format!(r#""{c}""#))
        .collect::<Vec<_>>()
        .join(",");
    format!(
        r#""{id}": {{
            "id": "{id}",
            "title": "Meeting {id}",
            "created_at": "{created}",
            "calendar_event": {{
                "summary": "Meeting {id}",
                "end": {{"dateTime": "{ended}"}},
                "attendees": [{attendees}]
            }},
            "audio_channels": [{channels}],
            "transcript_ready": true,
            "notes_ready": true
        }}"#,
        created = (ended_at - Duration::hours(1)).to_rfc3339(),
        ended = ended_at.to_rfc3339(),
    )
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn actionable_meeting_produces_one_draft() {
    let harness = Harness::new();
    harness.write_cache(&[document(
        "m-1",
        Utc::now() - Duration::hours(1),
        &["me@co.com", "colleague@co.com", "client@other.com"],
        &["microphone", "system"],
    )]);

    let collaborators = harness.collaborators(1, false);
    let report = run(&harness.config, &collaborators, &harness.paths)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Drafted);
    assert_eq!(report.processed, 1);

    let drafts = harness.drafts.lock().unwrap();
    assert_eq!(drafts.len(), 1);
    assert_eq!(drafts[0].to, vec!["client@other.com"]);
    assert_eq!(drafts[0].cc, vec!["colleague@co.com"]);
    assert_eq!(drafts[0].subject, "re: our call today");
    assert!(drafts[0].body.starts_with("Hi Sam,"));

    let conn = db::open_at(&harness.paths.db_file).unwrap();
    assert_eq!(
        StateStore::lookup(&conn, "m-1").unwrap(),
        LookupStatus::Processed
    );

    let draft = report.draft.unwrap();
    assert_eq!(draft.meeting_id, "m-1");
    assert_eq!(draft.draft_id, "draft-1");
    assert!(draft.transcript_chars > 0);

    let snapshot = read_snapshot(&harness.paths.status_file).unwrap().unwrap();
    assert_eq!(snapshot.outcome, RunOutcome::Drafted);
    assert_eq!(snapshot.processed, 1);
}

#[tokio::test]
async fn processed_meeting_short_circuits_with_zero_collaborator_calls() {
    let harness = Harness::new();
    harness.write_cache(&[document(
        "m-1",
        Utc::now() - Duration::hours(1),
        &["me@co.com", "client@other.com"],
        &["microphone", "system"],
    )]);

    let collaborators = harness.collaborators(1, false);
    run(&harness.config, &collaborators, &harness.paths)
        .await
        .unwrap();

    let calls_after_first = harness.total_collaborator_calls();
    let conn = db::open_at(&harness.paths.db_file).unwrap();
    let records_after_first = StateStore::count_records(&conn).unwrap();
    drop(conn);

    let collaborators = harness.collaborators(1, false);
    let report = run(&harness.config, &collaborators, &harness.paths)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Idle);
    assert_eq!(harness.total_collaborator_calls(), calls_after_first);
    assert_eq!(harness.drafts.lock().unwrap().len(), 1);

    let conn = db::open_at(&harness.paths.db_file).unwrap();
    assert_eq!(StateStore::count_records(&conn).unwrap(), records_after_first);
}

#[tokio::test]
async fn internal_meeting_skips_and_leaves_store_untouched() {
    let harness = Harness::new();
    harness.write_cache(&[document(
        "internal",
        Utc::now() - Duration::hours(1),
        &["a@co.com", "b@co.com"],
        &["microphone", "system"],
    )]);

    let collaborators = harness.collaborators(1, false);
    let report = run(&harness.config, &collaborators, &harness.paths)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Skipped);
    assert_eq!(report.skipped, 1);
    assert_eq!(harness.total_collaborator_calls(), 0);

    let conn = db::open_at(&harness.paths.db_file).unwrap();
    assert_eq!(StateStore::count_records(&conn).unwrap(), 0);
}

#[tokio::test]
async fn single_channel_meeting_skips_despite_external_attendee() {
    let harness = Harness::new();
    harness.write_cache(&[document(
        "speakerphone",
        Utc::now() - Duration::hours(1),
        &["me@co.com", "client@other.com"],
        &["microphone"],
    )]);

    let collaborators = harness.collaborators(1, false);
    let report = run(&harness.config, &collaborators, &harness.paths)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Skipped);
    assert_eq!(report.skipped, 1);
    assert!(harness.drafts.lock().unwrap().is_empty());

    let conn = db::open_at(&harness.paths.db_file).unwrap();
    assert_eq!(StateStore::count_records(&conn).unwrap(), 0);
}

#[tokio::test]
async fn not_ready_content_defers_then_succeeds_on_next_trigger() {
    let harness = Harness::new();
    harness.write_cache(&[document(
        "m-1",
        Utc::now() - Duration::hours(1),
        &["me@co.com", "client@other.com"],
        &["microphone", "system"],
    )]);

    // Notes never become ready within this run's budget
    let collaborators = harness.collaborators(0, false);
    let report = run(&harness.config, &collaborators, &harness.paths)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Deferred);
    assert_eq!(report.deferred, 1);
    assert!(harness.drafts.lock().unwrap().is_empty());

    let conn = db::open_at(&harness.paths.db_file).unwrap();
    match StateStore::lookup(&conn, "m-1").unwrap() {
        LookupStatus::Deferred { attempts } => assert_eq!(attempts, 1),
        other => panic!("Expected deferred, got {:?}", other),
    }
    drop(conn);

    // Next trigger: content is ready now. The deferred meeting is retried,
    // exactly one draft results.
    let collaborators = harness.collaborators(1, false);
    let report = run(&harness.config, &collaborators, &harness.paths)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Drafted);
    assert_eq!(harness.drafts.lock().unwrap().len(), 1);

    let conn = db::open_at(&harness.paths.db_file).unwrap();
    assert_eq!(
        StateStore::lookup(&conn, "m-1").unwrap(),
        LookupStatus::Processed
    );
}

#[tokio::test]
async fn notes_ready_on_second_poll_within_one_run() {
    let harness = Harness::new();
    harness.write_cache(&[document(
        "m-1",
        Utc::now() - Duration::hours(1),
        &["me@co.com", "client@other.com"],
        &["microphone", "system"],
    )]);

    // Not ready on the first poll attempt, ready on the second; the run's
    // budget allows three
    let collaborators = harness.collaborators(2, false);
    let report = run(&harness.config, &collaborators, &harness.paths)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Drafted);
    assert_eq!(harness.drafts.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn draft_creation_failure_leaves_meeting_deferred() {
    let harness = Harness::new();
    harness.write_cache(&[document(
        "m-1",
        Utc::now() - Duration::hours(1),
        &["me@co.com", "client@other.com"],
        &["microphone", "system"],
    )]);

    let collaborators = harness.collaborators(1, true);
    let report = run(&harness.config, &collaborators, &harness.paths)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Failed);
    assert!(harness.drafts.lock().unwrap().is_empty());

    // Not processed: the next trigger retries
    let conn = db::open_at(&harness.paths.db_file).unwrap();
    assert!(matches!(
        StateStore::lookup(&conn, "m-1").unwrap(),
        LookupStatus::Deferred { .. }
    ));
    drop(conn);

    let collaborators = harness.collaborators(1, false);
    let report = run(&harness.config, &collaborators, &harness.paths)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.outcome, RunOutcome::Drafted);
    assert_eq!(harness.drafts.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn back_to_back_idle_runs_yield_identical_snapshots_modulo_timestamp() {
    let harness = Harness::new();
    harness.write_cache(&[]);

    let collaborators = harness.collaborators(1, false);
    run(&harness.config, &collaborators, &harness.paths)
        .await
        .unwrap();
    let first = read_snapshot(&harness.paths.status_file).unwrap().unwrap();

    let collaborators = harness.collaborators(1, false);
    run(&harness.config, &collaborators, &harness.paths)
        .await
        .unwrap();
    let second = read_snapshot(&harness.paths.status_file).unwrap().unwrap();

    assert_eq!(first.outcome, second.outcome);
    assert_eq!(first.processed, second.processed);
    assert_eq!(first.deferred, second.deferred);
    assert_eq!(first.skipped, second.skipped);
    assert_eq!(first.health, second.health);
    assert!(second.last_run >= first.last_run);
}

#[tokio::test]
async fn concurrent_trigger_is_a_no_op() {
    let harness = Harness::new();
    harness.write_cache(&[document(
        "m-1",
        Utc::now() - Duration::hours(1),
        &["me@co.com", "client@other.com"],
        &["microphone", "system"],
    )]);

    // First trigger still "running"
    let held = RunLock::acquire(&harness.paths.lock_file).unwrap();

    let collaborators = harness.collaborators(1, false);
    let report = run(&harness.config, &collaborators, &harness.paths)
        .await
        .unwrap();

    // No report, no side effects
    assert!(report.is_none());
    assert_eq!(harness.total_collaborator_calls(), 0);
    assert!(harness.drafts.lock().unwrap().is_empty());
    assert!(read_snapshot(&harness.paths.status_file).unwrap().is_none());

    drop(held);

    // Lock released: the next trigger proceeds normally
    let collaborators = harness.collaborators(1, false);
    let report = run(&harness.config, &collaborators, &harness.paths)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.outcome, RunOutcome::Drafted);
}

#[tokio::test]
async fn missing_source_is_a_clean_exit() {
    let harness = Harness::new();
    // cache dir exists but holds no cache-v*.json

    let collaborators = harness.collaborators(1, false);
    let report = run(&harness.config, &collaborators, &harness.paths)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::SourceUnavailable);
    assert_eq!(harness.total_collaborator_calls(), 0);

    let conn = db::open_at(&harness.paths.db_file).unwrap();
    assert_eq!(StateStore::count_records(&conn).unwrap(), 0);
}
