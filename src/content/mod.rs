//! Content retrieval for selected meetings.
//!
//! Transcripts and generated notes are produced asynchronously by the
//! external source; "not there yet" is a normal condition, not an error.
//! A bounded poll inside the run tolerates short lag, after which the
//! meeting is deferred to the next trigger.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::config::PollingConfig;

mod notes_api;

pub use notes_api::NotesApiProvider;

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("Content API unavailable: {0}")]
    Unavailable(String),
    #[error("Content API authentication failed: {0}")]
    Auth(String),
    #[error("Malformed content API response: {0}")]
    Malformed(String),
}

/// Readiness of an asynchronously produced piece of content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness<T> {
    Ready(T),
    NotReady,
}

/// One utterance of the meeting transcript, chronological order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptSegment {
    /// Raw channel identifier from the recorder.
    pub channel: String,
    pub text: String,
    pub offset_ms: u64,
}

/// Everything the generator needs from the content source.
#[derive(Debug, Clone)]
pub struct MeetingContent {
    pub segments: Vec<TranscriptSegment>,
    pub notes: String,
}

/// External content retrieval API.
#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn transcript(
        &self,
        meeting_id: &str,
    ) -> Result<Readiness<Vec<TranscriptSegment>>, ContentError>;

    async fn notes(&self, meeting_id: &str) -> Result<Readiness<String>, ContentError>;
}

/// Bounded in-run retry: at most `max_wait` of wall clock, one attempt
/// every `interval`. Injected from config so tests can shrink it to
/// milliseconds.
#[derive(Debug, Clone)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_wait: Duration,
}

impl PollPolicy {
    pub fn from_config(polling: &PollingConfig) -> Self {
        Self {
            interval: Duration::from_secs(polling.interval_seconds),
            max_wait: Duration::from_secs(polling.max_wait_seconds),
        }
    }

    /// Number of fetch attempts the budget allows. Always at least one.
    pub fn attempts(&self) -> u64 {
        if self.interval.is_zero() {
            return 1;
        }
        (self.max_wait.as_millis() / self.interval.as_millis().max(1)).max(1) as u64
    }
}

/// Outcome of polling for a meeting's content.
#[derive(Debug)]
pub enum PollOutcome {
    Ready(MeetingContent),
    /// The budget ran out; `reason` names what was still missing.
    TimedOut { reason: String },
}

/// Poll the content source until both transcript and notes are ready or
/// the policy budget is exhausted. Transport errors propagate immediately;
/// only genuine not-ready answers consume attempts.
pub async fn poll_for_content(
    source: &dyn ContentSource,
    meeting_id: &str,
    policy: &PollPolicy,
) -> Result<PollOutcome, ContentError> {
    let attempts = policy.attempts();
    let mut missing = String::new();

    for attempt in 1..=attempts {
        let transcript = source.transcript(meeting_id).await?;
        let notes = source.notes(meeting_id).await?;

        match (transcript, notes) {
            (Readiness::Ready(segments), Readiness::Ready(notes)) => {
                info!(
                    "Content ready for {} on attempt {}/{}: {} segments, {} note chars",
                    meeting_id,
                    attempt,
                    attempts,
                    segments.len(),
                    notes.len()
                );
                return Ok(PollOutcome::Ready(MeetingContent { segments, notes }));
            }
            (transcript, notes) => {
                missing = match (&transcript, &notes) {
                    (Readiness::NotReady, Readiness::NotReady) => {
                        "transcript and notes not ready".to_string()
                    }
                    (Readiness::NotReady, _) => "transcript not ready".to_string(),
                    _ => "notes not ready".to_string(),
                };
                debug!(
                    "Attempt {}/{} for {}: {}",
                    attempt, attempts, meeting_id, missing
                );
                if attempt < attempts {
                    sleep(policy.interval).await;
                }
            }
        }
    }

    Ok(PollOutcome::TimedOut { reason: missing })
}
