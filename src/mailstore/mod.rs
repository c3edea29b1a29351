//! Mail-store collaborator: prior correspondence lookup and draft creation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod http;

pub use http::HttpMailStore;

#[derive(Debug, Error)]
pub enum MailStoreError {
    #[error("Mail store unavailable: {0}")]
    Unavailable(String),
    #[error("Mail store token expired or revoked")]
    AuthExpired,
    #[error("Mail store token not found: {0}")]
    TokenMissing(String),
    #[error("Mail store API error {status}: {message}")]
    Api { status: u16, message: String },
}

/// One message of a prior thread with a contact, metadata only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadMessage {
    pub from: String,
    pub subject: String,
    pub snippet: String,
    /// Raw date header as reported by the store.
    pub date: String,
}

/// A draft ready for submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingDraft {
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub subject: String,
    pub body: String,
}

/// External mail-store API. Both operations fail with an availability
/// error kind on auth or network trouble.
#[async_trait]
pub trait MailStore: Send + Sync {
    /// Prior messages exchanged with `address` since `since`, newest
    /// first, at most `max_count`. An empty history is a valid answer.
    async fn list_thread(
        &self,
        address: &str,
        since: DateTime<Utc>,
        max_count: usize,
    ) -> Result<Vec<ThreadMessage>, MailStoreError>;

    /// Persist a draft; returns the store's opaque draft identifier.
    async fn create_draft(&self, draft: &OutgoingDraft) -> Result<String, MailStoreError>;
}
