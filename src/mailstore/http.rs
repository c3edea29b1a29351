//! Gmail-style REST implementation of the mail store.
//!
//! Drafts are submitted as base64url-encoded RFC 822 messages; thread
//! history is a message list query followed by per-message metadata
//! fetches. Individual metadata failures skip that message rather than
//! failing the whole lookup.

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use tracing::{debug, info};

use super::{MailStore, MailStoreError, OutgoingDraft, ThreadMessage};

// ============================================================================
// Token file
// ============================================================================

/// Stored OAuth token. Both `token` and `access_token` spellings are
/// accepted on read for compatibility with older writers.
#[derive(Debug, Deserialize)]
struct StoredToken {
    #[serde(alias = "access_token")]
    token: String,
}

fn load_token(token_file: &Path) -> Result<String, MailStoreError> {
    let content = std::fs::read_to_string(token_file)
        .map_err(|e| MailStoreError::TokenMissing(format!("{:?}: {}", token_file, e)))?;
    let stored: StoredToken = serde_json::from_str(&content)
        .map_err(|e| MailStoreError::TokenMissing(format!("malformed token file: {}", e)))?;
    if stored.token.is_empty() {
        return Err(MailStoreError::TokenMissing("empty token".to_string()));
    }
    Ok(stored.token)
}

// ============================================================================
// API response types
// ============================================================================

#[derive(Debug, Deserialize)]
struct MessageListResponse {
    #[serde(default)]
    messages: Vec<MessageStub>,
}

#[derive(Debug, Deserialize)]
struct MessageStub {
    id: String,
}

#[derive(Debug, Deserialize)]
struct MessageDetail {
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    payload: Option<MessagePayload>,
}

#[derive(Debug, Deserialize)]
struct MessagePayload {
    #[serde(default)]
    headers: Vec<Header>,
}

#[derive(Debug, Deserialize)]
struct Header {
    #[serde(default)]
    name: String,
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct DraftResponse {
    id: String,
}

// ============================================================================
// Provider
// ============================================================================

pub struct HttpMailStore {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpMailStore {
    pub fn new(base_url: &str, token_file: &Path) -> Result<Self, MailStoreError> {
        let token = load_token(token_file)?;
        info!("Initialized mail store client at {}", base_url);
        Ok(Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn check_status(status: StatusCode, body: &str) -> Result<(), MailStoreError> {
        if status == StatusCode::UNAUTHORIZED {
            return Err(MailStoreError::AuthExpired);
        }
        if !status.is_success() {
            return Err(MailStoreError::Api {
                status: status.as_u16(),
                message: body.to_string(),
            });
        }
        Ok(())
    }

    async fn fetch_message_metadata(
        &self,
        message_id: &str,
    ) -> Result<ThreadMessage, MailStoreError> {
        let url = format!("{}/users/me/messages/{}", self.base_url, message_id);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .query(&[
                ("format", "metadata"),
                ("metadataHeaders", "From"),
                ("metadataHeaders", "Subject"),
                ("metadataHeaders", "Date"),
            ])
            .send()
            .await
            .map_err(|e| MailStoreError::Unavailable(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| MailStoreError::Unavailable(e.to_string()))?;
        Self::check_status(status, &body)?;

        let detail: MessageDetail = serde_json::from_str(&body).map_err(|e| {
            MailStoreError::Api {
                status: status.as_u16(),
                message: format!("malformed message detail: {}", e),
            }
        })?;

        let header = |name: &str| -> String {
            detail
                .payload
                .as_ref()
                .map(|p| {
                    p.headers
                        .iter()
                        .find(|h| h.name.eq_ignore_ascii_case(name))
                        .map(|h| h.value.clone())
                        .unwrap_or_default()
                })
                .unwrap_or_default()
        };

        Ok(ThreadMessage {
            from: header("From"),
            subject: header("Subject"),
            snippet: detail.snippet,
            date: header("Date"),
        })
    }
}

#[async_trait]
impl MailStore for HttpMailStore {
    async fn list_thread(
        &self,
        address: &str,
        since: DateTime<Utc>,
        max_count: usize,
    ) -> Result<Vec<ThreadMessage>, MailStoreError> {
        let url = format!("{}/users/me/messages", self.base_url);
        let query = format!(
            "(from:{address} OR to:{address}) after:{}",
            since.format("%Y/%m/%d")
        );

        let max_results = max_count.to_string();
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .query(&[("q", query.as_str()), ("maxResults", max_results.as_str())])
            .send()
            .await
            .map_err(|e| MailStoreError::Unavailable(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| MailStoreError::Unavailable(e.to_string()))?;
        Self::check_status(status, &body)?;

        let list: MessageListResponse =
            serde_json::from_str(&body).map_err(|e| MailStoreError::Api {
                status: status.as_u16(),
                message: format!("malformed message list: {}", e),
            })?;

        // The store returns newest first; keep that order.
        let mut messages = Vec::with_capacity(list.messages.len());
        for stub in list.messages.iter().take(max_count) {
            match self.fetch_message_metadata(&stub.id).await {
                Ok(message) => messages.push(message),
                Err(MailStoreError::AuthExpired) => return Err(MailStoreError::AuthExpired),
                Err(e) => {
                    debug!("Skipping message {}: {}", stub.id, e);
                }
            }
        }

        debug!(
            "Thread lookup for {}: {} of {} messages",
            address,
            messages.len(),
            list.messages.len()
        );
        Ok(messages)
    }

    async fn create_draft(&self, draft: &OutgoingDraft) -> Result<String, MailStoreError> {
        let raw = URL_SAFE.encode(encode_rfc822(draft));
        let url = format!("{}/users/me/drafts", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&json!({"message": {"raw": raw}}))
            .send()
            .await
            .map_err(|e| MailStoreError::Unavailable(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| MailStoreError::Unavailable(e.to_string()))?;
        Self::check_status(status, &body)?;

        let created: DraftResponse =
            serde_json::from_str(&body).map_err(|e| MailStoreError::Api {
                status: status.as_u16(),
                message: format!("malformed draft response: {}", e),
            })?;

        info!("Draft created: {}", created.id);
        Ok(created.id)
    }
}

/// Minimal RFC 822 text message.
fn encode_rfc822(draft: &OutgoingDraft) -> String {
    let mut message = String::new();
    message.push_str(&format!("To: {}\r\n", draft.to.join(", ")));
    if !draft.cc.is_empty() {
        message.push_str(&format!("Cc: {}\r\n", draft.cc.join(", ")));
    }
    message.push_str(&format!("Subject: {}\r\n", draft.subject));
    message.push_str("MIME-Version: 1.0\r\n");
    message.push_str("Content-Type: text/plain; charset=\"UTF-8\"\r\n");
    message.push_str("\r\n");
    message.push_str(&draft.body);
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_rfc822_with_cc() {
        let draft = OutgoingDraft {
            to: vec!["client@other.com".to_string()],
            cc: vec!["colleague@co.com".to_string()],
            subject: "re: our call today".to_string(),
            body: "Hi Sam,\n\nGreat speaking earlier.".to_string(),
        };

        let raw = encode_rfc822(&draft);
        assert!(raw.starts_with("To: client@other.com\r\n"));
        assert!(raw.contains("Cc: colleague@co.com\r\n"));
        assert!(raw.contains("Subject: re: our call today\r\n"));
        assert!(raw.ends_with("Great speaking earlier."));
    }

    #[test]
    fn test_encode_rfc822_omits_empty_cc() {
        let draft = OutgoingDraft {
            to: vec!["client@other.com".to_string()],
            cc: Vec::new(),
            subject: "subject".to_string(),
            body: "body".to_string(),
        };

        assert!(!encode_rfc822(&draft).contains("Cc:"));
    }

    #[test]
    fn test_token_file_accepts_both_spellings() {
        let dir = tempfile::tempdir().unwrap();

        let path = dir.path().join("token.json");
        std::fs::write(&path, r#"{"token": "abc"}"#).unwrap();
        assert_eq!(load_token(&path).unwrap(), "abc");

        let path = dir.path().join("token2.json");
        std::fs::write(&path, r#"{"access_token": "def"}"#).unwrap();
        assert_eq!(load_token(&path).unwrap(), "def");
    }
}
