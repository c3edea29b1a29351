//! HTTP provider for the notes/transcript content API.
//!
//! Authenticates with a bearer token read from the desktop application's
//! local auth file. The token payload inside that file is itself a
//! JSON-encoded string in older versions, so the same string-or-native
//! decode used for the cache applies here.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use super::{ContentError, ContentSource, Readiness, TranscriptSegment};
use async_trait::async_trait;

// ============================================================================
// Auth file
// ============================================================================

#[derive(Debug, Deserialize)]
struct AuthFile {
    tokens: TokenPayload,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TokenPayload {
    Native(Tokens),
    Encoded(String),
}

#[derive(Debug, Deserialize)]
struct Tokens {
    access_token: String,
}

/// Read the content API access token from the local auth file.
pub fn load_access_token(auth_file: &Path) -> Result<String, ContentError> {
    let content = std::fs::read_to_string(auth_file)
        .map_err(|e| ContentError::Auth(format!("cannot read {:?}: {}", auth_file, e)))?;

    let auth: AuthFile = serde_json::from_str(&content)
        .map_err(|e| ContentError::Auth(format!("malformed auth file: {}", e)))?;

    let tokens = match auth.tokens {
        TokenPayload::Native(tokens) => tokens,
        TokenPayload::Encoded(inner) => serde_json::from_str(&inner)
            .map_err(|e| ContentError::Auth(format!("malformed token payload: {}", e)))?,
    };

    if tokens.access_token.is_empty() {
        return Err(ContentError::Auth("empty access token".to_string()));
    }

    Ok(tokens.access_token)
}

// ============================================================================
// Wire shapes
// ============================================================================

#[derive(Debug, Serialize)]
struct DocumentRequest<'a> {
    document_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct TranscriptResponse {
    #[serde(default)]
    segments: Vec<RawSegment>,
}

#[derive(Debug, Deserialize)]
struct RawSegment {
    #[serde(default)]
    channel: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    offset_ms: u64,
}

#[derive(Debug, Deserialize)]
struct PanelsResponse {
    #[serde(default)]
    panels: Vec<Panel>,
}

#[derive(Debug, Deserialize)]
struct Panel {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    content: Option<Block>,
}

/// Rich-text block tree as emitted by the notes editor.
#[derive(Debug, Deserialize)]
struct Block {
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    attrs: Option<BlockAttrs>,
    #[serde(default)]
    content: Vec<Block>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BlockAttrs {
    #[serde(default)]
    level: Option<usize>,
}

// ============================================================================
// Provider
// ============================================================================

pub struct NotesApiProvider {
    client: reqwest::Client,
    base_url: String,
    token: String,
    min_notes_chars: usize,
}

impl NotesApiProvider {
    pub fn new(base_url: &str, auth_file: &Path, min_notes_chars: usize) -> Result<Self, ContentError> {
        let token = load_access_token(auth_file)?;
        info!("Initialized content API provider at {}", base_url);
        Ok(Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            min_notes_chars,
        })
    }

    async fn post_document(
        &self,
        endpoint: &str,
        meeting_id: &str,
    ) -> Result<Readiness<String>, ContentError> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&DocumentRequest {
                document_id: meeting_id,
            })
            .send()
            .await
            .map_err(|e| ContentError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            // The document exists but this content hasn't been produced yet
            return Ok(Readiness::NotReady);
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ContentError::Auth(format!("{} returned {}", endpoint, status)));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ContentError::Unavailable(e.to_string()))?;

        if !status.is_success() {
            return Err(ContentError::Unavailable(format!(
                "{} returned {}: {}",
                endpoint, status, body
            )));
        }

        Ok(Readiness::Ready(body))
    }
}

#[async_trait]
impl ContentSource for NotesApiProvider {
    async fn transcript(
        &self,
        meeting_id: &str,
    ) -> Result<Readiness<Vec<TranscriptSegment>>, ContentError> {
        let body = match self.post_document("get-document-transcript", meeting_id).await? {
            Readiness::Ready(body) => body,
            Readiness::NotReady => return Ok(Readiness::NotReady),
        };

        let parsed: TranscriptResponse =
            serde_json::from_str(&body).map_err(|e| ContentError::Malformed(e.to_string()))?;

        if parsed.segments.is_empty() {
            return Ok(Readiness::NotReady);
        }

        let mut segments: Vec<TranscriptSegment> = parsed
            .segments
            .into_iter()
            .map(|s| TranscriptSegment {
                channel: s.channel,
                text: s.text,
                offset_ms: s.offset_ms,
            })
            .collect();
        segments.sort_by_key(|s| s.offset_ms);

        debug!("Transcript for {}: {} segments", meeting_id, segments.len());
        Ok(Readiness::Ready(segments))
    }

    async fn notes(&self, meeting_id: &str) -> Result<Readiness<String>, ContentError> {
        let body = match self.post_document("get-document-panels", meeting_id).await? {
            Readiness::Ready(body) => body,
            Readiness::NotReady => return Ok(Readiness::NotReady),
        };

        let parsed: PanelsResponse =
            serde_json::from_str(&body).map_err(|e| ContentError::Malformed(e.to_string()))?;

        let text = panels_to_text(&parsed.panels);
        if text.trim().len() < self.min_notes_chars {
            // Panels exist but generation upstream hasn't finished
            debug!(
                "Notes for {} too short ({} chars), treating as not ready",
                meeting_id,
                text.trim().len()
            );
            return Ok(Readiness::NotReady);
        }

        Ok(Readiness::Ready(text))
    }
}

// ============================================================================
// Panel flattening
// ============================================================================

/// Flatten panels into labeled plain text for the generator prompt.
fn panels_to_text(panels: &[Panel]) -> String {
    let mut sections = Vec::new();
    for panel in panels {
        let Some(content) = &panel.content else {
            continue;
        };
        let text = block_to_text(content);
        if !text.trim().is_empty() {
            let title = panel.title.as_deref().unwrap_or("Notes");
            sections.push(format!("{}:\n{}", title, text.trim()));
        }
    }
    sections.join("\n\n")
}

fn block_to_text(block: &Block) -> String {
    let mut parts = Vec::new();
    for child in &block.content {
        match child.kind.as_str() {
            "heading" => {
                let level = child
                    .attrs
                    .as_ref()
                    .and_then(|a| a.level)
                    .unwrap_or(3)
                    .clamp(1, 6);
                let text = inline_text(child);
                if !text.trim().is_empty() {
                    parts.push(format!("{} {}\n", "#".repeat(level), text.trim()));
                }
            }
            "bulletList" => {
                for item in &child.content {
                    let text = inline_text(item);
                    if !text.trim().is_empty() {
                        parts.push(format!("- {}\n", text.trim()));
                    }
                }
            }
            "orderedList" => {
                for (i, item) in child.content.iter().enumerate() {
                    let text = inline_text(item);
                    if !text.trim().is_empty() {
                        parts.push(format!("{}. {}\n", i + 1, text.trim()));
                    }
                }
            }
            "paragraph" => {
                let text = inline_text(child);
                if !text.trim().is_empty() {
                    parts.push(format!("{}\n", text.trim()));
                }
            }
            _ if !child.content.is_empty() => {
                let nested = block_to_text(child);
                if !nested.trim().is_empty() {
                    parts.push(format!("{}\n", nested));
                }
            }
            _ => {}
        }
    }
    parts.join("\n").trim_end().to_string()
}

fn inline_text(block: &Block) -> String {
    let mut out = String::new();
    for item in &block.content {
        if item.kind == "text" {
            if let Some(text) = &item.text {
                out.push_str(text);
            }
        } else if !item.content.is_empty() {
            out.push_str(&inline_text(item));
        }
    }
    out
}
