//! Metadata source discovery and normalization.
//!
//! The calendar/notes application persists its state as versioned cache
//! files (`cache-v2.json`, `cache-v3.json`, ...). The newest schema wins.
//! Depending on the writer version the `cache` payload is either a native
//! JSON object or a JSON string holding a second JSON document; both are
//! decoded here, once, into typed meetings. Downstream code never sees a
//! raw value.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::meeting::{Attendee, Meeting};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("No metadata source found under {0:?}")]
    Unavailable(PathBuf),
    #[error("Failed to parse metadata source {path:?}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ============================================================================
// Raw wire shapes
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawCacheFile {
    cache: RawPayload,
}

/// The dual encoding: older writers store the payload as an escaped JSON
/// string, newer ones inline the object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawPayload {
    Native(RawCacheState),
    Encoded(String),
}

#[derive(Debug, Deserialize)]
struct RawCacheState {
    state: RawDocuments,
}

#[derive(Debug, Deserialize)]
struct RawDocuments {
    #[serde(default)]
    documents: HashMap<String, RawDocument>,
}

#[derive(Debug, Deserialize)]
struct RawDocument {
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    deleted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    calendar_event: Option<RawCalendarEvent>,
    #[serde(default)]
    audio_channels: Vec<String>,
    #[serde(default)]
    transcript_ready: bool,
    #[serde(default)]
    notes_ready: bool,
}

#[derive(Debug, Deserialize)]
struct RawCalendarEvent {
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    end: Option<RawEventTime>,
    #[serde(default)]
    attendees: Vec<RawAttendee>,
}

#[derive(Debug, Deserialize)]
struct RawEventTime {
    #[serde(default, rename = "dateTime")]
    date_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct RawAttendee {
    #[serde(default)]
    email: String,
    #[serde(default, rename = "displayName")]
    display_name: Option<String>,
}

// ============================================================================
// Discovery and normalization
// ============================================================================

/// Pick the candidate cache file with the highest schema version.
pub fn discover_source(cache_dir: &Path) -> Result<PathBuf, SourceError> {
    let pattern = Regex::new(r"^cache-v(\d+)\.json$").expect("static regex");

    let entries = std::fs::read_dir(cache_dir)
        .map_err(|_| SourceError::Unavailable(cache_dir.to_path_buf()))?;

    let mut best: Option<(u64, PathBuf)> = None;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(caps) = pattern.captures(name) else {
            continue;
        };
        let Ok(version) = caps[1].parse::<u64>() else {
            continue;
        };
        if best.as_ref().map(|(v, _)| version > *v).unwrap_or(true) {
            best = Some((version, entry.path()));
        }
    }

    match best {
        Some((version, path)) => {
            debug!("Selected metadata source {:?} (schema v{})", path, version);
            Ok(path)
        }
        None => Err(SourceError::Unavailable(cache_dir.to_path_buf())),
    }
}

/// Discover, parse, and normalize the metadata source into meetings.
/// Deleted documents are dropped here.
pub fn load_meetings(cache_dir: &Path) -> Result<Vec<Meeting>, SourceError> {
    let path = discover_source(cache_dir)?;
    let content = std::fs::read_to_string(&path)?;
    let meetings = parse_meetings(&content).map_err(|message| SourceError::Parse {
        path: path.clone(),
        message,
    })?;

    info!("Loaded {} meetings from {:?}", meetings.len(), path);
    Ok(meetings)
}

/// Parse the cache file content into meetings, normalizing both payload
/// encodings to the same shape.
pub fn parse_meetings(content: &str) -> Result<Vec<Meeting>, String> {
    let file: RawCacheFile = serde_json::from_str(content).map_err(|e| e.to_string())?;

    let state = match file.cache {
        RawPayload::Native(state) => state,
        RawPayload::Encoded(inner) => {
            serde_json::from_str::<RawCacheState>(&inner).map_err(|e| e.to_string())?
        }
    };

    let mut meetings: Vec<Meeting> = state
        .state
        .documents
        .into_values()
        .filter_map(normalize_document)
        .collect();

    // Stable order for downstream selection
    meetings.sort_by(|a, b| b.ended_at.cmp(&a.ended_at));
    Ok(meetings)
}

fn normalize_document(doc: RawDocument) -> Option<Meeting> {
    if doc.deleted_at.is_some() {
        debug!("Skipping deleted document {}", doc.id);
        return None;
    }

    let ended_at = doc
        .calendar_event
        .as_ref()
        .and_then(|ev| ev.end.as_ref())
        .and_then(|end| end.date_time)
        .or(doc.created_at)?;

    let (title, attendees) = match doc.calendar_event {
        Some(event) => {
            let title = doc
                .title
                .or(event.summary)
                .unwrap_or_else(|| "Untitled Meeting".to_string());
            let attendees = event
                .attendees
                .into_iter()
                .filter(|a| !a.email.is_empty())
                .map(|a| {
                    let name = a
                        .display_name
                        .unwrap_or_else(|| local_part(&a.email).to_string());
                    Attendee::new(a.email, name)
                })
                .collect();
            (title, attendees)
        }
        None => (
            doc.title.unwrap_or_else(|| "Untitled Meeting".to_string()),
            Vec::new(),
        ),
    };

    let mut channels: Vec<String> = Vec::new();
    for channel in doc.audio_channels {
        if !channels.contains(&channel) {
            channels.push(channel);
        }
    }

    Some(Meeting {
        id: doc.id,
        title,
        ended_at,
        attendees,
        audio_channels: channels,
        transcript_ready: doc.transcript_ready,
        notes_ready: doc.notes_ready,
    })
}

fn local_part(email: &str) -> &str {
    email.split('@').next().unwrap_or(email)
}
