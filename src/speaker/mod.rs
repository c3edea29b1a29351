//! Speaker attribution: raw transcript channels to conversation roles.
//!
//! Pure mapping, no I/O. Upstream selection guarantees exactly two
//! distinct channels by the time a transcript reaches this point; anything
//! else here is an upstream filtering bug and fails loudly.

use thiserror::Error;

use crate::content::TranscriptSegment;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SpeakerError {
    #[error("Expected exactly 2 audio channels, found {count}")]
    AmbiguousChannels { count: usize },
    #[error("Capture channel {capture:?} not present in transcript channels {channels:?}")]
    CaptureChannelMissing {
        capture: String,
        channels: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakerRole {
    /// The account owner (locally captured channel).
    Me,
    Counterpart,
    /// Only valid for transcripts that never pass the two-channel gate.
    Unknown,
}

impl SpeakerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Me => "Me",
            Self::Counterpart => "Counterpart",
            Self::Unknown => "Unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabeledSegment {
    pub role: SpeakerRole,
    pub text: String,
    pub offset_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabeledTranscript {
    pub segments: Vec<LabeledSegment>,
}

impl LabeledTranscript {
    /// Render as dialogue lines for the generation prompt.
    pub fn as_dialogue(&self) -> String {
        self.segments
            .iter()
            .map(|s| format!("{}: {}", s.role.as_str(), s.text))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn char_count(&self) -> usize {
        self.segments.iter().map(|s| s.text.len()).sum()
    }
}

/// Label each segment: the configured capture channel is the account
/// owner, the single remaining channel is the counterpart.
pub fn label_transcript(
    segments: &[TranscriptSegment],
    capture_channel: &str,
) -> Result<LabeledTranscript, SpeakerError> {
    let mut channels: Vec<&str> = Vec::new();
    for segment in segments {
        if !channels.contains(&segment.channel.as_str()) {
            channels.push(&segment.channel);
        }
    }

    if channels.len() != 2 {
        return Err(SpeakerError::AmbiguousChannels {
            count: channels.len(),
        });
    }
    if !channels.contains(&capture_channel) {
        return Err(SpeakerError::CaptureChannelMissing {
            capture: capture_channel.to_string(),
            channels: channels.iter().map(|c| c.to_string()).collect(),
        });
    }

    let labeled = segments
        .iter()
        .map(|segment| LabeledSegment {
            role: if segment.channel == capture_channel {
                SpeakerRole::Me
            } else {
                SpeakerRole::Counterpart
            },
            text: segment.text.clone(),
            offset_ms: segment.offset_ms,
        })
        .collect();

    Ok(LabeledTranscript { segments: labeled })
}
