//! Meeting selection and classification.
//!
//! A run drafts for at most one meeting. Candidates inside the lookback
//! window are considered newest-ended first; meetings that classify as a
//! skip are counted and passed over without touching the state store, so
//! an older actionable meeting behind them can still be picked up.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use tracing::{debug, info};

use crate::config::SelectionConfig;
use crate::state::{LookupStatus, StateStore};

use super::{Meeting, Role};

/// Terminal classification of a single meeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Eligible for drafting.
    Actionable,
    /// Every attendee is on an internal domain; nothing to follow up.
    InternalSkip,
    /// One audio channel: speaker attribution is impossible.
    SpeakerphoneSkip,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SelectionCounts {
    pub internal_skips: u32,
    pub speakerphone_skips: u32,
    pub already_processed: u32,
}

/// Outcome of a selection pass.
#[derive(Debug)]
pub struct Selection {
    pub meeting: Option<Meeting>,
    pub counts: SelectionCounts,
}

/// Classify one meeting. Checks run in order: audience first, then audio.
pub fn classify(meeting: &Meeting, internal_domains: &[String]) -> Classification {
    let all_internal = meeting
        .people()
        .all(|a| a.role(internal_domains) == Role::Internal);
    if all_internal {
        return Classification::InternalSkip;
    }

    // Fewer than two channels means one side of the conversation was never
    // captured separately (speakerphone, dial-in) and cannot be attributed.
    if meeting.channel_count() < 2 {
        return Classification::SpeakerphoneSkip;
    }

    Classification::Actionable
}

/// Select the single meeting this run will work on.
///
/// Fresh candidates must have ended within the lookback window; when none
/// is actionable, fall back to the most recently deferred meeting still
/// present in the source (deferred meetings are retried even after they
/// age out of the window).
pub fn select_meeting(
    conn: &Connection,
    meetings: &[Meeting],
    selection: &SelectionConfig,
    max_deferrals: i64,
    now: DateTime<Utc>,
) -> Result<Selection> {
    let cutoff = now - Duration::hours(selection.lookback_hours);
    let mut counts = SelectionCounts::default();

    let mut in_window: Vec<&Meeting> = meetings
        .iter()
        .filter(|m| m.ended_at >= cutoff && m.ended_at <= now)
        .collect();
    in_window.sort_by(|a, b| b.ended_at.cmp(&a.ended_at));

    debug!(
        "{} of {} meetings ended within the {}h window",
        in_window.len(),
        meetings.len(),
        selection.lookback_hours
    );

    for meeting in in_window {
        if StateStore::lookup(conn, &meeting.id)? == LookupStatus::Processed {
            counts.already_processed += 1;
            continue;
        }
        match classify(meeting, &selection.internal_domains) {
            Classification::Actionable => {
                info!("Selected meeting {} ({})", meeting.id, meeting.title);
                return Ok(Selection {
                    meeting: Some(meeting.clone()),
                    counts,
                });
            }
            Classification::InternalSkip => {
                info!("Internal meeting, skipping: {}", meeting.title);
                counts.internal_skips += 1;
            }
            Classification::SpeakerphoneSkip => {
                info!("Single audio channel, skipping: {}", meeting.title);
                counts.speakerphone_skips += 1;
            }
        }
    }

    // Nothing fresh: retry the most recently deferred meeting, if any
    for deferred_id in StateStore::deferred_candidates(conn, max_deferrals)? {
        let Some(meeting) = meetings.iter().find(|m| m.id == deferred_id) else {
            continue;
        };
        if classify(meeting, &selection.internal_domains) == Classification::Actionable {
            info!(
                "Retrying deferred meeting {} ({})",
                meeting.id, meeting.title
            );
            return Ok(Selection {
                meeting: Some(meeting.clone()),
                counts,
            });
        }
    }

    Ok(Selection {
        meeting: None,
        counts,
    })
}
