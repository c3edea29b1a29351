//! Meeting domain types.
//!
//! Meetings are materialized fresh from the metadata source on every run
//! and never mutated; a later run supersedes an instance with a new one
//! under the same ID.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

mod select;

pub use select::{classify, select_meeting, Classification, Selection, SelectionCounts};

/// A meeting as normalized from the metadata source.
#[derive(Debug, Clone)]
pub struct Meeting {
    /// Opaque stable identifier from the source.
    pub id: String,
    pub title: String,
    pub ended_at: DateTime<Utc>,
    pub attendees: Vec<Attendee>,
    /// Distinct audio channels recorded for the meeting.
    pub audio_channels: Vec<String>,
    pub transcript_ready: bool,
    pub notes_ready: bool,
}

impl Meeting {
    pub fn channel_count(&self) -> usize {
        self.audio_channels.len()
    }

    /// Non-resource attendees, the only ones that count for classification.
    pub fn people(&self) -> impl Iterator<Item = &Attendee> {
        self.attendees
            .iter()
            .filter(|a| a.kind == AttendeeKind::Person)
    }

    /// Recipient split for the draft: external people in To, internal
    /// people minus self in CC.
    pub fn recipients(&self, internal_domains: &[String], self_email: &str) -> Recipients {
        let mut to = Vec::new();
        let mut cc = Vec::new();
        let self_email = self_email.to_lowercase();

        for attendee in self.people() {
            let email = attendee.email.to_lowercase();
            if email.is_empty() || email == self_email {
                continue;
            }
            match attendee.role(internal_domains) {
                Role::Internal => cc.push(email),
                Role::External => to.push(email),
            }
        }

        Recipients { to, cc }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attendee {
    pub email: String,
    pub display_name: String,
    pub kind: AttendeeKind,
}

/// Resource calendar entries (rooms, equipment) are carried through from
/// the source but excluded from role computation entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttendeeKind {
    Person,
    Resource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Internal,
    External,
}

impl Attendee {
    pub fn new(email: impl Into<String>, display_name: impl Into<String>) -> Self {
        let email = email.into();
        let kind = if is_resource_address(&email) {
            AttendeeKind::Resource
        } else {
            AttendeeKind::Person
        };
        Self {
            email,
            display_name: display_name.into(),
            kind,
        }
    }

    /// Role by domain comparison. Only meaningful for `Person` attendees;
    /// callers filter resources out first via `Meeting::people`.
    pub fn role(&self, internal_domains: &[String]) -> Role {
        let email = self.email.to_lowercase();
        let internal = internal_domains
            .iter()
            .any(|domain| email.ends_with(&format!("@{}", domain.to_lowercase())));
        if internal {
            Role::Internal
        } else {
            Role::External
        }
    }
}

/// Recipient lists for the drafted email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipients {
    pub to: Vec<String>,
    pub cc: Vec<String>,
}

fn is_resource_address(email: &str) -> bool {
    email.starts_with("c_") && email.contains("@resource.calendar.google.com")
}
