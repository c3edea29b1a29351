//! Prior-correspondence aggregation for generation context.
//!
//! For each external attendee, pull recent thread history from the mail
//! store. A contact with no history is simply new; that never fails a run.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::config::MailConfig;
use crate::mailstore::{MailStore, MailStoreError, ThreadMessage};

/// History gathered for one external contact.
#[derive(Debug, Clone)]
pub struct ContactContext {
    pub address: String,
    /// Newest first, capped by config.
    pub messages: Vec<ThreadMessage>,
}

/// Aggregated context across all external attendees.
#[derive(Debug, Clone, Default)]
pub struct CorrespondenceContext {
    pub contacts: Vec<ContactContext>,
}

impl CorrespondenceContext {
    /// Whether any contact has prior history. Drives the adaptive
    /// subject-line rule in the generation prompt.
    pub fn has_history(&self) -> bool {
        self.contacts.iter().any(|c| !c.messages.is_empty())
    }

    /// Render for the generation prompt. Contacts without history are
    /// called out as new relationships.
    pub fn as_prompt_block(&self) -> String {
        let mut blocks = Vec::new();
        for contact in &self.contacts {
            if contact.messages.is_empty() {
                blocks.push(format!("{}: no prior correspondence (new contact)", contact.address));
                continue;
            }
            let mut lines = vec![format!("{}:", contact.address)];
            for message in &contact.messages {
                lines.push(format!(
                    "- [{}] {} — {}",
                    message.date, message.subject, message.snippet
                ));
            }
            blocks.push(lines.join("\n"));
        }
        blocks.join("\n\n")
    }
}

/// Query the mail store for each external attendee's recent history.
pub async fn gather_context(
    store: &dyn MailStore,
    external_addresses: &[String],
    mail: &MailConfig,
    now: DateTime<Utc>,
) -> Result<CorrespondenceContext, MailStoreError> {
    let since = now - Duration::days(mail.context_lookback_days);
    let mut contacts = Vec::with_capacity(external_addresses.len());

    for address in external_addresses {
        let messages = store
            .list_thread(address, since, mail.context_max_messages)
            .await?;
        debug!(
            "Context for {}: {} prior message(s)",
            address,
            messages.len()
        );
        contacts.push(ContactContext {
            address: address.clone(),
            messages,
        });
    }

    info!(
        "Gathered correspondence context for {} contact(s)",
        contacts.len()
    );
    Ok(CorrespondenceContext { contacts })
}
