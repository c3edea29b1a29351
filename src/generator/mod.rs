//! Follow-up email generation.
//!
//! Builds one constrained generation request from the labeled transcript,
//! generated notes, recipient roles, and prior-correspondence context,
//! then validates the collaborator's reply before anything is drafted.

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::context::CorrespondenceContext;
use crate::meeting::{Meeting, Recipients};
use crate::speaker::LabeledTranscript;

mod api;

pub use api::MessagesApiGenerator;

/// Subject used when there is no prior thread to reference.
pub const DEFAULT_SUBJECT: &str = "re: our call today";

/// Sentence band the prompt contract asks for.
const CONTRACT_MIN_SENTENCES: usize = 4;
const CONTRACT_MAX_SENTENCES: usize = 8;
/// Hard ceiling before the reply is rejected outright.
const MAX_ACCEPTED_SENTENCES: usize = 16;
const MAX_BODY_CHARS: usize = 4000;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Generation API unavailable: {0}")]
    Unavailable(String),
    #[error("Generation failed: {0}")]
    Failed(String),
}

/// External text-generation API.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;
}

/// Validated generator output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedEmail {
    pub subject: String,
    pub body: String,
}

/// Everything the prompt is assembled from.
pub struct PromptInput<'a> {
    pub meeting: &'a Meeting,
    pub recipients: &'a Recipients,
    pub transcript: &'a LabeledTranscript,
    pub notes: &'a str,
    pub context: &'a CorrespondenceContext,
    pub sender_name: &'a str,
}

/// Run one generation request and validate the reply.
pub async fn generate_email(
    generator: &dyn TextGenerator,
    input: &PromptInput<'_>,
) -> Result<GeneratedEmail, GenerationError> {
    let prompt = build_prompt(input);
    let raw = generator.generate(&prompt).await?;
    let email = parse_response(&raw)?;
    validate_email(&email)?;
    info!("Email generated: {}", email.subject);
    Ok(email)
}

/// Assemble the generation request under the fixed structural contract.
pub fn build_prompt(input: &PromptInput<'_>) -> String {
    let sender = if input.sender_name.is_empty() {
        "the sender"
    } else {
        input.sender_name
    };

    let subject_rule = if input.context.has_history() {
        "Subject: reference the existing thread with this contact (e.g. keep their \
         latest subject with a re: prefix)."
            .to_string()
    } else {
        format!("Subject: use exactly \"{}\".", DEFAULT_SUBJECT)
    };

    format!(
        "You are {sender}. You just finished the meeting below and are writing \
the follow-up email yourself.\n\
\n\
MEETING: {title}\n\
ENDED: {ended}\n\
TO (external): {to}\n\
CC (internal): {cc}\n\
\n\
TRANSCRIPT (Me = {sender}):\n{dialogue}\n\
\n\
GENERATED NOTES:\n{notes}\n\
\n\
PRIOR CORRESPONDENCE:\n{context}\n\
\n\
RULES:\n\
- The body is {min}-{max} sentences total. Cut aggressively.\n\
- {subject_rule}\n\
- Do not restate what everyone on the call already knows; a recap is one \
sentence at most.\n\
- Include only the 1-2 next steps that actually need writing down, woven \
into prose, attributed to whoever actually took them in the transcript.\n\
- Never state anything that is not in the transcript or notes. No invented \
deliverables, statistics, or resources.\n\
- Use future tense for work not yet done, past tense for work completed.\n\
- Open with \"Hi [first name],\" on its own line. Sign off with \"Best,\" \
then \"{sender}\".\n\
\n\
Respond with ONLY a JSON object, no markdown fences: \
{{\"subject\": \"...\", \"body\": \"...\"}}",
        sender = sender,
        title = input.meeting.title,
        ended = input.meeting.ended_at.format("%B %d, %Y"),
        to = input.recipients.to.join(", "),
        cc = input.recipients.cc.join(", "),
        dialogue = input.transcript.as_dialogue(),
        notes = input.notes,
        context = input.context.as_prompt_block(),
        min = CONTRACT_MIN_SENTENCES,
        max = CONTRACT_MAX_SENTENCES,
        subject_rule = subject_rule,
    )
}

/// Parse the collaborator reply, tolerating a markdown code fence around
/// the JSON object.
pub fn parse_response(raw: &str) -> Result<GeneratedEmail, GenerationError> {
    #[derive(Deserialize)]
    struct Reply {
        subject: String,
        body: String,
    }

    let mut text = raw.trim();
    if let Some(stripped) = text.strip_prefix("```") {
        // Drop the fence line (which may carry a language tag) and the
        // closing fence
        let stripped = stripped.split_once('\n').map(|(_, rest)| rest).unwrap_or("");
        text = stripped.rsplit_once("```").map(|(body, _)| body).unwrap_or(stripped);
        text = text.trim();
    }

    let reply: Reply = serde_json::from_str(text)
        .map_err(|e| GenerationError::Failed(format!("unparseable reply: {}", e)))?;

    Ok(GeneratedEmail {
        subject: reply.subject.trim().to_string(),
        body: reply.body.trim().to_string(),
    })
}

/// Enforce the response bounds. The sentence band has some slack: a reply
/// slightly outside the contract is logged, only a grossly out-of-bounds
/// or empty reply is rejected.
pub fn validate_email(email: &GeneratedEmail) -> Result<(), GenerationError> {
    if email.subject.is_empty() {
        return Err(GenerationError::Failed("empty subject".to_string()));
    }
    if email.body.is_empty() {
        return Err(GenerationError::Failed("empty body".to_string()));
    }
    if email.body.len() > MAX_BODY_CHARS {
        return Err(GenerationError::Failed(format!(
            "body too long ({} chars)",
            email.body.len()
        )));
    }

    let sentences = count_sentences(&email.body);
    if sentences == 0 || sentences > MAX_ACCEPTED_SENTENCES {
        return Err(GenerationError::Failed(format!(
            "body has {} sentences, expected {}-{}",
            sentences, CONTRACT_MIN_SENTENCES, CONTRACT_MAX_SENTENCES
        )));
    }
    if sentences < CONTRACT_MIN_SENTENCES || sentences > CONTRACT_MAX_SENTENCES {
        warn!(
            "Generated body has {} sentences, outside the {}-{} contract",
            sentences, CONTRACT_MIN_SENTENCES, CONTRACT_MAX_SENTENCES
        );
    }

    Ok(())
}

fn count_sentences(body: &str) -> usize {
    // Greeting and sign-off lines are not sentences of the message
    let prose: String = body
        .lines()
        .filter(|line| {
            let line = line.trim();
            !line.is_empty()
                && !line.starts_with("Hi ")
                && line != "Best,"
                && !(line.split_whitespace().count() <= 2 && !line.ends_with(['.', '!', '?']))
        })
        .collect::<Vec<_>>()
        .join(" ");

    let boundary = Regex::new(r"[.!?](\s|$)").expect("static regex");
    boundary.find_iter(&prose).count()
}
