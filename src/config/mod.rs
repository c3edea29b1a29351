use crate::global;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub source: SourceConfig,
    pub selection: SelectionConfig,
    pub polling: PollingConfig,
    pub state: StateConfig,
    pub mail: MailConfig,
    pub generation: GenerationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Directory containing the meeting cache files (cache-v*.json).
    pub cache_dir: Option<String>,
    /// Local auth file holding the content API token.
    pub auth_file: Option<String>,
    /// Base URL of the notes/transcript content API.
    pub notes_endpoint: String,
    /// Notes shorter than this are treated as still generating.
    pub min_notes_chars: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    /// Email domains considered internal for attendee classification.
    pub internal_domains: Vec<String>,
    /// The account owner's address, excluded from recipients.
    pub self_email: String,
    /// Meetings that ended more than this many hours ago are ignored.
    pub lookback_hours: i64,
    /// Transcript channel name for locally captured audio.
    pub capture_channel: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Seconds between readiness attempts within a single run.
    pub interval_seconds: u64,
    /// Maximum seconds to wait for content before deferring.
    pub max_wait_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Deferral attempts after which a meeting stops being retried.
    pub max_deferrals: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    /// Base URL of the mail-store API.
    pub endpoint: String,
    /// Token file for the mail-store API.
    pub token_file: Option<String>,
    /// How far back to look for prior correspondence, in days.
    pub context_lookback_days: i64,
    /// Maximum prior messages gathered per contact.
    pub context_max_messages: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Base URL of the text-generation API.
    pub endpoint: String,
    /// Environment variable holding the generation API key.
    pub api_key_env: String,
    pub model: String,
    pub max_tokens: u32,
    /// Name used to sign the drafted email.
    pub sender_name: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            auth_file: None,
            notes_endpoint: "https://api.granola.ai/v1".to_string(),
            min_notes_chars: 50,
        }
    }
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            internal_domains: Vec::new(),
            self_email: String::new(),
            lookback_hours: 8,
            capture_channel: "microphone".to_string(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 30,
            max_wait_seconds: 300,
        }
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self { max_deferrals: 12 }
    }
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://gmail.googleapis.com/gmail/v1".to_string(),
            token_file: None,
            context_lookback_days: 90,
            context_max_messages: 5,
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.anthropic.com/v1/messages".to_string(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            model: "claude-sonnet-4-5".to_string(),
            max_tokens: 1500,
            sender_name: String::new(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        if !config_path.exists() {
            info!(
                "Config file not found, creating default at {:?}",
                config_path
            );
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content =
            std::fs::read_to_string(&config_path).context("Failed to read config file")?;

        let config: Self = toml::from_str(&content).context("Failed to parse config file")?;

        info!("Loaded config from {:?}", config_path);
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&config_path, content).context("Failed to write config file")?;

        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        global::config_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.polling.interval_seconds, 30);
        assert_eq!(config.polling.max_wait_seconds, 300);
        assert_eq!(config.selection.lookback_hours, 8);
        assert_eq!(config.state.max_deferrals, 12);
        assert!(config.selection.internal_domains.is_empty());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [selection]
            internal_domains = ["co.com"]
            self_email = "me@co.com"
            "#,
        )
        .unwrap();

        assert_eq!(config.selection.internal_domains, vec!["co.com"]);
        assert_eq!(config.selection.self_email, "me@co.com");
        // Untouched sections keep their defaults
        assert_eq!(config.polling.interval_seconds, 30);
        assert_eq!(config.source.min_notes_chars, 50);
    }

    #[test]
    fn test_roundtrip() {
        let mut config = Config::default();
        config.selection.lookback_hours = 3;
        config.mail.context_max_messages = 10;

        let serialized = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(parsed.selection.lookback_hours, 3);
        assert_eq!(parsed.mail.context_max_messages, 10);
    }
}
