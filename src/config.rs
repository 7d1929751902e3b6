use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use teloxide::types::UserId;

use crate::chatbot::{EligibilityPolicy, SchedulerConfig};

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the config file.
    ReadFile { path: PathBuf, source: std::io::Error },
    /// Failed to parse JSON.
    ParseJson { path: PathBuf, source: serde_json::Error },
    /// Validation error.
    Validation(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFile { path, source } => {
                write!(f, "failed to read config file '{}': {}", path.display(), source)
            }
            Self::ParseJson { path, source } => {
                write!(f, "failed to parse config file '{}': {}", path.display(), source)
            }
            Self::Validation(msg) => write!(f, "config validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ReadFile { source, .. } => Some(source),
            Self::ParseJson { source, .. } => Some(source),
            Self::Validation(_) => None,
        }
    }
}

#[derive(Deserialize)]
struct ConfigFile {
    telegram_bot_token: String,
    openai_api_key: String,
    #[serde(default = "default_api_base")]
    api_base: String,
    #[serde(default = "default_model")]
    model: String,
    #[serde(default = "default_max_tokens")]
    max_tokens: u32,
    #[serde(default = "default_temperature")]
    temperature: f32,
    #[serde(default = "default_request_timeout_secs")]
    request_timeout_secs: u64,
    /// Debounce window after the last message of a burst.
    #[serde(default = "default_batch_delay_ms")]
    batch_delay_ms: u64,
    /// Quiet period after each reply.
    #[serde(default = "default_cooldown_delay_ms")]
    cooldown_delay_ms: u64,
    #[serde(default = "default_max_history_length")]
    max_history_length: usize,
    /// Private messages shorter than this are ignored.
    #[serde(default = "default_min_message_length")]
    min_message_length: usize,
    #[serde(default = "default_persona_name")]
    persona_name: String,
    /// Replaces the built-in persona prompt. `{name}` and `{user}` are substituted.
    personality: Option<String>,
    /// Group messages need one of these to get a reply. Defaults to the persona name, "bot" and "@".
    attention_keywords: Option<Vec<String>>,
    /// Users allowed to run !aistats. Empty means everyone.
    #[serde(default)]
    owner_ids: Vec<u64>,
    /// Directory for logs. Defaults to current directory.
    data_dir: Option<String>,
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_tokens() -> u32 {
    150
}

fn default_temperature() -> f32 {
    0.8
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_batch_delay_ms() -> u64 {
    15_000
}

fn default_cooldown_delay_ms() -> u64 {
    10_000
}

fn default_max_history_length() -> usize {
    10
}

fn default_min_message_length() -> usize {
    2
}

fn default_persona_name() -> String {
    "Alex".to_string()
}

pub struct Config {
    pub telegram_bot_token: String,
    pub openai_api_key: String,
    pub api_base: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub request_timeout: Duration,
    pub batch_delay: Duration,
    pub cooldown_delay: Duration,
    pub max_history_length: usize,
    pub min_message_length: usize,
    pub persona_name: String,
    pub personality: Option<String>,
    pub attention_keywords: Vec<String>,
    pub owner_ids: Vec<UserId>,
    /// Directory for logs.
    pub data_dir: PathBuf,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config_path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| ConfigError::ReadFile { path: config_path.clone(), source: e })?;
        let file: ConfigFile = serde_json::from_str(&content)
            .map_err(|e| ConfigError::ParseJson { path: config_path.clone(), source: e })?;

        if file.telegram_bot_token.is_empty() {
            return Err(ConfigError::Validation("telegram_bot_token is required".into()));
        }
        // Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
        let token_parts: Vec<&str> = file.telegram_bot_token.split(':').collect();
        if token_parts.len() != 2 || token_parts[0].parse::<u64>().is_err() || token_parts[1].is_empty() {
            return Err(ConfigError::Validation(
                "telegram_bot_token appears invalid (expected format: 123456789:ABCdefGHI...)".into()
            ));
        }
        if file.openai_api_key.is_empty() {
            return Err(ConfigError::Validation("openai_api_key is required".into()));
        }
        if file.batch_delay_ms == 0 || file.cooldown_delay_ms == 0 {
            return Err(ConfigError::Validation("batch_delay_ms and cooldown_delay_ms must be positive".into()));
        }
        if file.max_history_length == 0 {
            return Err(ConfigError::Validation("max_history_length must be at least 1".into()));
        }

        let attention_keywords = file.attention_keywords.unwrap_or_else(|| {
            vec![file.persona_name.to_lowercase(), "bot".to_string(), "@".to_string()]
        });

        let data_dir = file
            .data_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Self {
            telegram_bot_token: file.telegram_bot_token,
            openai_api_key: file.openai_api_key,
            api_base: file.api_base,
            model: file.model,
            max_tokens: file.max_tokens,
            temperature: file.temperature,
            request_timeout: Duration::from_secs(file.request_timeout_secs),
            batch_delay: Duration::from_millis(file.batch_delay_ms),
            cooldown_delay: Duration::from_millis(file.cooldown_delay_ms),
            max_history_length: file.max_history_length,
            min_message_length: file.min_message_length,
            persona_name: file.persona_name,
            personality: file.personality,
            attention_keywords,
            owner_ids: file.owner_ids.into_iter().map(UserId).collect(),
            data_dir,
        })
    }

    /// Owners only matter when some are configured.
    pub fn may_view_stats(&self, user_id: UserId) -> bool {
        self.owner_ids.is_empty() || self.owner_ids.contains(&user_id)
    }

    /// Strict: with no owners configured, nobody is one.
    pub fn is_owner(&self, user_id: UserId) -> bool {
        self.owner_ids.contains(&user_id)
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            batch_delay: self.batch_delay,
            cooldown_delay: self.cooldown_delay,
            max_history_length: self.max_history_length,
            persona_name: self.persona_name.clone(),
            personality: self.personality.clone(),
        }
    }

    pub fn eligibility_policy(&self) -> EligibilityPolicy {
        EligibilityPolicy::new(self.min_message_length, self.attention_keywords.clone())
    }
}
