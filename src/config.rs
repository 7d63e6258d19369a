//! Configuration types.
//!
//! Everything is read from the environment (optionally seeded from a `.env`
//! file) once at startup. Components receive the slice they need at
//! construction; nothing reads the environment afterwards.

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::llm::TransformConfig;
use crate::pipeline::types::PublishMode;

/// Default Slack Web API base URL.
pub const DEFAULT_SLACK_API_BASE: &str = "https://slack.com/api";

/// Default port for the health-check responder.
pub const DEFAULT_HEALTH_PORT: u16 = 8080;

/// Slack connection and filtering settings.
#[derive(Debug, Clone)]
pub struct SlackConfig {
    /// Bot token (`xoxb-…`) used for Web API calls.
    pub bot_token: SecretString,
    /// App-level token (`xapp-…`) used to open Socket Mode connections.
    pub app_token: SecretString,
    pub api_base: String,
    /// Channel allow-list. Empty means every channel the bot has joined.
    pub channel_ids: Vec<String>,
    /// Usernames and/or user IDs whose messages get transformed.
    pub target_users: Vec<String>,
    pub publish_mode: PublishMode,
}

/// Full bot configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub slack: SlackConfig,
    pub transform: TransformConfig,
    /// Verbose logging and startup verification (`LOGS=true`).
    pub verbose: bool,
    /// Self-test message during startup verification (`DEBUG=true`).
    pub debug: bool,
    pub health_port: u16,
}

impl BotConfig {
    /// Load configuration from the process environment.
    ///
    /// A `.env` file in the working directory is applied first when present.
    pub fn from_env() -> crate::error::Result<Self> {
        if dotenvy::dotenv().is_err() {
            tracing::debug!(".env file not found, using process environment only");
        }
        Ok(Self::from_lookup(|key| std::env::var(key).ok())?)
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let require = |key: &str| get(key).ok_or_else(|| ConfigError::MissingEnvVar(key.into()));

        let bot_token = require("SLACK_BOT_TOKEN")?;
        let app_token = require("SLACK_APP_TOKEN")?;

        let target_users = split_list(&require("SLACK_TARGET_USERS")?);
        if target_users.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "SLACK_TARGET_USERS".into(),
                message: "at least one username or user ID is required".into(),
            });
        }
        let channel_ids = get("SLACK_CHANNEL_IDS")
            .map(|v| split_list(&v))
            .unwrap_or_default();

        let api_key = require("OPENAI_API_KEY")?;
        let model = get("OPENAI_MODEL").unwrap_or_else(|| crate::llm::DEFAULT_MODEL.to_string());
        let max_tokens = match get("OPENAI_MAX_TOKENS") {
            Some(raw) => parse_number("OPENAI_MAX_TOKENS", &raw)?,
            None => crate::llm::DEFAULT_MAX_TOKENS,
        };
        let base_url =
            get("OPENAI_BASE_URL").unwrap_or_else(|| crate::llm::DEFAULT_BASE_URL.to_string());

        let health_port = match get("PORT") {
            Some(raw) => parse_number("PORT", &raw)?,
            None => DEFAULT_HEALTH_PORT,
        };

        let flag = |key: &str| get(key).is_some_and(|v| v.trim() == "true");
        let publish_mode = if flag("REPLY_IN_THREAD") {
            PublishMode::Thread
        } else {
            PublishMode::Channel
        };

        Ok(Self {
            slack: SlackConfig {
                bot_token: SecretString::from(bot_token),
                app_token: SecretString::from(app_token),
                api_base: get("SLACK_API_BASE")
                    .unwrap_or_else(|| DEFAULT_SLACK_API_BASE.to_string()),
                channel_ids,
                target_users,
                publish_mode,
            },
            transform: TransformConfig {
                api_key: SecretString::from(api_key),
                model,
                max_tokens,
                base_url,
            },
            verbose: flag("LOGS"),
            debug: flag("DEBUG"),
            health_port,
        })
    }

    /// True when no channel allow-list was supplied.
    pub fn monitors_all_channels(&self) -> bool {
        self.slack.channel_ids.is_empty()
    }
}

/// Split a comma-separated list, trimming entries and dropping empty ones.
fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.into(),
        message: e.to_string(),
    })
}
