//! Configuration management.

use crate::{ConfigError, ConfigResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default Telegram Bot API base URL.
pub const DEFAULT_TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Default license server URL (can be overridden at compile time via CARD_RELAY_LICENSE_URL).
pub const DEFAULT_LICENSE_SERVER_URL: &str = match option_env!("CARD_RELAY_LICENSE_URL") {
    Some(url) => url,
    None => "http://127.0.0.1:8080",
};

const ENV_LOG_LEVEL: &str = "CARD_RELAY_LOG_LEVEL";
const ENV_TELEGRAM_TOKEN: &str = "CARD_RELAY_TELEGRAM_TOKEN";
const ENV_API_ID: &str = "CARD_RELAY_API_ID";
const ENV_API_HASH: &str = "CARD_RELAY_API_HASH";
const ENV_LICENSE_URL: &str = "CARD_RELAY_LICENSE_URL";

/// Main configuration, persisted as `config.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Which Telegram client the relay runs as.
    #[serde(default)]
    pub telegram_backend: TelegramBackend,
    /// Application id from my.telegram.org, for the user session.
    #[serde(default)]
    pub api_id: Option<i32>,
    /// Application hash from my.telegram.org, for the user session.
    #[serde(default)]
    pub api_hash: Option<String>,
    /// Telegram Bot API base URL.
    #[serde(default = "default_telegram_api_base")]
    pub telegram_api_base: String,
    /// Bot token issued by @BotFather.
    #[serde(default)]
    pub telegram_bot_token: Option<String>,
    /// License server base URL.
    #[serde(default = "default_license_server_url")]
    pub license_server_url: String,
    /// Target channels in send order (numeric ids or `@handles`).
    #[serde(default)]
    pub channels: Vec<String>,
    /// Channel receiving forwarded replies.
    #[serde(default)]
    pub destination: Option<String>,
    /// Scheduler and aggregator delays.
    #[serde(default)]
    pub timings: TimingsConfig,
}

/// Telegram client flavour.
///
/// A user session sees every message in the groups it is a member of,
/// including replies written by other bots. A bot account never receives
/// messages from other bots, so reply forwarding only covers human replies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelegramBackend {
    #[default]
    UserSession,
    Bot,
}

/// Delays used by a distribution run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingsConfig {
    pub inter_round_delay_secs: u64,
    pub drain_delay_secs: u64,
    pub debounce_window_secs: u64,
    pub forward_pacing_ms: u64,
    /// Long-poll timeout for `getUpdates`.
    pub poll_timeout_secs: u64,
}

impl Default for TimingsConfig {
    fn default() -> Self {
        Self {
            inter_round_delay_secs: 62,
            drain_delay_secs: 30,
            debounce_window_secs: 40,
            forward_pacing_ms: 1_000,
            poll_timeout_secs: 25,
        }
    }
}

impl TimingsConfig {
    pub fn inter_round_delay(&self) -> Duration {
        Duration::from_secs(self.inter_round_delay_secs)
    }

    pub fn drain_delay(&self) -> Duration {
        Duration::from_secs(self.drain_delay_secs)
    }

    pub fn debounce_window(&self) -> Duration {
        Duration::from_secs(self.debounce_window_secs)
    }

    pub fn forward_pacing(&self) -> Duration {
        Duration::from_millis(self.forward_pacing_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_telegram_api_base() -> String {
    DEFAULT_TELEGRAM_API_BASE.to_string()
}

fn default_license_server_url() -> String {
    DEFAULT_LICENSE_SERVER_URL.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            telegram_backend: TelegramBackend::default(),
            api_id: None,
            api_hash: None,
            telegram_api_base: default_telegram_api_base(),
            telegram_bot_token: None,
            license_server_url: default_license_server_url(),
            channels: Vec::new(),
            destination: None,
            timings: TimingsConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the config file, falling back to defaults,
    /// then apply environment overrides.
    pub fn load(paths: &Paths) -> ConfigResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());

        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Save configuration to the config file.
    pub fn save(&self, paths: &Paths) -> ConfigResult<()> {
        paths.ensure_dirs()?;
        let path = paths.config_file();
        let content = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        std::fs::write(&path, content).map_err(|source| ConfigError::Write { path, source })
    }

    /// Override fields from environment-style lookups. Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        if let Some(level) = non_empty(ENV_LOG_LEVEL) {
            self.log_level = level;
        }
        if let Some(token) = non_empty(ENV_TELEGRAM_TOKEN) {
            self.telegram_bot_token = Some(token);
        }
        if let Some(api_id) = non_empty(ENV_API_ID) {
            match api_id.parse::<i32>() {
                Ok(api_id) => self.api_id = Some(api_id),
                Err(_) => tracing::warn!(value = %api_id, "ignoring non-numeric {ENV_API_ID}"),
            }
        }
        if let Some(api_hash) = non_empty(ENV_API_HASH) {
            self.api_hash = Some(api_hash);
        }
        if let Some(url) = non_empty(ENV_LICENSE_URL) {
            self.license_server_url = url;
        }
    }

    /// Append a channel unless already present. Returns whether it was added.
    pub fn add_channel(&mut self, channel: &str) -> ConfigResult<bool> {
        let channel = channel.trim();
        if channel.is_empty() {
            return Err(ConfigError::Invalid {
                field: "channel",
                reason: "cannot be empty".to_string(),
            });
        }
        if self.channels.iter().any(|existing| existing == channel) {
            return Ok(false);
        }
        self.channels.push(channel.to_string());
        Ok(true)
    }

    /// Remove a channel. Returns whether it was present.
    pub fn remove_channel(&mut self, channel: &str) -> bool {
        let before = self.channels.len();
        self.channels.retain(|existing| existing != channel.trim());
        self.channels.len() != before
    }

    /// Check that everything a sending run needs is configured.
    pub fn validate_for_run(&self) -> ConfigResult<()> {
        match self.telegram_backend {
            TelegramBackend::UserSession => {
                self.api_credentials()?;
            }
            TelegramBackend::Bot => {
                if self.bot_token().is_none() {
                    return Err(ConfigError::Missing(
                        "telegram bot token is not configured (run `card-relay token <token>`)"
                            .to_string(),
                    ));
                }
            }
        }
        if self.channels.is_empty() {
            return Err(ConfigError::Missing(
                "no channels configured (run `card-relay channels add <channel>`)".to_string(),
            ));
        }
        if self.destination.as_deref().map(str::trim).unwrap_or("").is_empty() {
            return Err(ConfigError::Missing(
                "no destination configured (run `card-relay destination <channel>`)".to_string(),
            ));
        }
        Ok(())
    }

    /// `(api_id, api_hash)` for the user session.
    pub fn api_credentials(&self) -> ConfigResult<(i32, &str)> {
        let api_hash = self
            .api_hash
            .as_deref()
            .map(str::trim)
            .filter(|hash| !hash.is_empty());
        match (self.api_id, api_hash) {
            (Some(api_id), Some(api_hash)) if api_id > 0 => Ok((api_id, api_hash)),
            (Some(_), Some(_)) => Err(ConfigError::Invalid {
                field: "api_id",
                reason: "must be a positive number".to_string(),
            }),
            _ => Err(ConfigError::Missing(
                "telegram API credentials are not configured (run `card-relay api <api_id> <api_hash>`)"
                    .to_string(),
            )),
        }
    }

    /// Bot token, if configured and non-empty.
    pub fn bot_token(&self) -> Option<&str> {
        self.telegram_bot_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
    }

    /// Get the license server URL as a parsed URL.
    pub fn license_server_url(&self) -> ConfigResult<Url> {
        Url::parse(&self.license_server_url).map_err(|source| ConfigError::Url {
            field: "license_server_url",
            source,
        })
    }

    /// Get the Telegram API base as a parsed URL.
    pub fn telegram_api_base(&self) -> ConfigResult<Url> {
        Url::parse(&self.telegram_api_base).map_err(|source| ConfigError::Url {
            field: "telegram_api_base",
            source,
        })
    }
}
