//! Core types, configuration, and utilities for card-relay.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{
    Config, TelegramBackend, TimingsConfig, DEFAULT_LICENSE_SERVER_URL, DEFAULT_LOG_LEVEL,
    DEFAULT_TELEGRAM_API_BASE,
};
pub use error::{ConfigError, ConfigResult};
pub use logging::{init_logging, parse_level};
pub use paths::Paths;
