//! CLI command implementations.

mod channels;
mod license;
mod run;
mod telegram;

pub use channels::{channels_add, channels_list, channels_remove, destination, prefix_list, prefix_set};
pub use license::{activate, status};
pub use run::run;
pub use telegram::{api, find_group, login, token};

use std::sync::Arc;

use anyhow::{Context as _, Result};
use relay_config_and_utils::{Config, Paths, TelegramBackend, TimingsConfig};
use relay_dispatch::DispatchTimings;
use relay_license::LicenseClient;
use relay_transport::{TelegramTransport, Transport, UserSessionTransport};

use crate::output::OutputFormat;

/// Everything a command needs: where files live, the loaded config and how
/// to print.
pub struct Context {
    pub paths: Paths,
    pub config: Config,
    pub format: OutputFormat,
}

impl Context {
    pub fn save_config(&self) -> Result<()> {
        self.config
            .save(&self.paths)
            .with_context(|| format!("saving {}", self.paths.config_file().display()))
    }
}

/// Transport for the configured backend.
pub fn telegram_transport(config: &Config, paths: &Paths) -> Result<Arc<dyn Transport>> {
    Ok(match config.telegram_backend {
        TelegramBackend::UserSession => Arc::new(user_session_transport(config, paths)?),
        TelegramBackend::Bot => Arc::new(bot_transport(config)?),
    })
}

/// User-session transport from the configured API credentials.
pub fn user_session_transport(config: &Config, paths: &Paths) -> Result<UserSessionTransport> {
    let (api_id, api_hash) = config.api_credentials()?;
    UserSessionTransport::new(api_id, api_hash, paths.session_file())
        .context("creating Telegram user session")
}

/// Bot API transport from the configured token and API base.
pub fn bot_transport(config: &Config) -> Result<TelegramTransport> {
    let token = config
        .bot_token()
        .context("telegram bot token is not configured (run `card-relay token <token>`)")?;
    let api_base = config.telegram_api_base().context("invalid telegram_api_base")?;
    TelegramTransport::new(api_base.as_str(), token, config.timings.poll_timeout())
        .context("creating Telegram transport")
}

/// License client identifying as this machine.
pub fn license_client(config: &Config) -> Result<LicenseClient> {
    let url = config
        .license_server_url()
        .context("invalid license_server_url")?;
    LicenseClient::for_this_machine(url.as_str()).context("creating license client")
}

pub fn dispatch_timings(timings: &TimingsConfig) -> DispatchTimings {
    DispatchTimings {
        inter_round_delay: timings.inter_round_delay(),
        drain_delay: timings.drain_delay(),
        debounce_window: timings.debounce_window(),
        forward_pacing: timings.forward_pacing(),
    }
}

#[cfg(test)]
pub(crate) fn test_context(dir: &std::path::Path) -> Context {
    Context {
        paths: Paths::with_base_dir(dir.to_path_buf()),
        config: Config::default(),
        format: OutputFormat::Text,
    }
}
