//! card-relay - distribute cards across Telegram groups and forward the
//! replies to a private group.

mod commands;
mod output;

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use relay_config_and_utils::{init_logging, Config, Paths};
use tracing::debug;

use commands::Context;
use output::OutputFormat;

/// card-relay command-line interface.
#[derive(Parser)]
#[command(name = "card-relay")]
#[command(about = "Distribute cards across Telegram groups and collect the replies")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error). Defaults to the configured level
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Base directory for config, state and logs. Defaults to ~/.card-relay
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    /// Output format (text or json)
    #[arg(short, long, default_value = "text", global = true)]
    format: OutputFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Send the cards file to every configured channel (default)
    Run {
        /// Cards file, one card per line. Defaults to <base-dir>/cards.txt
        #[arg(long)]
        cards: Option<PathBuf>,
    },
    /// Manage target channels
    Channels {
        #[command(subcommand)]
        command: ChannelCommands,
    },
    /// Show or set the channel receiving forwarded replies
    Destination {
        /// Numeric chat id or @handle
        #[arg(allow_negative_numbers = true)]
        channel: Option<String>,
    },
    /// Manage per-channel prefixes
    Prefix {
        #[command(subcommand)]
        command: PrefixCommands,
    },
    /// Show license and account status
    Status,
    /// Activate a premium code
    Activate {
        /// Activation code
        code: String,
    },
    /// Find a group's numeric id among the account's chats
    FindGroup {
        /// Part of the group title or username
        name: String,
    },
    /// Set the API credentials from my.telegram.org and use the user session
    Api {
        api_id: i32,
        api_hash: String,
    },
    /// Authorize the user session (asks for the login code)
    Login {
        /// Phone number in international format
        phone: String,
    },
    /// Set a bot token and use the Bot API instead of the user session
    Token {
        /// Token from @BotFather
        token: String,
    },
}

#[derive(Subcommand)]
enum ChannelCommands {
    /// Add a channel (numeric chat id or @handle)
    Add {
        #[arg(allow_negative_numbers = true)]
        channel: String,
    },
    /// Remove a channel
    Remove {
        #[arg(allow_negative_numbers = true)]
        channel: String,
    },
    /// List channels with their prefixes
    List,
}

#[derive(Subcommand)]
enum PrefixCommands {
    /// Set the label prepended to every card sent to a channel
    Set {
        #[arg(allow_negative_numbers = true)]
        channel: String,
        #[arg(allow_hyphen_values = true)]
        label: String,
    },
    /// List prefixes
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new().context("resolving home directory")?,
    };
    let config = Config::load(&paths)
        .with_context(|| format!("loading {}", paths.config_file().display()))?;

    let level = cli.log_level.as_deref().unwrap_or(&config.log_level).to_string();
    init_logging(&level, Some(paths.log_file()));
    debug!(base_dir = %paths.base_dir().display(), "Configuration loaded");

    let mut ctx = Context {
        paths,
        config,
        format: cli.format,
    };

    match cli.command.unwrap_or(Commands::Run { cards: None }) {
        Commands::Run { cards } => commands::run(&ctx, cards).await,
        Commands::Channels { command } => match command {
            ChannelCommands::Add { channel } => commands::channels_add(&mut ctx, &channel),
            ChannelCommands::Remove { channel } => commands::channels_remove(&mut ctx, &channel),
            ChannelCommands::List => commands::channels_list(&ctx),
        },
        Commands::Destination { channel } => commands::destination(&mut ctx, channel.as_deref()),
        Commands::Prefix { command } => match command {
            PrefixCommands::Set { channel, label } => commands::prefix_set(&ctx, &channel, &label),
            PrefixCommands::List => commands::prefix_list(&ctx),
        },
        Commands::Status => commands::status(&ctx).await,
        Commands::Activate { code } => commands::activate(&ctx, &code).await,
        Commands::FindGroup { name } => commands::find_group(&ctx, &name).await,
        Commands::Api { api_id, api_hash } => commands::api(&mut ctx, api_id, &api_hash),
        Commands::Login { phone } => commands::login(&ctx, &phone).await,
        Commands::Token { token } => commands::token(&mut ctx, &token).await,
    }
}
