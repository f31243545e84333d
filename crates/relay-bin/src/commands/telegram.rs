//! Telegram account setup and chat discovery.

use std::io::{self, BufRead, Write};

use anyhow::{Context as _, Result};
use relay_config_and_utils::TelegramBackend;
use relay_transport::{LoginPrompt, Transport};
use serde::Serialize;

use super::{bot_transport, telegram_transport, user_session_transport, Context};
use crate::output;

#[derive(Serialize)]
struct ChatRow {
    id: i64,
    title: String,
}

/// List chats visible to the configured account whose title contains `query`.
pub async fn find_group(ctx: &Context, query: &str) -> Result<()> {
    let transport = telegram_transport(&ctx.config, &ctx.paths)?;
    transport.connect().await.context("connecting to Telegram")?;
    let found = transport.discover_chats(query).await;
    if let Err(err) = transport.disconnect().await {
        tracing::warn!(error = %err, "Telegram disconnect failed");
    }
    let chats = found.context("listing chats")?;

    let rows: Vec<ChatRow> = chats
        .into_iter()
        .map(|chat| ChatRow {
            id: chat.id,
            title: chat.title,
        })
        .collect();

    output::print(&rows, ctx.format, |rows| {
        if rows.is_empty() {
            println!("No chat matching '{query}'.");
            if ctx.config.telegram_backend == TelegramBackend::Bot {
                println!("Post a message in the group (with the bot as member) and try again.");
            }
            return;
        }
        output::print_heading(&format!("Chats matching '{query}'"));
        for row in rows {
            output::print_row(&row.id.to_string(), &row.title);
        }
        println!("\nUse the numeric id with `card-relay channels add <id>`.");
    });
    Ok(())
}

/// Store the API credentials from my.telegram.org and switch to the user
/// session backend.
pub fn api(ctx: &mut Context, api_id: i32, api_hash: &str) -> Result<()> {
    let api_hash = api_hash.trim();
    if api_id <= 0 {
        anyhow::bail!("api_id must be a positive number");
    }
    if api_hash.is_empty() {
        anyhow::bail!("api_hash cannot be empty");
    }
    ctx.config.api_id = Some(api_id);
    ctx.config.api_hash = Some(api_hash.to_string());
    ctx.config.telegram_backend = TelegramBackend::UserSession;
    ctx.save_config()?;

    output::print_success(
        "API credentials saved. Run `card-relay login <phone>` to authorize the session",
        ctx.format,
    );
    Ok(())
}

/// Authorize the user session, prompting on the terminal for the login
/// code and two-step password.
pub async fn login(ctx: &Context, phone: &str) -> Result<()> {
    let transport = user_session_transport(&ctx.config, &ctx.paths)?;
    let account = transport
        .sign_in(phone, prompt_on_terminal)
        .await
        .context("logging in to Telegram")?;
    output::print_success(&format!("Logged in as {account}"), ctx.format);
    Ok(())
}

fn prompt_on_terminal(prompt: LoginPrompt) -> io::Result<String> {
    let label = match prompt {
        LoginPrompt::Code => "Login code: ".to_string(),
        LoginPrompt::Password { hint: Some(hint) } => format!("Password (hint: {hint}): "),
        LoginPrompt::Password { hint: None } => "Password: ".to_string(),
    };
    read_answer(&label, &mut io::stdin().lock(), &mut io::stderr())
}

fn read_answer(label: &str, input: &mut impl BufRead, out: &mut impl Write) -> io::Result<String> {
    write!(out, "{label}")?;
    out.flush()?;
    let mut answer = String::new();
    if input.read_line(&mut answer)? == 0 {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "no answer given"));
    }
    Ok(answer.trim().to_string())
}

/// Store the bot token, switch to the Bot API backend and check the token.
pub async fn token(ctx: &mut Context, token: &str) -> Result<()> {
    let token = token.trim();
    if token.is_empty() {
        anyhow::bail!("token cannot be empty");
    }
    ctx.config.telegram_bot_token = Some(token.to_string());
    ctx.config.telegram_backend = TelegramBackend::Bot;
    ctx.save_config()?;

    let transport = bot_transport(&ctx.config)?;
    match transport.connect().await {
        Ok(()) => {
            let _ = transport.disconnect().await;
            output::print_success("Token saved and verified", ctx.format);
        }
        Err(err) => output::print_error(
            &format!("Token saved but could not be verified: {err}"),
            ctx.format,
        ),
    }
    Ok(())
}
