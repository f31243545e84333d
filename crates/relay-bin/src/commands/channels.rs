//! Channel, destination and prefix configuration.

use anyhow::{Context as _, Result};
use relay_ledger::PrefixMap;
use relay_transport::ChannelRef;
use serde::Serialize;

use super::Context;
use crate::output::{self, OutputFormat};

#[derive(Serialize)]
struct ChannelRow<'a> {
    channel: &'a str,
    prefix: &'a str,
}

/// Canonical form used as config entry and ledger/prefix key.
fn canonical(channel: &str) -> String {
    ChannelRef::parse(channel).key()
}

pub fn channels_add(ctx: &mut Context, channel: &str) -> Result<()> {
    let channel = canonical(channel);
    if ctx.config.add_channel(&channel)? {
        ctx.save_config()?;
        output::print_success(&format!("Added {channel}"), ctx.format);
    } else {
        output::print_success(&format!("{channel} is already configured"), ctx.format);
    }
    Ok(())
}

pub fn channels_remove(ctx: &mut Context, channel: &str) -> Result<()> {
    let channel = canonical(channel);
    if ctx.config.remove_channel(&channel) {
        ctx.save_config()?;
        output::print_success(&format!("Removed {channel}"), ctx.format);
    } else {
        output::print_error(&format!("{channel} is not configured"), ctx.format);
    }
    Ok(())
}

pub fn channels_list(ctx: &Context) -> Result<()> {
    let prefixes = PrefixMap::load(ctx.paths.prefix_file());
    let rows: Vec<ChannelRow> = ctx
        .config
        .channels
        .iter()
        .map(|channel| ChannelRow {
            channel,
            prefix: prefixes.get(channel),
        })
        .collect();

    output::print(&rows, ctx.format, |rows| {
        if rows.is_empty() {
            println!("No channels configured. Add one with `card-relay channels add <channel>`.");
            return;
        }
        output::print_heading(&format!("Channels ({})", rows.len()));
        for row in rows {
            let prefix = if row.prefix.is_empty() { "(none)" } else { row.prefix };
            output::print_row(row.channel, prefix);
        }
    });
    Ok(())
}

/// Show the destination, or set it when `channel` is given.
pub fn destination(ctx: &mut Context, channel: Option<&str>) -> Result<()> {
    match channel {
        Some(channel) => {
            let channel = canonical(channel);
            if channel.is_empty() {
                anyhow::bail!("destination cannot be empty");
            }
            ctx.config.destination = Some(channel.clone());
            ctx.save_config()?;
            output::print_success(&format!("Replies will be forwarded to {channel}"), ctx.format);
        }
        None => match ctx.config.destination.as_deref() {
            Some(current) => output::print_success(current, ctx.format),
            None => output::print_error(
                "No destination configured. Set one with `card-relay destination <channel>`.",
                ctx.format,
            ),
        },
    }
    Ok(())
}

pub fn prefix_set(ctx: &Context, channel: &str, label: &str) -> Result<()> {
    let channel = canonical(channel);
    if !ctx.config.channels.contains(&channel) {
        output::print_error(
            &format!("{channel} is not a configured channel; the prefix is stored anyway"),
            ctx.format,
        );
    }

    let mut prefixes = PrefixMap::load(ctx.paths.prefix_file());
    let previous = prefixes.set(&channel, label);
    prefixes
        .save()
        .with_context(|| format!("saving {}", ctx.paths.prefix_file().display()))?;

    let label = prefixes.get(&channel);
    let message = match previous {
        Some(previous) if previous != label => {
            format!("Prefix for {channel} changed from '{previous}' to '{label}'")
        }
        _ => format!("Prefix for {channel} is '{label}'"),
    };
    output::print_success(&message, ctx.format);
    Ok(())
}

pub fn prefix_list(ctx: &Context) -> Result<()> {
    let prefixes = PrefixMap::load(ctx.paths.prefix_file());
    let rows: Vec<ChannelRow> = prefixes
        .iter()
        .map(|(channel, prefix)| ChannelRow { channel, prefix })
        .collect();

    output::print(&rows, ctx.format, |rows| {
        if rows.is_empty() {
            println!("No prefixes configured.");
            return;
        }
        output::print_heading("Prefixes");
        for row in rows {
            output::print_row(row.channel, row.prefix);
        }
    });

    let missing: Vec<&String> = ctx
        .config
        .channels
        .iter()
        .filter(|channel| prefixes.get(channel).is_empty())
        .collect();
    if !missing.is_empty() && matches!(ctx.format, OutputFormat::Text) {
        println!(
            "\nWithout prefix: {}",
            missing
                .iter()
                .map(|channel| channel.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_context;
    use relay_config_and_utils::Config;
    use tempfile::tempdir;

    #[test]
    fn add_and_remove_channels_persist_canonical_keys() {
        let dir = tempdir().unwrap();
        let mut ctx = test_context(dir.path());

        channels_add(&mut ctx, " +100 ").unwrap();
        channels_add(&mut ctx, "@cards").unwrap();
        channels_add(&mut ctx, "100").unwrap();

        let saved = Config::load_from_file(&ctx.paths.config_file()).unwrap();
        assert_eq!(saved.channels, vec!["100", "@cards"]);

        channels_remove(&mut ctx, "@cards").unwrap();
        let saved = Config::load_from_file(&ctx.paths.config_file()).unwrap();
        assert_eq!(saved.channels, vec!["100"]);
    }

    #[test]
    fn destination_is_saved() {
        let dir = tempdir().unwrap();
        let mut ctx = test_context(dir.path());

        destination(&mut ctx, Some("-1009876")).unwrap();

        let saved = Config::load_from_file(&ctx.paths.config_file()).unwrap();
        assert_eq!(saved.destination.as_deref(), Some("-1009876"));
    }

    #[test]
    fn prefix_set_writes_prefix_artifact() {
        let dir = tempdir().unwrap();
        let mut ctx = test_context(dir.path());
        channels_add(&mut ctx, "@cards").unwrap();

        prefix_set(&ctx, "@cards", " /chk ").unwrap();
        prefix_set(&ctx, "@cards", ".au").unwrap();

        let prefixes = PrefixMap::load(ctx.paths.prefix_file());
        assert_eq!(prefixes.get("@cards"), ".au");
    }
}
