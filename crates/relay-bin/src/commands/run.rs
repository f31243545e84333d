//! The distribution run.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use relay_dispatch::{DispatchError, DistributionRequest, ItemSource, RunController, RunSummary};
use relay_ledger::PrefixMap;
use relay_transport::ChannelRef;
use serde_json::json;
use tracing::{info, warn};

use super::{dispatch_timings, license_client, telegram_transport, Context};
use crate::output::{self, OutputFormat};

/// Distribute the cards file across the configured channels until every
/// channel ran out of cards, forwarding replies to the destination.
/// Ctrl-C stops the run after the send in progress.
pub async fn run(ctx: &Context, cards: Option<PathBuf>) -> Result<()> {
    ctx.config.validate_for_run()?;

    let transport = telegram_transport(&ctx.config, &ctx.paths)?;
    let gate = Arc::new(license_client(&ctx.config)?);
    let controller = RunController::new(
        transport,
        gate,
        ctx.paths.ledger_file(),
        dispatch_timings(&ctx.config.timings),
    );

    let destination = ctx
        .config
        .destination
        .as_deref()
        .context("no destination configured")?;
    let prefixes = PrefixMap::load(ctx.paths.prefix_file());
    for channel in &ctx.config.channels {
        if prefixes.get(channel).is_empty() {
            warn!(channel = %channel, "No prefix configured, items are sent bare");
        }
    }

    let cards = cards.unwrap_or_else(|| ctx.paths.cards_file());
    info!(
        cards = %cards.display(),
        channels = ctx.config.channels.len(),
        destination,
        "Starting distribution"
    );
    let request = DistributionRequest {
        channels: ctx
            .config
            .channels
            .iter()
            .map(|channel| ChannelRef::parse(channel))
            .collect(),
        items: ItemSource::File(cards),
        prefixes,
        destination: ChannelRef::parse(destination),
    };

    let cancel = controller.cancellation_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received interrupt, stopping distribution");
            cancel.cancel();
        }
    });

    let result = controller.run_distribution(request).await;
    interrupt.abort();

    match result {
        Ok(summary) => {
            print_summary(&summary, ctx.format);
            Ok(())
        }
        Err(DispatchError::LicenseDenied(reason)) => {
            output::print_error(&reason, ctx.format);
            if let OutputFormat::Text = ctx.format {
                println!("Check your plan with `card-relay status` or activate PREMIUM with `card-relay activate <code>`.");
            }
            anyhow::bail!("license denied")
        }
        Err(err) => Err(err).context("distribution run failed"),
    }
}

fn print_summary(summary: &RunSummary, format: OutputFormat) {
    let value = json!({
        "items_sent": summary.items_sent,
        "rounds_run": summary.rounds_run,
        "failed_sends": summary.failed_sends,
        "cancelled": summary.cancelled,
        "batches_forwarded": summary.batches_forwarded,
        "replies_forwarded": summary.replies_forwarded,
        "replies_discarded": summary.replies_discarded,
    });

    output::print(&value, format, |_| {
        output::print_heading(if summary.cancelled {
            "Distribution cancelled"
        } else {
            "Distribution finished"
        });
        output::print_row("Cards sent", &summary.items_sent.to_string());
        output::print_row("Rounds", &summary.rounds_run.to_string());
        output::print_row("Failed sends", &summary.failed_sends.to_string());
        output::print_row("Replies forwarded", &summary.replies_forwarded.to_string());
        output::print_row("Reply batches", &summary.batches_forwarded.to_string());
        if summary.replies_discarded > 0 {
            output::print_row("Replies discarded", &summary.replies_discarded.to_string());
        }
    });
}
