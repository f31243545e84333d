//! License status and premium activation.

use anyhow::{Context as _, Result};
use relay_license::{AccountInfo, FREE_PLAN_MAX_CARDS_PER_DAY, FREE_PLAN_MAX_GROUPS};
use serde_json::json;

use super::{license_client, Context};
use crate::output::{self, OutputFormat};

/// Check the license server and show the account bound to this machine.
pub async fn status(ctx: &Context) -> Result<()> {
    let client = license_client(&ctx.config)?;

    if let Err(err) = client.health().await {
        output::print_error(&format!("License server unavailable: {err}"), ctx.format);
        return Ok(());
    }

    let decision = client
        .validate(0, 0)
        .await
        .context("validating license")?;

    if let OutputFormat::Json = ctx.format {
        let account = decision.account.as_ref().map(|account| {
            json!({
                "id": account.id.as_ref().map(ToString::to_string),
                "plan": account.plan,
                "created_at": account.created_at,
                "last_active": account.last_active,
                "groups_used": account.groups_used,
                "cards_sent_today": account.cards_sent_today,
                "total_cards_sent": account.total_cards_sent,
            })
        });
        println!(
            "{}",
            json!({
                "allowed": decision.allowed,
                "reason": decision.reason,
                "hardware_id": client.hardware_id(),
                "account": account,
            })
        );
        return Ok(());
    }

    output::print_heading("License");
    output::print_row("Status", if decision.allowed { "valid" } else { "invalid" });
    output::print_row("Message", &decision.reason);
    output::print_row("Hardware ID", &format!("{}...", short_id(client.hardware_id())));

    match &decision.account {
        Some(account) => print_account(account),
        None => println!("\nNo account information available."),
    }
    Ok(())
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

fn print_account(account: &AccountInfo) {
    output::print_heading("Account");
    output::print_row(
        "User ID",
        &account
            .id
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "N/A".to_string()),
    );
    output::print_row("Plan", &account.plan.to_uppercase());
    output::print_row(
        "Registered",
        account
            .created_at
            .as_deref()
            .map(|at| at.get(..10).unwrap_or(at))
            .unwrap_or("N/A"),
    );
    output::print_row(
        "Last active",
        account
            .last_active
            .as_deref()
            .map(|at| at.get(..16).unwrap_or(at))
            .unwrap_or("N/A"),
    );
    output::print_row("Groups used", &account.groups_used.to_string());
    output::print_row("Cards today", &account.cards_sent_today.to_string());
    output::print_row("Total cards", &account.total_cards_sent.to_string());

    if account.is_free() {
        println!(
            "\nFREE plan limits: {} groups max, {} of {} cards left today",
            FREE_PLAN_MAX_GROUPS,
            account.remaining_free_cards(),
            FREE_PLAN_MAX_CARDS_PER_DAY
        );
        println!("Activate PREMIUM with `card-relay activate <code>` to lift them.");
    } else {
        println!("\n{} plan: no limits", account.plan.to_uppercase());
    }
}

/// Activate a premium code for this machine.
pub async fn activate(ctx: &Context, code: &str) -> Result<()> {
    let client = license_client(&ctx.config)?;
    let outcome = client
        .activate(code)
        .await
        .context("activating premium code")?;

    if outcome.success {
        output::print_success(&outcome.message, ctx.format);
    } else {
        output::print_error(&outcome.message, ctx.format);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_id_truncates_to_eight_chars() {
        assert_eq!(short_id("cbd2be7b96f770a0"), "cbd2be7b");
        assert_eq!(short_id("abc"), "abc");
    }
}
