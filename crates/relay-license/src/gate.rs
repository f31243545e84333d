//! License gate seam used by the run controller.

use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;

use crate::LicenseResult;

/// Maximum channels per run on the free plan.
pub const FREE_PLAN_MAX_GROUPS: u64 = 5;
/// Maximum items per day on the free plan.
pub const FREE_PLAN_MAX_CARDS_PER_DAY: u64 = 20;

/// Outcome of a license check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicenseDecision {
    pub allowed: bool,
    /// Human-readable reason from the server (or the local failure).
    pub reason: String,
    /// Account details returned alongside an approval.
    pub account: Option<AccountInfo>,
}

impl LicenseDecision {
    pub fn allow(reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            reason: reason.into(),
            account: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
            account: None,
        }
    }
}

/// Account identifier as sent by the server (numeric or textual).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum AccountId {
    Number(i64),
    Text(String),
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(id) => write!(f, "{id}"),
            Self::Text(id) => f.write_str(id),
        }
    }
}

/// The `user` object of a successful validation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AccountInfo {
    #[serde(default)]
    pub id: Option<AccountId>,
    #[serde(default = "unknown_plan")]
    pub plan: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub last_active: Option<String>,
    #[serde(default)]
    pub groups_used: u64,
    #[serde(default)]
    pub cards_sent_today: u64,
    #[serde(default)]
    pub total_cards_sent: u64,
}

fn unknown_plan() -> String {
    "unknown".to_string()
}

impl AccountInfo {
    pub fn is_free(&self) -> bool {
        self.plan.eq_ignore_ascii_case("free")
    }

    /// Items still allowed today on the free plan.
    pub fn remaining_free_cards(&self) -> u64 {
        FREE_PLAN_MAX_CARDS_PER_DAY.saturating_sub(self.cards_sent_today)
    }
}

/// Gate consulted before a run and informed of usage during it.
#[async_trait]
pub trait LicenseGate: Send + Sync {
    /// Decide whether a run of `item_count` items over `channel_count`
    /// channels may start. Never fails: every failure is a denial.
    async fn authorize(&self, channel_count: usize, item_count: usize) -> LicenseDecision;

    /// Record items sent across `channels_used` channels.
    async fn report_usage(&self, channels_used: usize, items_sent: usize) -> LicenseResult<()>;
}
