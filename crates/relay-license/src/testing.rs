use async_trait::async_trait;
use parking_lot::Mutex;

use crate::gate::{LicenseDecision, LicenseGate};
use crate::{LicenseError, LicenseResult};

/// Scripted gate: fixed decision, recorded calls, optional usage failures.
#[derive(Debug)]
pub struct StaticLicenseGate {
    decision: LicenseDecision,
    fail_usage: bool,
    authorize_calls: Mutex<Vec<(usize, usize)>>,
    usage_reports: Mutex<Vec<(usize, usize)>>,
}

impl StaticLicenseGate {
    pub fn allowing() -> Self {
        Self::with_decision(LicenseDecision::allow("License valid"))
    }

    pub fn denying(reason: impl Into<String>) -> Self {
        Self::with_decision(LicenseDecision::deny(reason))
    }

    pub fn with_decision(decision: LicenseDecision) -> Self {
        Self {
            decision,
            fail_usage: false,
            authorize_calls: Mutex::new(Vec::new()),
            usage_reports: Mutex::new(Vec::new()),
        }
    }

    /// Make every usage report fail after being recorded.
    pub fn failing_usage(mut self) -> Self {
        self.fail_usage = true;
        self
    }

    /// `(channel_count, item_count)` of every authorize call.
    pub fn authorize_calls(&self) -> Vec<(usize, usize)> {
        self.authorize_calls.lock().clone()
    }

    /// `(channels_used, items_sent)` of every usage report, failed ones included.
    pub fn usage_reports(&self) -> Vec<(usize, usize)> {
        self.usage_reports.lock().clone()
    }
}

#[async_trait]
impl LicenseGate for StaticLicenseGate {
    async fn authorize(&self, channel_count: usize, item_count: usize) -> LicenseDecision {
        self.authorize_calls.lock().push((channel_count, item_count));
        self.decision.clone()
    }

    async fn report_usage(&self, channels_used: usize, items_sent: usize) -> LicenseResult<()> {
        self.usage_reports.lock().push((channels_used, items_sent));
        if self.fail_usage {
            return Err(LicenseError::Server {
                status: 503,
                message: "usage endpoint unavailable".to_string(),
            });
        }
        Ok(())
    }
}
