use std::sync::Arc;

use relay_license::LicenseGate;
use tracing::{debug, warn};

/// Reports per-round usage to the license service. Failures are logged and
/// counted, never propagated.
pub struct UsageReporter {
    gate: Arc<dyn LicenseGate>,
    channel_count: usize,
    reports: usize,
    failures: usize,
}

impl UsageReporter {
    pub fn new(gate: Arc<dyn LicenseGate>, channel_count: usize) -> Self {
        Self {
            gate,
            channel_count,
            reports: 0,
            failures: 0,
        }
    }

    /// Report the items sent in a round. Rounds without sends are skipped.
    pub async fn report_round(&mut self, items_sent: usize) {
        if items_sent == 0 {
            return;
        }
        self.report(items_sent).await;
    }

    /// Closing report after a completed run.
    pub async fn report_final(&mut self) {
        self.report(0).await;
    }

    /// Successful reports.
    pub fn reports(&self) -> usize {
        self.reports
    }

    pub fn failures(&self) -> usize {
        self.failures
    }

    async fn report(&mut self, items_sent: usize) {
        match self.gate.report_usage(self.channel_count, items_sent).await {
            Ok(()) => {
                self.reports += 1;
                debug!(
                    channels = self.channel_count,
                    items_sent, "Usage reported"
                );
            }
            Err(err) => {
                self.failures += 1;
                warn!(
                    channels = self.channel_count,
                    items_sent,
                    error = %err,
                    "Usage report failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_license::StaticLicenseGate;

    #[tokio::test]
    async fn skips_empty_rounds_and_reports_final() {
        let gate = Arc::new(StaticLicenseGate::allowing());
        let mut reporter = UsageReporter::new(gate.clone(), 3);

        reporter.report_round(3).await;
        reporter.report_round(0).await;
        reporter.report_final().await;

        assert_eq!(gate.usage_reports(), vec![(3, 3), (3, 0)]);
        assert_eq!(reporter.reports(), 2);
        assert_eq!(reporter.failures(), 0);
    }

    #[tokio::test]
    async fn failures_are_counted_not_raised() {
        let gate = Arc::new(StaticLicenseGate::allowing().failing_usage());
        let mut reporter = UsageReporter::new(gate.clone(), 2);

        reporter.report_round(2).await;
        reporter.report_final().await;

        assert_eq!(reporter.failures(), 2);
        assert_eq!(reporter.reports(), 0);
        assert_eq!(gate.usage_reports().len(), 2);
    }
}
