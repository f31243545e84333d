//! Run controller: license gate, wiring and teardown of a distribution run.

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use relay_ledger::{LedgerStore, PrefixMap};
use relay_license::LicenseGate;
use relay_transport::{ChannelRef, ChatId, Transport};

use crate::aggregator::{AggregatorConfig, ResponseAggregator};
use crate::item_queue::{ItemQueue, ItemSource};
use crate::scheduler::{DistributionScheduler, SchedulerExit};
use crate::timings::DispatchTimings;
use crate::usage::UsageReporter;
use crate::{DispatchError, DispatchResult};

/// Everything a single run needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct DistributionRequest {
    pub channels: Vec<ChannelRef>,
    pub items: ItemSource,
    pub prefixes: PrefixMap,
    /// Channel receiving forwarded replies.
    pub destination: ChannelRef,
}

/// What a run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub items_sent: usize,
    pub rounds_run: usize,
    pub failed_sends: usize,
    pub cancelled: bool,
    pub batches_forwarded: usize,
    pub replies_forwarded: usize,
    pub replies_discarded: usize,
}

pub struct RunController {
    transport: Arc<dyn Transport>,
    gate: Arc<dyn LicenseGate>,
    ledger_path: PathBuf,
    timings: DispatchTimings,
    cancel: CancellationToken,
}

impl RunController {
    pub fn new(
        transport: Arc<dyn Transport>,
        gate: Arc<dyn LicenseGate>,
        ledger_path: impl Into<PathBuf>,
        timings: DispatchTimings,
    ) -> Self {
        Self {
            transport,
            gate,
            ledger_path: ledger_path.into(),
            timings,
            cancel: CancellationToken::new(),
        }
    }

    /// Cancelling this token stops the run at the next send or delay.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Gate, distribute, collect replies and tear down.
    ///
    /// Once the transport connect has been attempted, teardown always runs:
    /// the aggregator is stopped, the subscription closed, the transport
    /// disconnected and the ledger artifact deleted.
    pub async fn run_distribution(&self, request: DistributionRequest) -> DispatchResult<RunSummary> {
        let DistributionRequest {
            channels,
            items,
            prefixes,
            destination,
        } = request;

        if channels.is_empty() {
            return Err(DispatchError::InvalidRequest(
                "no target channels configured".to_string(),
            ));
        }

        let queue = items.load()?;
        if queue.is_empty() {
            info!("No items to distribute");
            return Ok(RunSummary::default());
        }

        let decision = self.gate.authorize(channels.len(), queue.len()).await;
        if !decision.allowed {
            warn!(reason = %decision.reason, "Run refused by license gate");
            return Err(DispatchError::LicenseDenied(decision.reason));
        }
        info!(
            reason = %decision.reason,
            plan = decision.account.as_ref().map(|account| account.plan.as_str()),
            channels = channels.len(),
            items = queue.len(),
            "License granted"
        );

        let mut ledger = LedgerStore::load(&self.ledger_path);
        for channel in &channels {
            ledger.ensure_channel(&channel.key());
        }

        let result = self
            .run_connected(channels, queue, ledger, prefixes, destination)
            .await;

        match LedgerStore::empty(&self.ledger_path).remove_artifact() {
            Ok(true) => debug!(path = %self.ledger_path.display(), "Ledger artifact removed"),
            Ok(false) => {}
            Err(err) => warn!(error = %err, "Failed to remove ledger artifact"),
        }

        match &result {
            Ok(summary) => info!(
                items_sent = summary.items_sent,
                rounds_run = summary.rounds_run,
                failed_sends = summary.failed_sends,
                cancelled = summary.cancelled,
                replies_forwarded = summary.replies_forwarded,
                "Distribution finished"
            ),
            Err(err) => warn!(error = %err, "Distribution aborted"),
        }
        result
    }

    async fn run_connected(
        &self,
        channels: Vec<ChannelRef>,
        queue: ItemQueue,
        ledger: LedgerStore,
        prefixes: PrefixMap,
        destination: ChannelRef,
    ) -> DispatchResult<RunSummary> {
        let result = match self.transport.connect().await {
            Ok(()) => {
                self.run_session(channels, queue, ledger, prefixes, destination)
                    .await
            }
            Err(err) => Err(err.into()),
        };

        if let Err(err) = self.transport.disconnect().await {
            warn!(error = %err, "Transport disconnect failed");
        }
        result
    }

    async fn run_session(
        &self,
        channels: Vec<ChannelRef>,
        queue: ItemQueue,
        ledger: LedgerStore,
        prefixes: PrefixMap,
        destination: ChannelRef,
    ) -> DispatchResult<RunSummary> {
        let chat_ids = self.verify_access(&channels).await;

        match self.transport.resolve(&destination).await {
            Ok(Some(info)) => info!(
                destination = %destination,
                title = %info.title,
                "Destination reachable"
            ),
            Ok(None) => {
                return Err(DispatchError::DestinationUnavailable(
                    destination.to_string(),
                ))
            }
            Err(err) => {
                return Err(DispatchError::DestinationUnavailable(format!(
                    "{destination}: {err}"
                )))
            }
        }

        let (inbound, closer) = self.transport.subscribe(&chat_ids).await?.into_parts();
        let aggregator = ResponseAggregator::spawn(
            Arc::clone(&self.transport),
            AggregatorConfig {
                destination,
                debounce_window: self.timings.debounce_window,
                forward_pacing: self.timings.forward_pacing,
            },
            &chat_ids,
            inbound,
        );

        let mut usage = UsageReporter::new(Arc::clone(&self.gate), channels.len());
        let mut scheduler = DistributionScheduler::new(
            Arc::clone(&self.transport),
            channels,
            queue,
            ledger,
            prefixes,
            self.timings,
        );
        let exit = scheduler.run(&aggregator, &mut usage, &self.cancel).await;
        let stats = scheduler.stats();

        if exit == SchedulerExit::Completed && stats.items_sent > 0 {
            usage.report_final().await;
        }

        let replies = aggregator.shutdown().await;
        closer.close().await;

        Ok(RunSummary {
            items_sent: stats.items_sent,
            rounds_run: stats.rounds_run,
            failed_sends: stats.failed_sends,
            cancelled: exit == SchedulerExit::Cancelled,
            batches_forwarded: replies.batches_forwarded,
            replies_forwarded: replies.replies_forwarded,
            replies_discarded: replies.replies_discarded,
        })
    }

    /// Resolve every target channel and return the chat ids to listen on.
    /// Unreachable channels are logged and still targeted by the scheduler.
    async fn verify_access(&self, channels: &[ChannelRef]) -> Vec<ChatId> {
        let mut chat_ids = Vec::with_capacity(channels.len());
        for channel in channels {
            match self.transport.resolve(channel).await {
                Ok(Some(info)) => {
                    info!(channel = %channel, title = %info.title, "Channel reachable");
                    chat_ids.push(info.id);
                }
                Ok(None) => warn!(channel = %channel, "Channel not reachable"),
                Err(err) => warn!(channel = %channel, error = %err, "Channel not reachable"),
            }
            if let ChannelRef::Id(id) = channel {
                if !chat_ids.contains(id) {
                    chat_ids.push(*id);
                }
            }
        }
        chat_ids
    }
}
