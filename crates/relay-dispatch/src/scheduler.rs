//! Round-robin distribution of queued items across channels.
//!
//! One shared cursor walks the item queue. In every round each channel, in
//! configured order, takes the next item at or after the cursor that its
//! ledger entry does not hold yet. Every position the cursor passes is
//! consumed for the rest of the run, whether it was sent, skipped or failed.
//! The run ends with the first round in which no channel found an item.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use relay_ledger::{LedgerStore, PrefixMap};
use relay_transport::{ChannelRef, Transport};

use crate::aggregator::ReplyExpectation;
use crate::item_queue::ItemQueue;
use crate::timings::DispatchTimings;
use crate::usage::UsageReporter;

/// Totals accumulated over a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub items_sent: usize,
    /// Rounds with at least one send attempt.
    pub rounds_run: usize,
    pub failed_sends: usize,
    pub ledger_save_failures: usize,
}

/// Result of a single round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundOutcome {
    pub attempts: usize,
    pub sent: usize,
    pub failed: usize,
    /// Cancellation was observed before every channel was attempted.
    pub cancelled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerExit {
    /// No channel could take another item and the drain delay elapsed.
    Completed,
    Cancelled,
}

/// Outgoing text for `item` on a channel labelled `prefix`.
pub fn compose_message(prefix: &str, item: &str) -> String {
    format!("{prefix} {item}")
}

pub struct DistributionScheduler {
    transport: Arc<dyn Transport>,
    channels: Vec<ChannelRef>,
    queue: ItemQueue,
    ledger: LedgerStore,
    prefixes: PrefixMap,
    timings: DispatchTimings,
    cursor: usize,
    stats: SchedulerStats,
}

impl DistributionScheduler {
    pub fn new(
        transport: Arc<dyn Transport>,
        channels: Vec<ChannelRef>,
        queue: ItemQueue,
        ledger: LedgerStore,
        prefixes: PrefixMap,
        timings: DispatchTimings,
    ) -> Self {
        Self {
            transport,
            channels,
            queue,
            ledger,
            prefixes,
            timings,
            cursor: 0,
            stats: SchedulerStats::default(),
        }
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn ledger(&self) -> &LedgerStore {
        &self.ledger
    }

    /// Run rounds until no channel can take an item, then hold the drain
    /// delay. Cancellation is observed between sends and during delays.
    pub async fn run(
        &mut self,
        replies: &dyn ReplyExpectation,
        usage: &mut UsageReporter,
        cancel: &CancellationToken,
    ) -> SchedulerExit {
        if self.queue.is_empty() || self.channels.is_empty() {
            return SchedulerExit::Completed;
        }

        loop {
            let round = self.stats.rounds_run + 1;
            let outcome = self.run_round(replies, cancel).await;
            if outcome.attempts > 0 {
                self.stats.rounds_run = round;
            }
            usage.report_round(outcome.sent).await;

            if outcome.cancelled {
                info!(round, sent = outcome.sent, "Distribution cancelled mid-round");
                return SchedulerExit::Cancelled;
            }
            if outcome.attempts == 0 {
                info!(
                    rounds_run = self.stats.rounds_run,
                    items_sent = self.stats.items_sent,
                    "No items left to distribute"
                );
                break;
            }

            info!(
                round,
                sent = outcome.sent,
                failed = outcome.failed,
                delay_secs = self.timings.inter_round_delay.as_secs(),
                "Round complete"
            );
            if !pause(self.timings.inter_round_delay, cancel).await {
                return SchedulerExit::Cancelled;
            }
        }

        if self.stats.rounds_run > 0 {
            debug!(
                delay_secs = self.timings.drain_delay.as_secs(),
                "Waiting for late replies"
            );
            if !pause(self.timings.drain_delay, cancel).await {
                return SchedulerExit::Cancelled;
            }
        }
        SchedulerExit::Completed
    }

    /// Attempt one send per channel.
    pub async fn run_round(
        &mut self,
        replies: &dyn ReplyExpectation,
        cancel: &CancellationToken,
    ) -> RoundOutcome {
        let mut outcome = RoundOutcome::default();

        for position in 0..self.channels.len() {
            if cancel.is_cancelled() {
                outcome.cancelled = true;
                break;
            }

            let channel = self.channels[position].clone();
            let key = channel.key();
            let Some(index) = self.next_item_for(&key) else {
                debug!(channel = %key, "No more items for channel");
                continue;
            };
            let Some(item) = self.queue.get(index).map(str::to_string) else {
                continue;
            };
            let text = compose_message(self.prefixes.get(&key), &item);

            outcome.attempts += 1;
            match self.transport.send(&channel, &text).await {
                Ok(handle) => {
                    replies.expect_reply(handle);
                    self.ledger.record(&key, &item);
                    if let Err(err) = self.ledger.save() {
                        self.stats.ledger_save_failures += 1;
                        warn!(channel = %key, error = %err, "Failed to persist ledger");
                    }
                    outcome.sent += 1;
                    self.stats.items_sent += 1;
                    info!(
                        channel = %key,
                        item_index = index,
                        message_id = handle.message_id,
                        "Item sent"
                    );
                }
                Err(err) => {
                    outcome.failed += 1;
                    self.stats.failed_sends += 1;
                    warn!(
                        channel = %key,
                        item_index = index,
                        error = %err,
                        "Send failed, item stays unrecorded for this channel"
                    );
                }
            }
        }

        outcome
    }

    /// Advance the cursor to the first item `channel` has not received.
    fn next_item_for(&mut self, channel: &str) -> Option<usize> {
        while self.cursor < self.queue.len() {
            let index = self.cursor;
            self.cursor += 1;
            match self.queue.get(index) {
                Some(item) if !self.ledger.contains(channel, item) => return Some(index),
                _ => {}
            }
        }
        None
    }
}

/// Sleep for `delay`. Returns false if cancelled first.
async fn pause(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
