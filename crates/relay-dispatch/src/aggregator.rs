//! Response aggregator: collects qualifying replies per channel and forwards
//! each batch to the destination once its debounce window closes.
//!
//! The aggregator is a single task owning every [`ChannelReplyState`]. It
//! reacts to four event sources:
//!
//! - commands from the [`AggregatorHandle`] (expect a reply, shut down)
//! - completed flush tasks
//! - inbound messages from the subscription
//! - the earliest pending flush deadline
//!
//! Each flush runs as its own task so a slow forward on one channel never
//! delays another channel's window or the scheduler.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{self, JoinError, JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use relay_transport::{ChannelRef, ChatId, InboundMessage, MessageHandle, Transport};

use crate::reply_window::ChannelReplyState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatorConfig {
    /// Where batches are forwarded.
    pub destination: ChannelRef,
    pub debounce_window: Duration,
    /// Pause before each forward within a batch.
    pub forward_pacing: Duration,
}

/// Counters of everything the aggregator did during a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregatorReport {
    /// Flushes that forwarded at least one reply.
    pub batches_forwarded: usize,
    pub replies_forwarded: usize,
    pub forward_failures: usize,
    /// Replies dropped because the destination could not be resolved.
    pub replies_dropped: usize,
    /// Replies still buffered or in flight at shutdown.
    pub replies_discarded: usize,
}

/// Something that wants to hear about replies to a message it just sent.
pub trait ReplyExpectation: Send + Sync {
    fn expect_reply(&self, message: MessageHandle);
}

#[derive(Debug)]
enum AggregatorCommand {
    ExpectReply(MessageHandle),
    Shutdown,
}

/// Control handle of a running aggregator.
#[derive(Debug)]
pub struct AggregatorHandle {
    commands: mpsc::UnboundedSender<AggregatorCommand>,
    task: JoinHandle<AggregatorReport>,
}

impl AggregatorHandle {
    /// Discard pending buffers, abort in-flight flushes and return the report.
    pub async fn shutdown(self) -> AggregatorReport {
        // The task may already be gone if the command channel closed.
        let _ = self.commands.send(AggregatorCommand::Shutdown);
        match self.task.await {
            Ok(report) => report,
            Err(err) => {
                warn!(error = %err, "Reply aggregator task failed");
                AggregatorReport::default()
            }
        }
    }
}

impl ReplyExpectation for AggregatorHandle {
    fn expect_reply(&self, message: MessageHandle) {
        if self
            .commands
            .send(AggregatorCommand::ExpectReply(message))
            .is_err()
        {
            debug!(
                chat_id = message.chat_id,
                message_id = message.message_id,
                "Reply aggregator stopped, expectation ignored"
            );
        }
    }
}

/// Progress of one flush, readable after the task was aborted.
#[derive(Debug)]
struct FlushProgress {
    batch_len: usize,
    forwarded: AtomicUsize,
    failed: AtomicUsize,
}

impl FlushProgress {
    fn new(batch_len: usize) -> Self {
        Self {
            batch_len,
            forwarded: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        }
    }

    fn forwarded(&self) -> usize {
        self.forwarded.load(Ordering::SeqCst)
    }

    fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    fn unsettled(&self) -> usize {
        self.batch_len
            .saturating_sub(self.forwarded() + self.failed())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlushOutcome {
    Forwarded,
    DestinationMissing,
}

pub struct ResponseAggregator {
    transport: Arc<dyn Transport>,
    config: AggregatorConfig,
    channels: HashMap<ChatId, ChannelReplyState>,
    flushes: JoinSet<FlushOutcome>,
    /// Channel of each flush task, so a panicked flush still settles.
    flush_tasks: HashMap<task::Id, ChatId>,
    in_flight: HashMap<ChatId, Arc<FlushProgress>>,
    report: AggregatorReport,
}

impl ResponseAggregator {
    /// Start the aggregator for `chat_ids`, consuming `inbound`.
    pub fn spawn(
        transport: Arc<dyn Transport>,
        config: AggregatorConfig,
        chat_ids: &[ChatId],
        inbound: mpsc::Receiver<InboundMessage>,
    ) -> AggregatorHandle {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let aggregator = Self {
            transport,
            config,
            channels: chat_ids
                .iter()
                .map(|id| (*id, ChannelReplyState::default()))
                .collect(),
            flushes: JoinSet::new(),
            flush_tasks: HashMap::new(),
            in_flight: HashMap::new(),
            report: AggregatorReport::default(),
        };
        let task = tokio::spawn(aggregator.run(command_rx, inbound));
        AggregatorHandle { commands, task }
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<AggregatorCommand>,
        mut inbound: mpsc::Receiver<InboundMessage>,
    ) -> AggregatorReport {
        let mut inbound_open = true;

        loop {
            let next_deadline = self.next_deadline();

            tokio::select! {
                biased;

                command = commands.recv() => {
                    match command {
                        Some(AggregatorCommand::ExpectReply(message)) => {
                            self.channels
                                .entry(message.chat_id)
                                .or_default()
                                .expect_reply(message.message_id);
                        }
                        Some(AggregatorCommand::Shutdown) | None => break,
                    }
                }

                Some(joined) = self.flushes.join_next_with_id(), if !self.flushes.is_empty() => {
                    self.settle(joined);
                }

                message = inbound.recv(), if inbound_open => {
                    match message {
                        Some(message) => self.accept(message),
                        None => {
                            debug!("Inbound subscription closed");
                            inbound_open = false;
                        }
                    }
                }

                _ = sleep_until_deadline(next_deadline) => {
                    self.start_due_flushes();
                }
            }
        }

        self.stop().await
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.channels
            .values()
            .filter_map(ChannelReplyState::flush_at)
            .min()
    }

    fn accept(&mut self, message: InboundMessage) {
        let window = self.config.debounce_window;
        let state = self.channels.entry(message.chat_id).or_default();
        if state.accept(&message, Instant::now(), window) {
            debug!(
                chat_id = message.chat_id,
                message_id = message.message_id,
                buffered = state.buffered(),
                "Reply buffered"
            );
        }
    }

    fn start_due_flushes(&mut self) {
        let now = Instant::now();
        for (chat_id, state) in self.channels.iter_mut() {
            let Some(batch) = state.take_due(now) else {
                continue;
            };
            info!(chat_id = *chat_id, replies = batch.len(), "Forwarding reply batch");

            let progress = Arc::new(FlushProgress::new(batch.len()));
            self.in_flight.insert(*chat_id, Arc::clone(&progress));
            let abort = self.flushes.spawn(flush_batch(
                Arc::clone(&self.transport),
                self.config.destination.clone(),
                self.config.forward_pacing,
                *chat_id,
                batch,
                progress,
            ));
            self.flush_tasks.insert(abort.id(), *chat_id);
        }
    }

    fn settle(&mut self, joined: Result<(task::Id, FlushOutcome), JoinError>) {
        let (id, outcome) = match joined {
            Ok((id, outcome)) => (id, Some(outcome)),
            Err(err) => {
                warn!(error = %err, "Reply flush task failed");
                (err.id(), None)
            }
        };
        let Some(chat_id) = self.flush_tasks.remove(&id) else {
            return;
        };

        if let Some(progress) = self.in_flight.remove(&chat_id) {
            match outcome {
                Some(FlushOutcome::Forwarded) | None => {
                    let forwarded = progress.forwarded();
                    if forwarded > 0 {
                        self.report.batches_forwarded += 1;
                    }
                    self.report.replies_forwarded += forwarded;
                    // A failed task leaves the rest of its batch unforwarded.
                    self.report.forward_failures += progress.failed() + progress.unsettled();
                }
                Some(FlushOutcome::DestinationMissing) => {
                    self.report.replies_dropped += progress.batch_len;
                }
            }
        }

        if let Some(state) = self.channels.get_mut(&chat_id) {
            state.finish_flush(self.config.debounce_window);
        }
    }

    async fn stop(mut self) -> AggregatorReport {
        self.flushes.abort_all();
        while let Some(joined) = self.flushes.join_next_with_id().await {
            if let Err(err) = &joined {
                if err.is_cancelled() {
                    self.flush_tasks.remove(&err.id());
                    continue;
                }
            }
            self.settle(joined);
        }

        for progress in self.in_flight.values() {
            let forwarded = progress.forwarded();
            if forwarded > 0 {
                self.report.batches_forwarded += 1;
            }
            self.report.replies_forwarded += forwarded;
            self.report.forward_failures += progress.failed();
            self.report.replies_discarded += progress.unsettled();
        }
        self.in_flight.clear();

        for state in self.channels.values_mut() {
            self.report.replies_discarded += state.discard();
        }

        info!(
            batches_forwarded = self.report.batches_forwarded,
            replies_forwarded = self.report.replies_forwarded,
            replies_discarded = self.report.replies_discarded,
            "Reply aggregator stopped"
        );
        self.report
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn flush_batch(
    transport: Arc<dyn Transport>,
    destination: ChannelRef,
    pacing: Duration,
    chat_id: ChatId,
    batch: Vec<MessageHandle>,
    progress: Arc<FlushProgress>,
) -> FlushOutcome {
    let destination_id = match transport.resolve(&destination).await {
        Ok(Some(info)) => info.id,
        Ok(None) => {
            warn!(
                chat_id,
                destination = %destination,
                dropped = batch.len(),
                "Destination not found, reply batch dropped"
            );
            return FlushOutcome::DestinationMissing;
        }
        Err(err) => {
            warn!(
                chat_id,
                destination = %destination,
                dropped = batch.len(),
                error = %err,
                "Cannot resolve destination, reply batch dropped"
            );
            return FlushOutcome::DestinationMissing;
        }
    };

    for message in &batch {
        tokio::time::sleep(pacing).await;
        match transport.forward(message, destination_id).await {
            Ok(()) => {
                progress.forwarded.fetch_add(1, Ordering::SeqCst);
            }
            Err(err) => {
                progress.failed.fetch_add(1, Ordering::SeqCst);
                warn!(
                    chat_id,
                    message_id = message.message_id,
                    error = %err,
                    "Forward failed"
                );
            }
        }
    }

    FlushOutcome::Forwarded
}
