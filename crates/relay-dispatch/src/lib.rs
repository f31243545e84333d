//! Distribution runs for card-relay.
//!
//! A run sends queued items to a set of channels in rounds, never sending an
//! item to a channel whose ledger entry already holds it, while a background
//! aggregator forwards replies to those items to a destination channel in
//! debounced batches.
//!
//! - [`ItemQueue`] / [`ItemSource`]: the items of a run
//! - [`DistributionScheduler`]: shared-cursor round-robin over channels
//! - [`ResponseAggregator`]: per-channel reply windows and forwarding
//! - [`UsageReporter`]: per-round usage reports to the license service
//! - [`RunController`]: license gate, wiring and teardown

mod aggregator;
mod controller;
mod error;
mod item_queue;
mod reply_window;
mod scheduler;
mod timings;
mod usage;

#[cfg(test)]
mod tests;

pub use aggregator::{
    AggregatorConfig, AggregatorHandle, AggregatorReport, ReplyExpectation, ResponseAggregator,
};
pub use controller::{DistributionRequest, RunController, RunSummary};
pub use error::{DispatchError, DispatchResult};
pub use item_queue::{ItemQueue, ItemSource};
pub use reply_window::{ChannelReplyState, ReplyPhase};
pub use scheduler::{
    compose_message, DistributionScheduler, RoundOutcome, SchedulerExit, SchedulerStats,
};
pub use timings::DispatchTimings;
pub use usage::UsageReporter;
