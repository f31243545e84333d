//! Messaging transport for card-relay.
//!
//! [`Transport`] is the seam the dispatch crate programs against: connect,
//! send text to a channel, resolve a channel, forward a message and
//! subscribe to inbound messages of a set of chats.
//!
//! [`UserSessionTransport`] implements it as a logged-in Telegram account
//! over MTProto; it is the backend that sees replies written by checker
//! bots. [`TelegramTransport`] implements it over the Bot HTTP API for
//! setups where only human replies matter. With the `test-support`
//! feature, [`MemoryTransport`] records every call and lets tests inject
//! inbound messages and failures.

mod error;
#[cfg(any(test, feature = "test-support"))]
mod memory;
mod subscription;
mod telegram;
mod transport;
mod types;
mod user_session;

pub use error::{TransportError, TransportResult};
#[cfg(any(test, feature = "test-support"))]
pub use memory::{ForwardRecord, MemoryTransport, SentRecord};
pub use subscription::{Subscription, SubscriptionCloser, SUBSCRIPTION_CAPACITY};
pub use telegram::{TelegramTransport, REQUEST_TIMEOUT};
pub use transport::Transport;
pub use types::{ChannelInfo, ChannelRef, ChatId, InboundMessage, MessageHandle};
pub use user_session::{LoginPrompt, UserSessionTransport};
