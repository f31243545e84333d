use async_trait::async_trait;

use crate::subscription::Subscription;
use crate::types::{ChannelInfo, ChannelRef, ChatId, MessageHandle};
use crate::TransportResult;

/// Messaging service seam.
///
/// Implementations are shared between the scheduler and the reply
/// aggregator's flush tasks, so every method takes `&self`.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Authenticate and make the transport usable.
    async fn connect(&self) -> TransportResult<()>;

    /// Release the connection. Open subscriptions stop delivering.
    async fn disconnect(&self) -> TransportResult<()>;

    /// Send `text` to `channel`, returning the created message.
    async fn send(&self, channel: &ChannelRef, text: &str) -> TransportResult<MessageHandle>;

    /// Look up a channel. `Ok(None)` when it does not exist or is not visible.
    async fn resolve(&self, channel: &ChannelRef) -> TransportResult<Option<ChannelInfo>>;

    /// Forward an existing message to `destination`.
    async fn forward(&self, message: &MessageHandle, destination: ChatId) -> TransportResult<()>;

    /// Deliver inbound messages posted in any of `chat_ids`.
    async fn subscribe(&self, chat_ids: &[ChatId]) -> TransportResult<Subscription>;

    /// Chats visible to the account whose name contains `query`
    /// (case-insensitive), for looking up numeric ids.
    async fn discover_chats(&self, query: &str) -> TransportResult<Vec<ChannelInfo>>;
}
