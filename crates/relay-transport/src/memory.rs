//! In-memory transport for tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::subscription::{Subscription, SUBSCRIPTION_CAPACITY};
use crate::transport::Transport;
use crate::types::{ChannelInfo, ChannelRef, ChatId, InboundMessage, MessageHandle};
use crate::{TransportError, TransportResult};

/// A message accepted by [`MemoryTransport::send`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentRecord {
    pub channel: String,
    pub text: String,
    pub handle: MessageHandle,
}

/// A forward accepted by [`MemoryTransport::forward`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardRecord {
    pub message: MessageHandle,
    pub destination: ChatId,
    pub at: Instant,
}

#[derive(Debug, Default)]
struct MemoryState {
    connected: bool,
    connect_calls: usize,
    disconnect_calls: usize,
    fail_connect: bool,
    next_message_id: i64,
    chats: HashMap<String, ChannelInfo>,
    sent: Vec<SentRecord>,
    send_attempts: usize,
    forwarded: Vec<ForwardRecord>,
    failing_channels: HashSet<String>,
    failing_texts: Vec<String>,
    failing_forwards: HashSet<MessageHandle>,
    panicking_forwards: HashSet<MessageHandle>,
    subscribers: Vec<(HashSet<ChatId>, mpsc::Sender<InboundMessage>, CancellationToken)>,
}

/// Scriptable [`Transport`] keeping everything in memory.
///
/// Channels must be registered with [`MemoryTransport::with_chat`] to
/// resolve. Sends to unregistered numeric ids still succeed; sends to
/// unregistered handles fail with "chat not found".
#[derive(Debug, Default)]
pub struct MemoryTransport {
    state: Mutex<MemoryState>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resolvable chat under `key` (a handle or numeric id string).
    pub fn with_chat(self, key: &str, id: ChatId, title: &str) -> Self {
        self.state.lock().chats.insert(
            ChannelRef::parse(key).key(),
            ChannelInfo {
                id,
                title: title.to_string(),
            },
        );
        self
    }

    pub fn fail_connect(self) -> Self {
        self.state.lock().fail_connect = true;
        self
    }

    /// Every send to `channel_key` fails.
    pub fn fail_sends_to(&self, channel_key: &str) {
        self.state
            .lock()
            .failing_channels
            .insert(channel_key.to_string());
    }

    /// Every send whose text contains `fragment` fails.
    pub fn fail_sends_containing(&self, fragment: &str) {
        self.state.lock().failing_texts.push(fragment.to_string());
    }

    /// Forwarding `message` fails.
    pub fn fail_forward_of(&self, message: MessageHandle) {
        self.state.lock().failing_forwards.insert(message);
    }

    /// Forwarding `message` panics inside the calling task.
    pub fn panic_on_forward_of(&self, message: MessageHandle) {
        self.state.lock().panicking_forwards.insert(message);
    }

    /// Deliver `message` to every open subscription covering its chat.
    /// Returns how many subscriptions received it.
    pub fn inject(&self, message: InboundMessage) -> usize {
        let mut state = self.state.lock();
        state
            .subscribers
            .retain(|(_, tx, cancel)| !tx.is_closed() && !cancel.is_cancelled());
        state
            .subscribers
            .iter()
            .filter(|(chats, _, _)| chats.contains(&message.chat_id))
            .filter(|(_, tx, _)| tx.try_send(message.clone()).is_ok())
            .count()
    }

    pub fn sent(&self) -> Vec<SentRecord> {
        self.state.lock().sent.clone()
    }

    /// Texts sent to `channel_key`, in order.
    pub fn sent_to(&self, channel_key: &str) -> Vec<String> {
        self.state
            .lock()
            .sent
            .iter()
            .filter(|record| record.channel == channel_key)
            .map(|record| record.text.clone())
            .collect()
    }

    /// Last message sent to `channel_key`.
    pub fn last_sent_to(&self, channel_key: &str) -> Option<MessageHandle> {
        self.state
            .lock()
            .sent
            .iter()
            .rev()
            .find(|record| record.channel == channel_key)
            .map(|record| record.handle)
    }

    /// Successful and failed send calls.
    pub fn send_attempts(&self) -> usize {
        self.state.lock().send_attempts
    }

    pub fn forwarded(&self) -> Vec<ForwardRecord> {
        self.state.lock().forwarded.clone()
    }

    pub fn connect_calls(&self) -> usize {
        self.state.lock().connect_calls
    }

    pub fn disconnect_calls(&self) -> usize {
        self.state.lock().disconnect_calls
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    /// Subscriptions neither closed nor dropped.
    pub fn open_subscriptions(&self) -> usize {
        self.state
            .lock()
            .subscribers
            .iter()
            .filter(|(_, tx, cancel)| !tx.is_closed() && !cancel.is_cancelled())
            .count()
    }

    fn chat_id_for(state: &MemoryState, channel: &ChannelRef) -> Option<ChatId> {
        state
            .chats
            .get(&channel.key())
            .map(|info| info.id)
            .or(match channel {
                ChannelRef::Id(id) => Some(*id),
                ChannelRef::Handle(_) => None,
            })
    }
}

fn chat_not_found(method: &str) -> TransportError {
    TransportError::Api {
        method: method.to_string(),
        code: 400,
        description: "Bad Request: chat not found".to_string(),
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self) -> TransportResult<()> {
        let mut state = self.state.lock();
        state.connect_calls += 1;
        if state.fail_connect {
            return Err(TransportError::Unavailable("connect refused".to_string()));
        }
        state.connected = true;
        Ok(())
    }

    async fn disconnect(&self) -> TransportResult<()> {
        let mut state = self.state.lock();
        state.disconnect_calls += 1;
        state.connected = false;
        for (_, _, cancel) in state.subscribers.drain(..) {
            cancel.cancel();
        }
        Ok(())
    }

    async fn send(&self, channel: &ChannelRef, text: &str) -> TransportResult<MessageHandle> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        state.send_attempts += 1;

        let key = channel.key();
        if state.failing_channels.contains(&key)
            || state
                .failing_texts
                .iter()
                .any(|fragment| text.contains(fragment.as_str()))
        {
            return Err(TransportError::Unavailable(format!("send to {key} refused")));
        }
        let chat_id = Self::chat_id_for(&state, channel).ok_or_else(|| chat_not_found("sendMessage"))?;

        state.next_message_id += 1;
        let handle = MessageHandle {
            chat_id,
            message_id: state.next_message_id,
        };
        state.sent.push(SentRecord {
            channel: key,
            text: text.to_string(),
            handle,
        });
        Ok(handle)
    }

    async fn resolve(&self, channel: &ChannelRef) -> TransportResult<Option<ChannelInfo>> {
        let state = self.state.lock();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        Ok(state.chats.get(&channel.key()).cloned())
    }

    async fn forward(&self, message: &MessageHandle, destination: ChatId) -> TransportResult<()> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        if state.panicking_forwards.contains(message) {
            drop(state);
            panic!("forward of message {} panicked", message.message_id);
        }
        if state.failing_forwards.contains(message) {
            return Err(TransportError::Unavailable(format!(
                "forward of message {} refused",
                message.message_id
            )));
        }
        state.forwarded.push(ForwardRecord {
            message: *message,
            destination,
            at: Instant::now(),
        });
        Ok(())
    }

    async fn subscribe(&self, chat_ids: &[ChatId]) -> TransportResult<Subscription> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        let cancel = CancellationToken::new();
        state
            .subscribers
            .push((chat_ids.iter().copied().collect(), tx, cancel.clone()));
        Ok(Subscription::new(rx, cancel, None))
    }

    async fn discover_chats(&self, query: &str) -> TransportResult<Vec<ChannelInfo>> {
        let needle = query.to_lowercase();
        let state = self.state.lock();
        let mut chats: Vec<ChannelInfo> = state
            .chats
            .values()
            .filter(|info| info.title.to_lowercase().contains(&needle))
            .cloned()
            .collect();
        chats.sort_by_key(|info| info.id);
        chats.dedup_by_key(|info| info.id);
        Ok(chats)
    }
}
