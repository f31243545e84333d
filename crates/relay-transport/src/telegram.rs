//! Telegram Bot API transport.
//!
//! Secondary backend: a bot account is never shown messages written by other
//! bots, so only human replies reach the aggregator through it.
//!
//! Every call is a `POST {api_base}/bot{token}/{method}` with a JSON body;
//! the reply is an envelope `{ok, result, error_code, description}`. The
//! subscription long-polls `getUpdates` in a background task.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::subscription::{Subscription, SUBSCRIPTION_CAPACITY};
use crate::transport::Transport;
use crate::types::{ChannelInfo, ChannelRef, ChatId, InboundMessage, MessageHandle};
use crate::{TransportError, TransportResult};

/// Timeout for regular API calls.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Extra time granted to a long poll on top of its server-side timeout.
const POLL_GRACE: Duration = Duration::from_secs(10);
/// Pause after a failed `getUpdates` before polling again.
const POLL_RETRY_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TgUser {
    #[serde(default)]
    is_bot: bool,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct TgChat {
    id: ChatId,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    username: Option<String>,
}

impl TgChat {
    fn display_title(&self) -> String {
        if let Some(title) = self.title.as_deref().filter(|t| !t.is_empty()) {
            return title.to_string();
        }
        let name = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if !name.is_empty() {
            return name;
        }
        self.username
            .as_deref()
            .map(|username| format!("@{username}"))
            .unwrap_or_else(|| "untitled".to_string())
    }

    fn matches(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        let mut haystacks = vec![self.display_title()];
        haystacks.extend(self.username.clone());
        haystacks
            .iter()
            .any(|candidate| candidate.to_lowercase().contains(&needle))
    }

    fn info(&self) -> ChannelInfo {
        ChannelInfo {
            id: self.id,
            title: self.display_title(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TgMessage {
    message_id: i64,
    chat: TgChat,
    #[serde(default)]
    from: Option<TgUser>,
    #[serde(default)]
    reply_to_message: Option<Box<TgMessage>>,
}

#[derive(Debug, Deserialize)]
struct TgChatMemberUpdated {
    chat: TgChat,
}

#[derive(Debug, Deserialize)]
struct TgUpdate {
    update_id: i64,
    #[serde(default)]
    message: Option<TgMessage>,
    #[serde(default)]
    channel_post: Option<TgMessage>,
    #[serde(default)]
    my_chat_member: Option<TgChatMemberUpdated>,
}

impl TgUpdate {
    fn into_message(self) -> Option<TgMessage> {
        self.message.or(self.channel_post)
    }

    fn chat(&self) -> Option<&TgChat> {
        self.message
            .as_ref()
            .or(self.channel_post.as_ref())
            .map(|message| &message.chat)
            .or(self.my_chat_member.as_ref().map(|member| &member.chat))
    }
}

/// Low-level Bot API caller, cheap to clone into the polling task.
#[derive(Clone)]
struct BotApi {
    http_client: reqwest::Client,
    api_base: String,
    token: String,
}

impl fmt::Debug for BotApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BotApi")
            .field("api_base", &self.api_base)
            .field("token", &"[redacted]")
            .finish()
    }
}

impl BotApi {
    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &serde_json::Value,
        timeout: Duration,
    ) -> TransportResult<T> {
        let response = self
            .http_client
            .post(self.method_url(method))
            .timeout(timeout)
            .json(params)
            .send()
            .await
            .map_err(|err| TransportError::Http(err.without_url()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| TransportError::Http(err.without_url()))?;

        let envelope: ApiEnvelope<T> = match serde_json::from_str(&body) {
            Ok(envelope) => envelope,
            Err(err) if status.is_success() => return Err(TransportError::Json(err)),
            Err(_) => {
                return Err(TransportError::Api {
                    method: method.to_string(),
                    code: i64::from(status.as_u16()),
                    description: format!("unexpected response body ({} bytes)", body.len()),
                })
            }
        };

        if !envelope.ok {
            return Err(TransportError::Api {
                method: method.to_string(),
                code: envelope
                    .error_code
                    .unwrap_or_else(|| i64::from(status.as_u16())),
                description: envelope
                    .description
                    .unwrap_or_else(|| "no description".to_string()),
            });
        }

        envelope.result.ok_or_else(|| TransportError::Api {
            method: method.to_string(),
            code: i64::from(status.as_u16()),
            description: "response has no result".to_string(),
        })
    }

    async fn get_updates(
        &self,
        offset: i64,
        timeout: Duration,
        allowed_updates: &[&str],
    ) -> TransportResult<Vec<TgUpdate>> {
        let params = json!({
            "offset": offset,
            "timeout": timeout.as_secs(),
            "allowed_updates": allowed_updates,
        });
        self.call("getUpdates", &params, timeout + POLL_GRACE).await
    }
}

#[derive(Debug)]
struct ConnectionState {
    connected: bool,
    shutdown: CancellationToken,
}

/// [`Transport`] backed by the Telegram Bot API.
#[derive(Debug)]
pub struct TelegramTransport {
    api: BotApi,
    poll_timeout: Duration,
    state: Arc<Mutex<ConnectionState>>,
}

impl TelegramTransport {
    pub fn new(api_base: &str, token: &str, poll_timeout: Duration) -> TransportResult<Self> {
        let token = token.trim();
        if token.is_empty() {
            return Err(TransportError::Config("bot token is empty".to_string()));
        }
        let api_base = api_base.trim().trim_end_matches('/');
        if !api_base.starts_with("http://") && !api_base.starts_with("https://") {
            return Err(TransportError::Config(format!(
                "API base must be http(s): {api_base}"
            )));
        }

        let http_client = reqwest::Client::builder()
            .build()
            .map_err(|err| TransportError::Http(err.without_url()))?;

        Ok(Self {
            api: BotApi {
                http_client,
                api_base: api_base.to_string(),
                token: token.to_string(),
            },
            poll_timeout,
            state: Arc::new(Mutex::new(ConnectionState {
                connected: false,
                shutdown: CancellationToken::new(),
            })),
        })
    }

    fn ensure_connected(&self) -> TransportResult<()> {
        if self.state.lock().connected {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn connect(&self) -> TransportResult<()> {
        let me: TgUser = self.api.call("getMe", &json!({}), REQUEST_TIMEOUT).await?;
        if !me.is_bot {
            warn!("token does not belong to a bot account");
        }

        let mut state = self.state.lock();
        state.connected = true;
        if state.shutdown.is_cancelled() {
            state.shutdown = CancellationToken::new();
        }
        info!(
            bot = me.username.as_deref().unwrap_or("unknown"),
            name = me.first_name.as_deref().unwrap_or(""),
            "connected to Telegram"
        );
        Ok(())
    }

    async fn disconnect(&self) -> TransportResult<()> {
        let mut state = self.state.lock();
        if state.connected {
            state.connected = false;
            state.shutdown.cancel();
            info!("disconnected from Telegram");
        }
        Ok(())
    }

    async fn send(&self, channel: &ChannelRef, text: &str) -> TransportResult<MessageHandle> {
        self.ensure_connected()?;
        let message: TgMessage = self
            .api
            .call(
                "sendMessage",
                &json!({ "chat_id": channel, "text": text }),
                REQUEST_TIMEOUT,
            )
            .await?;
        Ok(MessageHandle {
            chat_id: message.chat.id,
            message_id: message.message_id,
        })
    }

    async fn resolve(&self, channel: &ChannelRef) -> TransportResult<Option<ChannelInfo>> {
        self.ensure_connected()?;
        match self
            .api
            .call::<TgChat>("getChat", &json!({ "chat_id": channel }), REQUEST_TIMEOUT)
            .await
        {
            Ok(chat) => Ok(Some(chat.info())),
            Err(err) if err.is_chat_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn forward(&self, message: &MessageHandle, destination: ChatId) -> TransportResult<()> {
        self.ensure_connected()?;
        let _: serde_json::Value = self
            .api
            .call(
                "forwardMessage",
                &json!({
                    "chat_id": destination,
                    "from_chat_id": message.chat_id,
                    "message_id": message.message_id,
                }),
                REQUEST_TIMEOUT,
            )
            .await?;
        Ok(())
    }

    async fn subscribe(&self, chat_ids: &[ChatId]) -> TransportResult<Subscription> {
        self.ensure_connected()?;
        let cancel = self.state.lock().shutdown.child_token();
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        let chats: HashSet<ChatId> = chat_ids.iter().copied().collect();

        debug!(chats = chats.len(), "starting update polling");
        let task = tokio::spawn(poll_updates(
            self.api.clone(),
            chats,
            tx,
            cancel.clone(),
            self.poll_timeout,
        ));

        Ok(Subscription::new(rx, cancel, Some(task)))
    }

    /// Chats seen in pending updates. Works without `connect` and does not
    /// acknowledge the updates.
    async fn discover_chats(&self, query: &str) -> TransportResult<Vec<ChannelInfo>> {
        let updates = self
            .api
            .get_updates(
                0,
                Duration::ZERO,
                &["message", "channel_post", "my_chat_member"],
            )
            .await?;

        let mut seen = HashSet::new();
        let chats = updates
            .iter()
            .filter_map(TgUpdate::chat)
            .filter(|chat| seen.insert(chat.id))
            .filter(|chat| chat.matches(query))
            .map(TgChat::info)
            .collect::<Vec<_>>();

        debug!(query, matches = chats.len(), updates = updates.len(), "chat discovery finished");
        Ok(chats)
    }
}

fn to_inbound(update: TgUpdate, chats: &HashSet<ChatId>) -> Option<InboundMessage> {
    let message = update.into_message()?;
    if !chats.contains(&message.chat.id) {
        return None;
    }

    let mut inbound = InboundMessage::new(message.chat.id, message.message_id);
    inbound.reply_to_id = message.reply_to_message.as_ref().map(|m| m.message_id);
    inbound.is_automated_sender = message.from.as_ref().is_some_and(|user| user.is_bot);
    Some(inbound)
}

async fn poll_updates(
    api: BotApi,
    chats: HashSet<ChatId>,
    tx: mpsc::Sender<InboundMessage>,
    cancel: CancellationToken,
    poll_timeout: Duration,
) {
    let mut offset = 0_i64;

    loop {
        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = api.get_updates(offset, poll_timeout, &["message", "channel_post"]) => result,
        };

        match result {
            Ok(updates) => {
                for update in updates {
                    offset = offset.max(update.update_id + 1);
                    let Some(inbound) = to_inbound(update, &chats) else {
                        continue;
                    };
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        sent = tx.send(inbound) => {
                            if sent.is_err() {
                                debug!("subscriber gone, stopping update polling");
                                return;
                            }
                        }
                    }
                }
            }
            Err(err) => {
                warn!(error = %err, "getUpdates failed");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(POLL_RETRY_DELAY) => {}
                }
            }
        }
    }

    debug!("update polling stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    const TOKEN: &str = "123:abc";

    fn transport_for(server: &MockServer) -> TelegramTransport {
        TelegramTransport::new(&server.base_url(), TOKEN, Duration::from_secs(1)).expect("transport")
    }

    fn mock_get_me(server: &MockServer) -> httpmock::Mock<'_> {
        server.mock(|when, then| {
            when.method(POST).path("/bot123:abc/getMe");
            then.status(200).json_body(json!({
                "ok": true,
                "result": {"id": 1, "is_bot": true, "first_name": "Relay", "username": "relay_bot"}
            }));
        })
    }

    async fn connected(server: &MockServer) -> TelegramTransport {
        mock_get_me(server);
        let transport = transport_for(server);
        transport.connect().await.expect("connect");
        transport
    }

    #[test]
    fn rejects_empty_token_and_bad_base() {
        assert!(matches!(
            TelegramTransport::new("https://api.telegram.org", "  ", Duration::from_secs(1)),
            Err(TransportError::Config(_))
        ));
        assert!(matches!(
            TelegramTransport::new("api.telegram.org", TOKEN, Duration::from_secs(1)),
            Err(TransportError::Config(_))
        ));
    }

    #[test]
    fn debug_output_hides_token() {
        let transport =
            TelegramTransport::new("https://api.telegram.org", TOKEN, Duration::from_secs(1))
                .unwrap();
        let rendered = format!("{transport:?}");
        assert!(!rendered.contains(TOKEN));
    }

    #[tokio::test]
    async fn send_requires_connect() {
        let server = MockServer::start_async().await;
        let transport = transport_for(&server);

        let err = transport
            .send(&ChannelRef::parse("@cards"), "hello")
            .await
            .unwrap_err();

        assert!(matches!(err, TransportError::NotConnected));
    }

    #[tokio::test]
    async fn send_posts_text_and_returns_handle() {
        let server = MockServer::start_async().await;
        let transport = connected(&server).await;
        let send = server.mock(|when, then| {
            when.method(POST)
                .path("/bot123:abc/sendMessage")
                .body_includes("\"chat_id\":-1001")
                .body_includes("\"text\":\".au 4111\"");
            then.status(200).json_body(json!({
                "ok": true,
                "result": {"message_id": 77, "chat": {"id": -1001, "title": "Cards"}}
            }));
        });

        let handle = transport
            .send(&ChannelRef::parse("-1001"), ".au 4111")
            .await
            .expect("send");

        send.assert();
        assert_eq!(handle, MessageHandle { chat_id: -1001, message_id: 77 });
    }

    #[tokio::test]
    async fn api_errors_carry_method_code_and_description() {
        let server = MockServer::start_async().await;
        let transport = connected(&server).await;
        server.mock(|when, then| {
            when.method(POST).path("/bot123:abc/sendMessage");
            then.status(403).json_body(json!({
                "ok": false,
                "error_code": 403,
                "description": "Forbidden: bot was kicked from the group chat"
            }));
        });

        let err = transport
            .send(&ChannelRef::parse("@cards"), "x")
            .await
            .unwrap_err();

        match err {
            TransportError::Api {
                method,
                code,
                description,
            } => {
                assert_eq!(method, "sendMessage");
                assert_eq!(code, 403);
                assert!(description.contains("kicked"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn resolve_maps_chat_not_found_to_none() {
        let server = MockServer::start_async().await;
        let transport = connected(&server).await;
        server.mock(|when, then| {
            when.method(POST)
                .path("/bot123:abc/getChat")
                .body_includes("\"chat_id\":\"@missing\"");
            then.status(400).json_body(json!({
                "ok": false,
                "error_code": 400,
                "description": "Bad Request: chat not found"
            }));
        });
        server.mock(|when, then| {
            when.method(POST)
                .path("/bot123:abc/getChat")
                .body_includes("\"chat_id\":\"@cards\"");
            then.status(200).json_body(json!({
                "ok": true,
                "result": {"id": -1002, "title": "Card Checks", "type": "supergroup"}
            }));
        });

        let missing = transport
            .resolve(&ChannelRef::parse("@missing"))
            .await
            .expect("resolve");
        let found = transport
            .resolve(&ChannelRef::parse("@cards"))
            .await
            .expect("resolve");

        assert!(missing.is_none());
        assert_eq!(
            found,
            Some(ChannelInfo {
                id: -1002,
                title: "Card Checks".to_string()
            })
        );
    }

    #[tokio::test]
    async fn forward_posts_source_and_destination() {
        let server = MockServer::start_async().await;
        let transport = connected(&server).await;
        let forward = server.mock(|when, then| {
            when.method(POST)
                .path("/bot123:abc/forwardMessage")
                .body_includes("\"chat_id\":-5")
                .body_includes("\"from_chat_id\":-1001")
                .body_includes("\"message_id\":9");
            then.status(200).json_body(json!({
                "ok": true,
                "result": {"message_id": 3, "chat": {"id": -5}}
            }));
        });

        transport
            .forward(
                &MessageHandle {
                    chat_id: -1001,
                    message_id: 9,
                },
                -5,
            )
            .await
            .expect("forward");

        forward.assert();
    }

    #[tokio::test]
    async fn subscription_delivers_only_subscribed_chats() {
        let server = MockServer::start_async().await;
        let transport = connected(&server).await;
        server.mock(|when, then| {
            when.method(POST)
                .path("/bot123:abc/getUpdates")
                .body_includes("\"offset\":0");
            then.status(200).json_body(json!({
                "ok": true,
                "result": [
                    {"update_id": 100, "message": {
                        "message_id": 10, "chat": {"id": -9},
                        "from": {"id": 5, "is_bot": false}
                    }},
                    {"update_id": 101, "message": {
                        "message_id": 11, "chat": {"id": -1001},
                        "from": {"id": 6, "is_bot": true},
                        "reply_to_message": {"message_id": 7, "chat": {"id": -1001}}
                    }}
                ]
            }));
        });
        server.mock(|when, then| {
            when.method(POST)
                .path("/bot123:abc/getUpdates")
                .body_includes("\"offset\":102");
            then.status(200)
                .delay(Duration::from_millis(200))
                .json_body(json!({"ok": true, "result": []}));
        });

        let mut subscription = transport.subscribe(&[-1001]).await.expect("subscribe");
        let inbound = tokio::time::timeout(Duration::from_secs(5), subscription.recv())
            .await
            .expect("message in time")
            .expect("open subscription");

        assert_eq!(inbound.chat_id, -1001);
        assert_eq!(inbound.message_id, 11);
        assert_eq!(inbound.reply_to_id, Some(7));
        assert!(inbound.is_automated_sender);

        subscription.close().await;
    }

    #[tokio::test]
    async fn disconnect_stops_subscriptions() {
        let server = MockServer::start_async().await;
        let transport = connected(&server).await;
        server.mock(|when, then| {
            when.method(POST).path("/bot123:abc/getUpdates");
            then.status(200)
                .delay(Duration::from_millis(100))
                .json_body(json!({"ok": true, "result": []}));
        });

        let subscription = transport.subscribe(&[-1]).await.expect("subscribe");
        let (mut receiver, closer) = subscription.into_parts();
        transport.disconnect().await.expect("disconnect");

        assert!(closer.is_closed());
        let next = tokio::time::timeout(Duration::from_secs(5), receiver.recv())
            .await
            .expect("producer exits");
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn discover_chats_filters_by_name() {
        let server = MockServer::start_async().await;
        let transport = transport_for(&server);
        server.mock(|when, then| {
            when.method(POST).path("/bot123:abc/getUpdates");
            then.status(200).json_body(json!({
                "ok": true,
                "result": [
                    {"update_id": 1, "message": {"message_id": 1, "chat": {"id": -100, "title": "Card Checker AU"}}},
                    {"update_id": 2, "message": {"message_id": 2, "chat": {"id": -100, "title": "Card Checker AU"}}},
                    {"update_id": 3, "channel_post": {"message_id": 3, "chat": {"id": -200, "title": "News"}}},
                    {"update_id": 4, "my_chat_member": {"chat": {"id": -300, "title": "private checker"}}}
                ]
            }));
        });

        let chats = transport.discover_chats("CHECKER").await.expect("discover");

        assert_eq!(
            chats,
            vec![
                ChannelInfo { id: -100, title: "Card Checker AU".to_string() },
                ChannelInfo { id: -300, title: "private checker".to_string() },
            ]
        );
    }
}
