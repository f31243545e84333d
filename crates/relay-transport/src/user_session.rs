//! Telegram user-session transport over MTProto.
//!
//! Runs as a regular Telegram account, so it sees every message posted in
//! the groups the account belongs to, including replies written by bots.
//! Authorization lives in a session file created by
//! [`UserSessionTransport::sign_in`]; `connect` refuses to run without it.
//!
//! Chat ids are exposed in marked form (`-100…` for channels and
//! supergroups, negated ids for basic groups) so configured ids copied from
//! other Telegram tools work unchanged.

use async_trait::async_trait;
use grammers_client::types::{Chat, Message};
use grammers_client::{Client, Config, InitParams, SignInError, Update};
use grammers_session::{PackedChat, PackedType, Session};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::subscription::{Subscription, SUBSCRIPTION_CAPACITY};
use crate::transport::Transport;
use crate::types::{ChannelInfo, ChannelRef, ChatId, InboundMessage, MessageHandle};
use crate::{TransportError, TransportResult};

/// Pause after a failed update fetch before trying again.
const UPDATE_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Offset between a bare channel id and its marked form.
const CHANNEL_ID_OFFSET: i64 = 1_000_000_000_000;

/// What `sign_in` needs from the person logging in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginPrompt {
    /// The code Telegram just sent to the account.
    Code,
    /// Two-step verification password.
    Password { hint: Option<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PeerKind {
    User,
    BasicGroup,
    Channel,
}

impl From<PackedType> for PeerKind {
    fn from(ty: PackedType) -> Self {
        match ty {
            PackedType::User | PackedType::Bot => Self::User,
            PackedType::Chat => Self::BasicGroup,
            _ => Self::Channel,
        }
    }
}

fn marked_id(kind: PeerKind, bare_id: i64) -> ChatId {
    match kind {
        PeerKind::User => bare_id,
        PeerKind::BasicGroup => -bare_id,
        PeerKind::Channel => -(CHANNEL_ID_OFFSET + bare_id),
    }
}

fn packed_marked_id(packed: &PackedChat) -> ChatId {
    marked_id(PeerKind::from(packed.ty), packed.id)
}

/// Username behind `@name`, `t.me/name` or `https://t.me/name`.
fn username_of(handle: &str) -> Option<&str> {
    let handle = handle.trim();
    let name = handle
        .strip_prefix("https://t.me/")
        .or_else(|| handle.strip_prefix("t.me/"))
        .unwrap_or(handle)
        .trim_start_matches('@')
        .trim_end_matches('/');
    (!name.is_empty()).then_some(name)
}

fn mtproto(method: &'static str, err: impl fmt::Display) -> TransportError {
    TransportError::Mtproto {
        method,
        message: err.to_string(),
    }
}

fn unknown_peer(id: ChatId) -> TransportError {
    TransportError::Unavailable(format!("chat {id} is not visible to this account"))
}

#[derive(Debug, Clone, Copy)]
struct KnownPeer {
    packed: PackedChat,
}

type PeerCache = Mutex<HashMap<ChatId, (KnownPeer, String)>>;

fn display_title(chat: &Chat) -> String {
    let name = chat.name().trim();
    if !name.is_empty() {
        return name.to_string();
    }
    chat.username()
        .map(|username| format!("@{username}"))
        .unwrap_or_else(|| "untitled".to_string())
}

/// Cache `chat` for later sends and forwards and describe it.
fn remember(peers: &PeerCache, chat: &Chat) -> ChannelInfo {
    let packed = chat.pack();
    let info = ChannelInfo {
        id: packed_marked_id(&packed),
        title: display_title(chat),
    };
    peers
        .lock()
        .insert(info.id, (KnownPeer { packed }, info.title.clone()));
    info
}

/// The parts of a new message the aggregator cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ObservedMessage {
    chat_id: ChatId,
    message_id: i64,
    reply_to_id: Option<i64>,
    sender_is_bot: bool,
    outgoing: bool,
}

impl ObservedMessage {
    fn from_message(message: &Message) -> Self {
        Self {
            chat_id: packed_marked_id(&message.chat().pack()),
            message_id: i64::from(message.id()),
            reply_to_id: message.reply_to_message_id().map(i64::from),
            sender_is_bot: matches!(message.sender(), Some(Chat::User(user)) if user.is_bot()),
            outgoing: message.outgoing(),
        }
    }
}

/// Our own sends and chats outside the subscription are skipped.
fn to_inbound(observed: ObservedMessage, chats: &HashSet<ChatId>) -> Option<InboundMessage> {
    if observed.outgoing || !chats.contains(&observed.chat_id) {
        return None;
    }
    let mut inbound = InboundMessage::new(observed.chat_id, observed.message_id);
    inbound.reply_to_id = observed.reply_to_id;
    inbound.is_automated_sender = observed.sender_is_bot;
    Some(inbound)
}

struct SessionState {
    client: Option<Client>,
    shutdown: CancellationToken,
    dialogs_loaded: bool,
}

/// [`Transport`] running as a logged-in Telegram user.
pub struct UserSessionTransport {
    api_id: i32,
    api_hash: String,
    session_file: PathBuf,
    state: Mutex<SessionState>,
    peers: Arc<PeerCache>,
}

impl fmt::Debug for UserSessionTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserSessionTransport")
            .field("api_id", &self.api_id)
            .field("api_hash", &"[redacted]")
            .field("session_file", &self.session_file)
            .finish()
    }
}

impl UserSessionTransport {
    pub fn new(
        api_id: i32,
        api_hash: &str,
        session_file: impl Into<PathBuf>,
    ) -> TransportResult<Self> {
        if api_id <= 0 {
            return Err(TransportError::Config(format!(
                "api_id must be positive, got {api_id}"
            )));
        }
        let api_hash = api_hash.trim();
        if api_hash.is_empty() {
            return Err(TransportError::Config("api_hash is empty".to_string()));
        }

        Ok(Self {
            api_id,
            api_hash: api_hash.to_string(),
            session_file: session_file.into(),
            state: Mutex::new(SessionState {
                client: None,
                shutdown: CancellationToken::new(),
                dialogs_loaded: false,
            }),
            peers: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Log the session in, asking `prompt` for the login code and, when two-step
    /// verification is on, the password. Returns the account's `@username` or
    /// id. An already authorized session is left as is.
    pub async fn sign_in<F>(&self, phone: &str, prompt: F) -> TransportResult<String>
    where
        F: Fn(LoginPrompt) -> std::io::Result<String>,
    {
        let client = self.open_client().await?;
        let authorized = client
            .is_authorized()
            .await
            .map_err(|err| mtproto("is_authorized", err))?;
        if !authorized {
            let token = client
                .request_login_code(phone.trim())
                .await
                .map_err(|err| mtproto("request_login_code", err))?;
            let code = prompt(LoginPrompt::Code).map_err(prompt_failed)?;

            match client.sign_in(&token, code.trim()).await {
                Ok(_) => {}
                Err(SignInError::PasswordRequired(password_token)) => {
                    let hint = password_token.hint().map(str::to_string);
                    let password = prompt(LoginPrompt::Password { hint }).map_err(prompt_failed)?;
                    client
                        .check_password(password_token, password.trim())
                        .await
                        .map_err(|err| mtproto("check_password", err))?;
                }
                Err(err) => return Err(mtproto("sign_in", err)),
            }
        }

        self.save_session(&client)?;
        let me = client
            .get_me()
            .await
            .map_err(|err| mtproto("get_me", err))?;
        let account = me
            .username()
            .map(|username| format!("@{username}"))
            .unwrap_or_else(|| me.id().to_string());
        info!(account = %account, "telegram session authorized");
        Ok(account)
    }

    async fn open_client(&self) -> TransportResult<Client> {
        let session = Session::load_file_or_create(&self.session_file).map_err(|source| {
            TransportError::Session {
                path: self.session_file.clone(),
                source,
            }
        })?;
        Client::connect(Config {
            session,
            api_id: self.api_id,
            api_hash: self.api_hash.clone(),
            params: InitParams::default(),
        })
        .await
        .map_err(|err| mtproto("connect", err))
    }

    fn save_session(&self, client: &Client) -> TransportResult<()> {
        let session_error = |source| TransportError::Session {
            path: self.session_file.clone(),
            source,
        };
        if let Some(parent) = self.session_file.parent() {
            std::fs::create_dir_all(parent).map_err(session_error)?;
        }
        client
            .session()
            .save_to_file(&self.session_file)
            .map_err(session_error)
    }

    fn client(&self) -> TransportResult<Client> {
        self.state
            .lock()
            .client
            .clone()
            .ok_or(TransportError::NotConnected)
    }

    fn known(&self, id: ChatId) -> Option<ChannelInfo> {
        self.peers.lock().get(&id).map(|(_, title)| ChannelInfo {
            id,
            title: title.clone(),
        })
    }

    fn packed(&self, id: ChatId) -> Option<PackedChat> {
        self.peers.lock().get(&id).map(|(peer, _)| peer.packed)
    }

    /// Every dialog of the account, caching each for id lookups.
    async fn load_dialogs(&self, client: &Client) -> TransportResult<Vec<ChannelInfo>> {
        let mut dialogs = client.iter_dialogs();
        let mut chats = Vec::new();
        while let Some(dialog) = dialogs
            .next()
            .await
            .map_err(|err| mtproto("get_dialogs", err))?
        {
            chats.push(remember(&self.peers, dialog.chat()));
        }
        self.state.lock().dialogs_loaded = true;
        debug!(dialogs = chats.len(), "dialogs loaded");
        Ok(chats)
    }

    async fn lookup(
        &self,
        client: &Client,
        channel: &ChannelRef,
    ) -> TransportResult<Option<ChannelInfo>> {
        match channel {
            ChannelRef::Handle(handle) => {
                let Some(username) = username_of(handle) else {
                    return Ok(None);
                };
                match client.resolve_username(username).await {
                    Ok(Some(chat)) => Ok(Some(remember(&self.peers, &chat))),
                    Ok(None) => Ok(None),
                    Err(err) => {
                        let err = mtproto("resolve_username", err);
                        if err.is_chat_not_found() {
                            Ok(None)
                        } else {
                            Err(err)
                        }
                    }
                }
            }
            ChannelRef::Id(id) => {
                if let Some(info) = self.known(*id) {
                    return Ok(Some(info));
                }
                let loaded = self.state.lock().dialogs_loaded;
                if !loaded {
                    self.load_dialogs(client).await?;
                }
                Ok(self.known(*id))
            }
        }
    }
}

fn prompt_failed(err: std::io::Error) -> TransportError {
    TransportError::Config(format!("login prompt failed: {err}"))
}

#[async_trait]
impl Transport for UserSessionTransport {
    async fn connect(&self) -> TransportResult<()> {
        let client = self.open_client().await?;
        let authorized = client
            .is_authorized()
            .await
            .map_err(|err| mtproto("is_authorized", err))?;
        if !authorized {
            return Err(TransportError::NotAuthorized);
        }
        self.save_session(&client)?;

        let me = client
            .get_me()
            .await
            .map_err(|err| mtproto("get_me", err))?;
        info!(
            user = me.username().unwrap_or("unknown"),
            "connected to Telegram"
        );

        let mut state = self.state.lock();
        state.client = Some(client);
        if state.shutdown.is_cancelled() {
            state.shutdown = CancellationToken::new();
        }
        Ok(())
    }

    async fn disconnect(&self) -> TransportResult<()> {
        let client = {
            let mut state = self.state.lock();
            state.shutdown.cancel();
            state.dialogs_loaded = false;
            state.client.take()
        };
        if let Some(client) = client {
            self.save_session(&client)?;
            info!("disconnected from Telegram");
        }
        Ok(())
    }

    async fn send(&self, channel: &ChannelRef, text: &str) -> TransportResult<MessageHandle> {
        let client = self.client()?;
        let info = self.lookup(&client, channel).await?.ok_or_else(|| {
            TransportError::Unavailable(format!("chat {channel} is not visible to this account"))
        })?;
        let packed = self.packed(info.id).ok_or_else(|| unknown_peer(info.id))?;

        let message = client
            .send_message(packed, text)
            .await
            .map_err(|err| mtproto("send_message", err))?;
        Ok(MessageHandle {
            chat_id: info.id,
            message_id: i64::from(message.id()),
        })
    }

    async fn resolve(&self, channel: &ChannelRef) -> TransportResult<Option<ChannelInfo>> {
        let client = self.client()?;
        self.lookup(&client, channel).await
    }

    async fn forward(&self, message: &MessageHandle, destination: ChatId) -> TransportResult<()> {
        let client = self.client()?;
        let source = self
            .packed(message.chat_id)
            .ok_or_else(|| unknown_peer(message.chat_id))?;
        let target = self
            .packed(destination)
            .ok_or_else(|| unknown_peer(destination))?;
        let message_id = i32::try_from(message.message_id).map_err(|_| {
            TransportError::Unavailable(format!("message id {} out of range", message.message_id))
        })?;

        let forwarded = client
            .forward_messages(target, &[message_id], source)
            .await
            .map_err(|err| mtproto("forward_messages", err))?;
        if forwarded.iter().any(Option::is_some) {
            Ok(())
        } else {
            Err(TransportError::Unavailable(format!(
                "message {message_id} was not forwarded"
            )))
        }
    }

    async fn subscribe(&self, chat_ids: &[ChatId]) -> TransportResult<Subscription> {
        let client = self.client()?;
        let cancel = self.state.lock().shutdown.child_token();
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        let chats: HashSet<ChatId> = chat_ids.iter().copied().collect();

        debug!(chats = chats.len(), "starting update stream");
        let task = tokio::spawn(stream_updates(
            client,
            Arc::clone(&self.peers),
            chats,
            tx,
            cancel.clone(),
        ));

        Ok(Subscription::new(rx, cancel, Some(task)))
    }

    async fn discover_chats(&self, query: &str) -> TransportResult<Vec<ChannelInfo>> {
        let client = self.client()?;
        let needle = query.to_lowercase();
        let chats = self
            .load_dialogs(&client)
            .await?
            .into_iter()
            .filter(|chat| chat.title.to_lowercase().contains(&needle))
            .collect::<Vec<_>>();
        debug!(query, matches = chats.len(), "chat discovery finished");
        Ok(chats)
    }
}

async fn stream_updates(
    client: Client,
    peers: Arc<PeerCache>,
    chats: HashSet<ChatId>,
    tx: mpsc::Sender<InboundMessage>,
    cancel: CancellationToken,
) {
    loop {
        let update = tokio::select! {
            _ = cancel.cancelled() => break,
            update = client.next_update() => update,
        };

        let message = match update {
            Ok(Update::NewMessage(message)) => message,
            Ok(_) => continue,
            Err(err) => {
                warn!(error = %err, "receiving updates failed");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(UPDATE_RETRY_DELAY) => continue,
                }
            }
        };

        let observed = ObservedMessage::from_message(&message);
        if chats.contains(&observed.chat_id) {
            remember(&peers, &message.chat());
        }
        let Some(inbound) = to_inbound(observed, &chats) else {
            continue;
        };
        tokio::select! {
            _ = cancel.cancelled() => return,
            sent = tx.send(inbound) => {
                if sent.is_err() {
                    debug!("subscriber gone, stopping update stream");
                    return;
                }
            }
        }
    }

    debug!("update stream stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn transport() -> UserSessionTransport {
        let dir = tempdir().unwrap();
        UserSessionTransport::new(12345, "0123456789abcdef", dir.path().join("relay.session"))
            .unwrap()
    }

    fn observed(chat_id: ChatId, message_id: i64) -> ObservedMessage {
        ObservedMessage {
            chat_id,
            message_id,
            reply_to_id: None,
            sender_is_bot: false,
            outgoing: false,
        }
    }

    #[test]
    fn rejects_missing_credentials() {
        assert!(matches!(
            UserSessionTransport::new(0, "hash", "s.session"),
            Err(TransportError::Config(_))
        ));
        assert!(matches!(
            UserSessionTransport::new(1, "  ", "s.session"),
            Err(TransportError::Config(_))
        ));
    }

    #[test]
    fn debug_output_hides_api_hash() {
        let rendered = format!("{:?}", transport());
        assert!(!rendered.contains("0123456789abcdef"));
        assert!(rendered.contains("12345"));
    }

    #[test]
    fn ids_use_marked_form() {
        assert_eq!(marked_id(PeerKind::User, 42), 42);
        assert_eq!(marked_id(PeerKind::BasicGroup, 4_000_123), -4_000_123);
        assert_eq!(marked_id(PeerKind::Channel, 1_234_567_890), -1_001_234_567_890);
        assert_eq!(PeerKind::from(PackedType::Bot), PeerKind::User);
        assert_eq!(PeerKind::from(PackedType::Chat), PeerKind::BasicGroup);
        assert_eq!(PeerKind::from(PackedType::Megagroup), PeerKind::Channel);
        assert_eq!(PeerKind::from(PackedType::Broadcast), PeerKind::Channel);
    }

    #[test]
    fn usernames_accept_handles_and_links() {
        assert_eq!(username_of("@cards"), Some("cards"));
        assert_eq!(username_of(" cards "), Some("cards"));
        assert_eq!(username_of("https://t.me/cards/"), Some("cards"));
        assert_eq!(username_of("t.me/cards"), Some("cards"));
        assert_eq!(username_of("@"), None);
    }

    #[test]
    fn bot_replies_in_subscribed_chats_are_delivered() {
        let chats = HashSet::from([-1001]);
        let message = ObservedMessage {
            reply_to_id: Some(7),
            sender_is_bot: true,
            ..observed(-1001, 11)
        };

        let inbound = to_inbound(message, &chats).unwrap();

        assert_eq!(inbound.chat_id, -1001);
        assert_eq!(inbound.message_id, 11);
        assert_eq!(inbound.reply_to_id, Some(7));
        assert!(inbound.is_automated_sender);
    }

    #[test]
    fn own_messages_and_other_chats_are_skipped() {
        let chats = HashSet::from([-1001]);

        assert!(to_inbound(observed(-9, 1), &chats).is_none());
        assert!(to_inbound(
            ObservedMessage {
                outgoing: true,
                ..observed(-1001, 2)
            },
            &chats
        )
        .is_none());
        assert!(to_inbound(observed(-1001, 3), &chats).is_some());
    }

    #[tokio::test]
    async fn calls_before_connect_fail_without_network() {
        let transport = transport();

        assert!(matches!(
            transport.send(&ChannelRef::parse("@cards"), "x").await,
            Err(TransportError::NotConnected)
        ));
        assert!(matches!(
            transport.resolve(&ChannelRef::parse("-1001")).await,
            Err(TransportError::NotConnected)
        ));
        assert!(matches!(
            transport.subscribe(&[-1001]).await,
            Err(TransportError::NotConnected)
        ));
        assert!(matches!(
            transport.discover_chats("cards").await,
            Err(TransportError::NotConnected)
        ));
        transport.disconnect().await.unwrap();
    }
}
