//! In-memory transport and REST doubles for the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chatsync_client::ws::{ConnectError, ConnectRequest, Link, Transport};
use chatsync_client::{AuthSession, ChatSession, ClientConfig, ConversationApi, CurrentUser};
use chatsync_shared::{
    ApiError, ClientEvent, Conversation, ConversationId, CreateMessageRequest, DeliveryStatus,
    Message, MessageId, PageInfo, PagedResponse, ServerEvent, WsEnvelope,
};
use chrono::{DateTime, TimeZone, Utc};
use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::StreamExt;
use tokio::sync::mpsc;

pub fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

pub fn message(id: &str, conversation: &str, sender: &str, secs: i64) -> Message {
    Message {
        id: id.into(),
        conversation_id: conversation.into(),
        sender_id: sender.into(),
        content: format!("message {id}"),
        message_type: Default::default(),
        status: DeliveryStatus::Sent,
        created_at: ts(secs),
    }
}

pub fn conversation(id: &str, secs: i64) -> Conversation {
    Conversation {
        id: id.into(),
        participants: vec!["U1".into(), "U2".into()],
        last_message: Some(format!("last in {id}")),
        last_message_at: Some(ts(secs)),
        unread_count: 0,
        last_activity_at: ts(secs),
    }
}

/// Let spawned tasks run until they block.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

// --- Transport ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Accept,
    Fail,
    Reject,
}

/// Server end of one accepted connection.
pub struct ServerSide {
    pub request: ConnectRequest,
    from_client: UnboundedReceiver<WsEnvelope<ClientEvent>>,
    to_client: UnboundedSender<WsEnvelope<ServerEvent>>,
}

impl ServerSide {
    pub async fn next_event(&mut self) -> ClientEvent {
        let envelope = tokio::time::timeout(Duration::from_secs(5), self.from_client.next())
            .await
            .expect("no client event within 5s")
            .expect("client closed the link");
        envelope.payload
    }

    /// Every event the client has sent so far.
    pub fn drain(&mut self) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        while let Ok(envelope) = self.from_client.try_recv() {
            events.push(envelope.payload);
        }
        events
    }

    pub fn push(&self, event: ServerEvent) {
        self.to_client
            .unbounded_send(WsEnvelope::new(event))
            .expect("client link gone");
    }
}

/// Scripted transport: each connect attempt consumes the next [`Outcome`]
/// (accepting once the script runs out).
pub struct MemoryTransport {
    script: Mutex<VecDeque<Outcome>>,
    attempts: AtomicUsize,
    servers: mpsc::UnboundedSender<ServerSide>,
}

impl MemoryTransport {
    pub fn new(script: &[Outcome]) -> (Arc<Self>, mpsc::UnboundedReceiver<ServerSide>) {
        let (servers, accepted) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            script: Mutex::new(script.iter().copied().collect()),
            attempts: AtomicUsize::new(0),
            servers,
        });
        (transport, accepted)
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, target: &ConnectRequest) -> Result<Link, ConnectError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Outcome::Accept);
        match outcome {
            Outcome::Fail => Err(ConnectError::Transport("connection refused".into())),
            Outcome::Reject => Err(ConnectError::Auth("HTTP 401".into())),
            Outcome::Accept => {
                let (outgoing, from_client) = unbounded();
                let (to_client, incoming) = unbounded();
                let _ = self.servers.send(ServerSide {
                    request: target.clone(),
                    from_client,
                    to_client,
                });
                Ok(Link { outgoing, incoming })
            }
        }
    }
}

// --- REST ---

/// In-memory REST collaborator. History pages can be delayed per
/// conversation to provoke stale results.
#[derive(Default)]
pub struct MemoryApi {
    conversations: Mutex<Vec<Conversation>>,
    history: Mutex<HashMap<ConversationId, Vec<Message>>>,
    delays: Mutex<HashMap<ConversationId, Duration>>,
    fail_creates: Mutex<bool>,
    created: Mutex<Vec<CreateMessageRequest>>,
    next_id: AtomicUsize,
}

impl MemoryApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_conversations(&self, conversations: Vec<Conversation>) {
        *self.conversations.lock().unwrap() = conversations;
    }

    pub fn set_history(&self, conversation: &str, messages: Vec<Message>) {
        self.history
            .lock()
            .unwrap()
            .insert(conversation.into(), messages);
    }

    pub fn delay_history(&self, conversation: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(conversation.into(), delay);
    }

    pub fn fail_creates(&self, fail: bool) {
        *self.fail_creates.lock().unwrap() = fail;
    }

    pub fn created(&self) -> Vec<CreateMessageRequest> {
        self.created.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConversationApi for MemoryApi {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, ApiError> {
        Ok(self.conversations.lock().unwrap().clone())
    }

    async fn fetch_messages(
        &self,
        conversation_id: &ConversationId,
        _cursor: Option<&str>,
        _limit: u32,
    ) -> Result<PagedResponse<Message>, ApiError> {
        let delay = self.delays.lock().unwrap().get(conversation_id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let items = self
            .history
            .lock()
            .unwrap()
            .get(conversation_id)
            .cloned()
            .unwrap_or_default();
        Ok(PagedResponse {
            items,
            page: PageInfo::default(),
        })
    }

    async fn create_message(&self, request: &CreateMessageRequest) -> Result<Message, ApiError> {
        self.created.lock().unwrap().push(request.clone());
        if *self.fail_creates.lock().unwrap() {
            return Err(ApiError::Http {
                status: 503,
                body: "unavailable".into(),
            });
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 42;
        Ok(Message {
            id: MessageId::new(format!("m-{n}")),
            conversation_id: request.conversation_id.clone(),
            sender_id: request.sender_id.clone(),
            content: request.content.clone(),
            message_type: request.message_type,
            status: DeliveryStatus::Sent,
            created_at: Utc::now(),
        })
    }
}

/// Start a session for `U1` and wait for the first accepted connection.
pub async fn connected_session(
    api: Arc<MemoryApi>,
) -> (Arc<ChatSession>, ServerSide, mpsc::UnboundedReceiver<ServerSide>) {
    let (transport, mut accepted) = MemoryTransport::new(&[]);
    let auth = AuthSession::new(CurrentUser::new("U1"), "token-1");
    let session = ChatSession::start(auth, ClientConfig::default(), api, transport);
    let server = tokio::time::timeout(Duration::from_secs(5), accepted.recv())
        .await
        .expect("no connection within 5s")
        .expect("transport dropped");
    settle().await;
    (session, server, accepted)
}
