//! Test doubles shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chatsync_shared::{
    ApiError, ClientEvent, Conversation, ConversationId, CreateMessageRequest, DeliveryStatus,
    Message, MessageType, PageInfo, PagedResponse,
};
use chrono::{DateTime, TimeZone, Utc};
use futures_channel::oneshot;

use crate::api_client::ConversationApi;
use crate::error::{Result, SyncError};
use crate::lock;
use crate::ws::{ConnectError, ConnectRequest, EventSink, Link, Transport};

pub(crate) fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

pub(crate) fn message_at(id: &str, conversation: &str, secs: i64) -> Message {
    Message {
        id: id.into(),
        conversation_id: conversation.into(),
        sender_id: "u2".into(),
        content: format!("message {id}"),
        message_type: MessageType::Text,
        status: DeliveryStatus::Sent,
        created_at: ts(secs),
    }
}

/// Records outbound events; rejects them while "disconnected".
pub(crate) struct RecordingSink {
    connected: AtomicBool,
    events: Mutex<Vec<ClientEvent>>,
}

impl RecordingSink {
    pub(crate) fn connected() -> Self {
        Self {
            connected: AtomicBool::new(true),
            events: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn disconnected() -> Self {
        let sink = Self::connected();
        sink.set_connected(false);
        sink
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub(crate) fn events(&self) -> Vec<ClientEvent> {
        lock(&self.events).clone()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: ClientEvent) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(SyncError::NotConnected);
        }
        lock(&self.events).push(event);
        Ok(())
    }
}

/// Transport whose connect attempts never complete.
pub(crate) struct StalledTransport;

#[async_trait]
impl Transport for StalledTransport {
    async fn connect(&self, _target: &ConnectRequest) -> std::result::Result<Link, ConnectError> {
        futures_util::future::pending().await
    }
}

type Reply<T> = oneshot::Receiver<std::result::Result<T, ApiError>>;

/// REST double whose create responses are released by the test.
#[derive(Default)]
pub(crate) struct ScriptedApi {
    creates: Mutex<VecDeque<Reply<Message>>>,
    created: Mutex<Vec<CreateMessageRequest>>,
}

impl ScriptedApi {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn respond_create(&self) -> oneshot::Sender<std::result::Result<Message, ApiError>> {
        let (tx, rx) = oneshot::channel();
        lock(&self.creates).push_back(rx);
        tx
    }

    pub(crate) fn created(&self) -> Vec<CreateMessageRequest> {
        lock(&self.created).clone()
    }
}

async fn await_reply<T>(reply: Reply<T>) -> std::result::Result<T, ApiError> {
    reply
        .await
        .unwrap_or_else(|_| Err(ApiError::Network("reply dropped".into())))
}

#[async_trait]
impl ConversationApi for ScriptedApi {
    async fn list_conversations(&self) -> std::result::Result<Vec<Conversation>, ApiError> {
        Ok(Vec::new())
    }

    async fn fetch_messages(
        &self,
        _conversation_id: &ConversationId,
        _cursor: Option<&str>,
        _limit: u32,
    ) -> std::result::Result<PagedResponse<Message>, ApiError> {
        Ok(PagedResponse {
            items: Vec::new(),
            page: PageInfo::default(),
        })
    }

    async fn create_message(
        &self,
        request: &CreateMessageRequest,
    ) -> std::result::Result<Message, ApiError> {
        lock(&self.created).push(request.clone());
        let reply = lock(&self.creates).pop_front();
        match reply {
            Some(reply) => await_reply(reply).await,
            None => Err(ApiError::Network("no scripted response".into())),
        }
    }
}
