//! Composition root: one session per signed-in user.
//!
//! Owns the live channel and every store, and routes inbound events to them.
//! Nothing here is global; the application builds a session with
//! [`ChatSession::start`] and drops it (or calls [`ChatSession::shutdown`])
//! when the user signs out.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use chatsync_shared::{ConversationId, Message, ServerEvent};

use crate::api_client::ConversationApi;
use crate::auth_session::{AuthSession, CurrentUser};
use crate::config::ClientConfig;
use crate::error::{Result, SendRejection};
use crate::lock;
use crate::pipeline::SendPipeline;
use crate::stores::{ConversationListCache, MessageStore, SummaryUpdate};
use crate::typing::TypingCoordinator;
use crate::ws::{
    ConnectionManager, ConnectionState, EventSink, RoomSubscriptionManager, Subscription,
    Transport,
};

pub struct ChatSession {
    me: Weak<ChatSession>,
    user: CurrentUser,
    config: ClientConfig,
    api: Arc<dyn ConversationApi>,
    connection: ConnectionManager,
    sink: Arc<dyn EventSink>,
    rooms: RoomSubscriptionManager,
    store: Arc<MessageStore>,
    conversations: Arc<ConversationListCache>,
    typing: TypingCoordinator,
    pipelines: Mutex<HashMap<ConversationId, Arc<SendPipeline>>>,
    subscriptions: Mutex<Vec<Subscription>>,
    has_connected: AtomicBool,
}

impl ChatSession {
    /// Build the session and open the live channel.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        auth: AuthSession,
        config: ClientConfig,
        api: Arc<dyn ConversationApi>,
        transport: Arc<dyn Transport>,
    ) -> Arc<Self> {
        let connection = ConnectionManager::new(
            transport,
            config.ws_url.clone(),
            auth.token.clone(),
            config.reconnect.clone(),
        );
        let sink: Arc<dyn EventSink> = Arc::new(connection.clone());

        let session = Arc::new_cyclic(|me| Self {
            me: me.clone(),
            rooms: RoomSubscriptionManager::new(sink.clone()),
            typing: TypingCoordinator::new(auth.user.id.clone(), sink.clone(), config.typing.clone()),
            user: auth.user,
            config,
            api,
            connection,
            sink,
            store: Arc::new(MessageStore::new()),
            conversations: Arc::new(ConversationListCache::new()),
            pipelines: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(Vec::new()),
            has_connected: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&session);
        let on_event = session.connection.on_event(move |event| {
            if let Some(session) = weak.upgrade() {
                session.handle_server_event(event);
            }
        });
        let weak = Arc::downgrade(&session);
        let on_state = session.connection.on_state_change(move |state| {
            if let Some(session) = weak.upgrade() {
                session.handle_connection_state(state);
            }
        });
        lock(&session.subscriptions).extend([on_event, on_state]);

        crate::log_info!(user = %session.user.id, url = %session.config.ws_url, "session started");
        session.connection.connect();
        session
    }

    pub fn user(&self) -> &CurrentUser {
        &self.user
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn messages(&self) -> &Arc<MessageStore> {
        &self.store
    }

    pub fn conversations(&self) -> &Arc<ConversationListCache> {
        &self.conversations
    }

    pub fn typing(&self) -> &TypingCoordinator {
        &self.typing
    }

    pub fn active_conversation(&self) -> Option<ConversationId> {
        self.store.active_conversation()
    }

    /// Open `next` (or close the current conversation with `None`).
    ///
    /// Returns [`SyncError::StaleContext`](crate::SyncError::StaleContext) if
    /// the user switched again before the history page arrived; the page is
    /// discarded in that case.
    pub async fn switch_conversation(&self, next: Option<ConversationId>) -> Result<()> {
        // A pipeline with a send in flight stays until that send settles.
        lock(&self.pipelines)
            .retain(|id, pipeline| Some(id) == next.as_ref() || pipeline.is_in_flight());
        let ticket = self.store.activate(next.clone());
        self.rooms.set_active_conversation(next.clone());
        self.typing.set_active_conversation(next);

        let Some(ticket) = ticket else {
            return Ok(());
        };
        let conversation_id = ticket.conversation_id.clone();
        self.conversations.mark_read(&conversation_id);

        let page = self
            .api
            .fetch_messages(&conversation_id, None, self.config.page_size)
            .await?;
        let count = self.store.seed_ticket(&ticket, page.items)?;
        crate::log_debug!(%conversation_id, count, "history seeded");

        // Pushes for other conversations may have been missed while this one
        // was loading.
        if let Err(e) = self.refresh_conversations().await {
            crate::log_warn!(error = %e, "conversation list refresh failed");
        }
        Ok(())
    }

    /// Send `content` to the active conversation as the current user.
    pub async fn send_message(&self, content: &str) -> Result<Message> {
        let conversation_id = self
            .store
            .active_conversation()
            .ok_or(SendRejection::MissingConversation)?;
        self.typing.stop();
        let pipeline = self.pipeline_for(&conversation_id);
        pipeline.send(&conversation_id, &self.user.id, content).await
    }

    pub fn notify_keystroke(&self) {
        self.typing.keystroke();
    }

    /// Refetch the conversation list and merge it into the cache.
    pub async fn refresh_conversations(&self) -> Result<()> {
        let fetched = self.api.list_conversations().await?;
        crate::log_debug!(count = fetched.len(), "conversation list fetched");
        self.conversations.merge(fetched);
        Ok(())
    }

    /// Catch up after deltas may have been lost: backfill the active
    /// conversation and refetch the list.
    pub async fn resync(&self) -> Result<()> {
        if let Some(ticket) = self.store.ticket() {
            let page = self
                .api
                .fetch_messages(&ticket.conversation_id, None, self.config.page_size)
                .await?;
            let added = self.store.backfill(&ticket, page.items)?;
            if added > 0 {
                crate::log_info!(conversation_id = %ticket.conversation_id, added, "backfilled missed messages");
            }
        }
        self.refresh_conversations().await
    }

    /// Tear down the live channel and stop any local typing indicator.
    pub fn shutdown(&self) {
        self.typing.stop();
        self.connection.disconnect();
        lock(&self.subscriptions).clear();
    }

    fn pipeline_for(&self, conversation_id: &ConversationId) -> Arc<SendPipeline> {
        lock(&self.pipelines)
            .entry(conversation_id.clone())
            .or_insert_with(|| {
                Arc::new(SendPipeline::new(
                    self.store.clone(),
                    self.conversations.clone(),
                    self.api.clone(),
                    self.sink.clone(),
                ))
            })
            .clone()
    }

    fn handle_server_event(&self, event: &ServerEvent) {
        match event {
            ServerEvent::ReceiveMessage(message) => self.receive_message(message),
            ServerEvent::UserTyping {
                conversation_id,
                user_id,
                is_typing,
            } => self.typing.on_peer_typing(conversation_id, user_id, *is_typing),
            ServerEvent::Error {
                code,
                message,
                correlation_id,
            } => {
                crate::log_warn!(%code, ?correlation_id, "server error: {message}");
            }
        }
    }

    fn receive_message(&self, message: &Message) {
        let is_active = self.store.active_conversation().as_ref() == Some(&message.conversation_id);
        let is_own = message.sender_id == self.user.id;

        if is_active && !self.store.append(message.clone()) {
            crate::log_debug!(message_id = %message.id, "duplicate delivery ignored");
        }

        let unread_delta = if is_active || is_own { 0 } else { 1 };
        self.conversations.upsert_summary(
            &message.conversation_id,
            SummaryUpdate {
                last_message: message.content.clone(),
                last_message_at: message.created_at,
                unread_delta,
            },
        );
    }

    fn handle_connection_state(&self, state: &ConnectionState) {
        self.rooms.handle_connection_state(state);

        match state {
            ConnectionState::Connected => {
                if !self.has_connected.swap(true, Ordering::SeqCst) {
                    return;
                }
                // Back after a drop: pushes sent in between are gone.
                self.conversations.invalidate();
                if let Some(session) = self.me.upgrade() {
                    tokio::spawn(async move {
                        if let Err(e) = session.resync().await {
                            crate::log_warn!(error = %e, "resync after reconnect failed");
                        }
                    });
                }
            }
            ConnectionState::Failed { reason } => {
                if self.connection.failure().is_some_and(|e| e.is_auth()) {
                    crate::log_error!(%reason, "live channel credentials rejected, token refresh required");
                } else {
                    crate::log_error!(%reason, "live channel gave up");
                }
            }
            _ => {}
        }
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.connection.disconnect();
    }
}
