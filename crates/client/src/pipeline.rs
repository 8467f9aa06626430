//! Optimistic send pipeline.
//!
//! `composed → sending → {sent | failed}`. The attempt is visible in the store
//! before any network round-trip; the durable write decides the outcome. A
//! failed attempt leaves nothing behind in the store and is never retried
//! automatically, since the create call carries no idempotency key.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chatsync_shared::{
    ClientEvent, ConversationId, CreateMessageRequest, DeliveryStatus, Message, MessageId,
    MessageType, UserId,
};

use crate::api_client::ConversationApi;
use crate::error::{Result, SendRejection, SyncError};
use crate::stores::{ConversationListCache, MessageStore, SummaryUpdate};
use crate::ws::EventSink;

/// One outgoing message at a time. Sends to different conversations use
/// separate pipelines.
pub struct SendPipeline {
    store: Arc<MessageStore>,
    conversations: Arc<ConversationListCache>,
    api: Arc<dyn ConversationApi>,
    sink: Arc<dyn EventSink>,
    in_flight: AtomicBool,
}

impl SendPipeline {
    pub fn new(
        store: Arc<MessageStore>,
        conversations: Arc<ConversationListCache>,
        api: Arc<dyn ConversationApi>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            store,
            conversations,
            api,
            sink,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Send `content` to `conversation_id` as `sender_id`.
    ///
    /// Resolves with the durable message once the create call succeeds. If
    /// the returned future is dropped before that, the optimistic entry is
    /// rolled back.
    pub async fn send(
        &self,
        conversation_id: &ConversationId,
        sender_id: &UserId,
        content: &str,
    ) -> Result<Message> {
        if conversation_id.is_blank() {
            return Err(SendRejection::MissingConversation.into());
        }
        if sender_id.is_blank() {
            return Err(SendRejection::MissingSender.into());
        }
        if strip_markup(content).is_empty() {
            return Err(SendRejection::EmptyContent.into());
        }
        if self.in_flight.swap(true, Ordering::SeqCst) {
            return Err(SendRejection::InFlight.into());
        }

        let pending = Message::pending(
            conversation_id.clone(),
            sender_id.clone(),
            content.to_string(),
            MessageType::Text,
        );
        let temp_id = pending.id.clone();
        if !self.store.append(pending) {
            crate::log_debug!(%conversation_id, "sending to a conversation that is not on screen");
        }
        let attempt = Attempt {
            pipeline: self,
            temp_id: temp_id.clone(),
            settled: false,
        };

        if let Err(e) = self.sink.emit(ClientEvent::SendMessage {
            conversation_id: conversation_id.clone(),
            sender_id: sender_id.clone(),
            content: content.to_string(),
            message_type: MessageType::Text,
        }) {
            crate::log_debug!(%conversation_id, error = %e, "live fan-out skipped");
        }

        let request = CreateMessageRequest {
            conversation_id: conversation_id.clone(),
            sender_id: sender_id.clone(),
            content: content.to_string(),
            message_type: MessageType::Text,
        };

        match self.api.create_message(&request).await {
            Ok(mut durable) => {
                if matches!(durable.status, DeliveryStatus::Sending | DeliveryStatus::Failed) {
                    durable.status = DeliveryStatus::Sent;
                }
                attempt.confirm(&durable);
                self.conversations.upsert_summary(
                    conversation_id,
                    SummaryUpdate {
                        last_message: durable.content.clone(),
                        last_message_at: durable.created_at,
                        unread_delta: 0,
                    },
                );
                crate::log_info!(%conversation_id, %temp_id, message_id = %durable.id, "message sent");
                Ok(durable)
            }
            Err(e) => {
                drop(attempt);
                crate::log_warn!(%conversation_id, %temp_id, error = %e, "send failed, rolled back");
                Err(SyncError::SendFailure(e))
            }
        }
    }
}

/// Outstanding optimistic entry. Rolls back on drop unless confirmed.
struct Attempt<'a> {
    pipeline: &'a SendPipeline,
    temp_id: MessageId,
    settled: bool,
}

impl Attempt<'_> {
    fn confirm(mut self, durable: &Message) {
        self.settled = true;
        if !self.pipeline.store.reconcile(&self.temp_id, durable.clone()) {
            crate::log_debug!(temp_id = %self.temp_id, "temp entry gone before reconcile");
        }
    }
}

impl Drop for Attempt<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.pipeline.store.remove(&self.temp_id);
        }
        self.pipeline.in_flight.store(false, Ordering::SeqCst);
    }
}

/// Text left after removing markup tags and decoding common entities.
pub fn strip_markup(content: &str) -> String {
    let mut text = String::with_capacity(content.len());
    let mut in_tag = false;
    for c in content.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            c if !in_tag => text.push(c),
            _ => {}
        }
    }

    let decoded = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    decoded.trim().to_string()
}
