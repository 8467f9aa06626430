//! Message store for the active conversation.
//!
//! Single source of truth the UI reads from. It holds the log of exactly one
//! conversation; switching conversations clears it and the new one is reseeded
//! from REST rather than merged with the previous view.
//!
//! Mutations are synchronous: the lock is taken, the change applied and the
//! lock released within the call, never across an `.await`.

use std::sync::Mutex;

use chatsync_shared::{ConversationId, Message, MessageId};
use tokio::sync::watch;

use crate::error::{Result, SyncError};
use crate::lock;

/// Messages of one conversation, sorted by `created_at` ascending.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ConversationLog {
    pub messages: Vec<Message>,
    /// Whether the history has been fetched from the REST API.
    pub is_loaded: bool,
}

impl ConversationLog {
    /// Add a message, maintaining sort order by `created_at` (after any equal
    /// timestamps). Returns false if a message with the same id already exists.
    pub fn add_message(&mut self, msg: Message) -> bool {
        if self.position(&msg.id).is_some() {
            return false;
        }

        let pos = self
            .messages
            .partition_point(|m| m.created_at <= msg.created_at);
        self.messages.insert(pos, msg);
        true
    }

    /// Set the full history (from a REST fetch), sorted and without duplicate ids.
    /// Marks the log as loaded.
    pub fn set_history(&mut self, mut messages: Vec<Message>) {
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        let mut seen = std::collections::HashSet::new();
        messages.retain(|m| seen.insert(m.id.clone()));
        self.messages = messages;
        self.is_loaded = true;
    }

    pub fn position(&self, id: &MessageId) -> Option<usize> {
        self.messages.iter().position(|m| &m.id == id)
    }
}

/// Proof that a fetch was started for a particular activation of a
/// conversation. A seed carrying a ticket from an earlier activation is stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveTicket {
    pub conversation_id: ConversationId,
    generation: u64,
}

#[derive(Debug, Default)]
struct StoreInner {
    active: Option<ConversationId>,
    generation: u64,
    log: ConversationLog,
}

#[derive(Debug)]
pub struct MessageStore {
    inner: Mutex<StoreInner>,
    revision: watch::Sender<u64>,
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageStore {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Mutex::new(StoreInner::default()),
            revision,
        }
    }

    /// Make `conversation` the active one.
    ///
    /// Switching to a different conversation clears the log. Re-activating the
    /// current one keeps it (pending sends stay visible) but still invalidates
    /// tickets handed out earlier.
    pub fn activate(&self, conversation: Option<ConversationId>) -> Option<ActiveTicket> {
        let ticket = {
            let mut inner = lock(&self.inner);
            inner.generation += 1;
            if inner.active != conversation {
                inner.log = ConversationLog::default();
                inner.active = conversation.clone();
            }
            conversation.map(|conversation_id| ActiveTicket {
                conversation_id,
                generation: inner.generation,
            })
        };
        self.bump();
        ticket
    }

    pub fn active_conversation(&self) -> Option<ConversationId> {
        lock(&self.inner).active.clone()
    }

    /// Ticket for the current activation, for refetches that must not
    /// outlive it.
    pub fn ticket(&self) -> Option<ActiveTicket> {
        let inner = lock(&self.inner);
        inner.active.clone().map(|conversation_id| ActiveTicket {
            conversation_id,
            generation: inner.generation,
        })
    }

    /// Replace the log with a fetched page, if `conversation_id` is still active.
    pub fn seed(&self, conversation_id: &ConversationId, messages: Vec<Message>) -> Result<usize> {
        {
            let mut inner = lock(&self.inner);
            if inner.active.as_ref() != Some(conversation_id) {
                return Err(stale(conversation_id));
            }
            apply_seed(&mut inner.log, messages);
        }
        self.bump();
        Ok(self.len())
    }

    /// Like [`seed`](Self::seed), but also rejects results from an earlier
    /// activation of the same conversation.
    pub fn seed_ticket(&self, ticket: &ActiveTicket, messages: Vec<Message>) -> Result<usize> {
        {
            let mut inner = lock(&self.inner);
            if inner.active.as_ref() != Some(&ticket.conversation_id)
                || inner.generation != ticket.generation
            {
                return Err(stale(&ticket.conversation_id));
            }
            apply_seed(&mut inner.log, messages);
        }
        self.bump();
        Ok(self.len())
    }

    /// Merge a refetched page into the current log without dropping what is
    /// already there. Returns how many messages were new.
    pub fn backfill(&self, ticket: &ActiveTicket, messages: Vec<Message>) -> Result<usize> {
        let added = {
            let mut inner = lock(&self.inner);
            if inner.active.as_ref() != Some(&ticket.conversation_id)
                || inner.generation != ticket.generation
            {
                return Err(stale(&ticket.conversation_id));
            }
            let mut added = 0;
            for message in messages {
                if message.conversation_id == ticket.conversation_id
                    && inner.log.add_message(message)
                {
                    added += 1;
                }
            }
            inner.log.is_loaded = true;
            added
        };
        if added > 0 {
            self.bump();
        }
        Ok(added)
    }

    /// Insert a message unless its id is already present or it belongs to a
    /// conversation that is not active. Returns whether the log changed.
    pub fn append(&self, message: Message) -> bool {
        let added = {
            let mut inner = lock(&self.inner);
            if inner.active.as_ref() != Some(&message.conversation_id) {
                crate::log_debug!(
                    conversation_id = %message.conversation_id,
                    message_id = %message.id,
                    "append ignored for inactive conversation"
                );
                return false;
            }
            inner.log.add_message(message)
        };
        if added {
            self.bump();
        }
        added
    }

    /// Replace the entry at `temp_id`'s position with `durable`.
    ///
    /// No-op (returns false) if `temp_id` is gone. Any other copy of the
    /// durable id, e.g. a live-channel echo that arrived first, is dropped so
    /// the id stays unique.
    pub fn reconcile(&self, temp_id: &MessageId, durable: Message) -> bool {
        {
            let mut inner = lock(&self.inner);
            let log = &mut inner.log;
            let Some(pos) = log.position(temp_id) else {
                return false;
            };

            let durable_id = durable.id.clone();
            log.messages[pos] = durable;

            let mut index = 0;
            log.messages.retain(|m| {
                let keep = index == pos || m.id != durable_id;
                index += 1;
                keep
            });
        }
        self.bump();
        true
    }

    /// Remove a message (rollback of a failed optimistic send).
    pub fn remove(&self, id: &MessageId) -> Option<Message> {
        let removed = {
            let mut inner = lock(&self.inner);
            let pos = inner.log.position(id)?;
            inner.log.messages.remove(pos)
        };
        self.bump();
        Some(removed)
    }

    /// Snapshot of the active conversation's log.
    pub fn messages(&self) -> Vec<Message> {
        lock(&self.inner).log.messages.clone()
    }

    pub fn get(&self, id: &MessageId) -> Option<Message> {
        let inner = lock(&self.inner);
        inner.log.position(id).map(|pos| inner.log.messages[pos].clone())
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).log.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_loaded(&self) -> bool {
        lock(&self.inner).log.is_loaded
    }

    /// Revision counter, bumped on every effective mutation.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }
}

/// Seed the log from a fetched page. Sends still in flight and pushes that
/// arrived while the page was loading are merged back in timestamp order;
/// the page's copy wins on an id clash.
fn apply_seed(log: &mut ConversationLog, messages: Vec<Message>) {
    let kept: Vec<Message> = log
        .messages
        .drain(..)
        .filter(|m| !m.id.is_temporary() || m.status.is_pending())
        .collect();

    log.set_history(messages);
    for message in kept {
        log.add_message(message);
    }
}

fn stale(conversation_id: &ConversationId) -> SyncError {
    crate::log_debug!(%conversation_id, "discarding stale seed");
    SyncError::StaleContext {
        conversation_id: conversation_id.clone(),
    }
}
