//! Conversation list cache: summaries for every conversation.
//!
//! Kept fresh by push events and confirmed sends, and reconciled with a REST
//! refetch whenever deltas may have been missed (conversation switch,
//! reconnect). Entries are never deleted client-side.

use std::collections::HashMap;
use std::sync::Mutex;

use chatsync_shared::{Conversation, ConversationId};
use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::lock;

/// Summary change carried by a push event or a confirmed send.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryUpdate {
    pub last_message: String,
    pub last_message_at: DateTime<Utc>,
    pub unread_delta: u32,
}

#[derive(Debug, Default)]
struct CacheInner {
    conversations: HashMap<ConversationId, Conversation>,
    stale: bool,
    loaded: bool,
}

#[derive(Debug)]
pub struct ConversationListCache {
    inner: Mutex<CacheInner>,
    revision: watch::Sender<u64>,
}

impl Default for ConversationListCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationListCache {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Mutex::new(CacheInner::default()),
            revision,
        }
    }

    /// Merge a fetched list. The server wins unless the local summary is newer
    /// (a push arrived after the server produced its snapshot).
    pub fn merge(&self, fetched: Vec<Conversation>) {
        {
            let mut inner = lock(&self.inner);
            for remote in fetched {
                let merged = match inner.conversations.remove(&remote.id) {
                    Some(local) if is_newer(&local, &remote) => Conversation {
                        participants: remote.participants,
                        unread_count: local.unread_count.max(remote.unread_count),
                        ..local
                    },
                    _ => remote,
                };
                inner.conversations.insert(merged.id.clone(), merged);
            }
            inner.stale = false;
            inner.loaded = true;
        }
        self.bump();
    }

    pub fn upsert_summary(&self, conversation_id: &ConversationId, update: SummaryUpdate) {
        {
            let mut inner = lock(&self.inner);
            let mut created = false;
            let entry = inner
                .conversations
                .entry(conversation_id.clone())
                .or_insert_with(|| {
                    created = true;
                    Conversation::placeholder(conversation_id.clone(), update.last_message_at)
                });

            // Out-of-order deltas must not roll the summary back.
            if entry
                .last_message_at
                .map_or(true, |current| update.last_message_at >= current)
            {
                entry.last_message = Some(update.last_message);
                entry.last_message_at = Some(update.last_message_at);
            }
            entry.last_activity_at = entry.last_activity_at.max(update.last_message_at);
            entry.unread_count = entry.unread_count.saturating_add(update.unread_delta);

            if created {
                crate::log_debug!(%conversation_id, "summary for unknown conversation, list marked stale");
                inner.stale = true;
            }
        }
        self.bump();
    }

    /// Reset the unread counter (conversation opened).
    pub fn mark_read(&self, conversation_id: &ConversationId) {
        let changed = {
            let mut inner = lock(&self.inner);
            match inner.conversations.get_mut(conversation_id) {
                Some(c) if c.unread_count > 0 => {
                    c.unread_count = 0;
                    true
                }
                _ => false,
            }
        };
        if changed {
            self.bump();
        }
    }

    /// Push deltas can no longer be trusted; the next refresh must refetch.
    pub fn invalidate(&self) {
        lock(&self.inner).stale = true;
        self.bump();
    }

    pub fn is_stale(&self) -> bool {
        let inner = lock(&self.inner);
        inner.stale || !inner.loaded
    }

    pub fn get(&self, conversation_id: &ConversationId) -> Option<Conversation> {
        lock(&self.inner).conversations.get(conversation_id).cloned()
    }

    /// All conversations, most recent activity first.
    pub fn list(&self) -> Vec<Conversation> {
        let mut all: Vec<Conversation> = lock(&self.inner).conversations.values().cloned().collect();
        all.sort_by(|a, b| {
            b.last_activity_at
                .cmp(&a.last_activity_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        all
    }

    pub fn total_unread(&self) -> u32 {
        lock(&self.inner)
            .conversations
            .values()
            .map(|c| c.unread_count)
            .sum()
    }

    pub fn changes(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }
}

fn is_newer(local: &Conversation, remote: &Conversation) -> bool {
    match (local.last_message_at, remote.last_message_at) {
        (Some(l), Some(r)) => l > r,
        (Some(_), None) => true,
        _ => false,
    }
}
