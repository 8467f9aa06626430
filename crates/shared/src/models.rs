//! Shared data models for conversations and messages.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// --- Identifiers ---

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// True when the id is missing (empty or whitespace only).
            pub fn is_blank(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Server-assigned conversation identifier.
    ConversationId
);

string_id!(
    /// Identifier of a user (sender, participant, typing peer).
    UserId
);

string_id!(
    /// Message identifier: either durable (server-assigned) or a temporary
    /// client-side id carried by an optimistic send until it is reconciled.
    MessageId
);

/// Prefix of client-assigned ids awaiting confirmation.
pub const TEMP_ID_PREFIX: &str = "temp-";

impl MessageId {
    /// Generate a fresh temporary id for an optimistic send.
    pub fn temporary() -> Self {
        Self(format!("{}{}", TEMP_ID_PREFIX, uuid::Uuid::new_v4()))
    }

    pub fn is_temporary(&self) -> bool {
        self.0.starts_with(TEMP_ID_PREFIX)
    }
}

// --- Messaging ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum MessageType {
    #[default]
    Text,
}

/// Delivery status of a message.
///
/// Messages coming from the server without an explicit status are `Sent`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Optimistic entry, durable write not yet resolved.
    Sending,
    #[default]
    Sent,
    Delivered,
    Read,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Sending => "sending",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Read => "read",
            DeliveryStatus::Failed => "failed",
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, DeliveryStatus::Sending)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    /// Rich-text payload as authored (may contain markup).
    pub content: String,
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(default)]
    pub status: DeliveryStatus,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Build the optimistic entry for an outgoing message.
    pub fn pending(
        conversation_id: ConversationId,
        sender_id: UserId,
        content: String,
        message_type: MessageType,
    ) -> Self {
        Self {
            id: MessageId::temporary(),
            conversation_id,
            sender_id,
            content,
            message_type,
            status: DeliveryStatus::Sending,
            created_at: Utc::now(),
        }
    }
}

// --- Conversations ---

/// Two-party conversation with its denormalized summary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    /// The two participants. Empty for a placeholder the client has not fetched yet.
    #[serde(default)]
    pub participants: Vec<UserId>,
    #[serde(default)]
    pub last_message: Option<String>,
    #[serde(default)]
    pub last_message_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub unread_count: u32,
    pub last_activity_at: DateTime<Utc>,
}

impl Conversation {
    /// Entry for a conversation known only from a push event.
    pub fn placeholder(id: ConversationId, at: DateTime<Utc>) -> Self {
        Self {
            id,
            participants: Vec::new(),
            last_message: None,
            last_message_at: None,
            unread_count: 0,
            last_activity_at: at,
        }
    }

    /// The participant that is not `me`.
    pub fn peer_of(&self, me: &UserId) -> Option<&UserId> {
        self.participants.iter().find(|p| *p != me)
    }

    pub fn is_placeholder(&self) -> bool {
        self.participants.is_empty()
    }
}

// --- REST payloads ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PagedResponse<T> {
    pub items: Vec<T>,
    pub page: PageInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub next_cursor: Option<String>,
    pub prev_cursor: Option<String>,
}

/// Body of the durable message-create call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessageRequest {
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub message_type: MessageType,
}
