//! Live channel protocol: envelopes and the events carried in them.
//!
//! Frames are JSON objects of the form
//! `{"id": "...", "type": "join_conversation", "data": {...}, "ts": "..."}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{ConversationId, Message, MessageType, UserId};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsEnvelope<T> {
    pub id: String,
    #[serde(flatten)]
    pub payload: T,
    pub ts: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl<T> WsEnvelope<T> {
    pub fn new(payload: T) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            payload,
            ts: Utc::now(),
            correlation_id: None,
        }
    }
}

/// Events the client publishes on the live channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ClientEvent {
    JoinConversation {
        conversation_id: ConversationId,
    },
    LeaveConversation {
        conversation_id: ConversationId,
    },
    SendMessage {
        conversation_id: ConversationId,
        sender_id: UserId,
        content: String,
        message_type: MessageType,
    },
    TypingStart {
        conversation_id: ConversationId,
        user_id: UserId,
    },
    TypingStop {
        conversation_id: ConversationId,
        user_id: UserId,
    },
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::JoinConversation { .. } => "join_conversation",
            ClientEvent::LeaveConversation { .. } => "leave_conversation",
            ClientEvent::SendMessage { .. } => "send_message",
            ClientEvent::TypingStart { .. } => "typing_start",
            ClientEvent::TypingStop { .. } => "typing_stop",
        }
    }
}

/// Events pushed by the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    #[serde(alias = "new_message")]
    ReceiveMessage(Message),
    UserTyping {
        conversation_id: ConversationId,
        user_id: UserId,
        is_typing: bool,
    },
    Error {
        code: String,
        message: String,
        #[serde(default)]
        correlation_id: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_event_wire_shape() {
        let env = WsEnvelope::new(ClientEvent::TypingStart {
            conversation_id: "c1".into(),
            user_id: "u1".into(),
        });
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(value["type"], "typing_start");
        assert_eq!(value["data"]["conversationId"], "c1");
        assert_eq!(value["data"]["userId"], "u1");
        assert!(value.get("correlationId").is_none());
    }

    #[test]
    fn new_message_is_accepted_as_receive_message() {
        let json = r#"{
            "id": "e1",
            "ts": "2024-05-01T10:00:00Z",
            "type": "new_message",
            "data": {
                "id": "m-7",
                "conversationId": "c1",
                "senderId": "u2",
                "content": "yo",
                "createdAt": "2024-05-01T10:00:00Z"
            }
        }"#;
        let env: WsEnvelope<ServerEvent> = serde_json::from_str(json).unwrap();
        match env.payload {
            ServerEvent::ReceiveMessage(msg) => assert_eq!(msg.id.as_str(), "m-7"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn user_typing_parses() {
        let json = r#"{
            "id": "e2",
            "ts": "2024-05-01T10:00:00Z",
            "type": "user_typing",
            "data": {"conversationId": "c1", "userId": "u2", "isTyping": true}
        }"#;
        let env: WsEnvelope<ServerEvent> = serde_json::from_str(json).unwrap();
        assert_eq!(
            env.payload,
            ServerEvent::UserTyping {
                conversation_id: "c1".into(),
                user_id: "u2".into(),
                is_typing: true,
            }
        );
    }
}
