//! Room membership on the live channel.

use std::sync::{Arc, Mutex};

use chatsync_shared::{ClientEvent, ConversationId};

use super::connection::{ConnectionState, EventSink};
use crate::lock;

/// Keeps the live channel subscribed to exactly the active conversation.
///
/// Join and leave are fire-and-forget; the server treats them as idempotent,
/// so re-issuing a join after a reconnect is always safe.
pub struct RoomSubscriptionManager {
    sink: Arc<dyn EventSink>,
    membership: Mutex<Option<ConversationId>>,
}

impl RoomSubscriptionManager {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            sink,
            membership: Mutex::new(None),
        }
    }

    /// Leave the current room (if any) and join `next` (if any).
    pub fn set_active_conversation(&self, next: Option<ConversationId>) {
        let mut membership = lock(&self.membership);
        if *membership == next {
            return;
        }

        if let Some(old) = membership.take() {
            self.publish(ClientEvent::LeaveConversation {
                conversation_id: old,
            });
        }
        if let Some(new) = next {
            self.publish(ClientEvent::JoinConversation {
                conversation_id: new.clone(),
            });
            *membership = Some(new);
        }
    }

    /// Rooms do not survive a transport reconnect; re-join on `Connected`.
    pub fn handle_connection_state(&self, state: &ConnectionState) {
        if !state.is_connected() {
            return;
        }
        if let Some(current) = lock(&self.membership).clone() {
            crate::log_info!(conversation_id = %current, "re-joining room after connect");
            self.publish(ClientEvent::JoinConversation {
                conversation_id: current,
            });
        }
    }

    pub fn current(&self) -> Option<ConversationId> {
        lock(&self.membership).clone()
    }

    /// Number of rooms held; never more than one.
    pub fn membership_count(&self) -> usize {
        usize::from(lock(&self.membership).is_some())
    }

    fn publish(&self, event: ClientEvent) {
        let name = event.name();
        match self.sink.emit(event) {
            Ok(()) => crate::log_debug!(event = name, "room event published"),
            // Joined on the next `Connected` anyway.
            Err(e) => crate::log_debug!(event = name, error = %e, "room event not published"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingSink;

    fn manager() -> (Arc<RecordingSink>, RoomSubscriptionManager) {
        let sink = Arc::new(RecordingSink::connected());
        (sink.clone(), RoomSubscriptionManager::new(sink))
    }

    fn join(id: &str) -> ClientEvent {
        ClientEvent::JoinConversation {
            conversation_id: id.into(),
        }
    }

    fn leave(id: &str) -> ClientEvent {
        ClientEvent::LeaveConversation {
            conversation_id: id.into(),
        }
    }

    #[test]
    fn switching_leaves_then_joins() {
        let (sink, rooms) = manager();
        rooms.set_active_conversation(Some("c1".into()));
        rooms.set_active_conversation(Some("c2".into()));
        rooms.set_active_conversation(None);

        assert_eq!(sink.events(), vec![join("c1"), leave("c1"), join("c2"), leave("c2")]);
        assert_eq!(rooms.membership_count(), 0);
    }

    #[test]
    fn same_conversation_is_noop() {
        let (sink, rooms) = manager();
        rooms.set_active_conversation(Some("c1".into()));
        rooms.set_active_conversation(Some("c1".into()));
        assert_eq!(sink.events(), vec![join("c1")]);
    }

    #[test]
    fn at_most_one_membership_for_any_sequence() {
        let (_sink, rooms) = manager();
        let sequence = [Some("a"), Some("b"), None, Some("b"), Some("c"), None, None, Some("a")];
        for step in sequence {
            rooms.set_active_conversation(step.map(ConversationId::from));
            assert!(rooms.membership_count() <= 1);
            assert_eq!(rooms.current(), step.map(ConversationId::from));
        }
    }

    #[test]
    fn rejoins_on_connected_only() {
        let (sink, rooms) = manager();
        rooms.set_active_conversation(Some("c1".into()));
        rooms.handle_connection_state(&ConnectionState::Disconnected);
        rooms.handle_connection_state(&ConnectionState::Reconnecting { attempt: 1 });
        rooms.handle_connection_state(&ConnectionState::Connected);
        assert_eq!(sink.events(), vec![join("c1"), join("c1")]);
    }

    #[test]
    fn membership_tracked_while_offline() {
        let sink = Arc::new(RecordingSink::disconnected());
        let rooms = RoomSubscriptionManager::new(sink.clone());
        rooms.set_active_conversation(Some("c1".into()));
        assert!(sink.events().is_empty());
        assert_eq!(rooms.current(), Some("c1".into()));

        sink.set_connected(true);
        rooms.handle_connection_state(&ConnectionState::Connected);
        assert_eq!(sink.events(), vec![join("c1")]);
    }
}
