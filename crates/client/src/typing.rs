//! Typing indicators, both directions.
//!
//! Outbound, keystrokes are coalesced: `typing_start` on the first keystroke
//! after an idle period and `typing_stop` once no keystroke arrived for
//! `idle_timeout`. Inbound, a peer's indicator stays on only while refreshed
//! within `decay_window`, so a lost `typing_stop` cannot leave it stuck.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chatsync_shared::{ClientEvent, ConversationId, UserId};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::lock;
use crate::ws::EventSink;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingConfig {
    /// Quiet period after the last keystroke before `typing_stop` is sent.
    pub idle_timeout: Duration,
    /// How long a peer's indicator survives without a refresh.
    pub decay_window: Duration,
}

impl Default for TypingConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(3),
            decay_window: Duration::from_secs(5),
        }
    }
}

struct LocalTyping {
    conversation_id: ConversationId,
    epoch: u64,
    idle_timer: JoinHandle<()>,
}

struct PeerTyping {
    refreshed_at: Instant,
    epoch: u64,
    decay_timer: JoinHandle<()>,
}

#[derive(Default)]
struct TypingInner {
    active: Option<ConversationId>,
    local: Option<LocalTyping>,
    peers: HashMap<UserId, PeerTyping>,
    next_epoch: u64,
}

impl TypingInner {
    fn epoch(&mut self) -> u64 {
        self.next_epoch += 1;
        self.next_epoch
    }
}

struct Shared {
    user: UserId,
    sink: Arc<dyn EventSink>,
    config: TypingConfig,
    inner: Mutex<TypingInner>,
    revision: watch::Sender<u64>,
}

/// Timers need a tokio runtime; every method that may start one must be
/// called from within it.
pub struct TypingCoordinator {
    shared: Arc<Shared>,
}

impl TypingCoordinator {
    pub fn new(user: UserId, sink: Arc<dyn EventSink>, config: TypingConfig) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                user,
                sink,
                config,
                inner: Mutex::new(TypingInner::default()),
                revision,
            }),
        }
    }

    /// Switch conversations: stop our own indicator and forget peer state.
    pub fn set_active_conversation(&self, conversation: Option<ConversationId>) {
        let mut inner = lock(&self.shared.inner);
        if inner.active == conversation {
            return;
        }
        self.shared.stop_local(&mut inner);
        for (_, peer) in inner.peers.drain() {
            peer.decay_timer.abort();
        }
        inner.active = conversation;
        drop(inner);
        self.shared.bump();
    }

    /// Local keystroke in the composer of the active conversation.
    pub fn keystroke(&self) {
        let mut inner = lock(&self.shared.inner);
        let Some(conversation_id) = inner.active.clone() else {
            return;
        };

        match inner.local.take() {
            Some(previous) => previous.idle_timer.abort(),
            None => self.shared.publish(ClientEvent::TypingStart {
                conversation_id: conversation_id.clone(),
                user_id: self.shared.user.clone(),
            }),
        }

        let epoch = inner.epoch();
        let idle_timer = spawn_after(
            self.shared.config.idle_timeout,
            Arc::downgrade(&self.shared),
            move |shared| {
                let mut inner = lock(&shared.inner);
                if inner.local.as_ref().is_some_and(|l| l.epoch == epoch) {
                    shared.stop_local(&mut inner);
                }
            },
        );
        inner.local = Some(LocalTyping {
            conversation_id,
            epoch,
            idle_timer,
        });
    }

    /// Explicit stop, e.g. the message was sent.
    pub fn stop(&self) {
        let mut inner = lock(&self.shared.inner);
        self.shared.stop_local(&mut inner);
    }

    pub fn is_local_typing(&self) -> bool {
        lock(&self.shared.inner).local.is_some()
    }

    /// Inbound `user_typing` event.
    pub fn on_peer_typing(&self, conversation_id: &ConversationId, peer: &UserId, is_typing: bool) {
        if *peer == self.shared.user {
            return;
        }

        let mut inner = lock(&self.shared.inner);
        if inner.active.as_ref() != Some(conversation_id) {
            crate::log_debug!(%conversation_id, %peer, "typing event for inactive conversation ignored");
            return;
        }

        if let Some(previous) = inner.peers.remove(peer) {
            previous.decay_timer.abort();
        }

        if is_typing {
            let epoch = inner.epoch();
            let peer_key = peer.clone();
            let decay_timer = spawn_after(
                self.shared.config.decay_window,
                Arc::downgrade(&self.shared),
                move |shared| {
                    let mut inner = lock(&shared.inner);
                    if inner.peers.get(&peer_key).is_some_and(|p| p.epoch == epoch) {
                        inner.peers.remove(&peer_key);
                        drop(inner);
                        crate::log_debug!(peer = %peer_key, "typing indicator decayed");
                        shared.bump();
                    }
                },
            );
            inner.peers.insert(
                peer.clone(),
                PeerTyping {
                    refreshed_at: Instant::now(),
                    epoch,
                    decay_timer,
                },
            );
        }

        drop(inner);
        self.shared.bump();
    }

    /// Whether `peer` is typing in `conversation_id` right now.
    pub fn is_typing(&self, conversation_id: &ConversationId, peer: &UserId) -> bool {
        let inner = lock(&self.shared.inner);
        inner.active.as_ref() == Some(conversation_id)
            && inner
                .peers
                .get(peer)
                .is_some_and(|p| self.shared.is_fresh(p))
    }

    /// Peers currently typing in the active conversation.
    pub fn typing_peers(&self) -> Vec<UserId> {
        let inner = lock(&self.shared.inner);
        let mut peers: Vec<UserId> = inner
            .peers
            .iter()
            .filter(|(_, p)| self.shared.is_fresh(p))
            .map(|(id, _)| id.clone())
            .collect();
        peers.sort();
        peers
    }

    /// Revision counter, bumped whenever indicator state changes.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.shared.revision.subscribe()
    }
}

impl Shared {
    fn stop_local(&self, inner: &mut TypingInner) {
        if let Some(local) = inner.local.take() {
            local.idle_timer.abort();
            self.publish(ClientEvent::TypingStop {
                conversation_id: local.conversation_id,
                user_id: self.user.clone(),
            });
        }
    }

    fn is_fresh(&self, peer: &PeerTyping) -> bool {
        peer.refreshed_at.elapsed() < self.config.decay_window
    }

    fn publish(&self, event: ClientEvent) {
        if let Err(e) = self.sink.emit(event) {
            crate::log_debug!(error = %e, "typing signal not published");
        }
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }
}

fn spawn_after(
    delay: Duration,
    shared: Weak<Shared>,
    f: impl FnOnce(Arc<Shared>) + Send + 'static,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if let Some(shared) = shared.upgrade() {
            f(shared);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingSink;

    fn coordinator() -> (Arc<RecordingSink>, TypingCoordinator) {
        let sink = Arc::new(RecordingSink::connected());
        let typing = TypingCoordinator::new("me".into(), sink.clone(), TypingConfig::default());
        typing.set_active_conversation(Some("c1".into()));
        (sink, typing)
    }

    fn start() -> ClientEvent {
        ClientEvent::TypingStart {
            conversation_id: "c1".into(),
            user_id: "me".into(),
        }
    }

    fn stop() -> ClientEvent {
        ClientEvent::TypingStop {
            conversation_id: "c1".into(),
            user_id: "me".into(),
        }
    }

    async fn advance(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn keystrokes_are_coalesced() {
        let (sink, typing) = coordinator();
        for _ in 0..10 {
            typing.keystroke();
            advance(500).await;
        }
        assert_eq!(sink.events(), vec![start()]);

        advance(3_000).await;
        assert_eq!(sink.events(), vec![start(), stop()]);
        assert!(!typing.is_local_typing());

        typing.keystroke();
        assert_eq!(sink.events(), vec![start(), stop(), start()]);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_stop_cancels_idle_timer() {
        let (sink, typing) = coordinator();
        typing.keystroke();
        typing.stop();
        advance(10_000).await;
        assert_eq!(sink.events(), vec![start(), stop()]);
    }

    #[tokio::test(start_paused = true)]
    async fn peer_indicator_decays_without_refresh() {
        let (_sink, typing) = coordinator();
        let c1 = ConversationId::from("c1");
        let peer = UserId::from("u2");

        typing.on_peer_typing(&c1, &peer, true);
        assert!(typing.is_typing(&c1, &peer));

        advance(4_999).await;
        assert!(typing.is_typing(&c1, &peer));

        advance(1).await;
        assert!(!typing.is_typing(&c1, &peer));
        assert!(typing.typing_peers().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_extends_peer_indicator() {
        let (_sink, typing) = coordinator();
        let c1 = ConversationId::from("c1");
        let peer = UserId::from("u2");

        typing.on_peer_typing(&c1, &peer, true);
        advance(4_000).await;
        typing.on_peer_typing(&c1, &peer, true);
        advance(4_000).await;
        assert!(typing.is_typing(&c1, &peer));
        assert_eq!(typing.typing_peers(), vec![peer.clone()]);

        typing.on_peer_typing(&c1, &peer, false);
        assert!(!typing.is_typing(&c1, &peer));
    }

    #[tokio::test(start_paused = true)]
    async fn inactive_conversation_and_own_echo_are_ignored() {
        let (_sink, typing) = coordinator();
        typing.on_peer_typing(&"c2".into(), &"u2".into(), true);
        typing.on_peer_typing(&"c1".into(), &"me".into(), true);
        assert!(typing.typing_peers().is_empty());
        assert!(!typing.is_typing(&"c2".into(), &"u2".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn switching_conversation_stops_and_clears() {
        let (sink, typing) = coordinator();
        typing.keystroke();
        typing.on_peer_typing(&"c1".into(), &"u2".into(), true);

        typing.set_active_conversation(Some("c2".into()));
        assert_eq!(sink.events(), vec![start(), stop()]);
        assert!(typing.typing_peers().is_empty());
        assert!(!typing.is_local_typing());
    }

    #[tokio::test(start_paused = true)]
    async fn keystroke_without_conversation_does_nothing() {
        let sink = Arc::new(RecordingSink::connected());
        let typing = TypingCoordinator::new("me".into(), sink.clone(), TypingConfig::default());
        typing.keystroke();
        assert!(sink.events().is_empty());
    }
}
