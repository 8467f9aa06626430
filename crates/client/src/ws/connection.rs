//! Live channel session with state management and auto-reconnect.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chatsync_shared::{ClientEvent, ServerEvent, WsEnvelope};
use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::listeners::{Listeners, Subscription};
use super::transport::{ConnectError, ConnectRequest, Link, Transport};
use crate::error::{Result, SyncError};
use crate::lock;

/// Connection state of the live channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    /// Terminal: credentials rejected or retries exhausted. Only an explicit
    /// `connect()` starts over.
    Failed { reason: String },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Reconnecting { .. }
        )
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ConnectionState::Failed { .. })
    }
}

/// Configuration for auto-reconnect behavior
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Maximum number of reconnect attempts (0 = infinite)
    pub max_attempts: u32,
    /// Initial delay in milliseconds
    pub initial_delay_ms: u64,
    /// Maximum delay in milliseconds
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl ReconnectConfig {
    /// Calculate delay for a given attempt number
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_millis((delay as u64).min(self.max_delay_ms))
    }

    fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts > 0 && attempt >= self.max_attempts
    }
}

/// Anything that can publish client events on the live channel.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ClientEvent) -> Result<()>;
}

/// Owns the one live-channel session of the process.
///
/// Cheap to clone; clones share the session. The application creates it once
/// and injects it into the components that publish or listen. Call
/// [`disconnect`](Self::disconnect) to tear the session down; a running
/// reconnect loop keeps it alive otherwise.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

struct Shared {
    transport: Arc<dyn Transport>,
    url: String,
    token: Mutex<String>,
    config: ReconnectConfig,
    state: watch::Sender<ConnectionState>,
    outbound: Mutex<Option<UnboundedSender<WsEnvelope<ClientEvent>>>>,
    driver: Mutex<Option<JoinHandle<()>>>,
    /// Bumped by every `connect`/`disconnect`; a driver only acts while its
    /// own value is current.
    session: AtomicU64,
    /// Why the last session ended in `Failed`.
    failure: Mutex<Option<SyncError>>,
    events: Listeners<ServerEvent>,
    state_listeners: Listeners<ConnectionState>,
}

impl ConnectionManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        url: impl Into<String>,
        token: impl Into<String>,
        config: ReconnectConfig,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            shared: Arc::new(Shared {
                transport,
                url: url.into(),
                token: Mutex::new(token.into()),
                config,
                state,
                outbound: Mutex::new(None),
                driver: Mutex::new(None),
                session: AtomicU64::new(0),
                failure: Mutex::new(None),
                events: Listeners::new(),
                state_listeners: Listeners::new(),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state.borrow().is_connected()
    }

    /// Receiver that observes every state transition.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Run `f` synchronously on every state transition.
    pub fn on_state_change(
        &self,
        f: impl Fn(&ConnectionState) + Send + Sync + 'static,
    ) -> Subscription {
        self.shared.state_listeners.subscribe(f)
    }

    /// Run `f` synchronously for every inbound server event.
    pub fn on_event(&self, f: impl Fn(&ServerEvent) + Send + Sync + 'static) -> Subscription {
        self.shared.events.subscribe(f)
    }

    /// The error behind the current `Failed` state: [`SyncError::Auth`] for
    /// rejected credentials, [`SyncError::Transport`] once retries ran out.
    pub fn failure(&self) -> Option<SyncError> {
        lock(&self.shared.failure).clone()
    }

    /// Replace the token used by the next connect attempt.
    pub fn update_token(&self, token: impl Into<String>) {
        *lock(&self.shared.token) = token.into();
    }

    /// Start the session. No-op while a session or reconnect loop is running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&self) {
        let mut driver = lock(&self.shared.driver);
        if driver.as_ref().is_some_and(|handle| !handle.is_finished()) {
            crate::log_debug!("connect() ignored, session already running");
            return;
        }

        let session = self.shared.session.fetch_add(1, Ordering::SeqCst) + 1;
        lock(&self.shared.failure).take();
        let (tx, rx) = unbounded();
        *lock(&self.shared.outbound) = Some(tx);
        *driver = Some(tokio::spawn(run(self.shared.clone(), session, rx)));
    }

    /// Tear the session down and cancel any pending reconnect.
    pub fn disconnect(&self) {
        self.shared.session.fetch_add(1, Ordering::SeqCst);
        if let Some(handle) = lock(&self.shared.driver).take() {
            handle.abort();
        }
        lock(&self.shared.outbound).take();
        self.shared.set_state(ConnectionState::Disconnected);
        crate::log_info!("live channel disconnected by client");
    }
}

impl EventSink for ConnectionManager {
    fn emit(&self, event: ClientEvent) -> Result<()> {
        if !self.is_connected() {
            return Err(self.failure().unwrap_or(SyncError::NotConnected));
        }
        let outbound = lock(&self.shared.outbound);
        let tx = outbound.as_ref().ok_or(SyncError::NotConnected)?;
        crate::log_debug!(event = event.name(), "publishing");
        tx.unbounded_send(WsEnvelope::new(event))
            .map_err(|_| SyncError::NotConnected)
    }
}

impl Shared {
    fn set_state(&self, next: ConnectionState) {
        self.apply_state(None, next);
    }

    /// Publish `next` on behalf of driver `session`. Returns false, leaving
    /// the state alone, once that session was superseded by `connect` or
    /// `disconnect`.
    fn transition(&self, session: u64, next: ConnectionState) -> bool {
        self.apply_state(Some(session), next)
    }

    fn is_current(&self, session: u64) -> bool {
        self.session.load(Ordering::SeqCst) == session
    }

    fn apply_state(&self, session: Option<u64>, next: ConnectionState) -> bool {
        let mut current = true;
        // The check runs under the watch lock, so it cannot interleave with
        // `disconnect` publishing `Disconnected`.
        let changed = self.state.send_if_modified(|state| {
            if session.is_some_and(|s| !self.is_current(s)) {
                current = false;
                return false;
            }
            if *state == next {
                false
            } else {
                *state = next.clone();
                true
            }
        });
        if changed {
            crate::log_info!(state = ?next, "connection state changed");
            self.state_listeners.emit(&next);
        }
        current
    }

    fn fail(&self, session: u64, error: SyncError) {
        if !self.is_current(session) {
            return;
        }
        let reason = error.to_string();
        *lock(&self.failure) = Some(error);
        self.transition(session, ConnectionState::Failed { reason });
    }

    fn connect_request(&self) -> ConnectRequest {
        ConnectRequest {
            url: self.url.clone(),
            token: lock(&self.token).clone(),
        }
    }
}

/// The session loop: connect, pump until the link drops, back off, repeat.
async fn run(
    shared: Arc<Shared>,
    session: u64,
    mut outbound: UnboundedReceiver<WsEnvelope<ClientEvent>>,
) {
    let mut attempt = 0u32;

    loop {
        let next = if attempt == 0 {
            ConnectionState::Connecting
        } else {
            ConnectionState::Reconnecting { attempt }
        };
        if !shared.transition(session, next) {
            return;
        }

        match shared.transport.connect(&shared.connect_request()).await {
            Ok(link) => {
                attempt = 0;
                discard_stale(&mut outbound);
                if !shared.transition(session, ConnectionState::Connected) {
                    return;
                }
                crate::log_info!(url = %shared.url, "live channel connected");

                pump(&shared, session, link, &mut outbound).await;

                if !shared.transition(session, ConnectionState::Disconnected) {
                    return;
                }
                crate::log_warn!(url = %shared.url, "live channel dropped");
            }
            Err(ConnectError::Auth(reason)) => {
                crate::log_error!(%reason, "live channel rejected credentials, not retrying");
                shared.fail(session, SyncError::Auth(reason));
                return;
            }
            Err(ConnectError::Transport(reason)) => {
                crate::log_warn!(attempt, %reason, "live channel connect failed");
                if !shared.transition(session, ConnectionState::Disconnected) {
                    return;
                }
            }
        }

        if shared.config.exhausted(attempt) {
            shared.fail(
                session,
                SyncError::Transport(format!("gave up after {attempt} reconnect attempts")),
            );
            return;
        }

        let delay = shared.config.delay_for_attempt(attempt);
        crate::log_info!(delay_ms = delay.as_millis() as u64, next_attempt = attempt + 1, "scheduling reconnect");
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

async fn pump(
    shared: &Shared,
    session: u64,
    link: Link,
    outbound: &mut UnboundedReceiver<WsEnvelope<ClientEvent>>,
) {
    let Link {
        outgoing,
        mut incoming,
    } = link;

    loop {
        tokio::select! {
            cmd = outbound.next() => match cmd {
                Some(envelope) => {
                    if outgoing.unbounded_send(envelope).is_err() {
                        break;
                    }
                }
                None => break,
            },
            event = incoming.next() => match event {
                Some(envelope) if shared.is_current(session) => {
                    shared.events.emit(&envelope.payload)
                }
                _ => break,
            },
        }
    }
}

/// Drop events queued while no link was up; rooms are re-joined on connect.
fn discard_stale(outbound: &mut UnboundedReceiver<WsEnvelope<ClientEvent>>) {
    let mut dropped = 0usize;
    while outbound.try_recv().is_ok() {
        dropped += 1;
    }
    if dropped > 0 {
        crate::log_debug!(dropped, "discarded events queued while disconnected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_is_bounded() {
        let cfg = ReconnectConfig::default();
        assert_eq!(cfg.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(cfg.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(cfg.delay_for_attempt(3), Duration::from_secs(8));
        assert_eq!(cfg.delay_for_attempt(20), Duration::from_secs(30));
    }

    #[test]
    fn zero_max_attempts_never_exhausts() {
        let cfg = ReconnectConfig {
            max_attempts: 0,
            ..Default::default()
        };
        assert!(!cfg.exhausted(1_000));
        assert!(ReconnectConfig::default().exhausted(5));
        assert!(!ReconnectConfig::default().exhausted(4));
    }

    use crate::testing::StalledTransport;

    fn stalled_manager() -> ConnectionManager {
        ConnectionManager::new(
            Arc::new(StalledTransport),
            "ws://test/ws",
            "t",
            ReconnectConfig::default(),
        )
    }

    #[tokio::test]
    async fn cancelled_driver_cannot_publish_state() {
        let manager = stalled_manager();
        manager.connect();
        let session = manager.shared.session.load(Ordering::SeqCst);
        tokio::task::yield_now().await;
        assert_eq!(manager.state(), ConnectionState::Connecting);

        manager.disconnect();
        assert!(!manager.shared.transition(session, ConnectionState::Connected));
        manager.shared.fail(session, SyncError::Auth("late".into()));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.failure().is_none());
    }

    #[tokio::test]
    async fn reconnect_supersedes_earlier_driver() {
        let manager = stalled_manager();
        manager.connect();
        let first = manager.shared.session.load(Ordering::SeqCst);
        manager.disconnect();
        manager.connect();
        let second = manager.shared.session.load(Ordering::SeqCst);

        assert!(!manager.shared.is_current(first));
        assert!(manager.shared.transition(second, ConnectionState::Connected));
        assert!(manager.is_connected());
        manager.disconnect();
    }

    #[test]
    fn state_predicates() {
        assert!(ConnectionState::Reconnecting { attempt: 2 }.is_connecting());
        assert!(ConnectionState::Connecting.is_connecting());
        assert!(!ConnectionState::Disconnected.is_connecting());
        assert!(ConnectionState::Failed { reason: "x".into() }.is_failed());
    }
}
