//! Live channel: transport session, listeners and room membership.
//!
//! # Architecture
//!
//! ```text
//!   ┌──────────────────────────────┐
//!   │      ConnectionManager       │  connect / disconnect / backoff
//!   │  (one per process, cloned)   │  state watch + listeners
//!   └──────────────────────────────┘
//!          │ Link (mpsc pair)   ▲ on_event / on_state_change
//!          ▼                    │
//!   ┌──────────────┐   ┌─────────────────────────┐
//!   │  Transport   │   │ RoomSubscriptionManager │  leave(A) → join(B)
//!   │ (WebSocket)  │   └─────────────────────────┘  re-join on Connected
//!   └──────────────┘
//! ```
//!
//! Inbound events are delivered to listeners synchronously on the session
//! task, so a listener's store mutation happens in the same step as the
//! event that triggered it.

mod connection;
mod listeners;
mod rooms;
mod transport;

pub use connection::{ConnectionManager, ConnectionState, EventSink, ReconnectConfig};
pub use listeners::{Listeners, Subscription};
pub use rooms::RoomSubscriptionManager;
pub use transport::{ConnectError, ConnectRequest, Link, Transport, WebSocketTransport};
