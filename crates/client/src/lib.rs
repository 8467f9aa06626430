//! Chatsync Client - real-time conversation synchronization core
//!
//! Keeps a client's view of its conversations consistent while messages flow
//! over two channels at once: a persistent live channel for low-latency push
//! and a REST API for durable writes and history.
//!
//! Start with [`ChatSession`], which wires the pieces together:
//! [`ConnectionManager`](ws::ConnectionManager) and
//! [`RoomSubscriptionManager`](ws::RoomSubscriptionManager) for the live
//! channel, [`MessageStore`] and [`ConversationListCache`] for state,
//! [`SendPipeline`] for optimistic sends and [`TypingCoordinator`] for typing
//! indicators.

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod logging;

pub mod api_client;
pub mod auth_session;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod session;
pub mod stores;
pub mod typing;
pub mod ws;

#[cfg(test)]
pub(crate) mod testing;

pub use api_client::{ApiClient, ConversationApi};
pub use auth_session::{AuthSession, CurrentUser};
pub use config::ClientConfig;
pub use error::{Result, SendRejection, SyncError};
pub use pipeline::SendPipeline;
pub use session::ChatSession;
pub use stores::{ConversationListCache, MessageStore, SummaryUpdate};
pub use typing::{TypingConfig, TypingCoordinator};

/// Lock a mutex, recovering the data if a panicking holder poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
