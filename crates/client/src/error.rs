//! Error taxonomy of the synchronization core.

use chatsync_shared::{ApiError, ConversationId};
use thiserror::Error;

/// Why a send was refused before anything was published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendRejection {
    #[error("message is empty")]
    EmptyContent,
    #[error("no conversation selected")]
    MissingConversation,
    #[error("no sender")]
    MissingSender,
    #[error("a send is already in flight")]
    InFlight,
}

#[derive(Debug, Clone, Error)]
pub enum SyncError {
    /// Connection dropped or could not be established. Recoverable.
    #[error("transport error: {0}")]
    Transport(String),

    /// Credentials rejected. Terminal until the token is refreshed.
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// Durable write failed; the optimistic entry was rolled back.
    #[error("send failed: {0}")]
    SendFailure(#[source] ApiError),

    /// A response arrived after its conversation stopped being active.
    #[error("stale response for conversation {conversation_id} discarded")]
    StaleContext { conversation_id: ConversationId },

    #[error("send rejected: {0}")]
    Rejected(#[from] SendRejection),

    /// A live-channel publish was attempted without a connected session.
    #[error("not connected")]
    NotConnected,

    /// REST read (history page, conversation list) failed.
    #[error(transparent)]
    Api(ApiError),
}

impl SyncError {
    pub fn is_stale(&self) -> bool {
        matches!(self, SyncError::StaleContext { .. })
    }

    pub fn is_auth(&self) -> bool {
        match self {
            SyncError::Auth(_) => true,
            SyncError::SendFailure(e) | SyncError::Api(e) => e.is_auth(),
            _ => false,
        }
    }
}

impl From<ApiError> for SyncError {
    fn from(err: ApiError) -> Self {
        SyncError::Api(err)
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
