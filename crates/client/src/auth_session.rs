//! Identity and credentials handed to the core at session start.
//!
//! The core never discovers the current user on its own; whoever performs
//! authentication resolves it once and passes an [`AuthSession`] in.

use chatsync_shared::UserId;
use serde::{Deserialize, Serialize};

/// The local user, resolved once by the auth collaborator.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: UserId,
    pub display_name: Option<String>,
}

impl CurrentUser {
    pub fn new(id: impl Into<UserId>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
        }
    }
}

/// Current user plus the bearer token used for both REST and the live channel.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthSession {
    pub user: CurrentUser,
    pub token: String,
}

impl AuthSession {
    pub fn new(user: CurrentUser, token: impl Into<String>) -> Self {
        Self {
            user,
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSession")
            .field("user", &self.user)
            .field("token", &"<redacted>")
            .finish()
    }
}

pub(crate) fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}
