//! Shared types for the chatsync client core and anything that talks to it.

pub mod models;
pub mod protocol;
pub mod error;

pub use models::*;
pub use protocol::*;
pub use error::*;
