//! Client-side state: the open conversation's messages and the conversation list.

pub mod conversations;
pub mod messages;

pub use conversations::{ConversationListCache, SummaryUpdate};
pub use messages::{ActiveTicket, ConversationLog, MessageStore};
