//! The durable log contract the core writes through.

use parley_shared::models::Message;
use parley_shared::types::ConversationId;

use crate::error::Result;

/// Append-only per-conversation message log.
///
/// Durability is at-least-once: an `Ok` from [`append`](Self::append) means
/// the message will survive a restart; a retried append of the same
/// `(conversation, seq)` pair must not produce a duplicate on read-back.
/// [`read_all`](Self::read_all) returns messages ordered by sequence number
/// ascending.
pub trait MessageLog: Send + Sync {
    /// Durably append one message to a conversation's log.
    fn append(&self, conversation: ConversationId, message: &Message) -> Result<()>;

    /// Read back every message of a conversation, ordered by `seq` ascending.
    /// An unknown conversation yields an empty vec.
    fn read_all(&self, conversation: ConversationId) -> Result<Vec<Message>>;
}
