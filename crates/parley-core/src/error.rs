use parley_shared::types::{ConversationId, UserId};
use parley_store::StoreError;
use thiserror::Error;

/// Errors surfaced by the core to its host.
#[derive(Error, Debug)]
pub enum CoreError {
    /// The sender is not a participant of the target conversation.
    /// Never retried.
    #[error("User {0} is not a participant of the conversation")]
    InvalidParticipant(UserId),

    /// Empty (or whitespace-only) message body. Never retried.
    #[error("Message body must not be empty")]
    EmptyBody,

    /// The durable log kept failing after the bounded retry budget.
    /// The message remains `Pending` and can be re-driven with
    /// `retry_pending`.
    #[error("Persistence unavailable after {attempts} attempts: {source}")]
    PersistenceUnavailable {
        attempts: u32,
        #[source]
        source: StoreError,
    },

    /// No conversation with this id exists in the index.
    #[error("Conversation not found: {0}")]
    ConversationNotFound(ConversationId),

    /// The conversation is soft-archived and accepts no new messages.
    #[error("Conversation is archived: {0}")]
    ConversationArchived(ConversationId),

    /// Emitted once to a subscriber whose stream was terminated by the
    /// host (core shutdown), as opposed to the subscriber cancelling.
    #[error("Subscription closed by host")]
    SubscriptionClosed,

    /// The user directory does not know this id.
    #[error("Unknown user: {0}")]
    UnknownUser(UserId),

    /// A conversation needs at least two distinct participants.
    #[error("Too few participants for a conversation")]
    TooFewParticipants,

    /// Non-retried store error (e.g. reading history).
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CoreError>;
