//! Domain model structs exchanged between the core and its host.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to the UI layer or written to the durable log.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ConversationId, UserId};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// Reference to a user's avatar image.
///
/// The core never fetches or stores image bytes; it only carries the
/// reference through to the host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum AvatarRef {
    /// Host-resolvable URL of the avatar image.
    Url(String),
    /// No avatar uploaded; the host renders its default placeholder.
    Default,
}

/// A user's live online/offline status.
///
/// There are no intermediate states; transitions are only
/// `Online` ⇄ `Offline`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PresenceState {
    Online,
    Offline,
}

/// A known user profile, created on first authentication.
///
/// Users are never deleted, only deactivated, so messages from departed
/// participants stay renderable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    /// Stable identifier assigned by the host's authentication layer.
    pub id: UserId,
    /// Human-readable display name.
    pub display_name: String,
    /// Avatar reference (URL or default sentinel).
    pub avatar: AvatarRef,
    /// Current presence state.
    pub presence: PresenceState,
    /// When the user was last seen online.
    pub last_seen: DateTime<Utc>,
    /// `false` once the account has been deactivated.
    pub active: bool,
}

/// A single presence transition, as emitted to presence subscribers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresenceUpdate {
    /// The user whose state changed.
    pub user: UserId,
    /// The state after the transition.
    pub state: PresenceState,
    /// Last-seen timestamp stamped at the transition.
    pub last_seen: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// Whether a conversation is a two-party direct thread or a group.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConversationKind {
    Direct,
    Group,
}

/// Compact summary of a conversation's newest message, shown in list views.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageSummary {
    /// Sequence number of the summarized message.
    pub seq: u64,
    /// Who sent it.
    pub sender: UserId,
    /// Message body.
    pub body: String,
    /// When it was sent.
    pub sent_at: DateTime<Utc>,
}

/// A durable thread of messages between a fixed participant set.
///
/// Conversations are created on the first exchange between participants and
/// never physically deleted, only soft-archived.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conversation {
    /// Unique conversation identifier.
    pub id: ConversationId,
    /// Participants; exactly 2 for `Direct`, N for `Group`.
    pub participants: BTreeSet<UserId>,
    /// Direct or group.
    pub kind: ConversationKind,
    /// Summary of the newest message, `None` until the first message.
    pub last_message: Option<MessageSummary>,
    /// Timestamp of the newest message (creation time until then).
    pub last_activity: DateTime<Utc>,
    /// Messages not yet read, per participant.
    pub unread: BTreeMap<UserId, u64>,
    /// Soft-archive flag; archived conversations accept no new messages.
    pub archived: bool,
}

impl Conversation {
    /// Unread count for one participant (0 for non-participants).
    pub fn unread_for(&self, user: &UserId) -> u64 {
        self.unread.get(user).copied().unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Delivery lifecycle of a message.
///
/// `Pending` until the durable log acknowledges the append, `Sent` once
/// persisted, `Delivered` once at least one other participant's live
/// subscription has observed it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeliveryState {
    Pending,
    Sent,
    Delivered,
}

/// A single chat message.
///
/// Immutable once sent except for delivery-state transitions. The
/// per-conversation sequence number is strictly increasing and gap-free.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Monotonic sequence number within the conversation, starting at 1.
    pub seq: u64,
    /// The conversation this message belongs to.
    pub conversation: ConversationId,
    /// Sender; always a participant of the conversation.
    pub sender: UserId,
    /// Message body (non-empty).
    pub body: String,
    /// When the message was sequenced by the pipeline.
    pub sent_at: DateTime<Utc>,
    /// Current delivery state.
    pub delivery: DeliveryState,
}

impl Message {
    /// Summary form for conversation list views.
    pub fn summary(&self) -> MessageSummary {
        MessageSummary {
            seq: self.seq,
            sender: self.sender.clone(),
            body: self.body.clone(),
            sent_at: self.sent_at,
        }
    }
}
