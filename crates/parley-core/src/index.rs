//! Ordered per-user view of conversations.
//!
//! The index is updated by the delivery pipeline on every committed
//! message and queried by `list`. Applying the same message twice is a
//! no-op: each conversation remembers the highest sequence number already
//! applied.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use parley_shared::models::{Conversation, ConversationKind, Message};
use parley_shared::types::{ConversationId, UserId};

struct Entry {
    conversation: Conversation,
    /// Highest message seq already folded into this entry.
    applied_seq: u64,
}

/// In-memory conversation index.
#[derive(Default)]
pub struct ConversationIndex {
    entries: Mutex<HashMap<ConversationId, Entry>>,
}

impl ConversationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the direct conversation between two users.
    ///
    /// The id is derived from the ordered participant pair
    /// ([`ConversationId::direct`]), so `(a, b)` and `(b, a)` resolve to
    /// the same conversation, as does the same pair after a restart.
    pub fn open_direct(&self, a: &UserId, b: &UserId, now: DateTime<Utc>) -> ConversationId {
        let id = ConversationId::direct(a, b);
        {
            let entries = self.entries.lock().expect("index lock poisoned");
            if entries.contains_key(&id) {
                return id;
            }
        }
        let participants: BTreeSet<UserId> = [a.clone(), b.clone()].into_iter().collect();
        self.insert(id, participants, ConversationKind::Direct, now);
        id
    }

    /// Create a group conversation over the given participant set.
    pub fn open_group(
        &self,
        participants: BTreeSet<UserId>,
        now: DateTime<Utc>,
    ) -> ConversationId {
        let id = ConversationId::new();
        self.insert(id, participants, ConversationKind::Group, now);
        id
    }

    fn insert(
        &self,
        id: ConversationId,
        participants: BTreeSet<UserId>,
        kind: ConversationKind,
        now: DateTime<Utc>,
    ) {
        let unread = participants.iter().map(|p| (p.clone(), 0)).collect();
        let mut entries = self.entries.lock().expect("index lock poisoned");
        // entry() so a concurrent open of the same conversation cannot
        // clobber already-applied state.
        entries.entry(id).or_insert_with(|| {
            tracing::debug!(conversation = %id, ?kind, "conversation created");
            Entry {
                conversation: Conversation {
                    id,
                    participants,
                    kind,
                    last_message: None,
                    last_activity: now,
                    unread,
                    archived: false,
                },
                applied_seq: 0,
            }
        });
    }

    /// Fold one committed message into the index.
    ///
    /// Returns `false` (and changes nothing) when the message was already
    /// applied, so replays and duplicate notifications cannot double-count
    /// unread totals or reorder the list.
    pub fn on_message(&self, message: &Message) -> bool {
        let mut entries = self.entries.lock().expect("index lock poisoned");
        let Some(entry) = entries.get_mut(&message.conversation) else {
            tracing::warn!(
                conversation = %message.conversation,
                seq = message.seq,
                "message for unknown conversation ignored"
            );
            return false;
        };

        if message.seq <= entry.applied_seq {
            return false;
        }

        entry.applied_seq = message.seq;
        entry.conversation.last_message = Some(message.summary());
        entry.conversation.last_activity = message.sent_at;
        for (user, count) in entry.conversation.unread.iter_mut() {
            if *user != message.sender {
                *count += 1;
            }
        }
        true
    }

    /// All non-archived conversations the user participates in, ordered by
    /// last activity descending; equal timestamps break by conversation id
    /// ascending. Plain query — callers can re-run it at any time.
    pub fn list(&self, user: &UserId) -> Vec<Conversation> {
        let entries = self.entries.lock().expect("index lock poisoned");
        let mut conversations: Vec<Conversation> = entries
            .values()
            .filter(|e| !e.conversation.archived && e.conversation.participants.contains(user))
            .map(|e| e.conversation.clone())
            .collect();
        conversations.sort_by(|a, b| {
            b.last_activity
                .cmp(&a.last_activity)
                .then_with(|| a.id.cmp(&b.id))
        });
        conversations
    }

    pub fn get(&self, id: ConversationId) -> Option<Conversation> {
        let entries = self.entries.lock().expect("index lock poisoned");
        entries.get(&id).map(|e| e.conversation.clone())
    }

    /// Participant set of a conversation, if it exists.
    pub fn participants(&self, id: ConversationId) -> Option<BTreeSet<UserId>> {
        let entries = self.entries.lock().expect("index lock poisoned");
        entries.get(&id).map(|e| e.conversation.participants.clone())
    }

    /// Clear one participant's unread counter. Returns `false` for an
    /// unknown conversation.
    pub fn mark_read(&self, id: ConversationId, user: &UserId) -> bool {
        let mut entries = self.entries.lock().expect("index lock poisoned");
        let Some(entry) = entries.get_mut(&id) else {
            return false;
        };
        if let Some(count) = entry.conversation.unread.get_mut(user) {
            *count = 0;
        }
        true
    }

    /// Soft-archive a conversation. Returns `false` for an unknown id.
    pub fn archive(&self, id: ConversationId) -> bool {
        let mut entries = self.entries.lock().expect("index lock poisoned");
        let Some(entry) = entries.get_mut(&id) else {
            return false;
        };
        entry.conversation.archived = true;
        true
    }
}
