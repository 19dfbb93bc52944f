//! Fan-out of committed changes to live subscribers.
//!
//! Each topic keeps a registry of unbounded channel senders behind a
//! `std::sync::Mutex`; publishing never awaits, so the notification path
//! cannot block the write path. Receivers that have been dropped are
//! pruned lazily on the next publish. Delivery is at-least-once;
//! consumers must be idempotent.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use tokio::sync::mpsc;

use parley_shared::models::{Conversation, Message, PresenceUpdate};
use parley_shared::types::{ConversationId, UserId};

use crate::subscription::Subscription;

struct ConversationSub {
    owner: UserId,
    tx: mpsc::UnboundedSender<Message>,
}

/// Registry and dispatch point for all live subscriptions.
#[derive(Default)]
pub struct SubscriptionHub {
    conversation_subs: Mutex<HashMap<ConversationId, Vec<ConversationSub>>>,
    list_subs: Mutex<HashMap<UserId, Vec<mpsc::UnboundedSender<Vec<Conversation>>>>>,
    presence_subs: Mutex<HashMap<UserId, Vec<mpsc::UnboundedSender<PresenceUpdate>>>>,
}

impl SubscriptionHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to every message committed to a conversation, in order.
    /// The owner id attributes the subscription for delivered-state
    /// tracking.
    pub fn subscribe_conversation(
        &self,
        conversation: ConversationId,
        owner: UserId,
    ) -> Subscription<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subs = self.conversation_subs.lock().expect("hub lock poisoned");
        subs.entry(conversation)
            .or_default()
            .push(ConversationSub { owner, tx });
        Subscription::new(rx)
    }

    /// Subscribe to conversation-list snapshots for one user.
    pub fn subscribe_list(&self, user: UserId) -> Subscription<Vec<Conversation>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subs = self.list_subs.lock().expect("hub lock poisoned");
        subs.entry(user).or_default().push(tx);
        Subscription::new(rx)
    }

    /// Subscribe to presence transitions of one user.
    pub fn subscribe_presence(&self, user: UserId) -> Subscription<PresenceUpdate> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subs = self.presence_subs.lock().expect("hub lock poisoned");
        subs.entry(user).or_default().push(tx);
        Subscription::new(rx)
    }

    /// Fan a committed message out to the conversation's subscribers.
    ///
    /// Returns the number of *distinct participants other than the sender*
    /// whose live subscription observed the message; the pipeline uses it
    /// for the `Sent` → `Delivered` transition. A failed enqueue means the
    /// receiver is gone: the registration is dropped and dispatch
    /// continues with the rest.
    pub fn publish_message(&self, message: &Message, participants: &BTreeSet<UserId>) -> usize {
        let mut subs = self.conversation_subs.lock().expect("hub lock poisoned");
        let Some(entries) = subs.get_mut(&message.conversation) else {
            return 0;
        };

        entries.retain(|sub| match sub.tx.send(message.clone()) {
            Ok(()) => true,
            Err(_) => {
                tracing::debug!(
                    conversation = %message.conversation,
                    owner = %sub.owner,
                    "pruning cancelled conversation subscription"
                );
                false
            }
        });
        let observers: BTreeSet<UserId> = entries
            .iter()
            .filter(|sub| sub.owner != message.sender && participants.contains(&sub.owner))
            .map(|sub| sub.owner.clone())
            .collect();
        if entries.is_empty() {
            subs.remove(&message.conversation);
        }
        observers.len()
    }

    /// Push a fresh conversation-list snapshot to one user's subscribers.
    pub fn publish_list(&self, user: &UserId, snapshot: Vec<Conversation>) {
        let mut subs = self.list_subs.lock().expect("hub lock poisoned");
        let Some(entries) = subs.get_mut(user) else {
            return;
        };
        entries.retain(|tx| tx.send(snapshot.clone()).is_ok());
        if entries.is_empty() {
            subs.remove(user);
        }
    }

    /// Push a presence transition to the user's presence subscribers.
    pub fn publish_presence(&self, update: &PresenceUpdate) {
        let mut subs = self.presence_subs.lock().expect("hub lock poisoned");
        let Some(entries) = subs.get_mut(&update.user) else {
            return;
        };
        entries.retain(|tx| tx.send(update.clone()).is_ok());
        if entries.is_empty() {
            subs.remove(&update.user);
        }
    }

    /// Terminate every live subscription (host shutdown). Subscribers
    /// observe `SubscriptionClosed` on their next `recv`.
    pub fn close_all(&self) {
        self.conversation_subs
            .lock()
            .expect("hub lock poisoned")
            .clear();
        self.list_subs.lock().expect("hub lock poisoned").clear();
        self.presence_subs.lock().expect("hub lock poisoned").clear();
    }
}
