//! The facade a host wires its UI shell to.
//!
//! `ChatCore` assembles the index, hub, presence tracker and delivery
//! pipeline over a caller-supplied durable log and user directory, and
//! owns the background presence sweeper. All session context is explicit:
//! every call names the acting user, there is no ambient "current user".

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;

use parley_shared::directory::UserDirectory;
use parley_shared::models::{Conversation, Message, PresenceUpdate, User};
use parley_shared::types::{ConversationId, UserId};
use parley_store::MessageLog;

use crate::config::CoreConfig;
use crate::delivery::DeliveryPipeline;
use crate::error::{CoreError, Result};
use crate::hub::SubscriptionHub;
use crate::index::ConversationIndex;
use crate::presence::PresenceTracker;
use crate::subscription::Subscription;

/// Presence-aware conversation delivery core.
pub struct ChatCore<L: MessageLog> {
    directory: Arc<dyn UserDirectory>,
    index: Arc<ConversationIndex>,
    hub: Arc<SubscriptionHub>,
    presence: Arc<PresenceTracker>,
    pipeline: DeliveryPipeline<L>,
    sweeper: JoinHandle<()>,
}

impl<L: MessageLog> ChatCore<L> {
    /// Build the core over a durable log and a user directory.
    ///
    /// Must run inside a tokio runtime: the presence sweeper is spawned
    /// here and aborted when the core is dropped.
    pub fn new(log: L, directory: Arc<dyn UserDirectory>, config: CoreConfig) -> Self {
        let log = Arc::new(log);
        let index = Arc::new(ConversationIndex::new());
        let hub = Arc::new(SubscriptionHub::new());
        let presence = Arc::new(PresenceTracker::new(hub.clone(), config.heartbeat_timeout));
        let sweeper = PresenceTracker::spawn_sweeper(presence.clone(), config.sweep_interval);
        let pipeline = DeliveryPipeline::new(log, index.clone(), hub.clone(), config);

        Self {
            directory,
            index,
            hub,
            presence,
            pipeline,
            sweeper,
        }
    }

    // -- conversations ------------------------------------------------------

    /// Get or create the direct conversation between two users. Both must
    /// be known to the directory.
    pub fn open_direct(&self, a: &UserId, b: &UserId) -> Result<ConversationId> {
        if a == b {
            return Err(CoreError::TooFewParticipants);
        }
        self.require_user(a)?;
        self.require_user(b)?;

        let id = self.index.open_direct(a, b, Utc::now());
        for user in [a, b] {
            self.hub.publish_list(user, self.index.list(user));
        }
        Ok(id)
    }

    /// Create a group conversation. Duplicate ids are collapsed; at least
    /// two distinct known users are required.
    pub fn open_group(&self, participants: &[UserId]) -> Result<ConversationId> {
        let set: BTreeSet<UserId> = participants.iter().cloned().collect();
        if set.len() < 2 {
            return Err(CoreError::TooFewParticipants);
        }
        for user in &set {
            self.require_user(user)?;
        }

        let id = self.index.open_group(set.clone(), Utc::now());
        for user in &set {
            self.hub.publish_list(user, self.index.list(user));
        }
        Ok(id)
    }

    /// Conversations the user participates in, newest activity first.
    pub fn list(&self, user: &UserId) -> Vec<Conversation> {
        self.index.list(user)
    }

    /// One conversation by id.
    pub fn conversation(&self, id: ConversationId) -> Result<Conversation> {
        self.index
            .get(id)
            .ok_or(CoreError::ConversationNotFound(id))
    }

    /// Full persisted history of a conversation, seq ascending. Used for
    /// cold loads when a conversation screen opens.
    pub fn history(&self, conversation: ConversationId) -> Result<Vec<Message>> {
        self.pipeline.history(conversation)
    }

    /// Clear the user's unread counter and push them a fresh list snapshot.
    pub fn mark_read(&self, conversation: ConversationId, user: &UserId) -> Result<()> {
        if !self.index.mark_read(conversation, user) {
            return Err(CoreError::ConversationNotFound(conversation));
        }
        self.hub.publish_list(user, self.index.list(user));
        Ok(())
    }

    /// Soft-archive a conversation; it disappears from lists but its
    /// history remains readable.
    pub fn archive(&self, conversation: ConversationId) -> Result<()> {
        let conv = self.conversation(conversation)?;
        if !self.index.archive(conversation) {
            return Err(CoreError::ConversationNotFound(conversation));
        }
        for user in &conv.participants {
            self.hub.publish_list(user, self.index.list(user));
        }
        Ok(())
    }

    // -- messaging ----------------------------------------------------------

    /// Send a message. See [`DeliveryPipeline::send`] for the validation
    /// and retry contract.
    pub async fn send(
        &self,
        conversation: ConversationId,
        sender: &UserId,
        body: &str,
    ) -> Result<Message> {
        self.pipeline.send(conversation, sender, body).await
    }

    /// Re-drive messages left `Pending` by an earlier
    /// `PersistenceUnavailable`.
    pub async fn retry_pending(&self, conversation: ConversationId) -> Result<Vec<Message>> {
        self.pipeline.retry_pending(conversation).await
    }

    // -- subscriptions ------------------------------------------------------

    /// Live conversation-list snapshots for one user.
    pub fn subscribe_conversation_list(&self, user: &UserId) -> Subscription<Vec<Conversation>> {
        self.hub.subscribe_list(user.clone())
    }

    /// Live message feed of one conversation, attributed to the viewing
    /// user for delivered-state tracking.
    pub fn subscribe_conversation(
        &self,
        conversation: ConversationId,
        viewer: &UserId,
    ) -> Result<Subscription<Message>> {
        if self.index.get(conversation).is_none() {
            return Err(CoreError::ConversationNotFound(conversation));
        }
        Ok(self.hub.subscribe_conversation(conversation, viewer.clone()))
    }

    /// Live presence transitions of one user.
    pub fn subscribe_presence(&self, user: &UserId) -> Subscription<PresenceUpdate> {
        self.hub.subscribe_presence(user.clone())
    }

    // -- presence -----------------------------------------------------------

    pub fn connect(&self, user: &UserId) {
        self.presence.connect(user);
    }

    pub fn disconnect(&self, user: &UserId) {
        self.presence.disconnect(user);
    }

    pub fn heartbeat(&self, user: &UserId) {
        self.presence.heartbeat(user);
    }

    /// Resolve a profile through the directory, overlaid with the live
    /// presence state the tracker holds.
    pub fn resolve_user(&self, id: &UserId) -> Option<User> {
        let mut user = self.directory.resolve_user(id)?;
        user.presence = self.presence.state(id);
        if let Some(last_seen) = self.presence.last_seen(id) {
            user.last_seen = last_seen;
        }
        Some(user)
    }

    // -- lifecycle ----------------------------------------------------------

    /// Terminate every live subscription and stop the sweeper. Subscribers
    /// observe `SubscriptionClosed` on their next `recv`.
    pub fn shutdown(&self) {
        tracing::info!("core shutting down, closing subscriptions");
        self.sweeper.abort();
        self.hub.close_all();
    }

    fn require_user(&self, id: &UserId) -> Result<()> {
        self.directory
            .resolve_user(id)
            .map(|_| ())
            .ok_or_else(|| CoreError::UnknownUser(id.clone()))
    }
}

impl<L: MessageLog> Drop for ChatCore<L> {
    fn drop(&mut self) {
        self.sweeper.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_shared::directory::InMemoryDirectory;
    use parley_shared::models::PresenceState;
    use parley_store::MemoryLog;

    fn core_with_users(users: &[&str]) -> ChatCore<MemoryLog> {
        let directory = Arc::new(InMemoryDirectory::new());
        for name in users {
            directory.register(UserId::from(*name), name.to_string());
        }
        ChatCore::new(MemoryLog::new(), directory, CoreConfig::default())
    }

    #[tokio::test]
    async fn two_sends_update_list_and_stream_in_order() {
        let core = core_with_users(&["alice", "bob"]);
        let alice = UserId::from("alice");
        let bob = UserId::from("bob");

        let conv = core.open_direct(&alice, &bob).unwrap();
        let mut bob_stream = core.subscribe_conversation(conv, &bob).unwrap();

        core.send(conv, &alice, "hi").await.unwrap();
        core.send(conv, &alice, "there").await.unwrap();

        // The conversation list shows the newest message.
        let list = core.list(&alice);
        assert_eq!(list.len(), 1);
        let last = list[0].last_message.as_ref().unwrap();
        assert_eq!(last.body, "there");
        assert_eq!(last.seq, 2);
        assert_eq!(list[0].last_activity, last.sent_at);

        // The live stream emitted both messages in commit order.
        assert_eq!(bob_stream.recv().await.unwrap().body, "hi");
        assert_eq!(bob_stream.recv().await.unwrap().body, "there");
    }

    #[tokio::test]
    async fn list_subscription_snapshots_track_every_change() {
        let core = core_with_users(&["alice", "bob"]);
        let alice = UserId::from("alice");
        let bob = UserId::from("bob");

        let mut alice_lists = core.subscribe_conversation_list(&alice);
        let conv = core.open_direct(&alice, &bob).unwrap();

        // Snapshot from conversation creation.
        let snapshot = alice_lists.recv().await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot[0].last_message.is_none());

        core.send(conv, &bob, "knock knock").await.unwrap();
        let snapshot = alice_lists.recv().await.unwrap();
        assert_eq!(snapshot[0].unread_for(&alice), 1);

        core.mark_read(conv, &alice).unwrap();
        let snapshot = alice_lists.recv().await.unwrap();
        assert_eq!(snapshot[0].unread_for(&alice), 0);
    }

    #[tokio::test]
    async fn open_direct_requires_known_distinct_users() {
        let core = core_with_users(&["alice"]);
        let alice = UserId::from("alice");

        assert!(matches!(
            core.open_direct(&alice, &UserId::from("nobody")),
            Err(CoreError::UnknownUser(_))
        ));
        assert!(matches!(
            core.open_direct(&alice, &alice),
            Err(CoreError::TooFewParticipants)
        ));
    }

    #[tokio::test]
    async fn group_conversation_fans_out_to_all_other_participants() {
        let core = core_with_users(&["alice", "bob", "carol"]);
        let alice = UserId::from("alice");
        let bob = UserId::from("bob");
        let carol = UserId::from("carol");

        let conv = core
            .open_group(&[alice.clone(), bob.clone(), carol.clone()])
            .unwrap();
        let mut bob_stream = core.subscribe_conversation(conv, &bob).unwrap();
        let mut carol_stream = core.subscribe_conversation(conv, &carol).unwrap();

        let msg = core.send(conv, &alice, "hello all").await.unwrap();
        assert_eq!(msg.delivery, parley_shared::models::DeliveryState::Delivered);
        assert_eq!(bob_stream.recv().await.unwrap().body, "hello all");
        assert_eq!(carol_stream.recv().await.unwrap().body, "hello all");
    }

    #[tokio::test]
    async fn resolve_user_overlays_live_presence() {
        let core = core_with_users(&["alice"]);
        let alice = UserId::from("alice");

        assert_eq!(
            core.resolve_user(&alice).unwrap().presence,
            PresenceState::Offline
        );

        core.connect(&alice);
        assert_eq!(
            core.resolve_user(&alice).unwrap().presence,
            PresenceState::Online
        );

        core.disconnect(&alice);
        let user = core.resolve_user(&alice).unwrap();
        assert_eq!(user.presence, PresenceState::Offline);
    }

    #[tokio::test]
    async fn archive_hides_conversation_but_keeps_history() {
        let core = core_with_users(&["alice", "bob"]);
        let alice = UserId::from("alice");
        let bob = UserId::from("bob");

        let conv = core.open_direct(&alice, &bob).unwrap();
        core.send(conv, &alice, "before archive").await.unwrap();
        core.archive(conv).unwrap();

        assert!(core.list(&alice).is_empty());
        assert_eq!(core.history(conv).unwrap().len(), 1);
        assert!(matches!(
            core.send(conv, &alice, "after").await,
            Err(CoreError::ConversationArchived(_))
        ));
    }

    #[tokio::test]
    async fn shutdown_surfaces_subscription_closed_once() {
        let core = core_with_users(&["alice", "bob"]);
        let alice = UserId::from("alice");

        let mut sub = core.subscribe_presence(&alice);
        core.shutdown();

        assert!(matches!(
            sub.recv().await,
            Err(CoreError::SubscriptionClosed)
        ));
    }
}
