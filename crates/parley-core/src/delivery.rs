//! Outbound message pipeline: validate, sequence, persist, fan out.
//!
//! Each conversation has its own write state behind an async mutex;
//! sequence allocation, the durable append, and the index update happen
//! inside that critical section, so writes for one conversation are
//! serialized while different conversations proceed independently. A
//! failed append leaves the message `Pending` in the conversation's retry
//! queue; `retry_pending` re-drives it without breaking the gap-free
//! sequence.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio::sync::Mutex as AsyncMutex;

use parley_shared::models::{DeliveryState, Message};
use parley_shared::types::{ConversationId, UserId};
use parley_store::{MessageLog, StoreError};

use crate::config::CoreConfig;
use crate::error::{CoreError, Result};
use crate::hub::SubscriptionHub;
use crate::index::ConversationIndex;

struct WriteState {
    /// Next sequence number to allocate; seeded from the log on first use.
    next_seq: u64,
    recovered: bool,
    /// Messages whose append exhausted the retry budget, in seq order.
    pending: Vec<Message>,
}

/// The write path of the core.
pub struct DeliveryPipeline<L: MessageLog> {
    log: Arc<L>,
    index: Arc<ConversationIndex>,
    hub: Arc<SubscriptionHub>,
    config: CoreConfig,
    states: Mutex<HashMap<ConversationId, Arc<AsyncMutex<WriteState>>>>,
}

impl<L: MessageLog> DeliveryPipeline<L> {
    pub fn new(
        log: Arc<L>,
        index: Arc<ConversationIndex>,
        hub: Arc<SubscriptionHub>,
        config: CoreConfig,
    ) -> Self {
        Self {
            log,
            index,
            hub,
            config,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Send one message.
    ///
    /// Validation failures (`InvalidParticipant`, `EmptyBody`,
    /// `ConversationNotFound`, `ConversationArchived`) surface immediately
    /// and are never retried. A transient append failure is retried with
    /// exponential backoff up to the configured budget; once exhausted the
    /// message stays `Pending` and `PersistenceUnavailable` is returned.
    pub async fn send(
        &self,
        conversation: ConversationId,
        sender: &UserId,
        body: &str,
    ) -> Result<Message> {
        let conv = self
            .index
            .get(conversation)
            .ok_or(CoreError::ConversationNotFound(conversation))?;
        if conv.archived {
            return Err(CoreError::ConversationArchived(conversation));
        }
        if !conv.participants.contains(sender) {
            return Err(CoreError::InvalidParticipant(sender.clone()));
        }
        if body.trim().is_empty() {
            return Err(CoreError::EmptyBody);
        }

        let state = self.write_state(conversation);
        let mut guard = state.lock().await;
        self.ensure_recovered(conversation, &mut guard)?;

        let seq = guard.next_seq;
        guard.next_seq += 1;

        let mut message = Message {
            seq,
            conversation,
            sender: sender.clone(),
            body: body.to_string(),
            sent_at: Utc::now(),
            delivery: DeliveryState::Pending,
        };

        if let Err((attempts, source)) = self.append_with_retry(conversation, &message).await {
            // The seq stays allocated; the message keeps it through the
            // explicit retry so the sequence never develops a gap.
            guard.pending.push(message);
            return Err(CoreError::PersistenceUnavailable { attempts, source });
        }

        message.delivery = DeliveryState::Sent;
        self.index.on_message(&message);
        drop(guard);

        self.fan_out(&mut message, &conv.participants);
        Ok(message)
    }

    /// Re-drive a conversation's `Pending` messages after the caller was
    /// told the store was unavailable. Returns the messages that made it
    /// to `Sent` (or further) this time.
    pub async fn retry_pending(&self, conversation: ConversationId) -> Result<Vec<Message>> {
        let conv = self
            .index
            .get(conversation)
            .ok_or(CoreError::ConversationNotFound(conversation))?;

        let state = self.write_state(conversation);
        let mut guard = state.lock().await;

        let queued = std::mem::take(&mut guard.pending);
        let mut recovered = Vec::new();
        let mut failed: Option<CoreError> = None;

        for (i, mut message) in queued.iter().cloned().enumerate() {
            match self.append_with_retry(conversation, &message).await {
                Ok(()) => {
                    message.delivery = DeliveryState::Sent;
                    self.index.on_message(&message);
                    recovered.push(message);
                }
                Err((attempts, source)) => {
                    // Put this one and everything after it back, in order.
                    guard.pending = queued[i..].to_vec();
                    failed = Some(CoreError::PersistenceUnavailable { attempts, source });
                    break;
                }
            }
        }
        drop(guard);

        for message in recovered.iter_mut() {
            self.fan_out(message, &conv.participants);
        }

        match failed {
            Some(err) if recovered.is_empty() => Err(err),
            // Partial progress is still progress; the rest stays queued.
            _ => Ok(recovered),
        }
    }

    /// Number of messages awaiting explicit retry for a conversation.
    pub async fn pending_count(&self, conversation: ConversationId) -> usize {
        let state = self.write_state(conversation);
        let guard = state.lock().await;
        guard.pending.len()
    }

    /// Full message history from the durable log, seq ascending.
    pub fn history(&self, conversation: ConversationId) -> Result<Vec<Message>> {
        if self.index.get(conversation).is_none() {
            return Err(CoreError::ConversationNotFound(conversation));
        }
        Ok(self.log.read_all(conversation)?)
    }

    fn write_state(&self, conversation: ConversationId) -> Arc<AsyncMutex<WriteState>> {
        let mut states = self.states.lock().expect("pipeline lock poisoned");
        states
            .entry(conversation)
            .or_insert_with(|| {
                Arc::new(AsyncMutex::new(WriteState {
                    next_seq: 1,
                    recovered: false,
                    pending: Vec::new(),
                }))
            })
            .clone()
    }

    /// Seed the next sequence number from the durable log the first time a
    /// conversation is written to, so sequences stay gap-free across
    /// restarts.
    fn ensure_recovered(&self, conversation: ConversationId, state: &mut WriteState) -> Result<()> {
        if state.recovered {
            return Ok(());
        }
        let existing = self.log.read_all(conversation).map_err(|source| {
            CoreError::PersistenceUnavailable { attempts: 1, source }
        })?;
        if let Some(last) = existing.last() {
            state.next_seq = last.seq + 1;
            tracing::debug!(
                conversation = %conversation,
                next_seq = state.next_seq,
                "recovered sequence state from log"
            );
        }
        state.recovered = true;
        Ok(())
    }

    async fn append_with_retry(
        &self,
        conversation: ConversationId,
        message: &Message,
    ) -> std::result::Result<(), (u32, StoreError)> {
        let max_attempts = self.config.append_max_attempts.max(1);
        for attempt in 1..=max_attempts {
            match self.log.append(conversation, message) {
                Ok(()) => return Ok(()),
                Err(e) if attempt == max_attempts => {
                    tracing::error!(
                        conversation = %conversation,
                        seq = message.seq,
                        attempts = attempt,
                        error = %e,
                        "append failed, retry budget exhausted"
                    );
                    return Err((attempt, e));
                }
                Err(e) => {
                    let delay = self.backoff_delay(attempt);
                    tracing::warn!(
                        conversation = %conversation,
                        seq = message.seq,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "append failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
        unreachable!("loop returns on the final attempt")
    }

    /// Exponential backoff with jitter: base doubled per attempt, capped.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.config.append_backoff_base.as_millis() as u64;
        let cap = self.config.append_backoff_cap.as_millis() as u64;
        let exp = base.saturating_mul(1u64 << attempt.saturating_sub(1).min(16)).min(cap);
        let jitter = if base > 0 {
            rand::thread_rng().gen_range(0..=base)
        } else {
            0
        };
        Duration::from_millis(exp + jitter)
    }

    /// Notification path: fan the committed message out and publish fresh
    /// list snapshots. Runs outside the conversation critical section and
    /// never blocks on subscribers.
    fn fan_out(&self, message: &mut Message, participants: &std::collections::BTreeSet<UserId>) {
        let observers = self.hub.publish_message(message, participants);
        if observers > 0 {
            message.delivery = DeliveryState::Delivered;
        }
        for participant in participants {
            self.hub
                .publish_list(participant, self.index.list(participant));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use parley_store::{MemoryLog, Result as StoreResult};

    /// Log that fails the next N appends before delegating to memory.
    struct FlakyLog {
        inner: MemoryLog,
        failures_left: AtomicU32,
    }

    impl FlakyLog {
        fn failing(n: u32) -> Self {
            Self {
                inner: MemoryLog::new(),
                failures_left: AtomicU32::new(n),
            }
        }

        fn heal(&self) {
            self.failures_left.store(0, Ordering::SeqCst);
        }
    }

    impl MessageLog for FlakyLog {
        fn append(&self, conversation: ConversationId, message: &Message) -> StoreResult<()> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(StoreError::Unavailable("injected failure".into()));
            }
            self.inner.append(conversation, message)
        }

        fn read_all(&self, conversation: ConversationId) -> StoreResult<Vec<Message>> {
            self.inner.read_all(conversation)
        }
    }

    fn fast_config() -> CoreConfig {
        CoreConfig {
            append_backoff_base: Duration::from_millis(1),
            append_backoff_cap: Duration::from_millis(4),
            ..CoreConfig::default()
        }
    }

    fn pipeline<L: MessageLog>(log: L) -> (Arc<ConversationIndex>, Arc<SubscriptionHub>, DeliveryPipeline<L>) {
        let index = Arc::new(ConversationIndex::new());
        let hub = Arc::new(SubscriptionHub::new());
        let pipeline = DeliveryPipeline::new(Arc::new(log), index.clone(), hub.clone(), fast_config());
        (index, hub, pipeline)
    }

    fn alice() -> UserId {
        UserId::from("alice")
    }

    fn bob() -> UserId {
        UserId::from("bob")
    }

    #[tokio::test]
    async fn sequences_are_strictly_increasing_and_gap_free() {
        let (index, _hub, pipeline) = pipeline(MemoryLog::new());
        let conv = index.open_direct(&alice(), &bob(), Utc::now());

        for i in 1..=5u64 {
            let msg = pipeline.send(conv, &alice(), &format!("m{i}")).await.unwrap();
            assert_eq!(msg.seq, i);
        }

        let seqs: Vec<u64> = pipeline
            .history(conv)
            .unwrap()
            .iter()
            .map(|m| m.seq)
            .collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn validation_errors_surface_immediately() {
        let (index, _hub, pipeline) = pipeline(MemoryLog::new());
        let conv = index.open_direct(&alice(), &bob(), Utc::now());

        assert!(matches!(
            pipeline.send(conv, &UserId::from("mallory"), "hi").await,
            Err(CoreError::InvalidParticipant(_))
        ));
        assert!(matches!(
            pipeline.send(conv, &alice(), "   ").await,
            Err(CoreError::EmptyBody)
        ));
        assert!(matches!(
            pipeline.send(ConversationId::new(), &alice(), "hi").await,
            Err(CoreError::ConversationNotFound(_))
        ));
    }

    #[tokio::test]
    async fn archived_conversation_rejects_sends() {
        let (index, _hub, pipeline) = pipeline(MemoryLog::new());
        let conv = index.open_direct(&alice(), &bob(), Utc::now());
        index.archive(conv);

        assert!(matches!(
            pipeline.send(conv, &alice(), "hi").await,
            Err(CoreError::ConversationArchived(_))
        ));
    }

    #[tokio::test]
    async fn transient_failures_within_budget_end_in_sent() {
        // Fails 3 times, succeeds on the 4th attempt; budget is 4.
        let (index, _hub, pipeline) = pipeline(FlakyLog::failing(3));
        let conv = index.open_direct(&alice(), &bob(), Utc::now());

        let msg = pipeline.send(conv, &alice(), "eventually").await.unwrap();
        assert_eq!(msg.delivery, DeliveryState::Sent);
        assert_eq!(pipeline.history(conv).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_leave_message_pending_for_explicit_retry() {
        let (index, _hub, pipeline) = pipeline(FlakyLog::failing(100));
        let conv = index.open_direct(&alice(), &bob(), Utc::now());

        let err = pipeline.send(conv, &alice(), "stuck").await.unwrap_err();
        assert!(matches!(err, CoreError::PersistenceUnavailable { attempts: 4, .. }));
        assert_eq!(pipeline.pending_count(conv).await, 1);

        // A later send still allocates the next seq; no gap once the
        // pending message lands.
        let err = pipeline.send(conv, &alice(), "also stuck").await.unwrap_err();
        assert!(matches!(err, CoreError::PersistenceUnavailable { .. }));

        // Store heals; the explicit retry drains the queue in order.
        pipeline.log.heal();
        let recovered = pipeline.retry_pending(conv).await.unwrap();
        assert_eq!(
            recovered.iter().map(|m| m.seq).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert_eq!(pipeline.pending_count(conv).await, 0);

        let next = pipeline.send(conv, &alice(), "moving again").await.unwrap();
        assert_eq!(next.seq, 3);

        let seqs: Vec<u64> = pipeline
            .history(conv)
            .unwrap()
            .iter()
            .map(|m| m.seq)
            .collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn message_is_delivered_once_another_participant_observes_it() {
        let (index, hub, pipeline) = pipeline(MemoryLog::new());
        let conv = index.open_direct(&alice(), &bob(), Utc::now());

        // No subscribers yet: Sent, not Delivered.
        let msg = pipeline.send(conv, &alice(), "anyone there?").await.unwrap();
        assert_eq!(msg.delivery, DeliveryState::Sent);

        let mut bob_sub = hub.subscribe_conversation(conv, bob());
        let msg = pipeline.send(conv, &alice(), "now?").await.unwrap();
        assert_eq!(msg.delivery, DeliveryState::Delivered);
        assert_eq!(bob_sub.recv().await.unwrap().body, "now?");

        // The sender's own subscription does not count as delivery.
        drop(bob_sub);
        let _alice_sub = hub.subscribe_conversation(conv, alice());
        let msg = pipeline.send(conv, &alice(), "echo").await.unwrap();
        assert_eq!(msg.delivery, DeliveryState::Sent);
    }

    #[tokio::test]
    async fn sequence_state_recovers_from_the_log_across_restarts() {
        let log = Arc::new(MemoryLog::new());
        let index = Arc::new(ConversationIndex::new());
        let hub = Arc::new(SubscriptionHub::new());
        let conv = index.open_direct(&alice(), &bob(), Utc::now());
        {
            let pipeline =
                DeliveryPipeline::new(log.clone(), index.clone(), hub.clone(), fast_config());
            pipeline.send(conv, &alice(), "one").await.unwrap();
            pipeline.send(conv, &alice(), "two").await.unwrap();
        }

        // Fresh pipeline and index over the same log, as after a restart.
        let index2 = Arc::new(ConversationIndex::new());
        let conv2 = index2.open_direct(&alice(), &bob(), Utc::now());
        assert_eq!(conv, conv2);

        let pipeline2 = DeliveryPipeline::new(log, index2, Arc::new(SubscriptionHub::new()), fast_config());
        let msg = pipeline2.send(conv2, &alice(), "three").await.unwrap();
        assert_eq!(msg.seq, 3);
    }

    #[tokio::test]
    async fn cancelled_subscriber_does_not_block_concurrent_sends() {
        let (index, hub, pipeline) = pipeline(MemoryLog::new());
        let conv = index.open_direct(&alice(), &bob(), Utc::now());

        let mut bob_sub = hub.subscribe_conversation(conv, bob());
        pipeline.send(conv, &alice(), "first").await.unwrap();
        assert_eq!(bob_sub.recv().await.unwrap().body, "first");

        // Bob cancels mid-stream; further sends neither block nor error.
        bob_sub.cancel();
        let msg = pipeline.send(conv, &alice(), "second").await.unwrap();
        assert_eq!(msg.seq, 2);
    }
}
