//! In-memory [`MessageLog`] for tests and ephemeral hosts.

use std::collections::HashMap;
use std::sync::Mutex;

use parley_shared::models::Message;
use parley_shared::types::ConversationId;

use crate::error::Result;
use crate::log::MessageLog;

/// Mutex-guarded map of conversation logs. Not durable.
#[derive(Default)]
pub struct MemoryLog {
    conversations: Mutex<HashMap<ConversationId, Vec<Message>>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages currently held for a conversation.
    pub fn len(&self, conversation: ConversationId) -> usize {
        let conversations = self.conversations.lock().expect("log lock poisoned");
        conversations.get(&conversation).map_or(0, Vec::len)
    }

    pub fn is_empty(&self, conversation: ConversationId) -> bool {
        self.len(conversation) == 0
    }
}

impl MessageLog for MemoryLog {
    fn append(&self, conversation: ConversationId, message: &Message) -> Result<()> {
        let mut conversations = self.conversations.lock().expect("log lock poisoned");
        let log = conversations.entry(conversation).or_default();
        // Idempotent on retry of the same seq.
        if log.iter().any(|m| m.seq == message.seq) {
            return Ok(());
        }
        log.push(message.clone());
        log.sort_by_key(|m| m.seq);
        Ok(())
    }

    fn read_all(&self, conversation: ConversationId) -> Result<Vec<Message>> {
        let conversations = self.conversations.lock().expect("log lock poisoned");
        Ok(conversations.get(&conversation).cloned().unwrap_or_default())
    }
}
