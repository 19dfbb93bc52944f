//! v001 -- Initial schema creation.
//!
//! One table: the append-only `messages` log, keyed by
//! `(conversation_id, seq)` so a retried append of the same message is a
//! conflict-ignored no-op.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    conversation_id TEXT    NOT NULL,          -- UUID v4
    seq             INTEGER NOT NULL,          -- per-conversation, starts at 1
    sender_id       TEXT    NOT NULL,          -- opaque user id
    body            TEXT    NOT NULL,
    sent_at         TEXT    NOT NULL,          -- ISO-8601 / RFC-3339
    delivery        TEXT    NOT NULL,          -- pending | sent | delivered
    PRIMARY KEY (conversation_id, seq)
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation
    ON messages (conversation_id, seq);
"#;

pub fn up(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(UP_SQL)
}
