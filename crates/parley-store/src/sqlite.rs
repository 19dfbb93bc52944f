//! SQLite-backed [`MessageLog`].
//!
//! The connection runs in WAL mode and migrations are applied before any
//! other operation. The connection sits behind a `Mutex` because the core
//! already serializes writes per conversation; the lock only arbitrates
//! between conversations sharing the one file.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use rusqlite::{params, Connection};
use uuid::Uuid;

use parley_shared::models::{DeliveryState, Message};
use parley_shared::types::{ConversationId, UserId};

use crate::error::{Result, StoreError};
use crate::log::MessageLog;
use crate::migrations;

/// Durable message log on a single SQLite file.
pub struct SqliteLog {
    conn: Mutex<Connection>,
}

impl SqliteLog {
    /// Open (or create) the default application database.
    ///
    /// The database file is placed in the platform-appropriate data directory:
    /// - Linux:   `~/.local/share/parley/parley.db`
    /// - macOS:   `~/Library/Application Support/com.parley.parley/parley.db`
    /// - Windows: `{FOLDERID_RoamingAppData}\parley\parley\data\parley.db`
    pub fn new() -> Result<Self> {
        let project_dirs =
            ProjectDirs::from("com", "parley", "parley").ok_or(StoreError::NoDataDir)?;

        let data_dir = project_dirs.data_dir();
        std::fs::create_dir_all(data_dir)?;

        let db_path = data_dir.join("parley.db");

        tracing::info!(path = %db_path.display(), "opening message log");

        Self::open_at(&db_path)
    }

    /// Open (or create) a database at an explicit path.
    ///
    /// This is useful for tests and for embedding the log inside custom
    /// directory layouts.
    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        migrations::run_migrations(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        let conn = self.conn.lock().expect("log lock poisoned");
        conn.path().map(PathBuf::from)
    }
}

impl MessageLog for SqliteLog {
    fn append(&self, conversation: ConversationId, message: &Message) -> Result<()> {
        let conn = self.conn.lock().expect("log lock poisoned");
        // OR IGNORE keeps a retried append of the same (conversation, seq)
        // from duplicating the row.
        conn.execute(
            "INSERT OR IGNORE INTO messages (conversation_id, seq, sender_id, body, sent_at, delivery)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                conversation.0.to_string(),
                message.seq as i64,
                message.sender.as_str(),
                message.body,
                message.sent_at.to_rfc3339(),
                delivery_to_str(message.delivery),
            ],
        )?;
        Ok(())
    }

    fn read_all(&self, conversation: ConversationId) -> Result<Vec<Message>> {
        let conn = self.conn.lock().expect("log lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT conversation_id, seq, sender_id, body, sent_at, delivery
             FROM messages
             WHERE conversation_id = ?1
             ORDER BY seq ASC",
        )?;

        let rows = stmt.query_map(params![conversation.0.to_string()], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }
}

fn delivery_to_str(state: DeliveryState) -> &'static str {
    match state {
        DeliveryState::Pending => "pending",
        DeliveryState::Sent => "sent",
        DeliveryState::Delivered => "delivered",
    }
}

fn delivery_from_str(s: &str) -> DeliveryState {
    match s {
        "delivered" => DeliveryState::Delivered,
        "pending" => DeliveryState::Pending,
        _ => DeliveryState::Sent,
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let conversation_str: String = row.get(0)?;
    let seq: i64 = row.get(1)?;
    let sender: String = row.get(2)?;
    let body: String = row.get(3)?;
    let sent_at_str: String = row.get(4)?;
    let delivery_str: String = row.get(5)?;

    let conversation = Uuid::parse_str(&conversation_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let sent_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&sent_at_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Message {
        seq: seq as u64,
        conversation: ConversationId(conversation),
        sender: UserId::new(sender),
        body,
        sent_at,
        delivery: delivery_from_str(&delivery_str),
    })
}
