//! # parley-store
//!
//! Durable message log for the parley core.
//!
//! The core treats persistence as a black box: anything implementing
//! [`MessageLog`] (append + ordered read-back per conversation) can back it.
//! Two implementations ship here: [`SqliteLog`], a WAL-mode SQLite file with
//! versioned migrations, and [`MemoryLog`] for tests and ephemeral hosts.

pub mod log;
pub mod memory;
pub mod migrations;
pub mod sqlite;

mod error;

pub use error::{Result, StoreError};
pub use log::MessageLog;
pub use memory::MemoryLog;
pub use sqlite::SqliteLog;
