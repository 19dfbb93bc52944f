//! # parley-core
//!
//! Presence-aware conversation delivery core.
//!
//! The crate is backend-independent: anything implementing
//! [`parley_store::MessageLog`] can back it, and any UI shell can consume
//! it through the [`ChatCore`] facade. Four components cooperate:
//!
//! - **delivery pipeline** — sequences outbound messages per conversation,
//!   persists them with bounded retry, and fans them out
//! - **conversation index** — the ordered, idempotently-updated set of
//!   conversations per user
//! - **subscription hub** — live feeds (conversation list snapshots,
//!   per-conversation messages, presence) delivered in commit order
//! - **presence tracker** — online/offline state with heartbeat liveness
//!
//! Writes for different conversations proceed independently; one
//! conversation's sequencing and index update form a critical section.

pub mod config;
pub mod core;
pub mod delivery;
pub mod hub;
pub mod index;
pub mod presence;
pub mod subscription;

mod error;

pub use config::CoreConfig;
pub use self::core::ChatCore;
pub use error::{CoreError, Result};
pub use subscription::Subscription;
