//! # parley-shared
//!
//! Domain types shared across the parley workspace: identifiers, the
//! persisted models (users, conversations, messages), and the
//! [`UserDirectory`] collaborator through which the core resolves user
//! profiles.
//!
//! Every model derives `Serialize` and `Deserialize` so it can be handed
//! directly to a host UI layer.

pub mod directory;
pub mod models;
pub mod types;

pub use directory::{InMemoryDirectory, UserDirectory};
pub use models::*;
pub use types::{ConversationId, UserId};
