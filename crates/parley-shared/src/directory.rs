//! User profile lookup collaborator.
//!
//! The core does not own user accounts; an external directory (the host's
//! contacts/auth layer) resolves profiles on demand. [`InMemoryDirectory`]
//! is the reference implementation used by the host binary and tests.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;

use crate::models::{AvatarRef, PresenceState, User};
use crate::types::UserId;

/// Synchronous user profile lookup.
///
/// Implementations must be cheap; the core calls `resolve_user` on
/// conversation creation to validate participants.
pub trait UserDirectory: Send + Sync {
    /// Look up a user by id. `None` means the id is unknown to the host.
    fn resolve_user(&self, id: &UserId) -> Option<User>;
}

/// Directory backed by a mutex-guarded map.
#[derive(Default)]
pub struct InMemoryDirectory {
    users: Mutex<HashMap<UserId, User>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user with a display name and no avatar, as on first
    /// authentication. Re-registering an existing id is a no-op.
    pub fn register(&self, id: UserId, display_name: impl Into<String>) {
        let mut users = self.users.lock().expect("directory lock poisoned");
        users.entry(id.clone()).or_insert_with(|| User {
            id,
            display_name: display_name.into(),
            avatar: AvatarRef::Default,
            presence: PresenceState::Offline,
            last_seen: Utc::now(),
            active: true,
        });
    }

    /// Replace a user's avatar reference.
    pub fn set_avatar(&self, id: &UserId, avatar: AvatarRef) {
        let mut users = self.users.lock().expect("directory lock poisoned");
        if let Some(user) = users.get_mut(id) {
            user.avatar = avatar;
        }
    }

    /// Deactivate an account. The profile remains resolvable.
    pub fn deactivate(&self, id: &UserId) {
        let mut users = self.users.lock().expect("directory lock poisoned");
        if let Some(user) = users.get_mut(id) {
            user.active = false;
        }
    }
}

impl UserDirectory for InMemoryDirectory {
    fn resolve_user(&self, id: &UserId) -> Option<User> {
        let users = self.users.lock().expect("directory lock poisoned");
        users.get(id).cloned()
    }
}
