//! Per-user online/offline tracking with heartbeat liveness.
//!
//! States are only `Online` and `Offline`. Explicit `disconnect` and
//! heartbeat timeout both land in `Offline` and stamp last-seen. Every
//! real transition is published to the hub; redundant calls (`connect`
//! while online, `disconnect` while offline) emit nothing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use parley_shared::models::{PresenceState, PresenceUpdate};
use parley_shared::types::UserId;

use crate::hub::SubscriptionHub;

struct PresenceEntry {
    state: PresenceState,
    last_seen: DateTime<Utc>,
    /// Monotonic clock of the last connect/heartbeat, for timeout checks.
    last_heartbeat: Instant,
}

/// Presence state machine for all known users.
pub struct PresenceTracker {
    entries: Mutex<HashMap<UserId, PresenceEntry>>,
    hub: Arc<SubscriptionHub>,
    heartbeat_timeout: Duration,
}

impl PresenceTracker {
    pub fn new(hub: Arc<SubscriptionHub>, heartbeat_timeout: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            hub,
            heartbeat_timeout,
        }
    }

    /// Mark a user online. Idempotent: a user already online only has
    /// their heartbeat refreshed, with no transition emitted.
    pub fn connect(&self, user: &UserId) {
        let update = {
            let mut entries = self.entries.lock().expect("presence lock poisoned");
            let now = Utc::now();
            let entry = entries.entry(user.clone()).or_insert(PresenceEntry {
                state: PresenceState::Offline,
                last_seen: now,
                last_heartbeat: Instant::now(),
            });
            entry.last_heartbeat = Instant::now();
            if entry.state == PresenceState::Online {
                None
            } else {
                entry.state = PresenceState::Online;
                entry.last_seen = now;
                Some(PresenceUpdate {
                    user: user.clone(),
                    state: PresenceState::Online,
                    last_seen: now,
                })
            }
        };

        if let Some(update) = update {
            tracing::debug!(user = %update.user, "user connected");
            self.hub.publish_presence(&update);
        }
    }

    /// Mark a user offline and stamp last-seen. A disconnect for a user
    /// who never connected (or is already offline) is a no-op with no
    /// duplicate emission.
    pub fn disconnect(&self, user: &UserId) {
        let update = {
            let mut entries = self.entries.lock().expect("presence lock poisoned");
            match entries.get_mut(user) {
                Some(entry) if entry.state == PresenceState::Online => {
                    let now = Utc::now();
                    entry.state = PresenceState::Offline;
                    entry.last_seen = now;
                    Some(PresenceUpdate {
                        user: user.clone(),
                        state: PresenceState::Offline,
                        last_seen: now,
                    })
                }
                _ => None,
            }
        };

        if let Some(update) = update {
            tracing::debug!(user = %update.user, "user disconnected");
            self.hub.publish_presence(&update);
        }
    }

    /// Refresh a connected user's liveness window. Heartbeats from
    /// offline users are ignored; liveness starts at `connect`.
    pub fn heartbeat(&self, user: &UserId) {
        let mut entries = self.entries.lock().expect("presence lock poisoned");
        if let Some(entry) = entries.get_mut(user) {
            if entry.state == PresenceState::Online {
                entry.last_heartbeat = Instant::now();
            }
        }
    }

    /// Current state; users never seen are `Offline`.
    pub fn state(&self, user: &UserId) -> PresenceState {
        let entries = self.entries.lock().expect("presence lock poisoned");
        entries
            .get(user)
            .map(|e| e.state)
            .unwrap_or(PresenceState::Offline)
    }

    /// Last-seen timestamp, if the user has ever connected.
    pub fn last_seen(&self, user: &UserId) -> Option<DateTime<Utc>> {
        let entries = self.entries.lock().expect("presence lock poisoned");
        entries.get(user).map(|e| e.last_seen)
    }

    /// Transition every user whose heartbeat window has lapsed to
    /// `Offline`. Called periodically by the sweeper task; public so
    /// hosts with their own scheduler can drive it directly.
    pub fn sweep(&self) {
        let updates = {
            let mut entries = self.entries.lock().expect("presence lock poisoned");
            let now_instant = Instant::now();
            let now = Utc::now();
            let mut updates = Vec::new();
            for (user, entry) in entries.iter_mut() {
                if entry.state == PresenceState::Online
                    && now_instant.duration_since(entry.last_heartbeat) >= self.heartbeat_timeout
                {
                    entry.state = PresenceState::Offline;
                    entry.last_seen = now;
                    updates.push(PresenceUpdate {
                        user: user.clone(),
                        state: PresenceState::Offline,
                        last_seen: now,
                    });
                }
            }
            updates
        };

        for update in updates {
            tracing::info!(user = %update.user, "heartbeat timeout, marking offline");
            self.hub.publish_presence(&update);
        }
    }

    /// Spawn the periodic sweeper. The handle is aborted on core drop.
    pub fn spawn_sweeper(tracker: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                tracker.sweep();
            }
        })
    }
}
