//! Presence Registry: live reachability of authenticated users.
//!
//! Memory-only. Populated by a successful authenticate handshake on a
//! connection, cleared when that connection closes, rebuilt naturally as
//! clients reconnect. A cache of current reachability, never a source of
//! identity truth, and never persisted. A single-instance implementation:
//! fan-out does not cross process boundaries.

use std::collections::HashMap;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// Outbound handle for one live connection. Strings pushed here are written
/// to the socket by that connection's writer task.
pub type ConnectionSender = mpsc::UnboundedSender<String>;

#[derive(Default)]
struct Entries {
    /// user id -> connection id -> outbound sender
    by_user: HashMap<i64, HashMap<Uuid, ConnectionSender>>,
    /// connection id -> user id, so unbind needs only the handle
    owner: HashMap<Uuid, i64>,
}

/// Map from authenticated user to the user's active connection handles.
/// Multiple handles per user (multi-device) are supported.
pub struct PresenceRegistry {
    entries: RwLock<Entries>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Entries::default()),
        }
    }

    /// Records an active connection for the user. Re-binding the same
    /// connection overwrites without error; if the handle was previously
    /// bound to a different user, the old mapping is released first.
    pub async fn bind(&self, user_id: i64, connection_id: Uuid, sender: ConnectionSender) {
        let mut entries = self.entries.write().await;

        if let Some(previous) = entries.owner.insert(connection_id, user_id) {
            if previous != user_id {
                if let Some(handles) = entries.by_user.get_mut(&previous) {
                    handles.remove(&connection_id);
                    if handles.is_empty() {
                        entries.by_user.remove(&previous);
                    }
                }
            }
        }

        entries
            .by_user
            .entry(user_id)
            .or_default()
            .insert(connection_id, sender);
    }

    /// Removes the mapping owned by the handle. No-op for unknown handles.
    pub async fn unbind(&self, connection_id: Uuid) {
        let mut entries = self.entries.write().await;

        if let Some(user_id) = entries.owner.remove(&connection_id) {
            if let Some(handles) = entries.by_user.get_mut(&user_id) {
                handles.remove(&connection_id);
                if handles.is_empty() {
                    entries.by_user.remove(&user_id);
                }
            }
        }
    }

    /// Active senders for the user. Empty means offline.
    pub async fn lookup(&self, user_id: i64) -> Vec<ConnectionSender> {
        let entries = self.entries.read().await;
        entries
            .by_user
            .get(&user_id)
            .map(|handles| handles.values().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn is_online(&self, user_id: i64) -> bool {
        self.entries.read().await.by_user.contains_key(&user_id)
    }
}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
