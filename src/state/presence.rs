//! Live user -> connection mapping ("who is online").

use std::collections::HashMap;

use crate::{ConnId, UserId};

/// At most one connection per user; a later connect for the same user
/// overwrites the earlier mapping without notifying the superseded
/// connection.
#[derive(Default)]
pub struct PresenceRegistry {
    online: HashMap<UserId, ConnId>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self {
            online: HashMap::new(),
        }
    }

    /// Unconditional upsert: last connection wins.
    pub fn register(&mut self, user_id: UserId, conn_id: ConnId) {
        self.online.insert(user_id, conn_id);
    }

    /// Remove the mapping only while it still points at `conn_id`.
    /// A stale disconnect racing a newer connect for the same user is a
    /// no-op.
    pub fn unregister(&mut self, conn_id: &str) {
        self.online.retain(|_, c| c != conn_id);
    }

    pub fn lookup(&self, user_id: &str) -> Option<ConnId> {
        self.online.get(user_id).cloned()
    }

    /// Reverse lookup, used by the disconnect sequence before
    /// unregistering. Returns `None` once a newer connection has taken
    /// over the user.
    pub fn resolve(&self, conn_id: &str) -> Option<UserId> {
        self.online
            .iter()
            .find(|(_, c)| c.as_str() == conn_id)
            .map(|(user_id, _)| user_id.clone())
    }

    pub fn snapshot(&self) -> Vec<UserId> {
        self.online.keys().cloned().collect()
    }
}
