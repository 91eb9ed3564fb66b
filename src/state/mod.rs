pub mod connections;
pub mod presence;
pub mod rooms;

pub use connections::ConnectionRegistry;
pub use presence::PresenceRegistry;
pub use rooms::{RoomError, RoomRegistry};

use std::sync::Arc;
use tokio::sync::Mutex;

/// Shared hub state wrapping all registries.
/// Each registry has its own Mutex to reduce contention; dispatch locks one
/// registry at a time and performs sends through `connections` only after
/// the owning lock is released.
pub struct HubState {
    pub connections: Arc<Mutex<ConnectionRegistry>>,
    pub presence: Arc<Mutex<PresenceRegistry>>,
    pub rooms: Arc<Mutex<RoomRegistry>>,
}

impl HubState {
    pub fn new() -> Self {
        Self {
            connections: Arc::new(Mutex::new(ConnectionRegistry::new())),
            presence: Arc::new(Mutex::new(PresenceRegistry::new())),
            rooms: Arc::new(Mutex::new(RoomRegistry::new())),
        }
    }
}

impl Default for HubState {
    fn default() -> Self {
        Self::new()
    }
}
