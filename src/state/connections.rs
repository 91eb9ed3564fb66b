//! Outbound side of every live connection.
//!
//! Each WebSocket connection owns an unbounded channel drained by its send
//! task; the registry maps connection ids to the channel senders. Delivery
//! is a single non-blocking send attempt; a connection that is already
//! gone is a silent no-op, never an error.

use std::collections::HashMap;

use hyper_tungstenite::tungstenite::Message;
use tokio::sync::mpsc;

use crate::messages::ServerMessage;
use crate::ConnId;

pub type OutboundSender = mpsc::UnboundedSender<Message>;

#[derive(Default)]
pub struct ConnectionRegistry {
    senders: HashMap<ConnId, OutboundSender>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            senders: HashMap::new(),
        }
    }

    pub fn insert(&mut self, conn_id: ConnId, sender: OutboundSender) {
        self.senders.insert(conn_id, sender);
    }

    pub fn remove(&mut self, conn_id: &str) {
        self.senders.remove(conn_id);
    }

    /// Deliver an event to one connection, fire-and-forget.
    pub fn send(&self, conn_id: &str, msg: &ServerMessage) {
        let Ok(json) = serde_json::to_string(msg) else {
            return;
        };
        if let Some(sender) = self.senders.get(conn_id) {
            let _ = sender.send(Message::Text(json));
        }
    }

    /// Deliver the same event to a set of connections.
    pub fn send_many(&self, conn_ids: &[ConnId], msg: &ServerMessage) {
        let Ok(json) = serde_json::to_string(msg) else {
            return;
        };
        for conn_id in conn_ids {
            if let Some(sender) = self.senders.get(conn_id) {
                let _ = sender.send(Message::Text(json.clone()));
            }
        }
    }

    /// Deliver an event to every live connection.
    pub fn broadcast(&self, msg: &ServerMessage) {
        let Ok(json) = serde_json::to_string(msg) else {
            return;
        };
        for sender in self.senders.values() {
            let _ = sender.send(Message::Text(json.clone()));
        }
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }
}
