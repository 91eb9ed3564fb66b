//! Real-time hub for the chat client: presence tracking, one-to-one call
//! signaling, and ephemeral two-party video rooms over WebSocket.
//!
//! The hub is a pure message router. Signaling payloads (SDP offers,
//! answers, ICE candidates) are forwarded verbatim and never inspected;
//! the hub only owns the addressing around them and the lifecycle of the
//! in-memory registries.

pub mod messages;
pub mod server;
pub mod state;

pub type UserId = String;
pub type ConnId = String;
pub type RoomId = String;

pub use server::{HubConfig, SignalingHub};
