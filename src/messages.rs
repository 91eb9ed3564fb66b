//! Wire protocol: named JSON events exchanged with browser clients.
//!
//! Every frame is a single JSON object tagged by `type`. Signaling payloads
//! (`signal`) are opaque [`serde_json::Value`]s the hub forwards without
//! looking inside.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{RoomId, UserId};

fn default_call_type() -> String {
    "video".to_string()
}

/// Events consumed by the hub (client -> hub).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Initiate a one-to-one call with another online user.
    #[serde(rename_all = "camelCase")]
    CallUser {
        user_to_call: UserId,
        signal: Value,
        #[serde(default = "default_call_type")]
        call_type: String,
    },
    /// Callee accepts; `to` is the original caller.
    CallAccepted { to: UserId, signal: Value },
    /// Callee rejects; `to` is the original caller.
    CallRejected { to: UserId },
    /// End an ongoing call. With `isGroup` set, `to` names a room code.
    #[serde(rename_all = "camelCase")]
    EndCall {
        to: String,
        #[serde(default)]
        is_group: bool,
    },
    /// Create a new two-party video room.
    #[serde(rename_all = "camelCase")]
    CreateVideoRoom { user_id: UserId, user_name: String },
    /// Ask whether a room code currently exists.
    #[serde(rename_all = "camelCase")]
    CheckVideoRoom { room_id: RoomId },
    /// Join an existing room by code.
    #[serde(rename_all = "camelCase")]
    JoinRoom {
        room_id: RoomId,
        user_id: UserId,
        user_name: String,
    },
    /// Leave a room explicitly.
    #[serde(rename_all = "camelCase")]
    LeaveRoom { room_id: RoomId, user_id: UserId },
    /// WebRTC offer toward another participant of the sender's room.
    #[serde(rename_all = "camelCase")]
    SendingSignal {
        user_to_signal: UserId,
        signal: Value,
        caller_id: UserId,
    },
    /// WebRTC answer routed back to the initiating participant.
    #[serde(rename_all = "camelCase")]
    ReturningSignal { signal: Value, caller_id: UserId },
}

/// Events produced by the hub (hub -> client).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Full online-user list, broadcast to every connection on each
    /// connect and disconnect.
    #[serde(rename = "getOnlineUsers")]
    GetOnlineUsers { users: Vec<UserId> },
    /// Incoming call notification for the callee.
    #[serde(rename_all = "camelCase")]
    CallReceived {
        from: UserId,
        signal: Value,
        call_type: String,
    },
    CallAccepted { from: UserId, signal: Value },
    CallRejected,
    CallFailed { reason: String },
    CallEnded,
    VideoRoomCreated { room: RoomSnapshot },
    #[serde(rename_all = "camelCase")]
    VideoRoomCheckResult { room_id: RoomId, exists: bool },
    /// Current room state, delivered to a creator or (re)joiner.
    RoomInfo { room: RoomSnapshot },
    RoomJoinError { message: String },
    #[serde(rename_all = "camelCase")]
    UserJoined { user_id: UserId, user_name: String },
    #[serde(rename_all = "camelCase")]
    UserLeft { user_id: UserId, user_name: String },
    RoomClosed,
    #[serde(rename_all = "camelCase")]
    ReceivingSignal { signal: Value, caller_id: UserId },
    #[serde(rename_all = "camelCase")]
    ReturningSignal { signal: Value, caller_id: UserId },
    /// Answer to a frame the hub could not parse.
    Error { message: String },
}

/// Serializable view of a room, as sent to clients. Connection ids stay
/// server-side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub room_id: RoomId,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub participants: Vec<ParticipantInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantInfo {
    pub user_id: UserId,
    pub user_name: String,
}
