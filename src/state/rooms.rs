//! Ephemeral, code-addressed video rooms capped at two participants.
//!
//! The registry owns both the rooms map and the user -> room membership
//! index; the two are mutated together under the same lock so readers never
//! observe a participant without an index entry or vice versa. A room is
//! deleted the instant its participant count reaches zero; an empty room
//! is never retained.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::messages::{ParticipantInfo, RoomSnapshot};
use crate::{ConnId, RoomId, UserId};

pub const ROOM_CODE_LEN: usize = 6;
pub const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Error type for room operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomError {
    /// Room code does not exist.
    NotFound,
    /// Room already has two participants.
    Full,
}

impl std::fmt::Display for RoomError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoomError::NotFound => write!(f, "Room not found"),
            RoomError::Full => write!(f, "Room is full"),
        }
    }
}

impl std::error::Error for RoomError {}

#[derive(Debug, Clone)]
pub struct Participant {
    pub user_id: UserId,
    pub user_name: String,
    pub conn_id: ConnId,
}

#[derive(Debug, Clone)]
pub struct Room {
    pub id: RoomId,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub participants: Vec<Participant>,
}

impl Room {
    fn participant(&self, user_id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.user_id == user_id)
    }

    fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            room_id: self.id.clone(),
            created_by: self.created_by.clone(),
            created_at: self.created_at,
            participants: self
                .participants
                .iter()
                .map(|p| ParticipantInfo {
                    user_id: p.user_id.clone(),
                    user_name: p.user_name.clone(),
                })
                .collect(),
        }
    }
}

/// Outcome of a successful join.
#[derive(Debug)]
pub struct JoinOutcome {
    pub snapshot: RoomSnapshot,
    /// Connections of the participants that were already in the room.
    pub notify: Vec<ConnId>,
    /// True when the user was already a participant (reconnect); no join
    /// broadcast is owed.
    pub rejoined: bool,
}

/// Outcome of removing a participant.
pub struct LeaveOutcome {
    pub user_id: UserId,
    pub user_name: String,
    /// Connections of the participants still in the room.
    pub remaining: Vec<ConnId>,
    /// True when the room reached zero participants and was deleted.
    pub closed: bool,
}

#[derive(Default)]
pub struct RoomRegistry {
    rooms: HashMap<RoomId, Room>,
    /// Which room (if any) each user currently occupies.
    membership: HashMap<UserId, RoomId>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            rooms: HashMap::new(),
            membership: HashMap::new(),
        }
    }

    /// 6-character uniform random code, redrawn until it is unused.
    fn generate_code(&self) -> RoomId {
        let mut rng = rand::thread_rng();
        loop {
            let code: String = (0..ROOM_CODE_LEN)
                .map(|_| {
                    let i = rng.gen_range(0..ROOM_CODE_ALPHABET.len());
                    ROOM_CODE_ALPHABET[i] as char
                })
                .collect();
            if !self.rooms.contains_key(&code) {
                return code;
            }
        }
    }

    /// Create a room with the creator as sole participant.
    pub fn create(
        &mut self,
        creator_id: UserId,
        creator_name: String,
        conn_id: ConnId,
    ) -> RoomSnapshot {
        let code = self.generate_code();
        let room = Room {
            id: code.clone(),
            created_by: creator_id.clone(),
            created_at: Utc::now(),
            participants: vec![Participant {
                user_id: creator_id.clone(),
                user_name: creator_name,
                conn_id,
            }],
        };
        let snapshot = room.snapshot();
        self.rooms.insert(code.clone(), room);
        self.membership.insert(creator_id, code);
        snapshot
    }

    /// Pure lookup, no side effect.
    pub fn check(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    /// Add a user to a room, enforcing the two-participant cap.
    ///
    /// A join by a user who is already a participant is idempotent: the
    /// stored connection and name are refreshed (a reconnecting tab brings
    /// a new connection) but no duplicate entry is created and no join
    /// broadcast is owed.
    pub fn join(
        &mut self,
        room_id: &str,
        user_id: UserId,
        user_name: String,
        conn_id: ConnId,
    ) -> Result<JoinOutcome, RoomError> {
        let room = self.rooms.get_mut(room_id).ok_or(RoomError::NotFound)?;

        if let Some(existing) = room
            .participants
            .iter_mut()
            .find(|p| p.user_id == user_id)
        {
            existing.user_name = user_name;
            existing.conn_id = conn_id;
            return Ok(JoinOutcome {
                snapshot: room.snapshot(),
                notify: Vec::new(),
                rejoined: true,
            });
        }

        if room.participants.len() >= 2 {
            return Err(RoomError::Full);
        }

        let notify = room.participants.iter().map(|p| p.conn_id.clone()).collect();
        room.participants.push(Participant {
            user_id: user_id.clone(),
            user_name,
            conn_id,
        });
        let snapshot = room.snapshot();
        self.membership.insert(user_id, room_id.to_string());

        Ok(JoinOutcome {
            snapshot,
            notify,
            rejoined: false,
        })
    }

    /// Remove a participant. The membership index entry for `user_id` is
    /// removed regardless of whether the room still exists; the room itself
    /// is deleted once its participant count reaches zero.
    pub fn leave(&mut self, room_id: &str, user_id: &str) -> Option<LeaveOutcome> {
        self.membership.remove(user_id);

        let room = self.rooms.get_mut(room_id)?;
        let idx = room.participants.iter().position(|p| p.user_id == user_id)?;
        let removed = room.participants.remove(idx);

        let remaining: Vec<ConnId> = room.participants.iter().map(|p| p.conn_id.clone()).collect();
        let closed = room.participants.is_empty();
        if closed {
            self.rooms.remove(room_id);
        }

        Some(LeaveOutcome {
            user_id: removed.user_id,
            user_name: removed.user_name,
            remaining,
            closed,
        })
    }

    /// Cleanup path for an abruptly dropped connection: resolves the room
    /// through the membership index, then produces exactly the `leave`
    /// effect for that room/user pair.
    pub fn disconnect_cleanup(&mut self, user_id: &str) -> Option<(RoomId, LeaveOutcome)> {
        let room_id = self.membership.get(user_id).cloned()?;
        let outcome = self.leave(&room_id, user_id)?;
        Some((room_id, outcome))
    }

    /// Group-call end path: delete the room outright and return the
    /// participants' connections for the closing broadcast.
    pub fn teardown(&mut self, room_id: &str) -> Vec<ConnId> {
        let Some(room) = self.rooms.remove(room_id) else {
            return Vec::new();
        };
        for p in &room.participants {
            self.membership.remove(&p.user_id);
        }
        room.participants.into_iter().map(|p| p.conn_id).collect()
    }

    /// Resolve the connection of `target_user` inside the room the index
    /// places them in. `None` when the counterpart has already left.
    pub fn offer_target(&self, target_user: &str) -> Option<ConnId> {
        let room_id = self.membership.get(target_user)?;
        let room = self.rooms.get(room_id)?;
        room.participant(target_user).map(|p| p.conn_id.clone())
    }

    /// Resolve the connection of `caller_id` inside the *answerer's* own
    /// room (the answer travels back to whoever initiated).
    pub fn answer_target(&self, answerer: &str, caller_id: &str) -> Option<ConnId> {
        let room_id = self.membership.get(answerer)?;
        let room = self.rooms.get(room_id)?;
        room.participant(caller_id).map(|p| p.conn_id.clone())
    }

    /// Which room the user currently occupies, if any.
    pub fn member_room(&self, user_id: &str) -> Option<&RoomId> {
        self.membership.get(user_id)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with_room() -> (RoomRegistry, RoomId) {
        let mut rooms = RoomRegistry::new();
        let snapshot = rooms.create("alice".into(), "Alice".into(), "c-alice".into());
        (rooms, snapshot.room_id)
    }

    #[test]
    fn test_create_room_shape() {
        let mut rooms = RoomRegistry::new();
        let snapshot = rooms.create("alice".into(), "Alice".into(), "c-alice".into());

        assert_eq!(snapshot.room_id.len(), ROOM_CODE_LEN);
        assert!(snapshot
            .room_id
            .bytes()
            .all(|b| ROOM_CODE_ALPHABET.contains(&b)));
        assert_eq!(snapshot.created_by, "alice");
        assert_eq!(snapshot.participants.len(), 1);
        assert_eq!(snapshot.participants[0].user_id, "alice");
        assert!(rooms.check(&snapshot.room_id));
        assert_eq!(rooms.member_room("alice"), Some(&snapshot.room_id));
    }

    #[test]
    fn test_join_notifies_existing_participants() {
        let (mut rooms, room_id) = registry_with_room();
        let outcome = rooms
            .join(&room_id, "bob".into(), "Bob".into(), "c-bob".into())
            .unwrap();

        assert!(!outcome.rejoined);
        assert_eq!(outcome.notify, vec!["c-alice".to_string()]);
        assert_eq!(outcome.snapshot.participants.len(), 2);
        assert_eq!(rooms.member_room("bob"), Some(&room_id));
    }

    #[test]
    fn test_join_unknown_room() {
        let mut rooms = RoomRegistry::new();
        let err = rooms
            .join("ZZZZZZ", "bob".into(), "Bob".into(), "c-bob".into())
            .unwrap_err();
        assert_eq!(err, RoomError::NotFound);
        assert_eq!(err.to_string(), "Room not found");
    }

    #[test]
    fn test_third_join_is_rejected_and_room_unchanged() {
        let (mut rooms, room_id) = registry_with_room();
        rooms
            .join(&room_id, "bob".into(), "Bob".into(), "c-bob".into())
            .unwrap();

        let err = rooms
            .join(&room_id, "carol".into(), "Carol".into(), "c-carol".into())
            .unwrap_err();
        assert_eq!(err, RoomError::Full);
        assert_eq!(err.to_string(), "Room is full");

        // The existing two participants are untouched and carol gained no
        // membership entry.
        let rejoin = rooms
            .join(&room_id, "bob".into(), "Bob".into(), "c-bob".into())
            .unwrap();
        assert_eq!(rejoin.snapshot.participants.len(), 2);
        assert_eq!(rooms.member_room("carol"), None);
    }

    #[test]
    fn test_rejoin_is_idempotent_and_refreshes_connection() {
        let (mut rooms, room_id) = registry_with_room();
        rooms
            .join(&room_id, "bob".into(), "Bob".into(), "c-bob".into())
            .unwrap();

        let outcome = rooms
            .join(&room_id, "bob".into(), "Bobby".into(), "c-bob-2".into())
            .unwrap();

        assert!(outcome.rejoined);
        assert!(outcome.notify.is_empty());
        assert_eq!(outcome.snapshot.participants.len(), 2);
        // Relays must route to the new connection after a reconnect.
        assert_eq!(rooms.offer_target("bob"), Some("c-bob-2".to_string()));
    }

    #[test]
    fn test_leave_keeps_room_with_one_remaining() {
        let (mut rooms, room_id) = registry_with_room();
        rooms
            .join(&room_id, "bob".into(), "Bob".into(), "c-bob".into())
            .unwrap();

        let outcome = rooms.leave(&room_id, "alice").unwrap();
        assert_eq!(outcome.user_id, "alice");
        assert_eq!(outcome.user_name, "Alice");
        assert_eq!(outcome.remaining, vec!["c-bob".to_string()]);
        assert!(!outcome.closed);
        assert!(rooms.check(&room_id));
        assert_eq!(rooms.member_room("alice"), None);
    }

    #[test]
    fn test_leave_of_last_participant_deletes_room() {
        let (mut rooms, room_id) = registry_with_room();
        let outcome = rooms.leave(&room_id, "alice").unwrap();

        assert!(outcome.closed);
        assert!(outcome.remaining.is_empty());
        assert!(!rooms.check(&room_id));
        assert_eq!(rooms.room_count(), 0);
    }

    #[test]
    fn test_leave_unknown_room_still_clears_membership() {
        let (mut rooms, room_id) = registry_with_room();
        rooms.teardown(&room_id);
        // Stale client leaves a room that no longer exists.
        rooms.membership.insert("alice".into(), room_id.clone());
        assert!(rooms.leave(&room_id, "alice").is_none());
        assert_eq!(rooms.member_room("alice"), None);
    }

    #[test]
    fn test_leave_by_non_participant_is_noop() {
        let (mut rooms, room_id) = registry_with_room();
        assert!(rooms.leave(&room_id, "mallory").is_none());
        assert!(rooms.check(&room_id));
    }

    #[test]
    fn test_disconnect_cleanup_matches_explicit_leave() {
        let (mut rooms_a, room_a) = registry_with_room();
        rooms_a
            .join(&room_a, "bob".into(), "Bob".into(), "c-bob".into())
            .unwrap();
        let left = rooms_a.leave(&room_a, "bob").unwrap();

        let (mut rooms_b, room_b) = registry_with_room();
        rooms_b
            .join(&room_b, "bob".into(), "Bob".into(), "c-bob".into())
            .unwrap();
        let (cleaned_room, cleaned) = rooms_b.disconnect_cleanup("bob").unwrap();

        assert_eq!(cleaned_room, room_b);
        assert_eq!(cleaned.user_id, left.user_id);
        assert_eq!(cleaned.user_name, left.user_name);
        assert_eq!(cleaned.closed, left.closed);
        assert_eq!(cleaned.remaining.len(), left.remaining.len());
        assert_eq!(rooms_b.member_room("bob"), None);
        assert!(rooms_b.check(&room_b));
    }

    #[test]
    fn test_disconnect_cleanup_without_room_is_noop() {
        let mut rooms = RoomRegistry::new();
        assert!(rooms.disconnect_cleanup("alice").is_none());
    }

    #[test]
    fn test_teardown_clears_membership_entries() {
        let (mut rooms, room_id) = registry_with_room();
        rooms
            .join(&room_id, "bob".into(), "Bob".into(), "c-bob".into())
            .unwrap();

        let mut conns = rooms.teardown(&room_id);
        conns.sort();
        assert_eq!(conns, vec!["c-alice".to_string(), "c-bob".to_string()]);
        assert!(!rooms.check(&room_id));
        assert_eq!(rooms.member_room("alice"), None);
        assert_eq!(rooms.member_room("bob"), None);

        assert!(rooms.teardown(&room_id).is_empty());
    }

    #[test]
    fn test_offer_and_answer_target_resolution() {
        let (mut rooms, room_id) = registry_with_room();
        rooms
            .join(&room_id, "bob".into(), "Bob".into(), "c-bob".into())
            .unwrap();

        assert_eq!(rooms.offer_target("alice"), Some("c-alice".to_string()));
        assert_eq!(rooms.answer_target("alice", "bob"), Some("c-bob".to_string()));

        // Counterpart gone: both resolutions drop silently.
        rooms.leave(&room_id, "bob").unwrap();
        assert_eq!(rooms.offer_target("bob"), None);
        assert_eq!(rooms.answer_target("alice", "bob"), None);
        assert_eq!(rooms.answer_target("mallory", "alice"), None);
    }

    #[test]
    fn test_generated_codes_are_unique_against_existing_rooms() {
        let mut rooms = RoomRegistry::new();
        let mut codes = std::collections::HashSet::new();
        for i in 0..50 {
            let snapshot = rooms.create(format!("user-{i}"), format!("User {i}"), format!("c-{i}"));
            assert!(codes.insert(snapshot.room_id));
        }
        assert_eq!(rooms.room_count(), 50);
    }
}
