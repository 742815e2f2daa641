use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    domain::{MessageId, RoomId, RoomRole, UserId},
    error::ApiError,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: UserId,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

/// Pagination envelope shared by every listing endpoint: a page of items,
/// a flag for whether more exist, and an opaque link to the next page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub has_next: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self {
            data: Vec::new(),
            has_next: false,
            next: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub title: String,
    pub owner: UserSummary,
    pub coaches: Vec<UserSummary>,
    pub participants: Vec<UserSummary>,
}

impl Room {
    pub fn role_of(&self, user_id: UserId) -> Option<RoomRole> {
        if self.owner.id == user_id {
            return Some(RoomRole::Owner);
        }
        if self.coaches.iter().any(|user| user.id == user_id) {
            return Some(RoomRole::Coach);
        }
        if self.participants.iter().any(|user| user.id == user_id) {
            return Some(RoomRole::Participant);
        }
        None
    }

    pub fn is_member(&self, user_id: UserId) -> bool {
        self.role_of(user_id).is_some()
    }

    /// Adds a participant. A user already holding any role keeps it
    /// unchanged, so a duplicate invite is a no-op.
    pub fn with_participant(&self, user: UserSummary) -> Room {
        if self.is_member(user.id) {
            return self.clone();
        }
        let mut next = self.clone();
        next.participants.push(user);
        next
    }

    /// Removes a coach or participant. The owner cannot be removed.
    pub fn without_member(&self, user_id: UserId) -> Room {
        let mut next = self.clone();
        next.coaches.retain(|user| user.id != user_id);
        next.participants.retain(|user| user.id != user_id);
        next
    }

    /// Moves a participant into the coach set. No-op for the owner, for an
    /// existing coach, and for users that are not members at all.
    pub fn with_coach(&self, user_id: UserId) -> Room {
        if self.role_of(user_id) != Some(RoomRole::Participant) {
            return self.clone();
        }
        let mut next = self.clone();
        if let Some(pos) = next.participants.iter().position(|user| user.id == user_id) {
            let user = next.participants.remove(pos);
            next.coaches.push(user);
        }
        next
    }

    /// Moves a coach back into the participant set.
    pub fn without_coach(&self, user_id: UserId) -> Room {
        if self.role_of(user_id) != Some(RoomRole::Coach) {
            return self.clone();
        }
        let mut next = self.clone();
        if let Some(pos) = next.coaches.iter().position(|user| user.id == user_id) {
            let user = next.coaches.remove(pos);
            next.participants.push(user);
        }
        next
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub id: MessageId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_base64: Option<String>,
    pub sender: UserSummary,
    /// Absent means the message is broadcast to the whole room.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<UserSummary>,
    pub created_at: DateTime<Utc>,
}

/// Outbound chat message before the server has stored it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub room_id: RoomId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Zero or absent means broadcast.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_base64: Option<String>,
}

/// Account-scoped server-push event kinds. Wire names follow the stream
/// endpoint's `event:` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccountEventKind {
    #[serde(rename = "action_project")]
    Project,
    #[serde(rename = "action_message")]
    Message,
    #[serde(rename = "action_user")]
    User,
}

impl AccountEventKind {
    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            "action_project" => Some(Self::Project),
            "action_message" => Some(Self::Message),
            "action_user" => Some(Self::User),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountEvent {
    pub kind: AccountEventKind,
    /// Human-readable summary carried by the push payload. Never trusted as
    /// a state patch; state is refetched through the REST collaborator.
    pub message: String,
}

/// One connected participant, as reported by the room channel join ack.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PresenceEntry {
    pub user_id: UserId,
}

/// The join ack is a single entry when the joiner is alone and a list
/// otherwise; both shapes normalize to a plain id list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PresenceSnapshot {
    Many(Vec<PresenceEntry>),
    One(PresenceEntry),
}

impl PresenceSnapshot {
    pub fn into_user_ids(self) -> Vec<UserId> {
        match self {
            Self::Many(entries) => entries.into_iter().map(|entry| entry.user_id).collect(),
            Self::One(entry) => vec![entry.user_id],
        }
    }
}

/// Client-to-server frames on the room channel. `seq` correlates acks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientFrame {
    pub seq: u64,
    #[serde(flatten)]
    pub kind: ClientFrameKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientFrameKind {
    JoinRoom { room_id: RoomId },
    LeaveRoom,
    SendMessage(OutboundMessage),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerFrame {
    Ack {
        seq: u64,
        body: serde_json::Value,
    },
    ReceiveMessage {
        message: MessagePayload,
    },
    Online {
        user_id: UserId,
    },
    Offline {
        user_id: UserId,
    },
    Error(ApiError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: i64) -> UserSummary {
        UserSummary {
            id: UserId(id),
            username: format!("user{id}"),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            avatar: None,
        }
    }

    fn room() -> Room {
        Room {
            id: RoomId(1),
            title: "standup".into(),
            owner: user(1),
            coaches: vec![user(2)],
            participants: vec![user(3), user(4)],
        }
    }

    fn roles_are_disjoint(room: &Room) -> bool {
        let mut ids: Vec<UserId> = vec![room.owner.id];
        ids.extend(room.coaches.iter().map(|user| user.id));
        ids.extend(room.participants.iter().map(|user| user.id));
        let len = ids.len();
        ids.sort();
        ids.dedup();
        ids.len() == len
    }

    #[test]
    fn with_participant_is_idempotent() {
        let base = room();
        let once = base.with_participant(user(5));
        let twice = once.with_participant(user(5));
        assert_eq!(once, twice);
        assert!(roles_are_disjoint(&twice));
    }

    #[test]
    fn with_participant_never_duplicates_existing_roles() {
        let base = room();
        assert_eq!(base.with_participant(user(1)), base);
        assert_eq!(base.with_participant(user(2)), base);
        assert_eq!(base.with_participant(user(3)), base);
    }

    #[test]
    fn with_coach_moves_participant_and_keeps_disjointness() {
        let promoted = room().with_coach(UserId(3));
        assert_eq!(promoted.role_of(UserId(3)), Some(RoomRole::Coach));
        assert!(roles_are_disjoint(&promoted));
        // Owner and non-members are untouched.
        assert_eq!(room().with_coach(UserId(1)), room());
        assert_eq!(room().with_coach(UserId(99)), room());
    }

    #[test]
    fn without_coach_demotes_back_to_participant() {
        let demoted = room().without_coach(UserId(2));
        assert_eq!(demoted.role_of(UserId(2)), Some(RoomRole::Participant));
        assert!(roles_are_disjoint(&demoted));
        assert_eq!(room().without_coach(UserId(3)), room());
    }

    #[test]
    fn without_member_keeps_owner() {
        let removed = room().without_member(UserId(4));
        assert_eq!(removed.role_of(UserId(4)), None);
        let owner_kept = room().without_member(UserId(1));
        assert_eq!(owner_kept.role_of(UserId(1)), Some(RoomRole::Owner));
    }

    #[test]
    fn presence_snapshot_accepts_both_wire_shapes() {
        let single: PresenceSnapshot = serde_json::from_str(r#"{"user_id": 7}"#).unwrap();
        assert_eq!(single.into_user_ids(), vec![UserId(7)]);

        let many: PresenceSnapshot =
            serde_json::from_str(r#"[{"user_id": 7}, {"user_id": 9}]"#).unwrap();
        assert_eq!(many.into_user_ids(), vec![UserId(7), UserId(9)]);
    }

    #[test]
    fn client_frame_wire_shape_carries_seq_and_tag() {
        let frame = ClientFrame {
            seq: 3,
            kind: ClientFrameKind::JoinRoom { room_id: RoomId(12) },
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["seq"], 3);
        assert_eq!(value["type"], "join_room");
        assert_eq!(value["payload"]["room_id"], 12);
    }
}
