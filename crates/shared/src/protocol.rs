use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ChannelId, ChannelKind, MessageId, ProfileId, Role, ServerId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerRecord {
    pub id: ServerId,
    pub name: String,
    pub owner_id: ProfileId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipRecord {
    pub server_id: ServerId,
    pub profile_id: ProfileId,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRecord {
    pub id: ChannelId,
    pub server_id: ServerId,
    pub name: String,
    pub kind: ChannelKind,
    pub created_at: DateTime<Utc>,
}

/// One row of the message timeline. `author_display_name` is a denormalized
/// join value: present on historical fetches, absent on change-feed inserts
/// (the feed payload carries the bare row only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub author_id: ProfileId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_display_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewServer {
    pub name: String,
    pub owner_id: ProfileId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMembership {
    pub server_id: ServerId,
    pub profile_id: ProfileId,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewChannel {
    pub server_id: ServerId,
    pub name: String,
    pub kind: ChannelKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMessage {
    pub channel_id: ChannelId,
    pub author_id: ProfileId,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Wire form of one change-feed notification for the `messages` table.
/// `new` is populated for inserts and updates, `old` for deletes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeMessage {
    pub event: ChangeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new: Option<MessageRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<MessageRecord>,
}
