//! Snapshot shapes returned by the trusted process.
//!
//! Replies are plain JSON. These structs give them a checked shape before
//! they are turned into script objects; a reply that does not fit is a
//! malformed reply, not a script-visible crash.
//!
//! Field names mirror the wire shape and are not documented one by one.

#![allow(missing_docs)]

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::permissions::PermissionBits;
use crate::time::{parse_time, time_from_ms};
use crate::value::Literal;

/// A timestamp as the platform serializes it: epoch milliseconds or an ISO string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Timestamp {
    /// Milliseconds since the epoch.
    Millis(f64),
    /// ISO-8601 text.
    Text(String),
}

impl Timestamp {
    /// The instant, if the value is a valid time.
    pub fn to_time(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Millis(ms) => time_from_ms(*ms),
            Self::Text(s) => parse_time(s),
        }
    }
}

pub(crate) fn time_literal(ts: Option<&Timestamp>) -> Literal {
    ts.and_then(Timestamp::to_time).map(Literal::Time).unwrap_or(Literal::Null)
}

/// Emoji snapshot.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmojiData {
    /// Unicode emoji have no id.
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub animated: bool,
    #[serde(default)]
    pub requires_colons: bool,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
    #[serde(default)]
    pub url: Option<String>,
}

/// Reaction snapshot. The owning message id is supplied by the message.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionData {
    pub id: String,
    #[serde(default)]
    pub count: f64,
    pub emoji: EmojiData,
}

/// Who and what a message mentions.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MentionsData {
    pub members: Vec<MemberData>,
    pub channels: Vec<ChannelData>,
    pub roles: Vec<RoleData>,
    pub everyone: bool,
}

/// Message snapshot.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageData {
    pub id: String,
    /// Absent for webhook and system messages.
    #[serde(default)]
    pub member: Option<MemberData>,
    pub channel: ChannelData,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
    #[serde(default)]
    pub edited_at: Option<Timestamp>,
    #[serde(default)]
    pub mentions: MentionsData,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub reactions: Vec<ReactionData>,
}

/// Role snapshot.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleData {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub position: f64,
    #[serde(default)]
    pub color: u32,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
    #[serde(default)]
    pub mentionable: bool,
    #[serde(default)]
    pub permissions: PermissionBits,
}

/// Guild member snapshot.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberData {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub discriminator: String,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub highest_role: Option<RoleData>,
    #[serde(default)]
    pub joined_at: Option<Timestamp>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub bot: bool,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
    #[serde(default)]
    pub permissions: PermissionBits,
}

/// Channel snapshot.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelData {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
    #[serde(default)]
    pub position: f64,
    #[serde(default)]
    pub nsfw: bool,
    #[serde(default)]
    pub topic: Option<String>,
}

/// Guild snapshot. Only ever injected by the host, never constructed by scripts.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuildData {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub member_count: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_decodes_nested_snapshots() {
        let msg: MessageData = serde_json::from_value(json!({
            "id": "m1",
            "member": { "id": "u1", "username": "ann", "discriminator": "0001" },
            "channel": { "id": "c1", "name": "general" },
            "text": "hi <@u2>",
            "createdAt": 1_600_000_000_000i64,
            "mentions": { "members": [{ "id": "u2", "username": "bob" }], "everyone": false },
            "reactions": [{ "id": "r1", "count": 2, "emoji": { "name": "👍" } }]
        }))
        .unwrap();
        assert_eq!(msg.member.unwrap().username, "ann");
        assert_eq!(msg.mentions.members.len(), 1);
        assert!(msg.mentions.roles.is_empty());
        assert_eq!(msg.reactions[0].emoji.name, "👍");
        assert!(msg.edited_at.is_none());
    }

    #[test]
    fn timestamps_accept_millis_or_text() {
        let a: Timestamp = serde_json::from_value(json!(0)).unwrap();
        let b: Timestamp = serde_json::from_value(json!("1970-01-01T00:00:00Z")).unwrap();
        assert_eq!(a.to_time(), b.to_time());
        assert!(Timestamp::Text("later".into()).to_time().is_none());
    }

    #[test]
    fn missing_required_field_is_an_error() {
        let res: Result<ChannelData, _> = serde_json::from_value(json!({ "name": "no-id" }));
        assert!(res.is_err());
    }
}
