//! Locally evaluated platform permission bitmasks.
//!
//! Role and member snapshots carry a decoded bitmask. `hasPermission` checks it
//! without a capability request; the administrator flag grants everything.

use serde::Deserialize;

/// Platform permission flags, by canonical name.
pub const PERMISSION_FLAGS: &[(&str, u64)] = &[
    ("CREATE_INSTANT_INVITE", 1 << 0),
    ("KICK_MEMBERS", 1 << 1),
    ("BAN_MEMBERS", 1 << 2),
    ("ADMINISTRATOR", 1 << 3),
    ("MANAGE_CHANNELS", 1 << 4),
    ("MANAGE_GUILD", 1 << 5),
    ("ADD_REACTIONS", 1 << 6),
    ("VIEW_AUDIT_LOG", 1 << 7),
    ("PRIORITY_SPEAKER", 1 << 8),
    ("STREAM", 1 << 9),
    ("VIEW_CHANNEL", 1 << 10),
    ("SEND_MESSAGES", 1 << 11),
    ("SEND_TTS_MESSAGES", 1 << 12),
    ("MANAGE_MESSAGES", 1 << 13),
    ("EMBED_LINKS", 1 << 14),
    ("ATTACH_FILES", 1 << 15),
    ("READ_MESSAGE_HISTORY", 1 << 16),
    ("MENTION_EVERYONE", 1 << 17),
    ("USE_EXTERNAL_EMOJIS", 1 << 18),
    ("CONNECT", 1 << 20),
    ("SPEAK", 1 << 21),
    ("MUTE_MEMBERS", 1 << 22),
    ("DEAFEN_MEMBERS", 1 << 23),
    ("MOVE_MEMBERS", 1 << 24),
    ("USE_VAD", 1 << 25),
    ("CHANGE_NICKNAME", 1 << 26),
    ("MANAGE_NICKNAMES", 1 << 27),
    ("MANAGE_ROLES", 1 << 28),
    ("MANAGE_WEBHOOKS", 1 << 29),
    ("MANAGE_EMOJIS", 1 << 30),
    // legacy aliases
    ("READ_MESSAGES", 1 << 10),
    ("EXTERNAL_EMOJIS", 1 << 18),
    ("MANAGE_ROLES_OR_PERMISSIONS", 1 << 28),
];

const ADMINISTRATOR: u64 = 1 << 3;

/// The flag for a permission name, matched case-insensitively.
pub fn permission_flag(name: &str) -> Option<u64> {
    PERMISSION_FLAGS
        .iter()
        .find(|(flag, _)| flag.eq_ignore_ascii_case(name))
        .map(|(_, bit)| *bit)
}

/// The closest known permission name, for "did you mean" hints.
pub fn suggest_permission(name: &str) -> Option<&'static str> {
    let upper = name.to_ascii_uppercase();
    PERMISSION_FLAGS
        .iter()
        .map(|(flag, _)| (*flag, strsim::jaro_winkler(&upper, flag)))
        .filter(|(_, score)| *score > 0.8)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(flag, _)| flag)
}

/// A permission bitmask as sent by the trusted process.
///
/// The platform serializes large bitfields as decimal strings, so both forms are accepted.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PermissionBits {
    /// Numeric form.
    Number(u64),
    /// Decimal string form.
    Text(String),
}

impl Default for PermissionBits {
    fn default() -> Self {
        Self::Number(0)
    }
}

impl PermissionBits {
    /// The decoded mask. An unparseable string decodes to no permissions.
    pub fn bits(&self) -> u64 {
        match self {
            Self::Number(n) => *n,
            Self::Text(s) => s.trim().parse().unwrap_or(0),
        }
    }
}

/// Unknown permission name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown permission '{name}'{}", did_you_mean(.suggestion))]
pub struct UnknownPermission {
    /// The name that was asked for.
    pub name: String,
    /// The closest known name, if any is close.
    pub suggestion: Option<&'static str>,
}

fn did_you_mean(suggestion: &Option<&'static str>) -> String {
    suggestion
        .map(|s| format!(". Did you mean '{s}'?"))
        .unwrap_or_default()
}

/// Whether `mask` grants the named permission. Administrator grants every permission.
pub fn has_permission(mask: u64, name: &str) -> Result<bool, UnknownPermission> {
    let flag = permission_flag(name).ok_or_else(|| UnknownPermission {
        name: name.to_string(),
        suggestion: suggest_permission(name),
    })?;
    Ok(mask & ADMINISTRATOR != 0 || mask & flag == flag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_match_case_insensitively() {
        assert_eq!(permission_flag("send_messages"), Some(1 << 11));
        assert_eq!(permission_flag("Kick_Members"), Some(1 << 1));
        assert_eq!(permission_flag("READ_MESSAGES"), permission_flag("VIEW_CHANNEL"));
    }

    #[test]
    fn administrator_grants_everything() {
        assert!(has_permission(ADMINISTRATOR, "MANAGE_EMOJIS").unwrap());
        assert!(has_permission(ADMINISTRATOR, "ban_members").unwrap());
    }

    #[test]
    fn plain_mask_grants_only_its_bits() {
        let mask = (1 << 11) | (1 << 6);
        assert!(has_permission(mask, "SEND_MESSAGES").unwrap());
        assert!(has_permission(mask, "add_reactions").unwrap());
        assert!(!has_permission(mask, "KICK_MEMBERS").unwrap());
    }

    #[test]
    fn unknown_name_suggests_closest() {
        let err = has_permission(0, "SEND_MESAGES").unwrap_err();
        assert_eq!(err.suggestion, Some("SEND_MESSAGES"));
        assert!(err.to_string().contains("Did you mean 'SEND_MESSAGES'?"));

        let err = has_permission(0, "zzz").unwrap_err();
        assert_eq!(err.suggestion, None);
        assert_eq!(err.to_string(), "Unknown permission 'zzz'");
    }

    #[test]
    fn bits_decode_from_string_or_number() {
        let from_text: PermissionBits = serde_json::from_value(serde_json::json!("2048")).unwrap();
        let from_num: PermissionBits = serde_json::from_value(serde_json::json!(2048)).unwrap();
        assert_eq!(from_text.bits(), 2048);
        assert_eq!(from_num.bits(), 2048);
        assert_eq!(PermissionBits::Text("nope".into()).bits(), 0);
    }
}
