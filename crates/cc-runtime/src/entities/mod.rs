//! Entity proxies: script objects backed by live platform state.
//!
//! A proxy is either an identifier (unresolved) or a snapshot object
//! (resolved). Resolution issues one capability request; a `null` reply
//! resolves to `Null`. Snapshot fields are never refreshed, only a new
//! constructor or method call fetches new state.
//!
//! Payloads are always scoped to the invoking guild.

pub mod data;
pub mod proxy;

use std::sync::LazyLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::context::Context;
use crate::error::ScriptError;
use crate::value::Literal;
use crate::HostError;

use data::{ChannelData, EmojiData, GuildData, MemberData, MessageData, RoleData};

static MENTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^<(?:@[!&]?|#|a?:[\w~-]+:)(\d+)>$").expect("valid regex")
});

/// Strip mention markup (`<@id>`, `<@!id>`, `<@&id>`, `<#id>`, `<:name:id>`, `<a:name:id>`).
///
/// Anything else is returned trimmed but otherwise unchanged.
pub fn strip_mention(id: &str) -> &str {
    let id = id.trim();
    MENTION
        .captures(id)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(id)
}

/// Decode a reply into its snapshot shape.
pub(crate) fn decode<T: DeserializeOwned>(
    ctx: &Context,
    method: &str,
    action: &str,
    reply: Value,
) -> Result<T, ScriptError> {
    serde_json::from_value(reply).map_err(|e| {
        ctx.host_failure(
            action,
            &HostError::MalformedReply {
                method: method.to_string(),
                reason: e.to_string(),
            },
        )
    })
}

/// Request a single snapshot. A `null` reply is `None`.
pub(crate) async fn fetch_one<T: DeserializeOwned>(
    ctx: &Context,
    method: &str,
    payload: Value,
    action: &str,
) -> Result<Option<T>, ScriptError> {
    match ctx.request(method, payload, action).await? {
        Value::Null => Ok(None),
        reply => decode(ctx, method, action, reply).map(Some),
    }
}

/// Request a list of snapshots. A `null` reply is an empty list.
pub(crate) async fn fetch_list<T: DeserializeOwned>(
    ctx: &Context,
    method: &str,
    payload: Value,
    action: &str,
) -> Result<Vec<T>, ScriptError> {
    match ctx.request(method, payload, action).await? {
        Value::Null => Ok(Vec::new()),
        reply => decode(ctx, method, action, reply),
    }
}

async fn resolve<T: DeserializeOwned>(
    ctx: &Context,
    method: &str,
    id_key: &str,
    id: &str,
    action: &str,
    build: fn(&T) -> Literal,
) -> Result<Literal, ScriptError> {
    let mut payload = json!({ "guildId": ctx.guild_id() });
    payload[id_key] = Value::String(strip_mention(id).to_string());
    Ok(fetch_one::<T>(ctx, method, payload, action)
        .await?
        .map(|snapshot| build(&snapshot))
        .unwrap_or(Literal::Null))
}

/// Resolve an emoji by id or custom emoji markup.
pub async fn resolve_emoji(ctx: &Context, id: &str) -> Result<Literal, ScriptError> {
    resolve::<EmojiData>(ctx, "getEmoji", "emojiId", id, "get emoji", proxy::emoji).await
}

/// Resolve a message by id.
pub async fn resolve_message(ctx: &Context, id: &str) -> Result<Literal, ScriptError> {
    resolve::<MessageData>(ctx, "getMessage", "messageId", id, "get message", proxy::message).await
}

/// Resolve a role by id or `<@&id>`.
pub async fn resolve_role(ctx: &Context, id: &str) -> Result<Literal, ScriptError> {
    resolve::<RoleData>(ctx, "getRole", "roleId", id, "get role", proxy::role).await
}

/// Resolve a guild member by id, `<@id>` or `<@!id>`.
pub async fn resolve_member(ctx: &Context, id: &str) -> Result<Literal, ScriptError> {
    resolve::<MemberData>(ctx, "getMember", "memberId", id, "get member", proxy::member).await
}

/// Resolve a channel by id or `<#id>`.
pub async fn resolve_channel(ctx: &Context, id: &str) -> Result<Literal, ScriptError> {
    resolve::<ChannelData>(ctx, "getChannel", "channelId", id, "get channel", proxy::channel).await
}

/// Build the guild object from a snapshot the host injects into the script scope.
pub fn guild_from_json(ctx: &Context, snapshot: Value) -> Result<Literal, ScriptError> {
    let data: GuildData = decode(ctx, "guild", "get guild", snapshot)?;
    Ok(proxy::guild(&data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_every_mention_form() {
        assert_eq!(strip_mention("<@123>"), "123");
        assert_eq!(strip_mention("<@!123>"), "123");
        assert_eq!(strip_mention("<@&55>"), "55");
        assert_eq!(strip_mention("<#77>"), "77");
        assert_eq!(strip_mention("<:blob:999>"), "999");
        assert_eq!(strip_mention("<a:party_blob:998>"), "998");
        assert_eq!(strip_mention(" 123 "), "123");
    }

    #[test]
    fn leaves_other_text_alone() {
        assert_eq!(strip_mention("👍"), "👍");
        assert_eq!(strip_mention("<#abc>"), "<#abc>");
        assert_eq!(strip_mention("x<#1>"), "x<#1>");
    }
}
