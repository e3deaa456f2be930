//! Snapshot objects and their bound methods.
//!
//! Builders here are synchronous: every nested entity is already part of the
//! reply. Methods that touch live state issue their own request when called.

use std::future::Future;

use serde_json::{json, Map, Value};

use super::data::{
    time_literal, ChannelData, EmojiData, GuildData, MemberData, MentionsData, MessageData,
    ReactionData, RoleData,
};
use super::{decode, fetch_list, resolve_member};
use crate::context::Context;
use crate::error::ScriptError;
use crate::permissions::has_permission;
use crate::value::{Literal, NativeFunction};

type Field = (String, Literal);

const BAD_CONTENT: &str = "Message content must be a String or a RichEmbed";

fn field(name: &str, value: impl Into<Literal>) -> Field {
    (name.to_string(), value.into())
}

fn method<F, Fut>(name: &'static str, f: F) -> Field
where
    F: Fn(Context, Vec<Literal>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Literal, ScriptError>> + Send + 'static,
{
    (name.to_string(), Literal::Function(NativeFunction::new(name, f)))
}

fn to_string_method(rendered: String) -> Field {
    let func = NativeFunction::sync("toString", move |_, _| Ok(Literal::String(rendered.clone())));
    ("toString".to_string(), Literal::Function(func))
}

fn has_permission_method(mask: u64) -> Field {
    let func = NativeFunction::sync("hasPermission", move |ctx: &Context, args: &[Literal]| {
        match args.first() {
            Some(Literal::String(name)) => has_permission(mask, name)
                .map(Literal::Boolean)
                .map_err(|e| ctx.error(e.to_string(), Some(0))),
            _ => Err(ctx.error("Permission name must be a String", Some(0))),
        }
    });
    ("hasPermission".to_string(), Literal::Function(func))
}

fn list_method<T, B>(
    name: &'static str,
    rpc: &'static str,
    action: &'static str,
    payload: Value,
    build: B,
) -> Field
where
    T: serde::de::DeserializeOwned + Send + 'static,
    B: Fn(&T) -> Literal + Copy + Send + Sync + 'static,
{
    method(name, move |ctx, _args| {
        let mut payload = payload.clone();
        payload["guildId"] = Value::String(ctx.guild_id().to_string());
        async move {
            let items: Vec<T> = fetch_list(&ctx, rpc, payload, action).await?;
            Ok(Literal::array(items.iter().map(build)))
        }
    })
}

/// Build a send/edit payload from `(content | embed, embed?)`.
///
/// Rejected before any request is made when the first argument is neither
/// a string nor an embed builder.
fn content_payload(
    ctx: &Context,
    args: &[Literal],
    mut payload: Map<String, Value>,
) -> Result<Value, ScriptError> {
    payload.insert("guildId".into(), Value::String(ctx.guild_id().to_string()));
    match args.first() {
        Some(Literal::String(text)) => {
            let embed = args
                .get(1)
                .and_then(Literal::as_embed)
                .map(|e| e.to_json())
                .unwrap_or(Value::Null);
            payload.insert("content".into(), Value::String(text.clone()));
            payload.insert("embed".into(), embed);
        }
        Some(other) => match other.as_embed() {
            Some(embed) => {
                payload.insert("embed".into(), embed.to_json());
            }
            None => return Err(ctx.structural_error(BAD_CONTENT, Some(0))),
        },
        None => return Err(ctx.structural_error(BAD_CONTENT, Some(0))),
    }
    Ok(Value::Object(payload))
}

fn message_method(
    name: &'static str,
    rpc: &'static str,
    action: &'static str,
    id_key: &'static str,
    id: String,
) -> Field {
    method(name, move |ctx, args| {
        let mut base = Map::new();
        base.insert(id_key.into(), Value::String(id.clone()));
        let payload = content_payload(&ctx, &args, base);
        async move {
            let reply = ctx.request(rpc, payload?, action).await?;
            if reply.is_null() {
                return Ok(Literal::Null);
            }
            let data: MessageData = decode(&ctx, rpc, action, reply)?;
            Ok(message(&data))
        }
    })
}

/// Emoji snapshot object.
pub fn emoji(data: &EmojiData) -> Literal {
    let rendered = match &data.id {
        Some(id) if data.requires_colons => {
            format!("<{}:{}:{}>", if data.animated { "a" } else { "" }, data.name, id)
        }
        _ => data.name.clone(),
    };
    Literal::object([
        field("animated", data.animated),
        field("name", data.name.as_str()),
        field("id", data.id.clone()),
        field("identifier", data.id.as_ref().map(|id| format!("{}:{}", data.name, id))),
        field("createdAt", time_literal(data.created_at.as_ref())),
        field("url", data.url.clone()),
        to_string_method(rendered),
    ])
}

/// Reaction snapshot object for a reaction on `message_id`.
pub fn reaction(data: &ReactionData, message_id: &str) -> Literal {
    Literal::object([
        field("count", data.count),
        field("emoji", emoji(&data.emoji)),
        field("id", data.id.as_str()),
        list_method::<MemberData, _>(
            "getMembers",
            "reaction.getMembers",
            "get members for reaction",
            json!({ "messageId": message_id, "reactionId": data.id }),
            member,
        ),
    ])
}

/// Mentions of a message.
pub fn mentions(data: &MentionsData) -> Literal {
    Literal::object([
        field("members", Literal::array(data.members.iter().map(member))),
        field("channels", Literal::array(data.channels.iter().map(channel))),
        field("roles", Literal::array(data.roles.iter().map(role))),
        field("everyone", data.everyone),
    ])
}

/// Message snapshot object.
pub fn message(data: &MessageData) -> Literal {
    let id = data.id.clone();

    let delete_id = id.clone();
    let delete = method("delete", move |ctx, _args| {
        let payload = json!({ "guildId": ctx.guild_id(), "messageId": delete_id });
        async move {
            ctx.request("message.delete", payload, "delete message").await?;
            Ok(Literal::Null)
        }
    });

    let react_id = id.clone();
    let react = method("react", move |ctx, args| {
        let emojis: Vec<Value> = args
            .iter()
            .filter_map(|e| match e {
                Literal::String(s) => Some(s.clone()),
                Literal::Object(obj) => match obj.get("identifier") {
                    Literal::String(identifier) => Some(identifier),
                    _ => obj.get("name").as_str().map(str::to_string),
                },
                _ => None,
            })
            .map(Value::String)
            .collect();
        let payload = json!({ "guildId": ctx.guild_id(), "messageId": react_id, "emojis": emojis });
        async move {
            ctx.request("message.react", payload, "react to message").await?;
            Ok(Literal::Null)
        }
    });

    Literal::object([
        field("id", id.as_str()),
        field("member", data.member.as_ref().map(member).unwrap_or(Literal::Null)),
        field("channel", channel(&data.channel)),
        field("text", data.text.as_str()),
        field("createdAt", time_literal(data.created_at.as_ref())),
        field("editedAt", time_literal(data.edited_at.as_ref())),
        field("mentions", mentions(&data.mentions)),
        field("pinned", data.pinned),
        field(
            "reactions",
            Literal::array(data.reactions.iter().map(|r| reaction(r, &id))),
        ),
        to_string_method(data.text.clone()),
        delete,
        message_method("edit", "message.edit", "edit message", "messageId", id.clone()),
        react,
    ])
}

/// Role snapshot object.
pub fn role(data: &RoleData) -> Literal {
    Literal::object([
        field("id", data.id.as_str()),
        field("position", data.position),
        field("color", data.color as f64),
        field("hexColor", format!("{:x}", data.color)),
        field("createdAt", time_literal(data.created_at.as_ref())),
        field("mentionable", data.mentionable),
        field("name", data.name.as_str()),
        to_string_method(format!("<@&{}>", data.id)),
        list_method::<MemberData, _>(
            "getMembers",
            "role.getMembers",
            "get members of role",
            json!({ "roleId": data.id }),
            member,
        ),
        has_permission_method(data.permissions.bits()),
    ])
}

/// Guild member snapshot object.
pub fn member(data: &MemberData) -> Literal {
    Literal::object([
        field("id", data.id.as_str()),
        field("nickname", data.nickname.clone().unwrap_or_else(|| data.username.clone())),
        field("highestRole", data.highest_role.as_ref().map(role).unwrap_or(Literal::Null)),
        field("joinedAt", time_literal(data.joined_at.as_ref())),
        field("avatar", data.avatar.clone()),
        field("bot", data.bot),
        field("createdAt", time_literal(data.created_at.as_ref())),
        field("discriminator", data.discriminator.as_str()),
        field("username", data.username.as_str()),
        field("tag", format!("{}#{}", data.username, data.discriminator)),
        to_string_method(format!("<@{}>", data.id)),
        list_method::<RoleData, _>(
            "getRoles",
            "member.getRoles",
            "get roles of member",
            json!({ "memberId": data.id }),
            role,
        ),
        has_permission_method(data.permissions.bits()),
    ])
}

/// Channel snapshot object.
pub fn channel(data: &ChannelData) -> Literal {
    let invite_id = data.id.clone();
    let create_invite = method("createInvite", move |ctx, args| {
        let mut options = json!({
            "temporary": false,
            "maxAge": 86400,
            "maxUses": 0,
            "unique": false
        });
        if let Some(opts) = args.first().and_then(Literal::as_object) {
            for key in ["temporary", "unique"] {
                match opts.get(key) {
                    Literal::Null => {}
                    v => options[key] = Value::Bool(v.truthy()),
                }
            }
            for key in ["maxAge", "maxUses"] {
                if let Literal::Number(n) = opts.get(key) {
                    options[key] = json!(n);
                }
            }
        }
        let payload = json!({
            "guildId": ctx.guild_id(),
            "channelId": invite_id,
            "options": options
        });
        async move {
            match ctx.request("channel.createInvite", payload, "create invite").await? {
                Value::String(code) => Ok(Literal::String(code)),
                _ => Ok(Literal::Null),
            }
        }
    });

    Literal::object([
        field("id", data.id.as_str()),
        field("name", data.name.as_str()),
        field("createdAt", time_literal(data.created_at.as_ref())),
        field("position", data.position),
        field("nsfw", data.nsfw),
        field("topic", data.topic.clone()),
        to_string_method(format!("<#{}>", data.id)),
        create_invite,
        message_method("send", "channel.send", "send message", "channelId", data.id.clone()),
    ])
}

/// Guild snapshot object.
pub fn guild(data: &GuildData) -> Literal {
    let owner_id = data.owner_id.clone();
    let get_owner = method("getOwner", move |ctx, _args| {
        let owner_id = owner_id.clone();
        async move { resolve_member(&ctx, &owner_id).await }
    });

    Literal::object([
        field("id", data.id.as_str()),
        field("name", data.name.as_str()),
        field("createdAt", time_literal(data.created_at.as_ref())),
        field("icon", data.icon.clone()),
        field("memberCount", data.member_count),
        to_string_method(data.name.clone()),
        list_method::<MemberData, _>(
            "getMembers",
            "guild.getMembers",
            "get members of guild",
            json!({}),
            member,
        ),
        get_owner,
        list_method::<RoleData, _>(
            "getRoles",
            "guild.getRoles",
            "get roles of guild",
            json!({}),
            role,
        ),
        list_method::<ChannelData, _>(
            "getChannels",
            "guild.getChannels",
            "get channels of guild",
            json!({}),
            channel,
        ),
        list_method::<EmojiData, _>(
            "getEmojis",
            "guild.getEmojis",
            "get emojis of guild",
            json!({}),
            emoji,
        ),
    ])
}
