//! Rich embed builder.
//!
//! `RichEmbed()` returns an object whose setters validate the platform's
//! structural limits at call time and return the same builder for chaining.
//! The accumulated [`EmbedDocument`] is what gets sent over the capability
//! bridge.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::Context;
use crate::error::ScriptError;
use crate::time::time_from_ms;
use crate::value::{lock, Literal, NativeFunction, ObjectKind, ObjectRef, WeakObjectRef};

/// Maximum number of fields in one embed.
pub const MAX_FIELDS: usize = 25;
/// Maximum length of a field name.
pub const MAX_FIELD_NAME: usize = 256;
/// Maximum length of a field value.
pub const MAX_FIELD_VALUE: usize = 1024;
/// Maximum length of the description, title and footer text.
pub const MAX_TEXT: usize = 2048;
/// Largest valid color.
pub const MAX_COLOR: u32 = 0xFF_FFFF;

const BLANK: &str = "\u{200B}";

/// A structural limit violation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmbedError {
    /// More than 25 fields.
    #[error("RichEmbeds may not exceed 25 fields.")]
    TooManyFields,
    /// Field name longer than 256 characters.
    #[error("RichEmbed field names may not exceed 256 characters.")]
    FieldNameTooLong,
    /// Field name empty or whitespace.
    #[error("RichEmbed field names may not be empty.")]
    FieldNameEmpty,
    /// Field value longer than 1024 characters.
    #[error("RichEmbed field values may not exceed 1024 characters.")]
    FieldValueTooLong,
    /// Field value empty or whitespace.
    #[error("RichEmbed field values may not be empty.")]
    FieldValueEmpty,
    /// Description too long.
    #[error("RichEmbed descriptions may not exceed 2048 characters.")]
    DescriptionTooLong,
    /// Title too long.
    #[error("RichEmbed title text may not exceed 2048 characters.")]
    TitleTooLong,
    /// Footer text too long.
    #[error("RichEmbed footer text may not exceed 2048 characters.")]
    FooterTooLong,
    /// Color outside `0..=0xFFFFFF`.
    #[error("Color must be within the range 0 - 16777215 (0xFFFFFF).")]
    ColorOutOfRange,
    /// Color that is not a number, hex string or symbolic name.
    #[error("Unable to convert color to a number.")]
    ColorNotANumber,
}

/// Embed author block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedAuthor {
    /// Display name.
    pub name: String,
    /// Icon shown beside the name.
    pub icon_url: Option<String>,
    /// Link on the name.
    pub url: Option<String>,
}

/// One embed field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedField {
    /// Field heading.
    pub name: String,
    /// Field body.
    pub value: String,
    /// Render beside adjacent inline fields.
    pub inline: bool,
}

/// Embed footer block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedFooter {
    /// Footer text.
    pub text: String,
    /// Icon shown beside the text.
    pub icon_url: Option<String>,
}

/// Image or thumbnail reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedImage {
    /// Image location.
    pub url: Option<String>,
}

/// The normalized embed document. Unset parts serialize as `null`.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbedDocument {
    pub author: Option<EmbedAuthor>,
    pub color: Option<u32>,
    pub description: Option<String>,
    pub fields: Vec<EmbedField>,
    pub footer: Option<EmbedFooter>,
    pub image: Option<EmbedImage>,
    pub thumbnail: Option<EmbedImage>,
    pub timestamp: Option<String>,
    pub title: Option<String>,
    pub url: Option<String>,
}

/// Shared builder state behind an embed object.
#[derive(Clone, Default)]
pub struct EmbedHandle(Arc<Mutex<EmbedDocument>>);

fn is_blank(s: &str) -> bool {
    s.chars().all(char::is_whitespace)
}

fn check_len(s: &str, max: usize, err: EmbedError) -> Result<(), EmbedError> {
    if s.chars().count() > max {
        Err(err)
    } else {
        Ok(())
    }
}

impl EmbedHandle {
    /// Copy of the accumulated document.
    pub fn get_embed(&self) -> EmbedDocument {
        lock(&self.0).clone()
    }

    /// The accumulated document as transport JSON.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&*lock(&self.0)).unwrap_or(serde_json::Value::Null)
    }

    /// Append a field. Names and values must contain a non-whitespace character.
    pub fn add_field(&self, name: &str, value: &str, inline: bool) -> Result<(), EmbedError> {
        let mut doc = lock(&self.0);
        if doc.fields.len() >= MAX_FIELDS {
            return Err(EmbedError::TooManyFields);
        }
        check_len(name, MAX_FIELD_NAME, EmbedError::FieldNameTooLong)?;
        if is_blank(name) {
            return Err(EmbedError::FieldNameEmpty);
        }
        check_len(value, MAX_FIELD_VALUE, EmbedError::FieldValueTooLong)?;
        if is_blank(value) {
            return Err(EmbedError::FieldValueEmpty);
        }
        doc.fields.push(EmbedField {
            name: name.to_string(),
            value: value.to_string(),
            inline,
        });
        Ok(())
    }

    /// Replace the author block.
    pub fn set_author(&self, name: String, icon_url: Option<String>, url: Option<String>) {
        lock(&self.0).author = Some(EmbedAuthor { name, icon_url, url });
    }

    /// Set the color, which must lie within `0..=0xFFFFFF`.
    pub fn set_color(&self, color: u32) -> Result<(), EmbedError> {
        if color > MAX_COLOR {
            return Err(EmbedError::ColorOutOfRange);
        }
        lock(&self.0).color = Some(color);
        Ok(())
    }

    /// Set the description.
    pub fn set_description(&self, description: String) -> Result<(), EmbedError> {
        check_len(&description, MAX_TEXT, EmbedError::DescriptionTooLong)?;
        lock(&self.0).description = Some(description);
        Ok(())
    }

    /// Replace the footer block.
    pub fn set_footer(&self, text: String, icon_url: Option<String>) -> Result<(), EmbedError> {
        check_len(&text, MAX_TEXT, EmbedError::FooterTooLong)?;
        lock(&self.0).footer = Some(EmbedFooter { text, icon_url });
        Ok(())
    }

    /// Set the image URL.
    pub fn set_image(&self, url: Option<String>) {
        lock(&self.0).image = Some(EmbedImage { url });
    }

    /// Set the thumbnail URL.
    pub fn set_thumbnail(&self, url: Option<String>) {
        lock(&self.0).thumbnail = Some(EmbedImage { url });
    }

    /// Store `at` as an ISO-8601 timestamp.
    pub fn set_timestamp(&self, at: DateTime<Utc>) {
        lock(&self.0).timestamp = Some(at.to_rfc3339_opts(SecondsFormat::Millis, true));
    }

    /// Set the title.
    pub fn set_title(&self, title: String) -> Result<(), EmbedError> {
        check_len(&title, MAX_TEXT, EmbedError::TitleTooLong)?;
        lock(&self.0).title = Some(title);
        Ok(())
    }

    /// Set the URL the title links to.
    pub fn set_url(&self, url: Option<String>) {
        lock(&self.0).url = url;
    }
}

/// Resolve a script color argument: a number, a hex string, `"RANDOM"` or `"DEFAULT"`.
pub fn resolve_color(color: &Literal) -> Result<u32, EmbedError> {
    let n = match color {
        Literal::Null => 0.0,
        Literal::Number(n) => *n,
        Literal::String(s) if s == "RANDOM" => return Ok(rand::random::<u32>() % (MAX_COLOR + 1)),
        Literal::String(s) if s == "DEFAULT" => return Ok(0),
        Literal::String(s) => {
            let hex = s.trim().trim_start_matches('#');
            i64::from_str_radix(hex, 16).map_err(|_| EmbedError::ColorNotANumber)? as f64
        }
        _ => return Err(EmbedError::ColorNotANumber),
    };
    if n.is_nan() {
        return Err(EmbedError::ColorNotANumber);
    }
    if !(0.0..=MAX_COLOR as f64).contains(&n) {
        return Err(EmbedError::ColorOutOfRange);
    }
    Ok(n.trunc() as u32)
}

fn text_arg(args: &[Literal], i: usize) -> String {
    match args.get(i) {
        None | Some(Literal::Null) => String::new(),
        Some(v) => v.to_script_string(),
    }
}

fn optional_text_arg(args: &[Literal], i: usize) -> Option<String> {
    match args.get(i) {
        None | Some(Literal::Null) => None,
        Some(v) => Some(v.to_script_string()),
    }
}

type Setter = fn(&EmbedHandle, &[Literal]) -> Result<(), (EmbedError, usize)>;

fn setter(
    weak: &WeakObjectRef,
    handle: &EmbedHandle,
    name: &'static str,
    apply: Setter,
) -> (String, Literal) {
    let weak = weak.clone();
    let handle = handle.clone();
    let func = NativeFunction::sync(name, move |ctx: &Context, args: &[Literal]| {
        apply(&handle, args).map_err(|(err, arg)| embed_error(ctx, err, arg))?;
        Ok(weak.upgrade().map(Literal::Object).unwrap_or(Literal::Null))
    });
    (name.to_string(), Literal::Function(func))
}

fn embed_error(ctx: &Context, err: EmbedError, arg: usize) -> ScriptError {
    ctx.structural_error(err.to_string(), Some(arg))
}

/// Create a new embed builder object.
pub fn rich_embed() -> Literal {
    let handle = EmbedHandle::default();
    let obj = ObjectRef::new_cyclic(ObjectKind::Embed(handle.clone()), |weak| {
        let doc = handle.clone();
        let get_embed =
            NativeFunction::sync("getEmbed", move |_, _| Ok(Literal::from_json(doc.to_json())));
        vec![
            ("getEmbed".to_string(), Literal::Function(get_embed)),
            setter(weak, &handle, "addField", |h, args| {
                let name = text_arg(args, 0);
                let value = text_arg(args, 1);
                let inline = args.get(2).is_some_and(Literal::truthy);
                h.add_field(&name, &value, inline).map_err(|e| {
                    let arg = match e {
                        EmbedError::FieldValueTooLong | EmbedError::FieldValueEmpty => 1,
                        _ => 0,
                    };
                    (e, arg)
                })
            }),
            setter(weak, &handle, "addBlankField", |h, args| {
                let inline = args.first().is_some_and(Literal::truthy);
                h.add_field(BLANK, BLANK, inline).map_err(|e| (e, 0))
            }),
            setter(weak, &handle, "setAuthor", |h, args| {
                h.set_author(
                    text_arg(args, 0),
                    optional_text_arg(args, 1),
                    optional_text_arg(args, 2),
                );
                Ok(())
            }),
            setter(weak, &handle, "setColor", |h, args| {
                let color =
                    resolve_color(args.first().unwrap_or(&Literal::Null)).map_err(|e| (e, 0))?;
                h.set_color(color).map_err(|e| (e, 0))
            }),
            setter(weak, &handle, "setDescription", |h, args| {
                h.set_description(text_arg(args, 0)).map_err(|e| (e, 0))
            }),
            setter(weak, &handle, "setFooter", |h, args| {
                h.set_footer(text_arg(args, 0), optional_text_arg(args, 1))
                    .map_err(|e| (e, 0))
            }),
            setter(weak, &handle, "setImage", |h, args| {
                h.set_image(optional_text_arg(args, 0));
                Ok(())
            }),
            setter(weak, &handle, "setThumbnail", |h, args| {
                h.set_thumbnail(optional_text_arg(args, 0));
                Ok(())
            }),
            setter(weak, &handle, "setTimestamp", |h, args| {
                let at = match args.first() {
                    Some(Literal::Time(t)) => *t,
                    Some(Literal::Number(ms)) => time_from_ms(*ms).unwrap_or_else(Utc::now),
                    _ => Utc::now(),
                };
                h.set_timestamp(at);
                Ok(())
            }),
            setter(weak, &handle, "setTitle", |h, args| {
                h.set_title(text_arg(args, 0)).map_err(|e| (e, 0))
            }),
            setter(weak, &handle, "setURL", |h, args| {
                h.set_url(optional_text_arg(args, 0));
                Ok(())
            }),
        ]
    });
    Literal::Object(obj)
}
