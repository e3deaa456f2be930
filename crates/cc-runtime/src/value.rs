//! The literal value system.
//!
//! [`Literal`] is the only data a script can hold. It is a closed sum type:
//! every consumer matches it exhaustively, so adding a variant is a compile
//! error everywhere it is not yet handled.
//!
//! Scalars are stored inline. Arrays and objects are shared, in-place mutable
//! handles; cloning a `Literal::Array` or `Literal::Object` clones the handle,
//! not the contents, matching script-level reference semantics.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Number, Value};

use crate::context::Context;
use crate::embed::EmbedHandle;
use crate::error::ScriptError;
use crate::numeric::{format_number, parse_number};
use crate::time::format_iso_duration;

/// Tag used to persist a [`Literal::Time`] in plain JSON.
const TIME_TAG: &str = "$date";
/// Tag used to persist a [`Literal::Duration`] in plain JSON.
const DURATION_TAG: &str = "$duration";

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A runtime value.
#[derive(Clone)]
pub enum Literal {
    /// The absence of a value.
    Null,
    /// `true` or `false`.
    Boolean(bool),
    /// An IEEE-754 double.
    Number(f64),
    /// A string.
    String(String),
    /// An ordered, in-place mutable sequence.
    Array(ArrayRef),
    /// A string-keyed, in-place mutable mapping.
    Object(ObjectRef),
    /// An absolute instant.
    Time(DateTime<Utc>),
    /// A signed span of elapsed time.
    Duration(chrono::Duration),
    /// A host-provided callable.
    Function(NativeFunction),
}

impl Literal {
    /// Build an array literal from its elements.
    pub fn array(items: impl IntoIterator<Item = Literal>) -> Self {
        Literal::Array(ArrayRef::new(items.into_iter().collect()))
    }

    /// Build a plain object literal from `(name, value)` pairs.
    pub fn object<K: Into<String>>(fields: impl IntoIterator<Item = (K, Literal)>) -> Self {
        Literal::Object(ObjectRef::new(fields))
    }

    /// Script-facing name of the variant.
    pub fn type_name(&self) -> &'static str {
        match self {
            Literal::Null => "Null",
            Literal::Boolean(_) => "Boolean",
            Literal::Number(_) => "Number",
            Literal::String(_) => "String",
            Literal::Array(_) => "Array",
            Literal::Object(_) => "Object",
            Literal::Time(_) => "Time",
            Literal::Duration(_) => "Duration",
            Literal::Function(_) => "Function",
        }
    }

    /// Returns `true` for [`Literal::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Literal::Null)
    }

    /// Borrow the string content, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Literal::String(s) => Some(s),
            _ => None,
        }
    }

    /// The number content, if this is a number.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Literal::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// The object handle, if this is an object.
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Literal::Object(o) => Some(o),
            _ => None,
        }
    }

    /// The embed builder state, if this object is an embed builder.
    pub fn as_embed(&self) -> Option<EmbedHandle> {
        self.as_object().and_then(ObjectRef::embed)
    }

    /// Each variant's own truthiness, used by conditionals.
    pub fn truthy(&self) -> bool {
        match self {
            Literal::Null => false,
            Literal::Boolean(b) => *b,
            Literal::Number(n) => *n != 0.0 && !n.is_nan(),
            Literal::String(s) => !s.is_empty(),
            Literal::Array(_)
            | Literal::Object(_)
            | Literal::Time(_)
            | Literal::Duration(_)
            | Literal::Function(_) => true,
        }
    }

    /// The `Boolean(x)` coercion.
    ///
    /// A number is false only when it is numerically zero; a string is true
    /// only when it is exactly `"true"`. Everything else uses [`truthy`](Self::truthy).
    pub fn to_boolean(&self) -> bool {
        match self {
            Literal::Number(n) => *n != 0.0,
            Literal::String(s) => s == "true",
            other => other.truthy(),
        }
    }

    /// The `Number(x)` coercion.
    pub fn to_number(&self) -> f64 {
        match self {
            Literal::Boolean(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Literal::Number(n) => *n,
            Literal::String(s) => parse_number(s),
            Literal::Null
            | Literal::Array(_)
            | Literal::Object(_)
            | Literal::Time(_)
            | Literal::Duration(_)
            | Literal::Function(_) => f64::NAN,
        }
    }

    /// The `String(x)` coercion.
    ///
    /// Objects render as `[object Object]`; use [`to_display_string`](Self::to_display_string)
    /// to honour an object's own `toString` method.
    pub fn to_script_string(&self) -> String {
        match self {
            Literal::Null => "null".into(),
            Literal::Boolean(b) => b.to_string(),
            Literal::Number(n) => format_number(*n),
            Literal::String(s) => s.clone(),
            Literal::Array(a) => a
                .to_vec()
                .iter()
                .map(|item| match item {
                    Literal::Null => String::new(),
                    other => other.to_script_string(),
                })
                .collect::<Vec<_>>()
                .join(","),
            Literal::Object(_) => "[object Object]".into(),
            Literal::Time(t) => t.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            Literal::Duration(d) => format_iso_duration(*d),
            Literal::Function(f) => format!("[native function {}]", f.name()),
        }
    }

    /// String conversion that calls an object's own `toString` method when it has one.
    pub async fn to_display_string(&self, ctx: &Context) -> Result<String, ScriptError> {
        if let Literal::Object(obj) = self {
            if let Literal::Function(to_string) = obj.get("toString") {
                let rendered = to_string.call(ctx.clone(), Vec::new()).await?;
                return Ok(rendered.to_script_string());
            }
        }
        Ok(self.to_script_string())
    }

    /// Convert a plain JSON value into a literal. Total over every JSON value.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Null => Literal::Null,
            Value::Bool(b) => Literal::Boolean(b),
            Value::Number(n) => Literal::Number(n.as_f64().unwrap_or(f64::NAN)),
            Value::String(s) => Literal::String(s),
            Value::Array(items) => Literal::array(items.into_iter().map(Literal::from_json)),
            Value::Object(map) => {
                if let Some(tagged) = tagged_from_json(&map) {
                    return tagged;
                }
                Literal::object(
                    map.into_iter()
                        .map(|(k, v)| (unescape_key(k), Literal::from_json(v))),
                )
            }
        }
    }

    /// Convert a literal into plain JSON for storage or transport.
    ///
    /// Function-valued object fields are dropped. Non-finite numbers become
    /// `null`. Times and durations are tagged so [`from_json`](Self::from_json)
    /// restores their variant. Object keys starting with `$` get one more `$`
    /// so a script object can never be mistaken for a tag.
    pub fn to_json(&self) -> Value {
        match self {
            Literal::Null | Literal::Function(_) => Value::Null,
            Literal::Boolean(b) => Value::Bool(*b),
            Literal::Number(n) => Number::from_f64(*n).map(Value::Number).unwrap_or(Value::Null),
            Literal::String(s) => Value::String(s.clone()),
            Literal::Array(a) => Value::Array(a.to_vec().iter().map(Literal::to_json).collect()),
            Literal::Object(o) => {
                let mut map = Map::new();
                for (k, v) in o.entries() {
                    if !matches!(v, Literal::Function(_)) {
                        map.insert(escape_key(k), v.to_json());
                    }
                }
                Value::Object(map)
            }
            Literal::Time(t) => serde_json::json!({ TIME_TAG: t.timestamp_millis() }),
            Literal::Duration(d) => serde_json::json!({ DURATION_TAG: d.num_milliseconds() }),
        }
    }

    /// The `+` operator over the variants where it is defined.
    ///
    /// Returns `None` when the operand pair has no meaning; the evaluator
    /// reports that as a type error.
    pub fn add(&self, rhs: &Literal) -> Option<Literal> {
        match (self, rhs) {
            (Literal::Number(a), Literal::Number(b)) => Some(Literal::Number(a + b)),
            (Literal::String(a), b) => {
                Some(Literal::String(format!("{a}{}", b.to_script_string())))
            }
            (a, Literal::String(b)) => {
                Some(Literal::String(format!("{}{b}", a.to_script_string())))
            }
            (Literal::Time(t), Literal::Duration(d)) | (Literal::Duration(d), Literal::Time(t)) => {
                t.checked_add_signed(*d).map(Literal::Time)
            }
            (Literal::Duration(a), Literal::Duration(b)) => a.checked_add(b).map(Literal::Duration),
            _ => None,
        }
    }

    /// The `-` operator over the variants where it is defined.
    pub fn sub(&self, rhs: &Literal) -> Option<Literal> {
        match (self, rhs) {
            (Literal::Number(a), Literal::Number(b)) => Some(Literal::Number(a - b)),
            (Literal::Time(a), Literal::Time(b)) => {
                Some(Literal::Duration(a.signed_duration_since(*b)))
            }
            (Literal::Time(t), Literal::Duration(d)) => t.checked_sub_signed(*d).map(Literal::Time),
            (Literal::Duration(a), Literal::Duration(b)) => a.checked_sub(b).map(Literal::Duration),
            _ => None,
        }
    }
}

fn escape_key(key: String) -> String {
    if key.starts_with('$') {
        format!("${key}")
    } else {
        key
    }
}

fn unescape_key(key: String) -> String {
    match key.strip_prefix("$$") {
        Some(rest) => format!("${rest}"),
        None => key,
    }
}

fn tagged_from_json(map: &Map<String, Value>) -> Option<Literal> {
    if map.len() != 1 {
        return None;
    }
    if let Some(ms) = map.get(TIME_TAG).and_then(Value::as_i64) {
        return Utc.timestamp_millis_opt(ms).single().map(Literal::Time);
    }
    if let Some(ms) = map.get(DURATION_TAG).and_then(Value::as_i64) {
        return Some(Literal::Duration(chrono::Duration::milliseconds(ms)));
    }
    None
}

impl PartialEq for Literal {
    /// Strict equality: scalars by value (so NaN is unequal to itself),
    /// arrays, objects and functions by identity.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Literal::Null, Literal::Null) => true,
            (Literal::Boolean(a), Literal::Boolean(b)) => a == b,
            (Literal::Number(a), Literal::Number(b)) => a == b,
            (Literal::String(a), Literal::String(b)) => a == b,
            (Literal::Array(a), Literal::Array(b)) => a.ptr_eq(b),
            (Literal::Object(a), Literal::Object(b)) => a.ptr_eq(b),
            (Literal::Time(a), Literal::Time(b)) => a == b,
            (Literal::Duration(a), Literal::Duration(b)) => a == b,
            (Literal::Function(a), Literal::Function(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => write!(f, "Null"),
            Literal::Boolean(b) => write!(f, "Boolean({b})"),
            Literal::Number(n) => write!(f, "Number({n})"),
            Literal::String(s) => write!(f, "String({s:?})"),
            Literal::Array(a) => f.debug_tuple("Array").field(&a.to_vec()).finish(),
            Literal::Object(o) => f.debug_set().entries(o.keys()).finish(),
            Literal::Time(t) => write!(f, "Time({t})"),
            Literal::Duration(d) => write!(f, "Duration({}ms)", d.num_milliseconds()),
            Literal::Function(func) => write!(f, "Function({})", func.name()),
        }
    }
}

impl From<bool> for Literal {
    fn from(b: bool) -> Self {
        Literal::Boolean(b)
    }
}

impl From<f64> for Literal {
    fn from(n: f64) -> Self {
        Literal::Number(n)
    }
}

impl From<i64> for Literal {
    fn from(n: i64) -> Self {
        Literal::Number(n as f64)
    }
}

impl From<&str> for Literal {
    fn from(s: &str) -> Self {
        Literal::String(s.to_string())
    }
}

impl From<String> for Literal {
    fn from(s: String) -> Self {
        Literal::String(s)
    }
}

impl From<Vec<Literal>> for Literal {
    fn from(items: Vec<Literal>) -> Self {
        Literal::Array(ArrayRef::new(items))
    }
}

impl From<DateTime<Utc>> for Literal {
    fn from(t: DateTime<Utc>) -> Self {
        Literal::Time(t)
    }
}

impl From<chrono::Duration> for Literal {
    fn from(d: chrono::Duration) -> Self {
        Literal::Duration(d)
    }
}

impl<T: Into<Literal>> From<Option<T>> for Literal {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Literal::Null)
    }
}

// ---------------------------------------------------------------------------
// Arrays
// ---------------------------------------------------------------------------

/// Shared handle to an array's elements.
#[derive(Clone, Default)]
pub struct ArrayRef(Arc<Mutex<Vec<Literal>>>);

impl ArrayRef {
    /// Wrap a vector of elements.
    pub fn new(items: Vec<Literal>) -> Self {
        Self(Arc::new(Mutex::new(items)))
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        lock(&self.0).len()
    }

    /// Returns `true` when the array has no elements.
    pub fn is_empty(&self) -> bool {
        lock(&self.0).is_empty()
    }

    /// Element at `index`, or `Null` when out of range.
    pub fn get(&self, index: usize) -> Literal {
        lock(&self.0).get(index).cloned().unwrap_or(Literal::Null)
    }

    /// Replace the element at `index`. Returns `false` when out of range.
    pub fn set(&self, index: usize, value: Literal) -> bool {
        match lock(&self.0).get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Append an element.
    pub fn push(&self, value: Literal) {
        lock(&self.0).push(value);
    }

    /// Copy of the current elements.
    pub fn to_vec(&self) -> Vec<Literal> {
        lock(&self.0).clone()
    }

    /// Whether both handles refer to the same array.
    pub fn ptr_eq(&self, other: &ArrayRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

// ---------------------------------------------------------------------------
// Objects
// ---------------------------------------------------------------------------

/// What backs an object beyond its script-visible fields.
#[derive(Clone, Default)]
pub enum ObjectKind {
    /// An ordinary object.
    #[default]
    Plain,
    /// An embed builder; the handle holds the accumulated document.
    Embed(EmbedHandle),
}

struct ObjectData {
    fields: Mutex<HashMap<String, Literal>>,
    kind: ObjectKind,
}

/// Shared handle to an object's fields.
#[derive(Clone)]
pub struct ObjectRef(Arc<ObjectData>);

/// Non-owning handle used by an object's own methods to return itself.
#[derive(Clone)]
pub struct WeakObjectRef(Weak<ObjectData>);

impl WeakObjectRef {
    /// The object, if it is still alive.
    pub fn upgrade(&self) -> Option<ObjectRef> {
        self.0.upgrade().map(ObjectRef)
    }
}

impl ObjectRef {
    /// Create a plain object from `(name, value)` pairs.
    pub fn new<K: Into<String>>(fields: impl IntoIterator<Item = (K, Literal)>) -> Self {
        Self(Arc::new(ObjectData {
            fields: Mutex::new(fields.into_iter().map(|(k, v)| (k.into(), v)).collect()),
            kind: ObjectKind::Plain,
        }))
    }

    /// Create an object whose fields may hold a weak reference to the object itself.
    pub fn new_cyclic<F>(kind: ObjectKind, build: F) -> Self
    where
        F: FnOnce(&WeakObjectRef) -> Vec<(String, Literal)>,
    {
        Self(Arc::new_cyclic(|weak| {
            let fields = build(&WeakObjectRef(weak.clone()));
            ObjectData {
                fields: Mutex::new(fields.into_iter().collect()),
                kind,
            }
        }))
    }

    /// Field value, or `Null` when absent.
    pub fn get(&self, key: &str) -> Literal {
        lock(&self.0.fields).get(key).cloned().unwrap_or(Literal::Null)
    }

    /// Set a field, replacing any previous value.
    pub fn set(&self, key: impl Into<String>, value: Literal) {
        lock(&self.0.fields).insert(key.into(), value);
    }

    /// Whether the field is present (even if `Null`).
    pub fn contains(&self, key: &str) -> bool {
        lock(&self.0.fields).contains_key(key)
    }

    /// Remove a field, returning its previous value.
    pub fn remove(&self, key: &str) -> Option<Literal> {
        lock(&self.0.fields).remove(key)
    }

    /// Field names, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = lock(&self.0.fields).keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Copy of every `(name, value)` pair, sorted by name.
    pub fn entries(&self) -> Vec<(String, Literal)> {
        let mut entries: Vec<(String, Literal)> = lock(&self.0.fields)
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// The embed builder state, if this object is an embed builder.
    pub fn embed(&self) -> Option<EmbedHandle> {
        match &self.0.kind {
            ObjectKind::Embed(handle) => Some(handle.clone()),
            ObjectKind::Plain => None,
        }
    }

    /// Whether both handles refer to the same object.
    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

// ---------------------------------------------------------------------------
// Native functions
// ---------------------------------------------------------------------------

/// Boxed future returned by a native function.
pub type NativeFuture = Pin<Box<dyn Future<Output = Result<Literal, ScriptError>> + Send>>;

type NativeFn = dyn Fn(Context, Vec<Literal>) -> NativeFuture + Send + Sync;

/// A host-provided callable.
///
/// The callable receives the calling [`Context`] (whose `args` describe the
/// call site) and the raw argument literals. It may complete immediately or
/// suspend on a capability request.
#[derive(Clone)]
pub struct NativeFunction {
    name: Arc<str>,
    func: Arc<NativeFn>,
}

impl NativeFunction {
    /// Wrap an async callable.
    pub fn new<F, Fut>(name: impl Into<Arc<str>>, f: F) -> Self
    where
        F: Fn(Context, Vec<Literal>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Literal, ScriptError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(move |ctx, args| Box::pin(f(ctx, args))),
        }
    }

    /// Wrap a callable that never suspends.
    pub fn sync<F>(name: impl Into<Arc<str>>, f: F) -> Self
    where
        F: Fn(&Context, &[Literal]) -> Result<Literal, ScriptError> + Send + Sync + 'static,
    {
        Self::new(name, move |ctx, args| std::future::ready(f(&ctx, &args)))
    }

    /// The function's name, used in diagnostics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoke the function.
    pub async fn call(&self, ctx: Context, args: Vec<Literal>) -> Result<Literal, ScriptError> {
        (self.func)(ctx, args).await
    }

    /// Whether both handles refer to the same callable.
    pub fn ptr_eq(&self, other: &NativeFunction) -> bool {
        Arc::ptr_eq(&self.func, &other.func)
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeFunction({})", self.name)
    }
}

impl From<NativeFunction> for Literal {
    fn from(f: NativeFunction) -> Self {
        Literal::Function(f)
    }
}
