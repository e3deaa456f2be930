//! Per-guild key-value storage.
//!
//! Each (guild, namespace) pair owns one document whose blob is a JSON map of
//! stored values. `set` is the only budget-checked path: it sums every
//! namespace document of the guild, with the candidate blob in place of the
//! current one, and refuses the write when the total exceeds the guild budget.
//!
//! The check is read-modify-write with no isolation. Two concurrent `set`
//! calls on the same guild can both pass the check and one update can be lost.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::{Map, Value};

use crate::context::Context;
use crate::error::ScriptError;
use crate::numeric::format_number;
use crate::value::{lock, Literal, NativeFunction};
use crate::{DocumentStore, HostError};

const READ_FAILED: &str = "Couldn't get data from database";
const WRITE_FAILED: &str = "Couldn't update data in database";
const BAD_KEY: &str = "A storage key may only be a String or a Number";
const BAD_VALUE: &str = "A storage value can only be a literal, not a func";

/// One persisted namespace document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageDocument {
    /// Owning guild.
    pub guild_id: String,
    /// Namespace within the guild.
    pub storage_id: String,
    /// Serialized JSON map.
    pub data: Vec<u8>,
}

impl StorageDocument {
    /// Bytes this document counts against the guild budget.
    pub fn budget_size(&self) -> usize {
        self.storage_id.len() + self.data.len()
    }
}

/// In-process [`DocumentStore`] for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    docs: Mutex<HashMap<(String, String), Vec<u8>>>,
}

impl MemoryDocumentStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn find_one(
        &self,
        guild_id: &str,
        storage_id: &str,
    ) -> Result<Option<StorageDocument>, HostError> {
        let docs = lock(&self.docs);
        Ok(docs
            .get(&(guild_id.to_string(), storage_id.to_string()))
            .map(|data| StorageDocument {
                guild_id: guild_id.to_string(),
                storage_id: storage_id.to_string(),
                data: data.clone(),
            }))
    }

    async fn find_by_guild(&self, guild_id: &str) -> Result<Vec<StorageDocument>, HostError> {
        let docs = lock(&self.docs);
        let mut found: Vec<StorageDocument> = docs
            .iter()
            .filter(|((g, _), _)| g == guild_id)
            .map(|((g, s), data)| StorageDocument {
                guild_id: g.clone(),
                storage_id: s.clone(),
                data: data.clone(),
            })
            .collect();
        found.sort_by(|a, b| a.storage_id.cmp(&b.storage_id));
        Ok(found)
    }

    async fn upsert(
        &self,
        guild_id: &str,
        storage_id: &str,
        data: Vec<u8>,
    ) -> Result<(), HostError> {
        lock(&self.docs).insert((guild_id.to_string(), storage_id.to_string()), data);
        Ok(())
    }

    async fn update(
        &self,
        guild_id: &str,
        storage_id: &str,
        data: Vec<u8>,
    ) -> Result<(), HostError> {
        let key = (guild_id.to_string(), storage_id.to_string());
        if let Some(slot) = lock(&self.docs).get_mut(&key) {
            *slot = data;
        }
        Ok(())
    }
}

/// Storage keys are Strings or Numbers; numbers use their script string form.
fn storage_key(key: Option<&Literal>) -> Option<String> {
    match key {
        Some(Literal::String(s)) => Some(s.clone()),
        Some(Literal::Number(n)) => Some(format_number(*n)),
        _ => None,
    }
}

fn store_failure(ctx: &Context, message: &str, err: &HostError) -> ScriptError {
    tracing::warn!(
        invocation = %ctx.invocation_id(),
        guild = %ctx.guild_id(),
        code = err.code(),
        error = %err,
        "storage operation failed"
    );
    ctx.transport_error(message)
}

fn decode_blob(ctx: &Context, data: &[u8]) -> Result<Map<String, Value>, ScriptError> {
    serde_json::from_slice(data)
        .map_err(|e| store_failure(ctx, READ_FAILED, &HostError::Store(e.to_string())))
}

fn encode_blob(ctx: &Context, map: &Map<String, Value>) -> Result<Vec<u8>, ScriptError> {
    serde_json::to_vec(map)
        .map_err(|e| store_failure(ctx, WRITE_FAILED, &HostError::Store(e.to_string())))
}

async fn load(ctx: &Context, storage_id: &str) -> Result<Option<Map<String, Value>>, ScriptError> {
    let doc = ctx
        .store()
        .find_one(ctx.guild_id(), storage_id)
        .await
        .map_err(|e| store_failure(ctx, READ_FAILED, &e))?;
    doc.map(|doc| decode_blob(ctx, &doc.data)).transpose()
}

async fn load_existing(ctx: &Context, storage_id: &str) -> Result<Map<String, Value>, ScriptError> {
    load(ctx, storage_id).await?.ok_or_else(|| {
        tracing::debug!(guild = %ctx.guild_id(), storage_id, "storage namespace has no document");
        ctx.transport_error(READ_FAILED)
    })
}

async fn get(ctx: Context, storage_id: &str, args: Vec<Literal>) -> Result<Literal, ScriptError> {
    let Some(key) = storage_key(args.first()) else {
        return Ok(Literal::Null);
    };
    let Some(mut map) = load(&ctx, storage_id).await? else {
        return Ok(Literal::Null);
    };
    Ok(map.remove(&key).map(Literal::from_json).unwrap_or(Literal::Null))
}

async fn has(ctx: Context, storage_id: &str, args: Vec<Literal>) -> Result<Literal, ScriptError> {
    let Some(key) = storage_key(args.first()) else {
        return Ok(Literal::Null);
    };
    let Some(mut map) = load(&ctx, storage_id).await? else {
        return Ok(Literal::Boolean(false));
    };
    let stored = map.remove(&key).map(Literal::from_json);
    Ok(Literal::Boolean(stored.is_some_and(|v| v.truthy())))
}

async fn set(ctx: Context, storage_id: &str, args: Vec<Literal>) -> Result<Literal, ScriptError> {
    let key = storage_key(args.first())
        .ok_or_else(|| ctx.structural_error(BAD_KEY, Some(0)))?;
    let value = match args.get(1) {
        Some(Literal::Function(_)) | None => {
            return Err(ctx.structural_error(BAD_VALUE, Some(1)));
        }
        Some(value) => value.clone(),
    };

    let docs = ctx
        .store()
        .find_by_guild(ctx.guild_id())
        .await
        .map_err(|e| store_failure(&ctx, READ_FAILED, &e))?;

    let mut map = match docs.iter().find(|d| d.storage_id == storage_id) {
        Some(doc) => decode_blob(&ctx, &doc.data)?,
        None => Map::new(),
    };
    map.insert(key, value.to_json());
    let data = encode_blob(&ctx, &map)?;

    let others: usize = docs
        .iter()
        .filter(|d| d.storage_id != storage_id)
        .map(StorageDocument::budget_size)
        .sum();
    let total = others + storage_id.len() + data.len();
    let budget = ctx.limits().guild_storage_budget;
    if total > budget {
        tracing::info!(
            guild = %ctx.guild_id(),
            storage_id,
            total,
            budget,
            "storage write over budget"
        );
        let message = format!("Storage per guild cannot exceed {}kb!", budget / 1024);
        return Err(ctx.budget_error(message));
    }

    ctx.store()
        .upsert(ctx.guild_id(), storage_id, data)
        .await
        .map_err(|e| store_failure(&ctx, WRITE_FAILED, &e))?;
    Ok(value)
}

async fn delete(
    ctx: Context,
    storage_id: &str,
    args: Vec<Literal>,
) -> Result<Literal, ScriptError> {
    let Some(key) = storage_key(args.first()) else {
        return Ok(Literal::Boolean(false));
    };
    let Some(mut map) = load(&ctx, storage_id).await? else {
        return Ok(Literal::Boolean(true));
    };
    map.remove(&key);
    let data = encode_blob(&ctx, &map)?;
    ctx.store()
        .update(ctx.guild_id(), storage_id, data)
        .await
        .map_err(|e| store_failure(&ctx, WRITE_FAILED, &e))?;
    Ok(Literal::Boolean(true))
}

async fn keys(ctx: Context, storage_id: &str, _args: Vec<Literal>) -> Result<Literal, ScriptError> {
    let map = load_existing(&ctx, storage_id).await?;
    Ok(Literal::array(map.into_iter().map(|(k, _)| Literal::String(k))))
}

async fn all(ctx: Context, storage_id: &str, _args: Vec<Literal>) -> Result<Literal, ScriptError> {
    let map = load_existing(&ctx, storage_id).await?;
    Ok(Literal::from_json(Value::Object(map)))
}

macro_rules! storage_method {
    ($storage_id:expr, $name:literal, $op:ident) => {{
        let storage_id = $storage_id.to_string();
        let func = NativeFunction::new($name, move |ctx, args| {
            let storage_id = storage_id.clone();
            async move { $op(ctx, &storage_id, args).await }
        });
        ($name, Literal::Function(func))
    }};
}

/// The accessor object `storage(namespace)` returns.
pub fn accessor(storage_id: &str) -> Literal {
    Literal::object([
        storage_method!(storage_id, "get", get),
        storage_method!(storage_id, "has", has),
        storage_method!(storage_id, "set", set),
        storage_method!(storage_id, "delete", delete),
        storage_method!(storage_id, "keys", keys),
        storage_method!(storage_id, "all", all),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ArgRef;
    use crate::error::ErrorKind;
    use crate::{CapabilityBridge, Runtime, RuntimeLimits};
    use std::sync::Arc;

    struct NoBridge;

    #[async_trait::async_trait]
    impl CapabilityBridge for NoBridge {
        async fn request(&self, _method: &str, _payload: Value) -> Result<Value, HostError> {
            Ok(Value::Null)
        }
    }

    struct BrokenStore;

    #[async_trait::async_trait]
    impl DocumentStore for BrokenStore {
        async fn find_one(&self, _: &str, _: &str) -> Result<Option<StorageDocument>, HostError> {
            Err(HostError::Store("connection reset".into()))
        }
        async fn find_by_guild(&self, _: &str) -> Result<Vec<StorageDocument>, HostError> {
            Err(HostError::Store("connection reset".into()))
        }
        async fn upsert(&self, _: &str, _: &str, _: Vec<u8>) -> Result<(), HostError> {
            Err(HostError::Store("connection reset".into()))
        }
        async fn update(&self, _: &str, _: &str, _: Vec<u8>) -> Result<(), HostError> {
            Err(HostError::Store("connection reset".into()))
        }
    }

    fn ctx_with(store: Arc<dyn DocumentStore>, limits: RuntimeLimits) -> Context {
        Runtime::new(Arc::new(NoBridge), store, limits).begin("g1")
    }

    fn ctx() -> Context {
        ctx_with(Arc::new(MemoryDocumentStore::new()), RuntimeLimits::default())
    }

    async fn op(
        ctx: &Context,
        ns: &str,
        name: &str,
        args: Vec<Literal>,
    ) -> Result<Literal, ScriptError> {
        let accessor = accessor(ns);
        let Some(obj) = accessor.as_object() else {
            panic!("accessor is not an object");
        };
        match obj.get(name) {
            Literal::Function(f) => f.call(ctx.clone(), args).await,
            other => panic!("{name} is not a function: {other:?}"),
        }
    }

    #[tokio::test]
    async fn set_get_delete_has() {
        let c = ctx();
        let one = op(&c, "ns", "set", vec![Literal::from("a"), Literal::Number(1.0)])
            .await
            .unwrap();
        assert_eq!(one, Literal::Number(1.0));
        assert_eq!(
            op(&c, "ns", "get", vec![Literal::from("a")]).await.unwrap(),
            Literal::Number(1.0)
        );
        assert_eq!(
            op(&c, "ns", "has", vec![Literal::from("a")]).await.unwrap(),
            Literal::Boolean(true)
        );
        assert_eq!(
            op(&c, "ns", "delete", vec![Literal::from("a")]).await.unwrap(),
            Literal::Boolean(true)
        );
        assert_eq!(
            op(&c, "ns", "has", vec![Literal::from("a")]).await.unwrap(),
            Literal::Boolean(false)
        );
    }

    #[tokio::test]
    async fn numeric_keys_share_string_form() {
        let c = ctx();
        op(&c, "ns", "set", vec![Literal::Number(7.0), Literal::from("seven")]).await.unwrap();
        assert_eq!(
            op(&c, "ns", "get", vec![Literal::from("7")]).await.unwrap(),
            Literal::from("seven")
        );
    }

    #[tokio::test]
    async fn missing_document_per_operation() {
        let c = ctx();
        assert!(op(&c, "empty", "get", vec![Literal::from("a")]).await.unwrap().is_null());
        assert_eq!(
            op(&c, "empty", "has", vec![Literal::from("a")]).await.unwrap(),
            Literal::Boolean(false)
        );
        assert_eq!(
            op(&c, "empty", "delete", vec![Literal::from("a")]).await.unwrap(),
            Literal::Boolean(true)
        );
        assert!(op(&c, "empty", "keys", vec![]).await.is_err());
        assert!(op(&c, "empty", "all", vec![]).await.is_err());
    }

    #[tokio::test]
    async fn bad_keys_per_operation() {
        let c = ctx();
        let key = Literal::Boolean(true);
        assert!(op(&c, "ns", "get", vec![key.clone()]).await.unwrap().is_null());
        assert!(op(&c, "ns", "has", vec![key.clone()]).await.unwrap().is_null());
        assert_eq!(
            op(&c, "ns", "delete", vec![key.clone()]).await.unwrap(),
            Literal::Boolean(false)
        );
        let err = op(&c, "ns", "set", vec![key, Literal::Number(1.0)]).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Structural);
        assert_eq!(err.message, "A storage key may only be a String or a Number");
    }

    #[tokio::test]
    async fn functions_cannot_be_stored() {
        let c = ctx();
        let f = Literal::Function(NativeFunction::sync("f", |_, _| Ok(Literal::Null)));
        let err = op(&c, "ns", "set", vec![Literal::from("k"), f]).await.unwrap_err();
        assert_eq!(err.message, "A storage value can only be a literal, not a func");
    }

    #[tokio::test]
    async fn set_without_value_is_rejected() {
        let value_span = ArgRef { start: 9, end: 12 };
        let c = ctx().at_call_site(vec![ArgRef { start: 4, end: 7 }, value_span]);
        let err = op(&c, "ns", "set", vec![Literal::from("k")]).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Structural);
        assert_eq!(err.message, "A storage value can only be a literal, not a func");
        assert_eq!(err.arg, Some(value_span));
        assert_eq!(
            op(&c, "ns", "has", vec![Literal::from("k")]).await.unwrap(),
            Literal::Boolean(false)
        );
    }

    #[tokio::test]
    async fn has_is_false_for_falsy_values() {
        let c = ctx();
        op(&c, "ns", "set", vec![Literal::from("zero"), Literal::Number(0.0)]).await.unwrap();
        assert_eq!(
            op(&c, "ns", "has", vec![Literal::from("zero")]).await.unwrap(),
            Literal::Boolean(false)
        );
    }

    #[tokio::test]
    async fn keys_and_all_reflect_document() {
        let c = ctx();
        op(&c, "ns", "set", vec![Literal::from("a"), Literal::Number(1.0)]).await.unwrap();
        op(&c, "ns", "set", vec![Literal::from("b"), Literal::array([Literal::from("x")])])
            .await
            .unwrap();
        let keys = op(&c, "ns", "keys", vec![]).await.unwrap();
        assert_eq!(keys.to_script_string(), "a,b");
        let all = op(&c, "ns", "all", vec![]).await.unwrap();
        let obj = all.as_object().unwrap();
        assert_eq!(obj.get("a"), Literal::Number(1.0));
        assert_eq!(obj.get("b").to_script_string(), "x");
    }

    #[tokio::test]
    async fn times_survive_storage() {
        let c = ctx();
        let t = Literal::Time(chrono::DateTime::from_timestamp_millis(1_600_000_000_000).unwrap());
        op(&c, "ns", "set", vec![Literal::from("t"), t.clone()]).await.unwrap();
        assert_eq!(op(&c, "ns", "get", vec![Literal::from("t")]).await.unwrap(), t);
    }

    #[tokio::test]
    async fn over_budget_write_is_rejected_and_data_kept() {
        let limits = RuntimeLimits {
            guild_storage_budget: 1024,
            ..RuntimeLimits::default()
        };
        let c = ctx_with(Arc::new(MemoryDocumentStore::new()), limits);
        op(&c, "a", "set", vec![Literal::from("k"), Literal::from("small")]).await.unwrap();
        op(&c, "b", "set", vec![Literal::from("k"), Literal::from("x".repeat(500))]).await.unwrap();

        let err = op(&c, "a", "set", vec![Literal::from("big"), Literal::from("y".repeat(600))])
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Budget);
        assert_eq!(err.message, "Storage per guild cannot exceed 1kb!");
        assert!(op(&c, "a", "get", vec![Literal::from("big")]).await.unwrap().is_null());
        assert_eq!(
            op(&c, "a", "get", vec![Literal::from("k")]).await.unwrap(),
            Literal::from("small")
        );
    }

    #[tokio::test]
    async fn budget_is_per_guild() {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryDocumentStore::new());
        let limits = RuntimeLimits {
            guild_storage_budget: 1024,
            ..RuntimeLimits::default()
        };
        let g1 = ctx_with(store.clone(), limits.clone());
        let g2 = Runtime::new(Arc::new(NoBridge), store, limits).begin("g2");
        let chunk = Literal::from("x".repeat(900));
        op(&g1, "ns", "set", vec![Literal::from("k"), chunk.clone()]).await.unwrap();
        op(&g2, "ns", "set", vec![Literal::from("k"), chunk]).await.unwrap();
    }

    #[tokio::test]
    async fn store_failures_are_script_errors() {
        let c = ctx_with(Arc::new(BrokenStore), RuntimeLimits::default());
        let err = op(&c, "ns", "get", vec![Literal::from("a")]).await.unwrap_err();
        assert_eq!(err.message, "Couldn't get data from database");
        assert_eq!(err.kind, ErrorKind::Transport);
        let err = op(&c, "ns", "set", vec![Literal::from("a"), Literal::Null]).await.unwrap_err();
        assert_eq!(err.message, "Couldn't get data from database");
    }

    #[tokio::test]
    async fn memory_store_update_leaves_missing_absent() {
        let store = MemoryDocumentStore::new();
        store.update("g", "s", b"{}".to_vec()).await.unwrap();
        assert!(store.find_one("g", "s").await.unwrap().is_none());
        store.upsert("g", "s", b"{}".to_vec()).await.unwrap();
        assert_eq!(store.find_by_guild("g").await.unwrap().len(), 1);
        assert!(store.find_by_guild("other").await.unwrap().is_empty());
    }
}
