//! Runtime entry point.
//!
//! A [`Runtime`] holds the long-lived collaborators (capability bridge,
//! document store, limits) and hands out one [`Context`] per script
//! invocation. It is cheap to clone and safe to share between invocations.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;
use cc_config::RuntimeConfig;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::audit::{AuditingBridge, CapabilityAudit};
use crate::context::Context;
use crate::entities::guild_from_json;
use crate::error::ScriptError;
use crate::globals;
use crate::limits::RuntimeLimits;
use crate::value::Literal;
use crate::{CapabilityBridge, DocumentStore};

/// Shared runtime state.
#[derive(Clone)]
pub struct Runtime {
    bridge: Arc<dyn CapabilityBridge>,
    store: Arc<dyn DocumentStore>,
    limits: Arc<RuntimeLimits>,
}

impl Runtime {
    /// Create a runtime over a capability bridge and a document store.
    pub fn new(
        bridge: Arc<dyn CapabilityBridge>,
        store: Arc<dyn DocumentStore>,
        limits: RuntimeLimits,
    ) -> Self {
        Self {
            bridge,
            store,
            limits: Arc::new(limits),
        }
    }

    /// Create a runtime with limits taken from a parsed config.
    pub fn from_config(
        bridge: Arc<dyn CapabilityBridge>,
        store: Arc<dyn DocumentStore>,
        config: &RuntimeConfig,
    ) -> Self {
        Self::new(bridge, store, RuntimeLimits::from_config(config))
    }

    /// Create a runtime with limits read from a TOML file, expanding `${VAR}` references.
    pub fn from_config_file(
        bridge: Arc<dyn CapabilityBridge>,
        store: Arc<dyn DocumentStore>,
        path: &Path,
    ) -> anyhow::Result<Self> {
        let config = RuntimeConfig::from_file_with_env(path)
            .with_context(|| format!("loading runtime config from {}", path.display()))?;
        Ok(Self::from_config(bridge, store, &config))
    }

    /// Record every capability request on `audit_tx`.
    pub fn with_audit(self, audit_tx: mpsc::UnboundedSender<CapabilityAudit>) -> Self {
        Self {
            bridge: Arc::new(AuditingBridge::new(self.bridge, audit_tx)),
            ..self
        }
    }

    /// Limits applied to every invocation.
    pub fn limits(&self) -> &RuntimeLimits {
        &self.limits
    }

    /// Start one script invocation in `guild_id`.
    pub fn begin(&self, guild_id: &str) -> Context {
        let ctx = Context::new(
            guild_id,
            self.bridge.clone(),
            self.store.clone(),
            self.limits.clone(),
        );
        tracing::debug!(
            invocation = %ctx.invocation_id(),
            guild = guild_id,
            "script invocation started"
        );
        ctx
    }

    /// The global scope a script starts with.
    pub fn globals(&self) -> HashMap<String, Literal> {
        globals::catalog()
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect()
    }

    /// Build the `guild` object from the snapshot the host injects with each invocation.
    pub fn guild(&self, ctx: &Context, snapshot: Value) -> Result<Literal, ScriptError> {
        guild_from_json(ctx, snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryDocumentStore;
    use crate::HostError;
    use serde_json::json;
    use std::io::Write;
    use std::time::Duration;

    struct Echo;

    #[async_trait::async_trait]
    impl CapabilityBridge for Echo {
        async fn request(&self, _method: &str, payload: Value) -> Result<Value, HostError> {
            Ok(payload)
        }
    }

    fn runtime() -> Runtime {
        Runtime::new(Arc::new(Echo), Arc::new(MemoryDocumentStore::new()), RuntimeLimits::default())
    }

    #[test]
    fn invocations_are_distinct() {
        let rt = runtime();
        let a = rt.begin("g1");
        let b = rt.begin("g1");
        assert_ne!(a.invocation_id(), b.invocation_id());
        assert_eq!(a.guild_id(), "g1");
    }

    #[test]
    fn globals_include_catalog_version() {
        let globals = runtime().globals();
        assert_eq!(globals.get("VERSION"), Some(&Literal::from(globals::VERSION)));
        assert!(matches!(globals.get("storage"), Some(Literal::Function(_))));
        assert!(!globals.contains_key("guild"));
    }

    #[test]
    fn guild_snapshot_becomes_object() {
        let rt = runtime();
        let ctx = rt.begin("g1");
        let guild = rt
            .guild(&ctx, json!({ "id": "g1", "name": "Guild", "ownerId": "u1", "memberCount": 3 }))
            .unwrap();
        let obj = guild.as_object().unwrap();
        assert_eq!(obj.get("name"), Literal::from("Guild"));
        assert_eq!(obj.get("memberCount"), Literal::Number(3.0));
        assert!(rt.guild(&ctx, json!({ "name": "no id" })).is_err());
    }

    #[tokio::test]
    async fn audit_records_requests() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let rt = runtime().with_audit(tx);
        let ctx = rt.begin("g1");
        ctx.request("getRole", json!({ "guildId": "g1" }), "get role").await.unwrap();
        assert_eq!(rx.recv().await.unwrap().method, "getRole");
    }

    #[test]
    fn config_file_overrides_limits() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[runtime]\nrpc_timeout_ms = 250").unwrap();
        let rt = Runtime::from_config_file(
            Arc::new(Echo),
            Arc::new(MemoryDocumentStore::new()),
            file.path(),
        )
        .unwrap();
        assert_eq!(rt.limits().rpc_timeout, Duration::from_millis(250));
    }

    #[test]
    fn missing_config_file_names_the_path() {
        let err = Runtime::from_config_file(
            Arc::new(Echo),
            Arc::new(MemoryDocumentStore::new()),
            Path::new("/nonexistent/cc.toml"),
        )
        .err()
        .unwrap();
        assert!(err.to_string().contains("/nonexistent/cc.toml"));
    }
}
