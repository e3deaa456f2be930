//! Per-invocation execution context.
//!
//! A [`Context`] is created by [`Runtime::begin`](crate::Runtime::begin) for
//! one script evaluation and handed to every native function call. The
//! evaluator narrows it to a call site with [`Context::at_call_site`] so that
//! errors can point at the argument that caused them.

use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use crate::error::{ErrorKind, ScriptError};
use crate::limits::RuntimeLimits;
use crate::rpc::await_answer;
use crate::{CapabilityBridge, DocumentStore, HostError};

/// Source span of one argument expression at a call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgRef {
    /// Byte offset where the argument starts.
    pub start: usize,
    /// Byte offset one past the argument's end.
    pub end: usize,
}

/// Execution state for one script invocation.
#[derive(Clone)]
pub struct Context {
    guild_id: Arc<str>,
    invocation_id: Uuid,
    args: Arc<[ArgRef]>,
    bridge: Arc<dyn CapabilityBridge>,
    store: Arc<dyn DocumentStore>,
    limits: Arc<RuntimeLimits>,
}

impl Context {
    pub(crate) fn new(
        guild_id: impl Into<Arc<str>>,
        bridge: Arc<dyn CapabilityBridge>,
        store: Arc<dyn DocumentStore>,
        limits: Arc<RuntimeLimits>,
    ) -> Self {
        Self {
            guild_id: guild_id.into(),
            invocation_id: Uuid::new_v4(),
            args: Arc::from(Vec::new()),
            bridge,
            store,
            limits,
        }
    }

    /// The guild the script runs in. Every capability request is scoped to it.
    pub fn guild_id(&self) -> &str {
        &self.guild_id
    }

    /// Unique id of this invocation, carried in log events.
    pub fn invocation_id(&self) -> Uuid {
        self.invocation_id
    }

    /// Source spans of the arguments at the current call site.
    pub fn args(&self) -> &[ArgRef] {
        &self.args
    }

    /// Limits in force for this invocation.
    pub fn limits(&self) -> &RuntimeLimits {
        &self.limits
    }

    pub(crate) fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// A copy of this context describing a new call site.
    pub fn at_call_site(&self, args: Vec<ArgRef>) -> Self {
        Self {
            args: Arc::from(args),
            ..self.clone()
        }
    }

    /// Build a script error, attributed to argument `arg` when given and present.
    pub fn error(&self, message: impl Into<String>, arg: Option<usize>) -> ScriptError {
        self.error_of(ErrorKind::Script, message, arg)
    }

    /// Build a structural validation error.
    pub fn structural_error(&self, message: impl Into<String>, arg: Option<usize>) -> ScriptError {
        self.error_of(ErrorKind::Structural, message, arg)
    }

    /// Build a storage budget error.
    pub fn budget_error(&self, message: impl Into<String>) -> ScriptError {
        self.error_of(ErrorKind::Budget, message, None)
    }

    /// Build an error for a failed host call.
    pub fn transport_error(&self, message: impl Into<String>) -> ScriptError {
        self.error_of(ErrorKind::Transport, message, None)
    }

    fn error_of(
        &self,
        kind: ErrorKind,
        message: impl Into<String>,
        arg: Option<usize>,
    ) -> ScriptError {
        ScriptError {
            kind,
            message: message.into(),
            arg: arg.and_then(|i| self.args.get(i).copied()),
        }
    }

    /// Issue one capability request within the runtime's deadline.
    ///
    /// `action` names the operation for the script-visible message, e.g.
    /// `"get member"` produces `Couldn't get member. Timed-out`. The raw
    /// host error is logged, never returned.
    pub async fn request(
        &self,
        method: &str,
        payload: Value,
        action: &str,
    ) -> Result<Value, ScriptError> {
        tracing::debug!(
            invocation = %self.invocation_id,
            guild = %self.guild_id,
            method,
            "capability request"
        );
        await_answer(self.bridge.as_ref(), method, payload, self.limits.rpc_timeout)
            .await
            .map_err(|e| self.host_failure(action, &e))
    }

    pub(crate) fn host_failure(&self, action: &str, err: &HostError) -> ScriptError {
        tracing::warn!(
            invocation = %self.invocation_id,
            guild = %self.guild_id,
            code = err.code(),
            error = %err,
            "capability request failed"
        );
        match err {
            HostError::Timeout { .. } | HostError::Transport(_) | HostError::ChannelClosed => {
                self.transport_error(format!("Couldn't {action}. Timed-out"))
            }
            _ => self.transport_error(format!("Couldn't {action}.")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryDocumentStore;
    use std::time::Duration;

    struct Silent;

    #[async_trait::async_trait]
    impl CapabilityBridge for Silent {
        async fn request(&self, _method: &str, _payload: Value) -> Result<Value, HostError> {
            std::future::pending().await
        }
    }

    struct Refusing;

    #[async_trait::async_trait]
    impl CapabilityBridge for Refusing {
        async fn request(&self, method: &str, _payload: Value) -> Result<Value, HostError> {
            Err(HostError::Remote {
                method: method.into(),
                message: "missing access".into(),
            })
        }
    }

    fn ctx(bridge: Arc<dyn CapabilityBridge>) -> Context {
        let limits = RuntimeLimits {
            rpc_timeout: Duration::from_millis(50),
            ..RuntimeLimits::default()
        };
        Context::new("g1", bridge, Arc::new(MemoryDocumentStore::new()), Arc::new(limits))
    }

    #[test]
    fn error_attributes_known_argument() {
        let c = ctx(Arc::new(Refusing)).at_call_site(vec![
            ArgRef { start: 0, end: 3 },
            ArgRef { start: 5, end: 9 },
        ]);
        let err = c.error("bad width", Some(1));
        assert_eq!(err.kind, ErrorKind::Script);
        assert_eq!(err.arg, Some(ArgRef { start: 5, end: 9 }));
    }

    #[test]
    fn error_ignores_missing_argument() {
        let c = ctx(Arc::new(Refusing));
        assert_eq!(c.error("x", Some(4)).arg, None);
        assert_eq!(c.structural_error("x", None).kind, ErrorKind::Structural);
    }

    #[test]
    fn call_site_keeps_invocation_identity() {
        let c = ctx(Arc::new(Refusing));
        let site = c.at_call_site(vec![ArgRef { start: 1, end: 2 }]);
        assert_eq!(site.invocation_id(), c.invocation_id());
        assert_eq!(site.guild_id(), "g1");
        assert!(c.args().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_names_the_operation() {
        let c = ctx(Arc::new(Silent));
        let err = c
            .request("getRole", serde_json::json!({}), "get role")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Transport);
        assert_eq!(err.message, "Couldn't get role. Timed-out");
    }

    #[tokio::test]
    async fn remote_failure_hides_host_detail() {
        let c = ctx(Arc::new(Refusing));
        let err = c
            .request("channel.send", serde_json::json!({}), "send message")
            .await
            .unwrap_err();
        assert_eq!(err.message, "Couldn't send message.");
        assert!(!err.message.contains("missing access"));
    }
}
