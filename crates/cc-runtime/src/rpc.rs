//! Timeout-bounded capability requests.
//!
//! Every request gets exactly one outcome: the reply, or a
//! [`HostError::Timeout`] once the deadline elapses. Nothing is retried.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::{CapabilityBridge, HostError};

pub use crate::limits::DEFAULT_RPC_TIMEOUT;

/// Send one request through `bridge` and wait at most `timeout` for its reply.
pub async fn await_answer(
    bridge: &dyn CapabilityBridge,
    method: &str,
    payload: Value,
    timeout: Duration,
) -> Result<Value, HostError> {
    match tokio::time::timeout(timeout, bridge.request(method, payload)).await {
        Ok(result) => result,
        Err(_elapsed) => Err(HostError::Timeout {
            method: method.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

/// A [`CapabilityBridge`] that enforces a per-call deadline on the inner bridge.
pub struct TimeoutBridge {
    inner: Arc<dyn CapabilityBridge>,
    timeout: Duration,
}

impl TimeoutBridge {
    /// Wrap an inner bridge with a per-call timeout.
    pub fn new(inner: Arc<dyn CapabilityBridge>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait::async_trait]
impl CapabilityBridge for TimeoutBridge {
    #[tracing::instrument(skip(self, payload))]
    async fn request(&self, method: &str, payload: Value) -> Result<Value, HostError> {
        await_answer(self.inner.as_ref(), method, payload, self.timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct SlowBridge {
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl CapabilityBridge for SlowBridge {
        async fn request(&self, method: &str, _payload: Value) -> Result<Value, HostError> {
            tokio::time::sleep(self.delay).await;
            Ok(json!({ "method": method }))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fast_reply_passes_through() {
        let bridge = TimeoutBridge::new(
            Arc::new(SlowBridge {
                delay: Duration::from_millis(10),
            }),
            DEFAULT_RPC_TIMEOUT,
        );
        let reply = bridge.request("getRole", json!({})).await.unwrap();
        assert_eq!(reply["method"], "getRole");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_reply_times_out() {
        let bridge = TimeoutBridge::new(
            Arc::new(SlowBridge {
                delay: Duration::from_secs(10),
            }),
            DEFAULT_RPC_TIMEOUT,
        );
        let err = bridge.request("getRole", json!({})).await.unwrap_err();
        match err {
            HostError::Timeout { method, timeout_ms } => {
                assert_eq!(method, "getRole");
                assert_eq!(timeout_ms, 5000);
            }
            other => panic!("expected Timeout, got: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn default_timeout_is_five_seconds() {
        let slow = SlowBridge {
            delay: Duration::from_millis(4999),
        };
        assert!(await_answer(&slow, "getMember", json!({}), DEFAULT_RPC_TIMEOUT)
            .await
            .is_ok());
    }
}
