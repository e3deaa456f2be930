//! Audit trail for capability requests.
//!
//! Every request that passes through an [`AuditingBridge`] produces a
//! [`CapabilityAudit`] record:
//! - the method name
//! - a SHA-256 hash of the payload (payloads are never stored raw)
//! - duration and outcome
//!
//! Records are sent over an unbounded channel so the request path never waits
//! on a logging backend. [`drain`] forwards them to an [`AuditLogger`].

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;

use crate::{CapabilityBridge, HostError};

/// Audit record for a single capability request.
#[derive(Debug, Clone, Serialize)]
pub struct CapabilityAudit {
    /// When the request was issued.
    pub timestamp: DateTime<Utc>,
    /// Capability name.
    pub method: String,
    /// SHA-256 hash of the serialized payload.
    pub payload_hash: String,
    /// Round-trip duration in milliseconds.
    pub duration_ms: u64,
    /// Whether the request produced a reply.
    pub success: bool,
    /// Error code of a failed request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<&'static str>,
}

/// Trait for audit log backends.
#[async_trait::async_trait]
pub trait AuditLogger: Send + Sync {
    /// Write an audit record.
    async fn log(&self, entry: &CapabilityAudit);
}

/// A no-op audit logger for when auditing is not needed.
pub struct NoopAuditLogger;

#[async_trait::async_trait]
impl AuditLogger for NoopAuditLogger {
    async fn log(&self, _entry: &CapabilityAudit) {}
}

/// Emits audit records as `INFO` events with `audit = true`.
pub struct TracingAuditLogger;

#[async_trait::async_trait]
impl AuditLogger for TracingAuditLogger {
    async fn log(&self, entry: &CapabilityAudit) {
        tracing::info!(
            audit = true,
            method = %entry.method,
            payload_hash = %entry.payload_hash,
            duration_ms = entry.duration_ms,
            success = entry.success,
            error_code = entry.error_code.unwrap_or(""),
            "audit"
        );
    }
}

/// Compute the SHA-256 hash of a string, returned as a hex string.
pub fn sha256_hex(data: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

/// A [`CapabilityBridge`] wrapper that records every request.
pub struct AuditingBridge {
    inner: Arc<dyn CapabilityBridge>,
    audit_tx: mpsc::UnboundedSender<CapabilityAudit>,
}

impl AuditingBridge {
    /// Wrap a bridge with audit recording.
    pub fn new(
        inner: Arc<dyn CapabilityBridge>,
        audit_tx: mpsc::UnboundedSender<CapabilityAudit>,
    ) -> Self {
        Self { inner, audit_tx }
    }
}

#[async_trait::async_trait]
impl CapabilityBridge for AuditingBridge {
    async fn request(&self, method: &str, payload: Value) -> Result<Value, HostError> {
        let payload_hash = sha256_hex(&serde_json::to_string(&payload).unwrap_or_default());
        let timestamp = Utc::now();
        let start = Instant::now();

        let result = self.inner.request(method, payload).await;

        let audit = CapabilityAudit {
            timestamp,
            method: method.to_string(),
            payload_hash,
            duration_ms: start.elapsed().as_millis() as u64,
            success: result.is_ok(),
            error_code: result.as_ref().err().map(HostError::code),
        };
        // A closed receiver only means nobody is listening.
        let _ = self.audit_tx.send(audit);

        result
    }
}

/// Forward records to `logger` until every sender is dropped.
pub async fn drain(mut rx: mpsc::UnboundedReceiver<CapabilityAudit>, logger: Arc<dyn AuditLogger>) {
    while let Some(entry) = rx.recv().await {
        logger.log(&entry).await;
    }
}
