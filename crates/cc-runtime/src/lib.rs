#![warn(missing_docs)]

//! # cc-runtime
//!
//! Sandboxed runtime core for guild-authored custom command scripts.
//!
//! Scripts are untrusted. Everything they can touch is expressed as a
//! [`Literal`], every host function they can call is a [`NativeFunction`] in
//! the global catalog, and every failure surfaces as a [`ScriptError`] that the
//! evaluator can attribute to a source argument.
//!
//! ## Boundaries
//!
//! - **Live platform state** is owned by a separate trusted process. The only
//!   way to reach it is a [`CapabilityBridge`] request, bounded by a timeout.
//! - **Persistent storage** goes through a [`DocumentStore`], one document per
//!   (guild, namespace), with a combined per-guild byte budget.
//! - **Entity proxies** are snapshots. Their fields never change after the
//!   reply that produced them.

pub mod audit;
pub mod context;
pub mod embed;
pub mod entities;
pub mod error;
pub mod globals;
pub mod ipc;
pub mod limits;
pub mod numeric;
pub mod permissions;
pub mod rpc;
pub mod runtime;
pub mod storage;
pub mod time;
pub mod value;

pub use cc_error::HostError;
pub use context::{ArgRef, Context};
pub use error::{ErrorKind, ScriptError};
pub use limits::RuntimeLimits;
pub use runtime::Runtime;
pub use storage::{MemoryDocumentStore, StorageDocument};
pub use value::{ArrayRef, Literal, NativeFunction, ObjectRef};

/// Request/reply channel to the trusted process holding live platform state.
///
/// Implementations must tolerate concurrent callers and must not share
/// mutable state between requests. A reply is plain data, never a live handle.
#[async_trait::async_trait]
pub trait CapabilityBridge: Send + Sync {
    /// Send one request and wait for its single reply.
    ///
    /// - `method`: the capability name (e.g. `"getMember"`, `"channel.send"`)
    /// - `payload`: request arguments, always including `guildId`
    async fn request(
        &self,
        method: &str,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, HostError>;
}

/// Persistent store holding one storage document per (guild, namespace).
#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch a single namespace document.
    async fn find_one(
        &self,
        guild_id: &str,
        storage_id: &str,
    ) -> Result<Option<StorageDocument>, HostError>;

    /// Fetch every namespace document belonging to a guild.
    async fn find_by_guild(&self, guild_id: &str) -> Result<Vec<StorageDocument>, HostError>;

    /// Insert or replace a namespace document.
    async fn upsert(&self, guild_id: &str, storage_id: &str, data: Vec<u8>)
        -> Result<(), HostError>;

    /// Replace the blob of an existing namespace document. A missing document is left absent.
    async fn update(&self, guild_id: &str, storage_id: &str, data: Vec<u8>)
        -> Result<(), HostError>;
}
