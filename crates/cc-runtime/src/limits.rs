//! Resource limits applied to every script invocation.

use std::time::Duration;

use cc_config::RuntimeConfig;

/// Default deadline for a single capability request.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_millis(5000);

/// Default combined storage budget per guild, across all namespaces.
pub const DEFAULT_GUILD_STORAGE_BUDGET: usize = 500 * 1024;

/// Default maximum length accepted by `Array(n)`.
pub const DEFAULT_MAX_ARRAY_LENGTH: usize = 65_536;

/// Default maximum length of a string produced by `pad`.
pub const DEFAULT_MAX_STRING_LENGTH: usize = 1024 * 1024;

/// Default maximum IPC frame size: 8 MB.
pub const DEFAULT_MAX_IPC_MESSAGE_SIZE: usize = 8 * 1024 * 1024;

/// Limits shared by every context created from one [`Runtime`](crate::Runtime).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeLimits {
    /// Deadline for each capability request.
    pub rpc_timeout: Duration,
    /// Largest array `Array(n)` may allocate.
    pub max_array_length: usize,
    /// Largest string `pad` may produce.
    pub max_string_length: usize,
    /// Combined serialized size allowed for one guild's storage documents.
    pub guild_storage_budget: usize,
    /// Largest IPC frame accepted from the peer.
    pub max_ipc_message_size: usize,
}

impl Default for RuntimeLimits {
    fn default() -> Self {
        Self {
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
            max_array_length: DEFAULT_MAX_ARRAY_LENGTH,
            max_string_length: DEFAULT_MAX_STRING_LENGTH,
            guild_storage_budget: DEFAULT_GUILD_STORAGE_BUDGET,
            max_ipc_message_size: DEFAULT_MAX_IPC_MESSAGE_SIZE,
        }
    }
}

impl RuntimeLimits {
    /// Fold configured overrides over the defaults.
    pub fn from_config(config: &RuntimeConfig) -> Self {
        let defaults = Self::default();
        Self {
            rpc_timeout: config
                .runtime
                .rpc_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.rpc_timeout),
            max_array_length: config
                .runtime
                .max_array_length
                .unwrap_or(defaults.max_array_length),
            max_string_length: config
                .runtime
                .max_string_length
                .unwrap_or(defaults.max_string_length),
            guild_storage_budget: config
                .storage
                .guild_budget_kib
                .map(|kib| kib * 1024)
                .unwrap_or(defaults.guild_storage_budget),
            max_ipc_message_size: config
                .ipc
                .max_message_size_mb
                .map(|mb| mb * 1024 * 1024)
                .unwrap_or(defaults.max_ipc_message_size),
        }
    }
}
