#![warn(missing_docs)]

//! # cc-config
//!
//! Configuration loading for the custom command runtime.
//!
//! Supports TOML configuration files with environment variable expansion.
//! Every value is optional; absent values fall back to the runtime defaults.
//!
//! ## Example
//!
//! ```toml
//! [runtime]
//! rpc_timeout_ms = 5000
//! max_array_length = 65536
//! max_string_length = 1048576
//!
//! [storage]
//! guild_budget_kib = 500
//!
//! [ipc]
//! max_message_size_mb = 8
//! ```

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

/// Errors from config parsing.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse TOML.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Invalid configuration value.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuntimeConfig {
    /// Script runtime limits.
    #[serde(default)]
    pub runtime: RuntimeOverrides,

    /// Storage subsystem settings.
    #[serde(default)]
    pub storage: StorageOverrides,

    /// Capability transport settings.
    #[serde(default)]
    pub ipc: IpcOverrides,
}

/// Script runtime overrides.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuntimeOverrides {
    /// Deadline for a single capability request, in milliseconds.
    #[serde(default)]
    pub rpc_timeout_ms: Option<u64>,

    /// Largest array a script may allocate with `Array(n)`.
    #[serde(default)]
    pub max_array_length: Option<usize>,

    /// Longest string a builtin such as `pad` may produce, in bytes.
    #[serde(default)]
    pub max_string_length: Option<usize>,
}

/// Storage subsystem overrides.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageOverrides {
    /// Combined size budget of all of a guild's storage namespaces, in KiB.
    #[serde(default)]
    pub guild_budget_kib: Option<usize>,
}

/// Capability transport overrides.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IpcOverrides {
    /// Largest frame accepted from the trusted process, in megabytes.
    #[serde(default)]
    pub max_message_size_mb: Option<usize>,
}

impl RuntimeConfig {
    /// Parse a config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse a config from a TOML string, expanding `${ENV_VAR}` references.
    pub fn from_toml_with_env(toml_str: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(toml_str);
        Self::from_toml(&expanded)
    }

    /// Load config from a file path, expanding environment variables.
    pub fn from_file_with_env(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_with_env(&content)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.runtime.rpc_timeout_ms == Some(0) {
            return Err(ConfigError::Invalid(
                "runtime.rpc_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.runtime.max_string_length == Some(0) {
            return Err(ConfigError::Invalid(
                "runtime.max_string_length must be greater than zero".into(),
            ));
        }
        if self.storage.guild_budget_kib == Some(0) {
            return Err(ConfigError::Invalid(
                "storage.guild_budget_kib must be greater than zero".into(),
            ));
        }
        if self.ipc.max_message_size_mb == Some(0) {
            return Err(ConfigError::Invalid(
                "ipc.max_message_size_mb must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Expand `${ENV_VAR}` patterns in a string using environment variables.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(value) => result.push_str(&value),
                // Unresolved placeholders are left for the TOML parser to reject.
                Err(_) => result.push_str(&format!("${{{}}}", var_name)),
            }
        } else {
            result.push(ch);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_empty_is_valid() {
        let config = RuntimeConfig::from_toml("").unwrap();
        assert!(config.runtime.rpc_timeout_ms.is_none());
        assert!(config.storage.guild_budget_kib.is_none());
        assert!(config.ipc.max_message_size_mb.is_none());
    }

    #[test]
    fn config_parses_all_tables() {
        let toml = r#"
            [runtime]
            rpc_timeout_ms = 2500
            max_array_length = 1000
            max_string_length = 4096

            [storage]
            guild_budget_kib = 64

            [ipc]
            max_message_size_mb = 2
        "#;

        let config = RuntimeConfig::from_toml(toml).unwrap();
        assert_eq!(config.runtime.rpc_timeout_ms, Some(2500));
        assert_eq!(config.runtime.max_array_length, Some(1000));
        assert_eq!(config.runtime.max_string_length, Some(4096));
        assert_eq!(config.storage.guild_budget_kib, Some(64));
        assert_eq!(config.ipc.max_message_size_mb, Some(2));
    }

    #[test]
    fn config_rejects_zero_timeout() {
        let toml = r#"
            [runtime]
            rpc_timeout_ms = 0
        "#;
        let err = RuntimeConfig::from_toml(toml).unwrap_err();
        assert!(err.to_string().contains("rpc_timeout_ms"), "{err}");
    }

    #[test]
    fn config_rejects_zero_budget() {
        let toml = r#"
            [storage]
            guild_budget_kib = 0
        "#;
        let err = RuntimeConfig::from_toml(toml).unwrap_err();
        assert!(err.to_string().contains("guild_budget_kib"), "{err}");
    }

    #[test]
    fn config_rejects_wrong_type() {
        let toml = r#"
            [runtime]
            rpc_timeout_ms = "soon"
        "#;
        let err = RuntimeConfig::from_toml(toml).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn config_expands_environment_variables() {
        std::env::set_var("CC_TEST_RPC_TIMEOUT", "1234");
        let toml = r#"
            [runtime]
            rpc_timeout_ms = ${CC_TEST_RPC_TIMEOUT}
        "#;
        let config = RuntimeConfig::from_toml_with_env(toml).unwrap();
        assert_eq!(config.runtime.rpc_timeout_ms, Some(1234));
        std::env::remove_var("CC_TEST_RPC_TIMEOUT");
    }

    #[test]
    fn config_loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cc.toml");
        std::fs::write(
            &path,
            r#"
            [storage]
            guild_budget_kib = 128
        "#,
        )
        .unwrap();

        let config = RuntimeConfig::from_file(&path).unwrap();
        assert_eq!(config.storage.guild_budget_kib, Some(128));
    }

    #[test]
    fn config_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = RuntimeConfig::from_file(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn env_var_expansion_preserves_unresolved() {
        let result = expand_env_vars("prefix ${DEFINITELY_NOT_SET_12345} suffix");
        assert_eq!(result, "prefix ${DEFINITELY_NOT_SET_12345} suffix");
    }

    #[test]
    fn env_var_expansion_handles_no_vars() {
        assert_eq!(expand_env_vars("no variables here"), "no variables here");
    }
}
