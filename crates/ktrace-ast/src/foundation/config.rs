//! Compiler configuration.
//!
//! The set of recognized options is closed; building a config from key/value
//! pairs rejects unknown keys so typos surface at parse time rather than
//! being silently ignored.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::StackMode;

/// Gate for the unstable `macro` declarations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MacroGate {
    Disabled,
    Enable,
}

/// Recognized configuration options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Maximum string/buffer length; values are capped at `u32::MAX`
    pub max_strlen: u64,
    /// Default stack flavor for `kstack`/`ustack`
    pub stack_mode: StackMode,
    /// AST-node budget for macro expansion
    pub max_ast_nodes: u64,
    /// Gates `macro` declarations
    pub unstable_macro: MacroGate,
    pub max_map_keys: u64,
    pub max_per_cpu_map_keys: u64,
    /// Forbids `system`, `signal` and `override`
    pub safe_mode: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_strlen: 64,
            stack_mode: StackMode::Bpftrace,
            max_ast_nodes: 0,
            unstable_macro: MacroGate::Disabled,
            max_map_keys: 4096,
            max_per_cpu_map_keys: 1024,
            safe_mode: true,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Unknown config option: {0}")]
    UnknownKey(String),
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one `key=value` setting.
    ///
    /// Keys are accepted in both spellings used in programs: the short name
    /// (`max_strlen`) and the environment-style name (`KTRACE_MAX_STRLEN`).
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = || ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        };
        match normalize_key(key).as_str() {
            "max_strlen" => {
                self.max_strlen = value.parse().map_err(|_| invalid())?;
            }
            "stack_mode" => {
                self.stack_mode = StackMode::from_ident(value).ok_or_else(invalid)?;
            }
            "max_ast_nodes" => {
                self.max_ast_nodes = value.parse().map_err(|_| invalid())?;
            }
            "unstable_macro" => {
                self.unstable_macro = match value {
                    "disabled" => MacroGate::Disabled,
                    "enable" => MacroGate::Enable,
                    _ => return Err(invalid()),
                };
            }
            "max_map_keys" => {
                self.max_map_keys = value.parse().map_err(|_| invalid())?;
            }
            "max_per_cpu_map_keys" => {
                self.max_per_cpu_map_keys = value.parse().map_err(|_| invalid())?;
            }
            "safe_mode" => {
                self.safe_mode = match value {
                    "1" | "true" => true,
                    "0" | "false" => false,
                    _ => return Err(invalid()),
                };
            }
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        }
        Ok(())
    }
}

fn normalize_key(key: &str) -> String {
    key.trim_start_matches("KTRACE_").to_lowercase()
}
