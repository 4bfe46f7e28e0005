//! Configuration module - interpreter location and protocol timeouts
//!
//! This module provides functionality for:
//! - Loading configuration from ~/.sclang-runtime/config.json
//! - Environment overrides (`SCLANG_PATH`, `SC_BOOT_TIMEOUT`, `SC_EXEC_TIMEOUT`)
//! - Locating the sclang executable
//!
//! # Module Structure
//!
//! - `defaults` - All default constant values
//! - `types` - `RuntimeConfig` and its accessors
//! - `loader` - File system loading, env overrides and interpreter discovery

mod defaults;
mod loader;
mod types;

pub use defaults::{
    DEFAULT_BOOT_TIMEOUT_MS, DEFAULT_ERROR_SETTLE_MS, DEFAULT_EXEC_TIMEOUT_MS,
    DEFAULT_KILL_GRACE_MS, DEFAULT_READY_TIMEOUT_MS, DEFAULT_SCLANG_COMMAND,
};

pub use types::RuntimeConfig;

pub use loader::{apply_env_overrides, find_sclang_path, load_config, load_config_from};

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
