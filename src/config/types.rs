//! Configuration type definitions

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::defaults::*;

/// Settings for one interpreter runtime
///
/// Every field is optional in the file; the `get_*` accessors apply defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    /// Path to the sclang executable (default: discovered, see `find_sclang_path`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sclang_path: Option<String>,
    /// Extra arguments passed to sclang
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sclang_args: Vec<String>,
    /// Boot deadline in milliseconds (default: 10000)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boot_timeout_ms: Option<u64>,
    /// Evaluation deadline in milliseconds (default: 2000)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec_timeout_ms: Option<u64>,
    /// Default runtime-ready wait in milliseconds (default: 10000)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready_timeout_ms: Option<u64>,
    /// Grace period between the terminate command and a force kill (default: 2000)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kill_grace_ms: Option<u64>,
    /// Delay before classifying a detected error so its context can arrive (default: 100)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_settle_ms: Option<u64>,
}

impl RuntimeConfig {
    pub fn get_boot_timeout(&self) -> Duration {
        Duration::from_millis(self.boot_timeout_ms.unwrap_or(DEFAULT_BOOT_TIMEOUT_MS))
    }

    pub fn get_exec_timeout(&self) -> Duration {
        Duration::from_millis(self.exec_timeout_ms.unwrap_or(DEFAULT_EXEC_TIMEOUT_MS))
    }

    pub fn get_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms.unwrap_or(DEFAULT_READY_TIMEOUT_MS))
    }

    pub fn get_kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms.unwrap_or(DEFAULT_KILL_GRACE_MS))
    }

    pub fn get_error_settle(&self) -> Duration {
        Duration::from_millis(self.error_settle_ms.unwrap_or(DEFAULT_ERROR_SETTLE_MS))
    }

    /// Fill unset fields from `other`; values already set win
    pub fn merge_missing(mut self, other: RuntimeConfig) -> Self {
        self.sclang_path = self.sclang_path.or(other.sclang_path);
        if self.sclang_args.is_empty() {
            self.sclang_args = other.sclang_args;
        }
        self.boot_timeout_ms = self.boot_timeout_ms.or(other.boot_timeout_ms);
        self.exec_timeout_ms = self.exec_timeout_ms.or(other.exec_timeout_ms);
        self.ready_timeout_ms = self.ready_timeout_ms.or(other.ready_timeout_ms);
        self.kill_grace_ms = self.kill_grace_ms.or(other.kill_grace_ms);
        self.error_settle_ms = self.error_settle_ms.or(other.error_settle_ms);
        self
    }
}
