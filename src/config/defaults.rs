//! Default configuration values
//!
//! All constants used throughout the config module are defined here.

/// Time allowed from spawn until the audio server reports ready
pub const DEFAULT_BOOT_TIMEOUT_MS: u64 = 10_000;

/// Time allowed for one evaluation to produce its response
pub const DEFAULT_EXEC_TIMEOUT_MS: u64 = 2_000;

/// Default wait for the runtime library's ready sentinel
pub const DEFAULT_READY_TIMEOUT_MS: u64 = 10_000;

/// Grace period after the terminate command before force-killing
pub const DEFAULT_KILL_GRACE_MS: u64 = 2_000;

/// How long to let position and caret lines trail an `ERROR:` line
pub const DEFAULT_ERROR_SETTLE_MS: u64 = 100;

/// Last resort when no installation is found; resolved through PATH at spawn
pub const DEFAULT_SCLANG_COMMAND: &str = "sclang";

/// sclang inside the standard macOS application bundle
pub const MACOS_APP_SCLANG: &str = "/Applications/SuperCollider.app/Contents/MacOS/sclang";

/// Config file location (tilde-expanded)
pub const CONFIG_PATH: &str = "~/.sclang-runtime/config.json";

/// Environment overrides
pub const ENV_SCLANG_PATH: &str = "SCLANG_PATH";
pub const ENV_BOOT_TIMEOUT: &str = "SC_BOOT_TIMEOUT";
pub const ENV_EXEC_TIMEOUT: &str = "SC_EXEC_TIMEOUT";
