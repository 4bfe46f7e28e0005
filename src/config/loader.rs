//! Configuration loading from file system and environment

use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

use super::defaults::{
    CONFIG_PATH, DEFAULT_SCLANG_COMMAND, ENV_BOOT_TIMEOUT, ENV_EXEC_TIMEOUT, ENV_SCLANG_PATH,
    MACOS_APP_SCLANG,
};
use super::types::RuntimeConfig;

/// Load configuration from ~/.sclang-runtime/config.json plus the environment
///
/// A missing or unparsable file yields defaults; environment overrides are
/// applied on top either way.
#[instrument(name = "load_config")]
pub fn load_config() -> RuntimeConfig {
    let config_path = PathBuf::from(shellexpand::tilde(CONFIG_PATH).as_ref());
    let mut config = load_config_from(&config_path);
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    config
}

/// Parse a JSON config file, falling back to defaults
pub fn load_config_from(path: &Path) -> RuntimeConfig {
    if !path.exists() {
        info!(path = %path.display(), "Config file not found, using defaults");
        return RuntimeConfig::default();
    }

    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            warn!(error = %e, path = %path.display(), "Failed to read config, using defaults");
            return RuntimeConfig::default();
        }
    };

    match serde_json::from_str::<RuntimeConfig>(&contents) {
        Ok(config) => {
            info!(path = %path.display(), "Successfully loaded config");
            config
        }
        Err(e) => {
            warn!(
                error = %e,
                path = %path.display(),
                "Failed to parse config JSON, using defaults"
            );
            RuntimeConfig::default()
        }
    }
}

/// Apply `SCLANG_PATH`, `SC_BOOT_TIMEOUT` and `SC_EXEC_TIMEOUT`
///
/// `lookup` abstracts the environment so tests never touch process env.
/// Timeouts that are not positive integers are ignored with a warning.
pub fn apply_env_overrides<F>(config: &mut RuntimeConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = lookup(ENV_SCLANG_PATH).filter(|p| !p.trim().is_empty()) {
        debug!(path = %path, "sclang path from environment");
        config.sclang_path = Some(path);
    }
    if let Some(ms) = parse_timeout(ENV_BOOT_TIMEOUT, lookup(ENV_BOOT_TIMEOUT)) {
        config.boot_timeout_ms = Some(ms);
    }
    if let Some(ms) = parse_timeout(ENV_EXEC_TIMEOUT, lookup(ENV_EXEC_TIMEOUT)) {
        config.exec_timeout_ms = Some(ms);
    }
}

fn parse_timeout(key: &str, raw: Option<String>) -> Option<u64> {
    let raw = raw?;
    match raw.trim().parse::<u64>() {
        Ok(ms) if ms > 0 => Some(ms),
        _ => {
            warn!(key = key, value = %raw, "Ignoring invalid timeout override");
            None
        }
    }
}

/// Find sclang, checking locations a bare PATH lookup might miss
///
/// Order: explicit path, the macOS app bundle, PATH, common install
/// directories, then the bare command name.
pub fn find_sclang_path(explicit: Option<&str>) -> String {
    if let Some(path) = explicit.filter(|p| !p.trim().is_empty()) {
        return shellexpand::tilde(path).into_owned();
    }

    if Path::new(MACOS_APP_SCLANG).exists() {
        debug!(path = MACOS_APP_SCLANG, "Found sclang in app bundle");
        return MACOS_APP_SCLANG.to_string();
    }

    if let Ok(path) = which::which(DEFAULT_SCLANG_COMMAND) {
        debug!(path = %path.display(), "Found sclang on PATH");
        return path.to_string_lossy().into_owned();
    }

    let common_paths = [
        dirs::home_dir().map(|h| h.join("Applications/SuperCollider.app/Contents/MacOS")),
        dirs::home_dir().map(|h| h.join(".local/bin")),
        Some(PathBuf::from("/opt/homebrew/bin")),
        Some(PathBuf::from("/usr/local/bin")),
        Some(PathBuf::from("/usr/bin")),
    ];

    for dir in common_paths.iter().flatten() {
        let candidate = dir.join(DEFAULT_SCLANG_COMMAND);
        if candidate.exists() {
            debug!(path = %candidate.display(), "Found sclang in common path");
            return candidate.to_string_lossy().into_owned();
        }
    }

    warn!("sclang not found, relying on PATH at spawn time");
    DEFAULT_SCLANG_COMMAND.to_string()
}
