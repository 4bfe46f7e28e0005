use super::*;
use std::collections::HashMap;
use std::time::Duration;

fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn test_default_config() {
    let config = RuntimeConfig::default();
    assert_eq!(config.sclang_path, None);
    assert_eq!(config.get_boot_timeout(), Duration::from_millis(10_000));
    assert_eq!(config.get_exec_timeout(), Duration::from_millis(2_000));
    assert_eq!(config.get_ready_timeout(), Duration::from_millis(10_000));
    assert_eq!(config.get_kill_grace(), Duration::from_millis(2_000));
    assert_eq!(config.get_error_settle(), Duration::from_millis(100));
}

#[test]
fn test_config_deserializes_camel_case() {
    let json = r#"{"sclangPath": "/opt/sc/sclang", "bootTimeoutMs": 30000, "sclangArgs": ["-D"]}"#;
    let config: RuntimeConfig = serde_json::from_str(json).unwrap();
    assert_eq!(config.sclang_path.as_deref(), Some("/opt/sc/sclang"));
    assert_eq!(config.boot_timeout_ms, Some(30_000));
    assert_eq!(config.sclang_args, vec!["-D"]);
    assert_eq!(config.exec_timeout_ms, None);
}

#[test]
fn test_config_serialization_skips_unset_fields() {
    let config = RuntimeConfig {
        exec_timeout_ms: Some(500),
        ..Default::default()
    };
    let json = serde_json::to_string(&config).unwrap();
    assert_eq!(json, r#"{"execTimeoutMs":500}"#);
}

#[test]
fn test_load_config_missing_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = load_config_from(&dir.path().join("nope.json"));
    assert_eq!(config, RuntimeConfig::default());
}

#[test]
fn test_load_config_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, r#"{"execTimeoutMs": 750, "killGraceMs": 50}"#).unwrap();

    let config = load_config_from(&path);
    assert_eq!(config.get_exec_timeout(), Duration::from_millis(750));
    assert_eq!(config.get_kill_grace(), Duration::from_millis(50));
}

#[test]
fn test_load_config_invalid_json_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, "{ not json").unwrap();
    assert_eq!(load_config_from(&path), RuntimeConfig::default());
}

#[test]
fn test_env_overrides_apply() {
    let mut config = RuntimeConfig::default();
    apply_env_overrides(
        &mut config,
        env(&[
            ("SCLANG_PATH", "/custom/sclang"),
            ("SC_BOOT_TIMEOUT", "20000"),
            ("SC_EXEC_TIMEOUT", "5000"),
        ]),
    );
    assert_eq!(config.sclang_path.as_deref(), Some("/custom/sclang"));
    assert_eq!(config.boot_timeout_ms, Some(20_000));
    assert_eq!(config.exec_timeout_ms, Some(5_000));
}

#[test]
fn test_env_overrides_ignore_invalid_values() {
    let mut config = RuntimeConfig {
        boot_timeout_ms: Some(1234),
        ..Default::default()
    };
    apply_env_overrides(
        &mut config,
        env(&[
            ("SCLANG_PATH", "  "),
            ("SC_BOOT_TIMEOUT", "soon"),
            ("SC_EXEC_TIMEOUT", "0"),
        ]),
    );
    assert_eq!(config.sclang_path, None);
    assert_eq!(config.boot_timeout_ms, Some(1234));
    assert_eq!(config.exec_timeout_ms, None);
}

#[test]
fn test_merge_missing_keeps_explicit_values() {
    let explicit = RuntimeConfig {
        exec_timeout_ms: Some(100),
        ..Default::default()
    };
    let loaded = RuntimeConfig {
        sclang_path: Some("/from/file".to_string()),
        exec_timeout_ms: Some(9_000),
        ..Default::default()
    };
    let merged = explicit.merge_missing(loaded);
    assert_eq!(merged.exec_timeout_ms, Some(100));
    assert_eq!(merged.sclang_path.as_deref(), Some("/from/file"));
}

#[test]
fn test_find_sclang_path_prefers_explicit() {
    assert_eq!(find_sclang_path(Some("/x/y/sclang")), "/x/y/sclang");
}

#[test]
fn test_find_sclang_path_always_returns_something() {
    assert!(!find_sclang_path(None).is_empty());
}
