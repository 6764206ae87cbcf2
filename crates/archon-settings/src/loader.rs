//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`ArchonSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply environment variable overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::ArchonSettings;

/// Default settings file (`~/.archon/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".archon").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<ArchonSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with process env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<ArchonSettings> {
    load_settings_with(path, |name| std::env::var(name).ok())
}

/// Load settings from `path`, resolving overrides through `lookup`.
pub fn load_settings_with<F>(path: &Path, lookup: F) -> Result<ArchonSettings>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = serde_json::to_value(ArchonSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: ArchonSettings = serde_json::from_value(merged)?;
    apply_overrides(&mut settings, lookup);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply process environment overrides to loaded settings.
pub fn apply_env_overrides(settings: &mut ArchonSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides resolved through `lookup`.
///
/// - `SOCKET_PORT`: listen port (1-65535)
/// - `ARCHON_HOST`: bind address
/// - `CLIENT_URL`: comma-separated allowed origins
/// - `ARCHON_MAX_CONNECTIONS`: connection cap (1-1,000,000)
/// - `API_URL`: upstream base URL (`http://` or `https://`)
/// - `ARCHON_HTTP_TIMEOUT_MS`: per-attempt deadline (1-600,000)
/// - `ARCHON_LOG_LEVEL`, `ARCHON_LOG_JSON`
///
/// Empty values are treated as unset. Invalid values are logged and ignored.
pub fn apply_overrides<F>(settings: &mut ArchonSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.parsed("SOCKET_PORT", |s| parse_u16_range(s, 1, 65535)) {
        settings.server.port = v;
    }
    if let Some(v) = env.string("ARCHON_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.parsed("CLIENT_URL", parse_origin_list) {
        settings.server.allowed_origins = v;
    }
    if let Some(v) = env.parsed("ARCHON_MAX_CONNECTIONS", |s| {
        parse_usize_range(s, 1, 1_000_000)
    }) {
        settings.server.max_connections = v;
    }

    // ── Upstream ────────────────────────────────────────────────────
    if let Some(v) = env.parsed("API_URL", parse_http_url) {
        settings.upstream.base_url = v;
    }
    if let Some(v) = env.parsed("ARCHON_HTTP_TIMEOUT_MS", |s| parse_u64_range(s, 1, 600_000)) {
        settings.upstream.timeout_ms = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("ARCHON_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.parsed("ARCHON_LOG_JSON", parse_bool) {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Split a comma-separated origin list, trimming blanks.
pub fn parse_origin_list(val: &str) -> Option<Vec<String>> {
    let origins: Vec<String> = val
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    (!origins.is_empty()).then_some(origins)
}

/// Accept a value only if it is an `http://` or `https://` URL.
pub fn parse_http_url(val: &str) -> Option<String> {
    let val = val.trim();
    let rest = val
        .strip_prefix("http://")
        .or_else(|| val.strip_prefix("https://"))?;
    (!rest.is_empty()).then(|| val.to_string())
}

// ── Env reader ──────────────────────────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        let val = self.string(name)?;
        let result = parse(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid env var, ignoring");
        }
        result
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use crate::errors::SettingsError;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + use<> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    fn no_env(_name: &str) -> Option<String> {
        None
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"server": {"port": 7000, "host": "0.0.0.0"}});
        let source = serde_json::json!({"server": {"port": 9090}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9090);
        assert_eq!(merged["server"]["host"], "0.0.0.0");
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"origins": ["*"]});
        let source = serde_json::json!({"origins": ["http://a", "http://b"]});
        let merged = deep_merge(target, source);
        assert_eq!(merged["origins"], serde_json::json!(["http://a", "http://b"]));
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_new_keys_added() {
        let merged = deep_merge(serde_json::json!({"a": 1}), serde_json::json!({"b": 2}));
        assert_eq!(merged, serde_json::json!({"a": 1, "b": 2}));
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let merged = deep_merge(
            serde_json::json!({"a": {"nested": true}}),
            serde_json::json!({"a": 42}),
        );
        assert_eq!(merged["a"], 42);
    }

    // ── loading ─────────────────────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let settings =
            load_settings_with(Path::new("/nonexistent/settings.json"), no_env).unwrap();
        assert_eq!(settings, ArchonSettings::default());
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server": {"port": 9090, "allowedOrigins": ["http://app.local"]}, "upstream": {"getRetries": 5}}"#,
        )
        .unwrap();

        let settings = load_settings_with(&path, no_env).unwrap();
        assert_eq!(settings.server.port, 9090);
        assert_eq!(settings.server.allowed_origins, ["http://app.local"]);
        assert_eq!(settings.server.max_connections, 1000);
        assert_eq!(settings.upstream.get_retries, 5);
        assert_eq!(settings.upstream.post_retries, 2);
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();

        let result = load_settings_with(&path, no_env);
        assert!(matches!(result, Err(SettingsError::Json(_))));
    }

    #[test]
    fn load_rejects_invalid_combination() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"sendQueueCapacity": 0}}"#).unwrap();

        let result = load_settings_with(&path, no_env);
        assert!(matches!(result, Err(SettingsError::InvalidValue(_))));
    }

    #[test]
    fn env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"port": 9090}}"#).unwrap();

        let settings = load_settings_with(&path, env(&[("SOCKET_PORT", "7100")])).unwrap();
        assert_eq!(settings.server.port, 7100);
    }

    // ── apply_overrides ─────────────────────────────────────────────

    #[test]
    fn overrides_apply_each_key() {
        let mut settings = ArchonSettings::default();
        apply_overrides(
            &mut settings,
            env(&[
                ("SOCKET_PORT", "7001"),
                ("ARCHON_HOST", "127.0.0.1"),
                ("CLIENT_URL", "http://a.local, http://b.local"),
                ("ARCHON_MAX_CONNECTIONS", "50"),
                ("API_URL", "http://api.local:9000"),
                ("ARCHON_HTTP_TIMEOUT_MS", "2500"),
                ("ARCHON_LOG_LEVEL", "debug"),
                ("ARCHON_LOG_JSON", "yes"),
            ]),
        );
        assert_eq!(settings.server.port, 7001);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.allowed_origins, ["http://a.local", "http://b.local"]);
        assert_eq!(settings.server.max_connections, 50);
        assert_eq!(settings.upstream.base_url, "http://api.local:9000");
        assert_eq!(settings.upstream.timeout_ms, 2500);
        assert_eq!(settings.logging.level, "debug");
        assert!(settings.logging.json);
    }

    #[test]
    fn invalid_overrides_are_ignored() {
        let mut settings = ArchonSettings::default();
        apply_overrides(
            &mut settings,
            env(&[
                ("SOCKET_PORT", "0"),
                ("ARCHON_MAX_CONNECTIONS", "lots"),
                ("ARCHON_LOG_JSON", "maybe"),
                ("CLIENT_URL", " , "),
                ("ARCHON_HOST", ""),
            ]),
        );
        assert_eq!(settings, ArchonSettings::default());
    }

    #[test]
    fn non_http_api_url_keeps_default() {
        let missing = Path::new("/nonexistent/settings.json");
        let settings = load_settings_with(missing, |name| {
            (name == "API_URL").then(|| "localhost:8080".to_string())
        })
        .unwrap();
        assert_eq!(settings.upstream.base_url, "http://localhost:8080");
    }

    #[test]
    fn https_api_url_is_applied() {
        let missing = Path::new("/nonexistent/settings.json");
        let settings =
            load_settings_with(missing, env(&[("API_URL", "https://api.test")])).unwrap();
        assert_eq!(settings.upstream.base_url, "https://api.test");
    }

    // ── parsers ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        for val in ["true", "1", "yes", "on", "TRUE", "On"] {
            assert_eq!(parse_bool(val), Some(true), "failed for {val}");
        }
        for val in ["false", "0", "no", "off", "FALSE"] {
            assert_eq!(parse_bool(val), Some(false), "failed for {val}");
        }
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u16_range("7000", 1, 65535), Some(7000));
        assert_eq!(parse_u16_range("0", 1, 65535), None);
        assert_eq!(parse_u16_range("99999", 1, 65535), None);
        assert_eq!(parse_u64_range("500", 1000, 600_000), None);
        assert_eq!(parse_usize_range("50", 1, 10_000), Some(50));
        assert_eq!(parse_usize_range("abc", 1, 10_000), None);
    }

    #[test]
    fn parse_http_urls() {
        assert_eq!(parse_http_url("http://a:1"), Some("http://a:1".to_string()));
        assert_eq!(parse_http_url(" https://a "), Some("https://a".to_string()));
        assert_eq!(parse_http_url("localhost:8080"), None);
        assert_eq!(parse_http_url("ftp://a"), None);
        assert_eq!(parse_http_url("http://"), None);
    }

    #[test]
    fn parse_origins() {
        assert_eq!(parse_origin_list("*"), Some(vec!["*".to_string()]));
        assert_eq!(
            parse_origin_list("http://a,,http://b "),
            Some(vec!["http://a".to_string(), "http://b".to_string()])
        );
        assert_eq!(parse_origin_list(" "), None);
    }
}
