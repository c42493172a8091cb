//! Modular configuration loader.
//!
//! Loads configuration from two files in the configuration directory:
//! - `config.json` - General settings and saved screening parameters
//! - `api_config.json` - Credentials (FinMind token)
//!
//! `api_config.json` is deep-merged over `config.json`, so it may also carry
//! non-secret FinMind settings such as a custom endpoint.

use anyhow::{Context, Result};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::config_dir;

/// Configuration file names
pub const CONFIG_FILES: &[&str] = &["config.json", "api_config.json"];

/// Load a JSON file and return its contents as a Value.
/// Returns None if file doesn't exist.
fn load_json_file(path: &Path) -> Result<Option<Value>> {
    if !path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    // Editors on Windows like to prepend a BOM
    let content = content.trim_start_matches('\u{feff}');

    let value: Value = serde_json::from_str(content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;

    Ok(Some(value))
}

/// Drop meta keys (`$schema`, `_comment`, ...) from the top level of an object.
fn strip_meta_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(key, _)| !key.starts_with('$') && !key.starts_with('_'))
                .collect(),
        ),
        other => other,
    }
}

/// Deep merge two JSON values.
/// Source values override target values, with object merging at each level.
pub fn merge_json(target: &mut Value, source: Value) {
    match (target, source) {
        (Value::Object(target_map), Value::Object(source_map)) => {
            for (key, source_value) in source_map {
                match target_map.get_mut(&key) {
                    Some(target_value) => {
                        merge_json(target_value, source_value);
                    }
                    None => {
                        target_map.insert(key, source_value);
                    }
                }
            }
        }
        (target, source) => {
            *target = source;
        }
    }
}

/// Load modular configuration from the config directory.
///
/// Priority (lowest to highest):
/// 1. `config.json`
/// 2. `api_config.json`
/// 3. Environment variables (applied separately)
pub fn load_modular_config(dir: Option<PathBuf>) -> Result<Value> {
    let cfg_dir = dir.unwrap_or_else(config_dir);

    tracing::debug!("Loading modular config from {}", cfg_dir.display());

    let mut config = load_json_file(&cfg_dir.join("config.json"))?
        .map(strip_meta_keys)
        .unwrap_or(Value::Object(Default::default()));

    if !config.is_object() {
        anyhow::bail!(
            "{} must contain a JSON object",
            cfg_dir.join("config.json").display()
        );
    }

    if let Some(api) = load_json_file(&cfg_dir.join("api_config.json"))? {
        merge_json(&mut config, strip_meta_keys(api));
        tracing::debug!("Loaded api_config.json");
    }

    Ok(config)
}

/// Check which modular config files exist.
pub fn check_modular_files(dir: Option<PathBuf>) -> Vec<(String, bool)> {
    let cfg_dir = dir.unwrap_or_else(config_dir);

    CONFIG_FILES
        .iter()
        .map(|file| {
            let path = cfg_dir.join(file);
            (file.to_string(), path.exists())
        })
        .collect()
}

/// Write `value` as pretty JSON to `path` unless the file already exists.
///
/// Returns `true` when the file was written.
pub fn write_json_if_absent(path: &Path, value: &Value) -> crate::Result<bool> {
    if path.exists() {
        return Ok(false);
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let content = serde_json::to_string_pretty(value)?;
    fs::write(path, content + "\n")?;

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_json_objects() {
        let mut target = json!({
            "finmind": {
                "v4_url": "https://example.test/v4",
                "max_retries": 3
            },
            "output": { "max_results": 30 }
        });

        let source = json!({
            "finmind": {
                "api_token": "abc",
                "max_retries": 5
            }
        });

        merge_json(&mut target, source);

        assert_eq!(target["finmind"]["v4_url"], "https://example.test/v4");
        assert_eq!(target["finmind"]["api_token"], "abc");
        assert_eq!(target["finmind"]["max_retries"], 5);
        assert_eq!(target["output"]["max_results"], 30);
    }

    #[test]
    fn test_merge_json_overwrite_non_object() {
        let mut target = json!({ "formats": ["xlsx", "json"] });
        let source = json!({ "formats": ["markdown"] });

        merge_json(&mut target, source);

        assert_eq!(target["formats"], json!(["markdown"]));
    }

    #[test]
    fn test_load_missing_dir_gives_empty_object() {
        let tmp = tempfile::tempdir().unwrap();
        let value = load_modular_config(Some(tmp.path().join("absent"))).unwrap();
        assert_eq!(value, json!({}));
    }

    #[test]
    fn test_meta_keys_and_bom_are_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(
            tmp.path().join("api_config.json"),
            "\u{feff}{\"_comment\": \"fill in\", \"finmind\": {\"api_token\": \"t\"}}",
        )
        .unwrap();

        let value = load_modular_config(Some(tmp.path().to_path_buf())).unwrap();
        assert!(value.get("_comment").is_none());
        assert_eq!(value["finmind"]["api_token"], "t");
    }

    #[test]
    fn test_invalid_json_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("config.json"), "{ not json").unwrap();

        let err = load_modular_config(Some(tmp.path().to_path_buf())).unwrap_err();
        assert!(err.to_string().contains("config.json"));
    }

    #[test]
    fn test_check_modular_files() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("config.json"), "{}").unwrap();

        let files = check_modular_files(Some(tmp.path().to_path_buf()));
        assert_eq!(
            files,
            vec![
                ("config.json".to_string(), true),
                ("api_config.json".to_string(), false)
            ]
        );
    }

    #[test]
    fn test_write_json_if_absent_keeps_existing() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("config.json");

        assert!(write_json_if_absent(&path, &json!({"a": 1})).unwrap());
        assert!(!write_json_if_absent(&path, &json!({"a": 2})).unwrap());

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("\"a\": 1"));
    }
}
