use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "Files";
const CONFIG_FILE: &str = "launcher.json";
const LOCAL_SETTINGS_FILE: &str = "LocalSettings.json";

/// Per-user data directory of the app, `<local data dir>/Files`.
pub fn app_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

fn read_json<T: for<'de> Deserialize<'de> + Default>(path: &Path, what: &str) -> Result<T> {
    if !path.exists() {
        tracing::debug!(target: "config", path = %path.display(), "No {what} found, using defaults");
        return Ok(T::default());
    }
    let content = fs::read_to_string(path).with_context(|| format!("Failed to read {what}"))?;
    if content.trim().is_empty() {
        return Ok(T::default());
    }
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {what}"))
}

fn write_json<T: Serialize>(path: &Path, value: &T, what: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("Failed to create directory for {what}"))?;
    }
    let content = serde_json::to_string_pretty(value).with_context(|| format!("Failed to serialize {what}"))?;
    fs::write(path, content).with_context(|| format!("Failed to write {what}"))
}

/// Launcher settings, `<app data>/launcher.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    pub connect_timeout_secs: u64,
    /// Full pipe path, overriding the one derived from session and package
    pub pipe_name: Option<String>,
    /// Defaults to the session of the current process
    pub session_id: Option<u32>,
    pub package_sid: Option<String>,
    pub progress_sample_interval_ms: u64,
    pub device_poll_interval_ms: u64,
    pub log_level: String,
    pub log_max_files: usize,
    pub log_dir: Option<PathBuf>,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 15,
            pipe_name: None,
            session_id: None,
            package_sid: None,
            progress_sample_interval_ms: 100,
            device_poll_interval_ms: 2000,
            log_level: "info".to_string(),
            log_max_files: 5,
            log_dir: None,
        }
    }
}

impl LauncherConfig {
    pub fn default_path() -> PathBuf {
        app_data_dir().join(CONFIG_FILE)
    }

    /// Reads the config at `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        read_json(path, "launcher config")
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json(path, self, "launcher config")
    }
}

/// String-keyed settings shared with the app, `<app data>/LocalSettings.json`.
#[derive(Debug, Clone, Default)]
pub struct LocalSettings {
    path: PathBuf,
    values: Map<String, Value>,
}

impl LocalSettings {
    pub fn default_path() -> PathBuf {
        app_data_dir().join(LOCAL_SETTINGS_FILE)
    }

    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let values = read_json(&path, "local settings")?;
        Ok(Self { path, values })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key).filter(|v| !v.is_null())
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Accepts numbers and numeric strings.
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.get(key)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn save(&self) -> Result<()> {
        write_json(&self.path, &self.values, "local settings")?;
        tracing::debug!(target: "config", path = %self.path.display(), "Local settings saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = LauncherConfig::load(&dir.path().join("launcher.json")).unwrap();
        assert_eq!(config, LauncherConfig::default());
        assert_eq!(config.connect_timeout_secs, 15);
    }

    #[test]
    fn test_partial_config_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("launcher.json");
        fs::write(&path, r#"{ "package_sid": "S-1-15-2-1", "log_level": "debug" }"#).unwrap();

        let config = LauncherConfig::load(&path).unwrap();
        assert_eq!(config.package_sid.as_deref(), Some("S-1-15-2-1"));
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.progress_sample_interval_ms, 100);
    }

    #[test]
    fn test_config_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("launcher.json");
        let config = LauncherConfig {
            session_id: Some(3),
            ..Default::default()
        };
        config.save(&path).unwrap();
        assert_eq!(LauncherConfig::load(&path).unwrap().session_id, Some(3));
    }

    #[test]
    fn test_invalid_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("launcher.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(LauncherConfig::load(&path).is_err());
    }

    #[test]
    fn test_local_settings_remove_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("LocalSettings.json");
        fs::write(&path, r#"{ "Arguments": "TerminateUwp", "pid": "4242" }"#).unwrap();

        let mut settings = LocalSettings::load(&path).unwrap();
        assert_eq!(settings.get_str("Arguments"), Some("TerminateUwp"));
        assert_eq!(settings.get_i64("pid"), Some(4242));

        settings.remove("Arguments");
        settings.insert("Theme", "Dark");
        settings.save().unwrap();

        let reloaded = LocalSettings::load(&path).unwrap();
        assert!(reloaded.get("Arguments").is_none());
        assert_eq!(reloaded.get_str("Theme"), Some("Dark"));
    }
}
