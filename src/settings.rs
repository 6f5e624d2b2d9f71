//! # Engine Settings
//!
//! Timeouts, the retry budget, selection limits and host URLs. Values are
//! layered, later layers winning:
//!
//! 1. built-in defaults;
//! 2. the user file `<config_dir>/lib50/config.yaml`, if present
//!    (`~/.config/lib50/config.yaml` on Linux);
//! 3. `LIB50_*` environment variables.
//!
//! ```yaml
//! timeout_secs: 10
//! retry:
//!   max_attempts: 5
//! limits:
//!   max_file_size: 1048576
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::SettingsError;
use crate::selector::Limits;
use crate::sync::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            base_delay_ms: policy.base_delay.as_millis() as u64,
            multiplier: policy.multiplier,
            max_delay_ms: policy.max_delay.as_millis() as u64,
            jitter: policy.jitter,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitSettings {
    pub max_file_size: Option<u64>,
    pub max_total_size: Option<u64>,
    pub max_files: Option<usize>,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            max_file_size: Some(100 * 1024 * 1024),
            max_total_size: None,
            max_files: Some(10_000),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub api_url: String,
    pub git_url: String,
    pub index_url: Option<String>,
    /// Per-call timeout for git and HTTP, in seconds.
    pub timeout_secs: u64,
    /// Look up a slug's branches with `git ls-remote` when the index does not
    /// know them.
    pub discover_branches: bool,
    pub retry: RetrySettings,
    pub limits: LimitSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: "https://api.github.com".to_string(),
            git_url: "https://github.com".to_string(),
            index_url: None,
            timeout_secs: 30,
            discover_branches: true,
            retry: RetrySettings::default(),
            limits: LimitSettings::default(),
        }
    }
}

/// Location of the user settings file.
pub fn default_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("lib50").join("config.yaml"))
}

impl Settings {
    /// Defaults, then the user file, then the environment.
    pub fn load() -> Result<Self, SettingsError> {
        let settings = match default_settings_path() {
            Some(path) if path.is_file() => Settings::from_file(&path)?,
            _ => Settings::default(),
        };
        settings.with_env(|name| std::env::var(name).ok())
    }

    pub fn from_file(path: &Path) -> Result<Self, SettingsError> {
        debug!("Reading settings from {}", path.display());
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        if content.trim().is_empty() {
            return Ok(Settings::default());
        }
        serde_yaml::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `LIB50_*` overrides read through `lookup`.
    pub fn with_env<F>(mut self, lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("LIB50_API_URL") {
            self.api_url = value;
        }
        if let Some(value) = lookup("LIB50_GIT_URL") {
            self.git_url = value;
        }
        if let Some(value) = lookup("LIB50_INDEX_URL") {
            self.index_url = Some(value);
        }
        if let Some(value) = lookup("LIB50_TIMEOUT") {
            self.timeout_secs = parse_env("LIB50_TIMEOUT", &value)?;
        }
        if let Some(value) = lookup("LIB50_MAX_ATTEMPTS") {
            self.retry.max_attempts = parse_env("LIB50_MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = lookup("LIB50_MAX_FILE_SIZE") {
            self.limits.max_file_size = Some(parse_env("LIB50_MAX_FILE_SIZE", &value)?);
        }
        if let Some(value) = lookup("LIB50_MAX_FILES") {
            self.limits.max_files = Some(parse_env("LIB50_MAX_FILES", &value)?);
        }
        Ok(self)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            multiplier: self.retry.multiplier,
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            jitter: self.retry.jitter,
        }
    }

    pub fn limits(&self) -> Limits {
        Limits {
            max_file_size: self.limits.max_file_size,
            max_total_size: self.limits.max_total_size,
            max_files: self.limits.max_files,
        }
    }
}

fn parse_env<T>(name: &str, value: &str) -> Result<T, SettingsError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| SettingsError::InvalidValue {
            name: name.to_string(),
            value: value.to_string(),
            message: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.timeout(), Duration::from_secs(30));
        assert_eq!(settings.retry_policy(), RetryPolicy::default());
        assert_eq!(settings.limits().max_files, Some(10_000));
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yaml");
        std::fs::write(&path, "timeout_secs: 5\nretry:\n  max_attempts: 7\n").unwrap();

        let settings = Settings::from_file(&path).unwrap();
        assert_eq!(settings.timeout_secs, 5);
        assert_eq!(settings.retry.max_attempts, 7);
        assert_eq!(settings.retry.base_delay_ms, 1000);
        assert_eq!(settings.api_url, "https://api.github.com");
    }

    #[test]
    fn test_malformed_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yaml");
        std::fs::write(&path, "timeout_secs: [1, 2\n").unwrap();
        assert!(matches!(
            Settings::from_file(&path),
            Err(SettingsError::Parse { .. })
        ));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("LIB50_TIMEOUT", "12"),
            ("LIB50_MAX_ATTEMPTS", "4"),
            ("LIB50_GIT_URL", "https://git.example.com"),
        ]
        .into_iter()
        .collect();

        let settings = Settings::default()
            .with_env(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(settings.timeout_secs, 12);
        assert_eq!(settings.retry.max_attempts, 4);
        assert_eq!(settings.git_url, "https://git.example.com");
    }

    #[test]
    fn test_invalid_env_value() {
        let err = Settings::default()
            .with_env(|name| (name == "LIB50_TIMEOUT").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("LIB50_TIMEOUT"));
    }

    #[test]
    fn test_default_settings_path() {
        if let Some(path) = default_settings_path() {
            assert!(path.ends_with("lib50/config.yaml"));
        }
    }
}
