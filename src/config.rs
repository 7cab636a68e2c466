// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration for the asset cache.
//!
//! Loaded from `<config dir>/assetcache/config.json` when present, then
//! overridden by environment variables:
//!
//! | Environment Variable | Field |
//! |---------------------|-------|
//! | `ASSETCACHE_ROOT` | `root_dir` |
//! | `ASSETCACHE_METADATA_ENDPOINT` | `metadata_endpoint` |
//! | `ASSETCACHE_TOKEN` | `access_token` |

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Retention window before an untouched asset is evicted.
pub const DEFAULT_RETENTION_DAYS: u64 = 14;

const SECONDS_PER_DAY: i64 = 86_400;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssetConfig {
    /// Cache root; platform data directory when unset.
    #[serde(default)]
    pub root_dir: Option<PathBuf>,
    /// Days since last access after which an asset is evicted.
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,
    /// Sleep between worker ticks, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Completed operations handled per registry per tick.
    #[serde(default = "default_drain_limit")]
    pub drain_limit: usize,
    /// Base URL of the metadata service.
    #[serde(default)]
    pub metadata_endpoint: Option<String>,
    /// Bearer token sent with metadata queries.
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_retention_days() -> u64 {
    DEFAULT_RETENTION_DAYS
}

fn default_poll_interval_ms() -> u64 {
    1
}

fn default_drain_limit() -> usize {
    1
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    300
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            root_dir: None,
            retention_days: default_retention_days(),
            poll_interval_ms: default_poll_interval_ms(),
            drain_limit: default_drain_limit(),
            metadata_endpoint: None,
            access_token: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl AssetConfig {
    /// Default configuration rooted at `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: Some(root.into()),
            ..Self::default()
        }
    }

    /// The cache root directory.
    pub fn resolve_root(&self) -> PathBuf {
        if let Some(root) = &self.root_dir {
            return root.clone();
        }
        dirs::data_local_dir()
            .map(|dir| dir.join("assetcache").join("assets"))
            .unwrap_or_else(|| PathBuf::from(".assetcache/assets"))
    }

    /// Retention window as a signed duration for timestamp arithmetic.
    pub fn retention(&self) -> chrono::Duration {
        let days = i64::try_from(self.retention_days).unwrap_or(i64::MAX);
        chrono::Duration::seconds(days.saturating_mul(SECONDS_PER_DAY).min(i64::MAX / 1_000_000))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Drain limit, never below one.
    pub fn drain_limit(&self) -> usize {
        self.drain_limit.max(1)
    }

    /// Apply `ASSETCACHE_*` environment overrides.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(root) = non_empty("ASSETCACHE_ROOT") {
            self.root_dir = Some(PathBuf::from(root));
        }
        if let Some(endpoint) = non_empty("ASSETCACHE_METADATA_ENDPOINT") {
            self.metadata_endpoint = Some(endpoint);
        }
        if let Some(token) = non_empty("ASSETCACHE_TOKEN") {
            self.access_token = Some(token);
        }
    }
}

/// Path of the configuration file.
pub fn config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir().context("Could not find config directory")?;
    Ok(config_dir.join("assetcache").join("config.json"))
}

/// Load configuration from the default location plus environment overrides.
pub fn load_config() -> Result<AssetConfig> {
    let mut config = load_config_from(&config_path()?)?;
    config.apply_env();
    Ok(config)
}

/// Load configuration from `path`; defaults when the file does not exist.
pub fn load_config_from(path: &Path) -> Result<AssetConfig> {
    if !path.exists() {
        return Ok(AssetConfig::default());
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = AssetConfig::default();
        assert_eq!(config.retention_days, 14);
        assert_eq!(config.retention(), chrono::Duration::seconds(86_400 * 14));
        assert_eq!(config.poll_interval(), Duration::from_millis(1));
        assert_eq!(config.drain_limit(), 1);
        assert!(config.metadata_endpoint.is_none());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"retention_days": 3, "metadata_endpoint": "https://meta.example.com"}"#,
        )
        .unwrap();

        let config = load_config_from(&path).unwrap();
        assert_eq!(config.retention_days, 3);
        assert_eq!(config.metadata_endpoint.as_deref(), Some("https://meta.example.com"));
        assert_eq!(config.drain_limit, 1);
        assert_eq!(config.request_timeout_secs, 300);
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = TempDir::new().unwrap();
        let config = load_config_from(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, AssetConfig::default());
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(load_config_from(&path).is_err());
    }

    #[test]
    fn test_env_overrides_ignore_blank_values() {
        let vars: HashMap<&str, &str> = [
            ("ASSETCACHE_ROOT", "/var/cache/assets"),
            ("ASSETCACHE_METADATA_ENDPOINT", "  "),
            ("ASSETCACHE_TOKEN", "secret"),
        ]
        .into_iter()
        .collect();

        let mut config = AssetConfig {
            metadata_endpoint: Some("https://from-file".into()),
            ..AssetConfig::default()
        };
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.resolve_root(), PathBuf::from("/var/cache/assets"));
        assert_eq!(config.metadata_endpoint.as_deref(), Some("https://from-file"));
        assert_eq!(config.access_token.as_deref(), Some("secret"));
    }

    #[test]
    fn test_zero_drain_limit_is_clamped() {
        let config = AssetConfig {
            drain_limit: 0,
            ..AssetConfig::default()
        };
        assert_eq!(config.drain_limit(), 1);
    }
}
