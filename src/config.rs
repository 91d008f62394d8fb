// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Runtime configuration.
//!
//! Loaded from an optional JSON file; every field has a default, so an empty
//! object (or no file at all) yields a working configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::catalog::DEFAULT_CATALOG_URL;
use crate::error::ConfigError;
use crate::playback::PlaybackSettings;
use crate::sync::{LookupConcurrency, SyncOptions};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// App-private directory holding downloads and state files
    pub data_dir: PathBuf,
    pub playback: PlaybackConfig,
    pub sync: SyncConfig,
    pub catalog: CatalogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./podcore-data"),
            playback: PlaybackConfig::default(),
            sync: SyncConfig::default(),
            catalog: CatalogConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from `path`, or defaults if the file does not exist
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: e,
                });
            }
        };

        serde_json::from_slice(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.data_dir.join("downloads")
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.data_dir.join("last_played.json")
    }

    pub fn registry_path(&self) -> PathBuf {
        self.data_dir.join("downloads.json")
    }

    pub fn library_path(&self) -> PathBuf {
        self.data_dir.join("library.json")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub progress_interval_ms: u64,
    pub checkpoint_min_position_secs: f64,
    pub checkpoint_min_remaining_secs: f64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            progress_interval_ms: 500,
            checkpoint_min_position_secs: 5.0,
            checkpoint_min_remaining_secs: 3.0,
        }
    }
}

impl From<&PlaybackConfig> for PlaybackSettings {
    fn from(config: &PlaybackConfig) -> Self {
        Self {
            progress_interval: Duration::from_millis(config.progress_interval_ms),
            checkpoint_min_position: config.checkpoint_min_position_secs,
            checkpoint_min_remaining: config.checkpoint_min_remaining_secs,
        }
    }
}

/// Scheduling of catalog lookups, as written in the config file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ConcurrencyConfig {
    Unbounded,
    Chunked { size: usize, delay_ms: u64 },
}

impl From<ConcurrencyConfig> for LookupConcurrency {
    fn from(config: ConcurrencyConfig) -> Self {
        match config {
            ConcurrencyConfig::Unbounded => LookupConcurrency::Unbounded,
            ConcurrencyConfig::Chunked { size, delay_ms } => LookupConcurrency::Chunked {
                size: size.max(1),
                delay: Duration::from_millis(delay_ms),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub concurrency: ConcurrencyConfig,
    pub lookup_timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            concurrency: ConcurrencyConfig::Chunked {
                size: 4,
                delay_ms: 1500,
            },
            lookup_timeout_secs: 10,
        }
    }
}

impl From<&SyncConfig> for SyncOptions {
    fn from(config: &SyncConfig) -> Self {
        Self {
            concurrency: config.concurrency.into(),
            lookup_timeout: Duration::from_secs(config.lookup_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_CATALOG_URL.to_string(),
            request_timeout_secs: 10,
        }
    }
}

impl CatalogConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load(&dir.path().join("absent.json")).unwrap();

        assert_eq!(config, Config::default());
        assert_eq!(
            config.checkpoint_path(),
            PathBuf::from("./podcore-data/last_played.json")
        );
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "data_dir": "/var/lib/podcore",
                "sync": { "concurrency": { "mode": "unbounded" } },
                "playback": { "checkpoint_min_position_secs": 10 }
            }"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();

        assert_eq!(config.downloads_dir(), PathBuf::from("/var/lib/podcore/downloads"));
        assert_eq!(config.sync.concurrency, ConcurrencyConfig::Unbounded);
        assert_eq!(config.sync.lookup_timeout_secs, 10);
        assert_eq!(config.playback.checkpoint_min_position_secs, 10.0);
        assert_eq!(config.playback.progress_interval_ms, 500);
        assert_eq!(config.catalog, CatalogConfig::default());
    }

    #[test]
    fn chunked_concurrency_converts_to_options() {
        let config = SyncConfig {
            concurrency: ConcurrencyConfig::Chunked {
                size: 0,
                delay_ms: 250,
            },
            lookup_timeout_secs: 3,
        };

        let options = SyncOptions::from(&config);

        assert_eq!(
            options.concurrency,
            LookupConcurrency::Chunked {
                size: 1,
                delay: Duration::from_millis(250)
            }
        );
        assert_eq!(options.lookup_timeout, Duration::from_secs(3));
    }

    #[test]
    fn playback_config_converts_to_settings() {
        let settings = PlaybackSettings::from(&PlaybackConfig::default());
        assert_eq!(settings, PlaybackSettings::default());
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(
            Config::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }
}
