//! Storage configuration for xray.
//!
//! Configuration is JSON, either from a file or assembled from environment
//! variables:
//!
//! ```json
//! { "storage": { "backend": "sqlite", "path": "/var/lib/xray/traces.db" } }
//! ```
//!
//! | variable           | meaning                                  |
//! |--------------------|------------------------------------------|
//! | `XRAY_BACKEND`     | `files` (default) or `sqlite`            |
//! | `XRAY_TRACES_DIR`  | directory for the `files` backend        |
//! | `XRAY_SQLITE_PATH` | database path for the `sqlite` backend   |

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub const DEFAULT_TRACES_DIR: &str = ".xray/traces";
pub const DEFAULT_SQLITE_PATH: &str = ".xray/traces.db";

pub const ENV_BACKEND: &str = "XRAY_BACKEND";
pub const ENV_TRACES_DIR: &str = "XRAY_TRACES_DIR";
pub const ENV_SQLITE_PATH: &str = "XRAY_SQLITE_PATH";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Unknown storage backend: {0}")]
    InvalidBackend(String),
}

/// Where finalized traces are persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StorageConfig {
    /// One JSON file per trace in `dir`.
    Files {
        #[serde(default = "default_traces_dir")]
        dir: PathBuf,
    },
    /// A single SQLite database at `path`.
    Sqlite {
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,
    },
}

fn default_traces_dir() -> PathBuf {
    PathBuf::from(DEFAULT_TRACES_DIR)
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from(DEFAULT_SQLITE_PATH)
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Files {
            dir: default_traces_dir(),
        }
    }
}

/// Top-level xray configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct XRayConfig {
    #[serde(default)]
    pub storage: StorageConfig,
}

impl XRayConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Reads `XRAY_*` variables from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary variable lookup. Unset variables
    /// fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let backend = lookup(ENV_BACKEND).unwrap_or_else(|| "files".to_string());

        let storage = match backend.trim().to_ascii_lowercase().as_str() {
            "files" | "file" => StorageConfig::Files {
                dir: lookup(ENV_TRACES_DIR)
                    .map(PathBuf::from)
                    .unwrap_or_else(default_traces_dir),
            },
            "sqlite" => StorageConfig::Sqlite {
                path: lookup(ENV_SQLITE_PATH)
                    .map(PathBuf::from)
                    .unwrap_or_else(default_sqlite_path),
            },
            _ => return Err(ConfigError::InvalidBackend(backend)),
        };

        Ok(Self { storage })
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
