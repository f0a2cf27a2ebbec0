//! Configuration for portal-gamification

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::GamificationError;

/// Default data directory
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("portal-gamification")
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory for the database and uploaded objects
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// SQLite file name, relative to `data_dir`
    #[serde(default = "default_database_file")]
    pub database_file: String,

    /// HTTP API port
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Base URL clients use to reach this service; prefixes object URLs
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    /// Maximum pooled database connections
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// Upper bound on a single object-storage call (delete or lookup)
    #[serde(default = "default_object_delete_timeout")]
    pub object_delete_timeout_secs: u64,

    /// Largest accepted upload in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
}

fn default_database_file() -> String {
    "gamification.db".to_string()
}

fn default_http_port() -> u16 {
    8095
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_public_base_url() -> String {
    format!("http://localhost:{}", default_http_port())
}

fn default_pool_size() -> u32 {
    8
}

fn default_object_delete_timeout() -> u64 {
    10
}

fn default_max_upload_bytes() -> u64 {
    25 * 1024 * 1024
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            database_file: default_database_file(),
            http_port: default_http_port(),
            bind_address: default_bind_address(),
            public_base_url: default_public_base_url(),
            pool_size: default_pool_size(),
            object_delete_timeout_secs: default_object_delete_timeout(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, GamificationError> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| GamificationError::Config(e.to_string()))
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), GamificationError> {
        let content = toml::to_string_pretty(self).map_err(|e| GamificationError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_file)
    }

    /// Directory holding uploaded objects
    pub fn objects_dir(&self) -> PathBuf {
        self.data_dir.join("objects")
    }

    pub fn config_path(&self) -> PathBuf {
        self.data_dir.join("config.toml")
    }
}
