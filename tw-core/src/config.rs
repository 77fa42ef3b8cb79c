//! Configuration files.
//!
//! Both binaries read a JSON file whose path is given as their first argument. Every field is
//! optional; a missing file means the defaults.

use std::{fs, io, path::Path, path::PathBuf};

use log::info;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config: {0}")]
    Io(#[from] io::Error),
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Reads a JSON config file, falling back to the defaults if it does not exist.
pub fn load_config<T: DeserializeOwned + Default>(path: &Path) -> Result<T, ConfigError> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(serde_json::from_str(&text)?),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            info!("no config at {}, using defaults", path.display());
            Ok(T::default())
        }
        Err(err) => Err(err.into()),
    }
}

/// Default location of the world save: the platform data directory, or the working directory.
pub fn default_save_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tileworld")
        .join("world.bin")
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the server listens on.
    pub address: String,
    /// World width in blocks, a multiple of 16.
    pub width: u16,
    /// World height in blocks, a multiple of 16.
    pub height: u16,
    pub seed: u64,
    pub save_path: PathBuf,
    /// Target duration of one tick in milliseconds.
    pub tick_ms: u64,
    /// Save and exit after this many ticks. Runs forever when unset.
    pub max_ticks: Option<u64>,
    /// `log` level filter, e.g. "info" or "debug".
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0:33770".to_string(),
            width: 4400,
            height: 1200,
            seed: 0,
            save_path: default_save_path(),
            tick_ms: 50,
            max_ticks: None,
            log_level: "info".to_string(),
        }
    }
}
