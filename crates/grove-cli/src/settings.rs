//! Workspace settings from `.grove/config.json`.

use grove_index::IndexConfig;
use grove_pool::PoolConfig;
use grove_watcher::{StrategyPreset, WatchConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const STATE_DIR_NAME: &str = ".grove";
pub const CONFIG_FILE_NAME: &str = "config.json";

/// What `grove init` writes and every other command reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub version: String,
    /// Extra patterns on top of the built-in ignore set.
    pub ignore: Vec<String>,
    pub strategy: StrategyPreset,
    pub max_files: usize,
    pub max_file_size: u64,
}

impl Default for FileConfig {
    fn default() -> Self {
        let index = IndexConfig::default();
        Self {
            version: "1.0".to_string(),
            ignore: Vec::new(),
            strategy: StrategyPreset::default(),
            max_files: index.cache.max_size,
            max_file_size: index.max_file_size,
        }
    }
}

pub fn state_dir(root: &Path) -> PathBuf {
    root.join(STATE_DIR_NAME)
}

pub fn config_path(root: &Path) -> PathBuf {
    state_dir(root).join(CONFIG_FILE_NAME)
}

/// Reads the workspace config, falling back to defaults when absent.
pub fn load(root: &Path) -> Result<FileConfig, Box<dyn std::error::Error>> {
    let path = config_path(root);
    if !path.exists() {
        return Ok(FileConfig::default());
    }
    debug!("Loading settings from {}", path.display());
    let content = fs::read_to_string(&path)?;
    let config = serde_json::from_str(&content)
        .map_err(|e| format!("invalid {}: {}", path.display(), e))?;
    Ok(config)
}

/// Resolved settings for one run.
pub struct Settings {
    pub watch: WatchConfig,
    pub pool: PoolConfig,
}

impl Settings {
    pub fn resolve(root: &Path, file: &FileConfig) -> Self {
        let mut index = IndexConfig::default();
        index.ignore_patterns.extend(file.ignore.iter().cloned());
        index.cache.max_size = file.max_files;
        index.max_file_size = file.max_file_size;
        index.state_dir = Some(if state_dir(root).is_dir() {
            state_dir(root)
        } else {
            // Not initialized; keep state out of the workspace.
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("grove")
        });

        let watch = WatchConfig {
            strategy: file.strategy,
            ..Default::default()
        };
        let pool = PoolConfig {
            index,
            ..Default::default()
        };
        Self { watch, pool }
    }
}
