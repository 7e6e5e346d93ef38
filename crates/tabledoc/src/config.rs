//! Configuration for tabledoc

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Environment variable that overrides the database path
pub const DATABASE_ENV: &str = "TABLEDOC_DATABASE";

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TabledocConfig {
    /// Storage configuration
    #[serde(default)]
    pub storage: StorageConfig,
    /// Ingestion pipeline configuration
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// CSV decoding configuration
    #[serde(default)]
    pub csv: CsvConfig,
}

impl TabledocConfig {
    /// Load configuration from a TOML file, applying environment overrides
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_toml(&content)?;
        config.apply_env();
        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Default configuration with environment overrides applied
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    fn apply_env(&mut self) {
        if let Ok(path) = std::env::var(DATABASE_ENV) {
            if !path.is_empty() {
                self.storage.database_path = PathBuf::from(path);
            }
        }
    }

    /// Check values that serde cannot
    pub fn validate(&self) -> Result<()> {
        if !self.csv.delimiter.is_ascii() {
            return Err(Error::Config(format!(
                "CSV delimiter must be a single ASCII character, got '{}'",
                self.csv.delimiter
            )));
        }
        if self.pipeline.workers == Some(0) {
            return Err(Error::Config("pipeline.workers must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file
    pub database_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let database_path = dirs::data_local_dir()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
            .join("tabledoc")
            .join("tabledoc.db");

        Self { database_path }
    }
}

/// What to do with a document whose assembly failed after its metadata was stored
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrphanPolicy {
    /// Leave the partial document in place
    #[default]
    Keep,
    /// Delete the partial document, its rows and headers
    Discard,
}

/// Ingestion pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Number of concurrent workers (default: CPU count)
    #[serde(default)]
    pub workers: Option<usize>,
    /// Jobs buffered ahead of the workers
    #[serde(default = "default_channel_capacity")]
    pub job_channel_capacity: usize,
    /// Results buffered ahead of the aggregator
    #[serde(default = "default_channel_capacity")]
    pub result_channel_capacity: usize,
    /// Cancel the whole batch after this many seconds
    #[serde(default)]
    pub batch_timeout_secs: Option<u64>,
    /// Cleanup behaviour for partially assembled documents
    #[serde(default)]
    pub orphan_policy: OrphanPolicy,
}

fn default_channel_capacity() -> usize { 16 }

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: None, // Auto-detect from CPU count
            job_channel_capacity: default_channel_capacity(),
            result_channel_capacity: default_channel_capacity(),
            batch_timeout_secs: None,
            orphan_policy: OrphanPolicy::Keep,
        }
    }
}

impl PipelineConfig {
    /// Effective worker count
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(num_cpus::get).max(1)
    }

    /// Effective job channel capacity
    pub fn job_capacity(&self) -> usize {
        self.job_channel_capacity.max(1)
    }

    /// Effective result channel capacity
    pub fn result_capacity(&self) -> usize {
        self.result_channel_capacity.max(1)
    }

    /// Batch deadline, if configured
    pub fn batch_timeout(&self) -> Option<std::time::Duration> {
        self.batch_timeout_secs.map(std::time::Duration::from_secs)
    }
}

/// CSV decoding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsvConfig {
    /// Field delimiter
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    /// Accept rows whose field count differs from the header row
    #[serde(default)]
    pub flexible_rows: bool,
    /// Trim whitespace around document titles
    #[serde(default = "default_trim_titles")]
    pub trim_titles: bool,
}

fn default_delimiter() -> char { ',' }
fn default_trim_titles() -> bool { true }

impl Default for CsvConfig {
    fn default() -> Self {
        Self {
            delimiter: default_delimiter(),
            flexible_rows: false,
            trim_titles: default_trim_titles(),
        }
    }
}
