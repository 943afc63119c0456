//! Configuration management for sensorhub
//!
//! Handles loading, saving, and validating configuration from TOML files.

mod defaults;

pub use defaults::*;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Line acquisition and ingestion settings
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Template auto-detection settings
    #[serde(default)]
    pub detect: DetectConfig,

    /// Per-template store settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Line sources polled by `sensorhub run`
    #[serde(default)]
    pub sources: Vec<SourceConfig>,

    /// Paths configuration (internal, not user-editable)
    #[serde(skip)]
    pub paths: PathsConfig,
}

/// Ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Delay between polls of an idle source
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// How long a single poll waits for a line
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Lines containing any of these markers are dropped before parsing
    #[serde(default = "default_skip_markers")]
    pub skip_markers: Vec<String>,
}

/// Template detection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectConfig {
    /// Number of lines to sample before scoring
    #[serde(default = "default_detect_sample_lines")]
    pub sample_lines: usize,

    /// Maximum time spent sampling a source
    #[serde(default = "default_detect_timeout_secs")]
    pub timeout_secs: u64,

    /// Minimum score (0.0 - 1.0) for a template to be selected
    #[serde(default = "default_detect_min_score")]
    pub min_score: f32,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Pool size per template store
    #[serde(default = "default_storage_max_connections")]
    pub max_connections: u32,

    /// SQLite busy timeout
    #[serde(default = "default_storage_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

/// A configured line source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Name used in logs and reports (e.g. the port name)
    pub name: String,

    /// Device node, FIFO or file to read; `-` reads stdin
    pub path: PathBuf,

    /// Template bound to this source; detected from sampled lines when absent
    #[serde(default)]
    pub template: Option<String>,
}

/// Internal paths configuration
#[derive(Debug, Clone, Default)]
pub struct PathsConfig {
    /// Base directory for sensorhub data
    pub base_dir: PathBuf,

    /// Path to config file
    pub config_file: PathBuf,

    /// Template documents
    pub templates_dir: PathBuf,

    /// One SQLite file per template
    pub databases_dir: PathBuf,

    /// Template fingerprint changelog
    pub changelog_dir: PathBuf,
}

impl PathsConfig {
    fn under(base: PathBuf, config_file: PathBuf) -> Self {
        Self {
            config_file,
            templates_dir: base.join("templates"),
            databases_dir: base.join("databases"),
            changelog_dir: base.join("changelog"),
            base_dir: base,
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            skip_markers: default_skip_markers(),
        }
    }
}

impl Default for DetectConfig {
    fn default() -> Self {
        Self {
            sample_lines: default_detect_sample_lines(),
            timeout_secs: default_detect_timeout_secs(),
            min_score: default_detect_min_score(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_connections: default_storage_max_connections(),
            busy_timeout_ms: default_storage_busy_timeout_ms(),
        }
    }
}

impl Config {
    /// Get the default base directory (`$SENSORHUB_HOME` or ~/.sensorhub)
    pub fn default_base_dir() -> PathBuf {
        if let Ok(home) = std::env::var("SENSORHUB_HOME") {
            return PathBuf::from(home);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".sensorhub")
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        Self::default_base_dir().join("config.toml")
    }

    /// Initialize paths configuration
    pub fn init_paths(&mut self, base_dir: Option<PathBuf>) {
        let base = base_dir.unwrap_or_else(Self::default_base_dir);
        self.paths = PathsConfig::under(base.clone(), base.join("config.toml"));
    }

    /// Load configuration from a specific file path
    pub fn load(config_path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", config_path);

        if !config_path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                config_path.display()
            )));
        }

        let content = std::fs::read_to_string(config_path)?;
        let mut config: Config = toml::from_str(&content)?;

        let base = config_path.parent().unwrap_or(Path::new(".")).to_path_buf();
        config.paths = PathsConfig::under(base, config_path.to_path_buf());

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific base directory, falling back to defaults
    pub fn load_from(base_dir: Option<PathBuf>) -> Result<Self> {
        let mut config = Config::default();
        config.init_paths(base_dir);

        if config.paths.config_file.exists() {
            debug!("Loading config from {:?}", config.paths.config_file);
            let content = std::fs::read_to_string(&config.paths.config_file)?;
            let mut loaded: Config = toml::from_str(&content)?;
            loaded.paths = config.paths;
            config = loaded;
        } else {
            debug!("No config file found, using defaults");
        }

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.paths.config_file.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&self.paths.config_file, content)?;
        info!("Saved config to {:?}", self.paths.config_file);
        Ok(())
    }

    /// Create the data directories. Failure here is fatal for startup.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            &self.paths.templates_dir,
            &self.paths.databases_dir,
            &self.paths.changelog_dir,
        ] {
            std::fs::create_dir_all(dir).map_err(|e| {
                Error::Config(format!("cannot create {}: {}", dir.display(), e))
            })?;
        }
        Ok(())
    }

    /// Check if sensorhub is initialized (config and templates directory exist)
    pub fn is_initialized(&self) -> bool {
        self.paths.config_file.exists() && self.paths.templates_dir.exists()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.ingest.poll_interval_ms == 0 {
            return Err(Error::Config(
                "ingest.poll_interval_ms must be positive".to_string(),
            ));
        }

        if self.ingest.read_timeout_ms == 0 {
            return Err(Error::Config(
                "ingest.read_timeout_ms must be positive".to_string(),
            ));
        }

        if self.detect.min_score < 0.0 || self.detect.min_score > 1.0 {
            return Err(Error::Config(
                "detect.min_score must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.detect.sample_lines == 0 {
            return Err(Error::Config(
                "detect.sample_lines must be positive".to_string(),
            ));
        }

        if self.storage.max_connections == 0 {
            return Err(Error::Config(
                "storage.max_connections must be positive".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for source in &self.sources {
            if source.name.trim().is_empty() {
                return Err(Error::Config("source name must not be empty".to_string()));
            }
            if !names.insert(source.name.as_str()) {
                return Err(Error::Config(format!(
                    "duplicate source name: {}",
                    source.name
                )));
            }
        }

        Ok(())
    }
}
