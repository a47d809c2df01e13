//! Configuration persistence for the `moe-gate` CLI.
//!
//! Configuration is loaded with the following priority:
//! 1. CLI arguments (highest priority)
//! 2. Config file (~/.config/moe-gate/config.toml, or `--config <path>`)
//! 3. Default values (lowest priority)

use std::fs;
use std::path::{Path, PathBuf};

use moe_gate_core::GateConfig;
use serde::{Deserialize, Serialize};

pub const DEFAULT_D_MODEL: usize = 64;
pub const DEFAULT_N_EXPERT: usize = 2;
pub const DEFAULT_WORLD_SIZE: usize = 4;
pub const DEFAULT_RANK: usize = 0;
pub const DEFAULT_TOKENS: usize = 256;
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Persistent configuration stored in TOML format.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CliConfig {
    /// Token embedding width.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub d_model: Option<usize>,

    /// Experts hosted on each worker.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n_expert: Option<usize>,

    /// Number of workers in the ring.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub world_size: Option<usize>,

    /// Rank of the worker whose gate is inspected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank: Option<usize>,

    /// Tokens in the synthetic batch used by `route`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<usize>,

    /// Default log level when `RUST_LOG` is unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

impl CliConfig {
    /// Get the default config file path.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("moe-gate").join("config.toml"))
    }

    /// Load configuration from the default path, or defaults if absent.
    pub fn load() -> Self {
        Self::default_path()
            .and_then(|path| Self::load_from(&path).ok())
            .unwrap_or_default()
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
        toml::from_str(&content).map_err(ConfigError::Parse)
    }

    /// Save configuration to the default path.
    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = Self::default_path().ok_or(ConfigError::NoConfigDir)?;
        self.save_to(&path)?;
        Ok(path)
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(ConfigError::Io)?;
        }

        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        fs::write(path, content).map_err(ConfigError::Io)?;
        Ok(())
    }

    /// Merge with another config, preferring values from `other`.
    pub fn merge(&mut self, other: &CliConfig) {
        if other.d_model.is_some() {
            self.d_model = other.d_model;
        }
        if other.n_expert.is_some() {
            self.n_expert = other.n_expert;
        }
        if other.world_size.is_some() {
            self.world_size = other.world_size;
        }
        if other.rank.is_some() {
            self.rank = other.rank;
        }
        if other.tokens.is_some() {
            self.tokens = other.tokens;
        }
        if other.log_level.is_some() {
            self.log_level = other.log_level.clone();
        }
    }

    /// Gate shape with defaults filled in. `top_k` is always the gate default.
    pub fn gate_config(&self) -> GateConfig {
        GateConfig::new(
            self.d_model.unwrap_or(DEFAULT_D_MODEL),
            self.n_expert.unwrap_or(DEFAULT_N_EXPERT),
            self.world_size.unwrap_or(DEFAULT_WORLD_SIZE),
        )
    }

    pub fn rank(&self) -> usize {
        self.rank.unwrap_or(DEFAULT_RANK)
    }

    pub fn tokens(&self) -> usize {
        self.tokens.unwrap_or(DEFAULT_TOKENS)
    }

    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or(DEFAULT_LOG_LEVEL)
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading/writing config file.
    Io(std::io::Error),
    /// Error parsing TOML.
    Parse(toml::de::Error),
    /// Error serializing to TOML.
    Serialize(toml::ser::Error),
    /// No config directory available.
    NoConfigDir,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Serialize(e) => write!(f, "Serialize error: {}", e),
            ConfigError::NoConfigDir => write!(f, "No config directory available"),
        }
    }
}

impl std::error::Error for ConfigError {}
