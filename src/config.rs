use anyhow::{Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default worker pool size for the backup pipeline
pub const DEFAULT_PARALLEL: usize = 8;

/// Optional per-user defaults for repovault
///
/// Loaded from the XDG config location when present; every value can be
/// overridden on the command line. Missing file means plain defaults.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    /// GitHub token; flag and environment take precedence
    pub token: Option<String>,

    /// Default destination root for mirror trees
    pub destination: Option<String>,

    /// Default worker pool size
    pub parallel: Option<usize>,

    /// Fetch LFS objects after each clone
    #[serde(default)]
    pub lfs: bool,

    /// Delete hosting-service pull refs after each clone
    #[serde(default)]
    pub clean_refs: bool,

    /// Default exclusion patterns
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Default match patterns
    #[serde(default, rename = "match")]
    pub match_patterns: Vec<String>,
}

impl Config {
    /// Load from the default location, falling back to plain defaults
    /// when no config file exists
    pub fn load_or_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        Ok(config)
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to get user config directory")?;

        Ok(config_dir.join("repovault").join("config.yml"))
    }

    /// Destination with environment variables and `~` expanded
    pub fn expanded_destination(&self) -> Result<Option<PathBuf>> {
        match &self.destination {
            Some(raw) => {
                let expanded = shellexpand::full(raw)
                    .context("Failed to expand destination path")?
                    .into_owned();
                Ok(Some(PathBuf::from(expanded)))
            }
            None => Ok(None),
        }
    }
}

/// Parse a user-supplied parallelism value
///
/// Non-numeric or non-positive input silently falls back to the default;
/// the flag was never meant to be a hard validation surface.
pub fn parse_parallel(raw: Option<&str>) -> usize {
    raw.and_then(|value| value.trim().parse::<usize>().ok())
        .filter(|&n| n > 0)
        .unwrap_or(DEFAULT_PARALLEL)
}
