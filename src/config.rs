use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::constants::*;
use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub input: InputConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub intakes_csv: PathBuf,
    pub outcomes_csv: PathBuf,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            intakes_csv: PathBuf::from(DEFAULT_INTAKES_CSV),
            outcomes_csv: PathBuf::from(DEFAULT_OUTCOMES_CSV),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            path: PathBuf::from(DEFAULT_DB_PATH),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub dir: PathBuf,
    pub file_name: String,
    pub default_directive: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_LOG_DIR),
            file_name: DEFAULT_LOG_FILE.to_string(),
            default_directive: DEFAULT_LOG_DIRECTIVE.to_string(),
        }
    }
}

impl Config {
    /// Load `shelter.toml` from the working directory if present, then apply
    /// environment overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH, false)
    }

    /// Load a config file. A missing file falls back to defaults unless
    /// `required` is set.
    pub fn load_from<P: AsRef<Path>>(path: P, required: bool) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let content = fs::read_to_string(path).map_err(|e| {
                PipelineError::Config(format!(
                    "Failed to read config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
            Self::from_toml_str(&content)?
        } else if required {
            return Err(PipelineError::Config(format!(
                "Config file '{}' not found",
                path.display()
            )));
        } else {
            Self::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply overrides from a key lookup (the process environment in practice).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = get(ENV_INTAKES_CSV) {
            self.input.intakes_csv = PathBuf::from(v);
        }
        if let Some(v) = get(ENV_OUTCOMES_CSV) {
            self.input.outcomes_csv = PathBuf::from(v);
        }
        if let Some(v) = get(ENV_DB_PATH) {
            self.store.path = PathBuf::from(v);
        }
        if let Some(v) = get(ENV_LOG_DIR) {
            self.logging.dir = PathBuf::from(v);
        }
    }
}
