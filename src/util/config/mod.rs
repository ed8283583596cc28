//! Instantiation engine configuration
//!
//! The engine reads the `[mono]` table of a project file (`yaoxiang.toml`) or a
//! stand-alone file containing the same keys at the top level.
//!
//! # Configuration hierarchy
//!
//! ```text
//! Priority (high → low):
//! 1. CLI arguments
//! 2. Project-level (yaoxiang.toml, [mono] table)
//! 3. Default values
//! ```
//!
//! # Usage
//!
//! ```rust
//! use yaoxiang_mono::util::config::MonoConfig;
//!
//! let config = MonoConfig::from_toml_str("max_instantiation_depth = 32").unwrap();
//! assert_eq!(config.max_instantiation_depth, 32);
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::util::logger::LogLevel;

/// Project file name searched by [`load_project_config`]
pub const PROJECT_FILE: &str = "yaoxiang.toml";

/// Configuration of one instantiation run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MonoConfig {
    /// Maximum nesting of recursive instantiations before the run is aborted
    pub max_instantiation_depth: usize,
    /// Attach every applicable extension as soon as a concrete type exists
    pub eager_extensions: bool,
    /// Build the dispatch map of every concrete type during `instantiate_package`
    pub eager_dispatch: bool,
    /// Check each fresh instance for references into generic templates
    pub verify_instances: bool,
    /// Compare shape fingerprints of restored instances against their templates
    pub verify_restored: bool,
    /// Log level used by the binary
    pub log_level: LogLevel,
}

impl Default for MonoConfig {
    fn default() -> Self {
        Self {
            max_instantiation_depth: 64,
            eager_extensions: false,
            eager_dispatch: false,
            verify_instances: false,
            verify_restored: true,
            log_level: LogLevel::Info,
        }
    }
}

/// Project file layout: only the `[mono]` table is read
#[derive(Debug, Default, Deserialize)]
struct ProjectFile {
    #[serde(default)]
    mono: Option<MonoConfig>,
}

impl MonoConfig {
    /// Parse a config from TOML text
    ///
    /// Accepts either a project file with a `[mono]` table or the bare keys.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let value: toml::Value = toml::from_str(content).map_err(ConfigError::ParseError)?;
        if value.get("mono").is_some() {
            let project: ProjectFile = value.try_into().map_err(ConfigError::ParseError)?;
            return Ok(project.mono.unwrap_or_default());
        }
        value.try_into().map_err(ConfigError::ParseError)
    }

    /// Load a config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(ConfigError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// Serialize as a stand-alone config file
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::SerializeError)
    }
}

/// Load `yaoxiang.toml` from `dir`, falling back to defaults if it does not exist
pub fn load_project_config(dir: &Path) -> Result<MonoConfig, ConfigError> {
    let path = dir.join(PROJECT_FILE);
    if !path.exists() {
        return Ok(MonoConfig::default());
    }
    MonoConfig::load(&path)
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(std::io::Error),
    #[error("Config parse error: {0}")]
    ParseError(toml::de::Error),
    #[error("Config serialize error: {0}")]
    SerializeError(toml::ser::Error),
}
