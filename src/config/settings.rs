//! TOML-based configuration for Meridian.
//!
//! Supports a config file (meridian.toml) with environment variable expansion.
//!
//! Example configuration:
//! ```toml
//! manifest_path = "${MERIDIAN_HOME}/semantic_manifest.json"
//!
//! [planner]
//! max_entity_links = 3
//! dialect = "snowflake"
//!
//! [execution]
//! max_concurrency = 8
//! ```

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::sql::dialect::Dialect;

/// Error type for settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Path of the JSON semantic manifest (supports ${ENV_VAR} expansion).
    pub manifest_path: Option<String>,

    /// Query planning configuration.
    pub planner: PlannerSettings,

    /// Plan execution configuration.
    pub execution: ExecutionSettings,
}

/// Query planning configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PlannerSettings {
    /// Maximum number of entity links (join hops) when resolving group-by items.
    pub max_entity_links: usize,

    /// SQL dialect rendered by the planner.
    pub dialect: Dialect,
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self {
            max_entity_links: 3,
            dialect: Dialect::DuckDb,
        }
    }
}

/// Plan execution configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExecutionSettings {
    /// Maximum number of tasks running against the warehouse at once.
    pub max_concurrency: usize,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self { max_concurrency: 4 }
    }
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate settings from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, SettingsError> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from the default config file locations.
    ///
    /// Searches in order:
    /// 1. Environment variable `MERIDIAN_CONFIG`
    /// 2. `./meridian.toml`
    pub fn load() -> Result<Self, SettingsError> {
        if let Ok(path) = env::var("MERIDIAN_CONFIG") {
            return Self::from_file(&path);
        }

        let local_config = PathBuf::from("meridian.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        Ok(Settings::default())
    }

    /// Reject values the planner and executor cannot work with.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.planner.max_entity_links == 0 {
            return Err(SettingsError::InvalidConfig(
                "planner.max_entity_links must be at least 1".to_string(),
            ));
        }
        if self.execution.max_concurrency == 0 {
            return Err(SettingsError::InvalidConfig(
                "execution.max_concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// The manifest path with environment variables expanded.
    pub fn resolved_manifest_path(&self) -> Result<Option<PathBuf>, SettingsError> {
        self.manifest_path
            .as_deref()
            .map(|p| expand_env_vars(p).map(PathBuf::from))
            .transpose()
    }
}

/// Expand environment variables in a string.
///
/// Supports `${VAR}` and `$VAR` syntax.
pub fn expand_env_vars(s: &str) -> Result<String, SettingsError> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            result.push(c);
            continue;
        }

        let mut var_name = String::new();
        if chars.peek() == Some(&'{') {
            chars.next();
            for ch in chars.by_ref() {
                if ch == '}' {
                    break;
                }
                var_name.push(ch);
            }
        } else {
            while let Some(ch) = chars.next_if(|ch| ch.is_alphanumeric() || *ch == '_') {
                var_name.push(ch);
            }
            if var_name.is_empty() {
                // Lone $, keep it
                result.push('$');
                continue;
            }
        }

        let value =
            env::var(&var_name).map_err(|_| SettingsError::MissingEnvVar(var_name.clone()))?;
        result.push_str(&value);
    }

    Ok(result)
}
