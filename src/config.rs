//! TOML-based configuration.
//!
//! Supports a config file (strata.toml) with environment variable expansion.
//!
//! Example configuration:
//! ```toml
//! [orm]
//! dialect = "postgres"
//! dirty_checking = "snapshot"
//! lazy_loading = true
//! log_sql = false
//!
//! [connection]
//! url = "${DATABASE_URL}"
//! default_schema = "app"
//! ```

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::sql::dialect::Dialect;

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
}

/// How attribute dirtiness is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirtyChecking {
    /// Compare written values against the loaded snapshot; writing a value
    /// equal to the loaded one leaves the entity clean.
    #[default]
    Snapshot,
    /// No comparison: exactly the explicitly written attributes flush, and
    /// unread lazy attributes are treated as unchanged.
    ExplicitOnly,
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Core ORM behavior.
    pub orm: OrmSettings,

    /// Connection hints handed to the executor integration.
    pub connection: ConnectionSettings,
}

/// Core ORM behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrmSettings {
    /// SQL dialect statements are rendered in.
    pub dialect: Dialect,

    /// Dirty checking mode.
    pub dirty_checking: DirtyChecking,

    /// Whether lazy attributes stay unloaded until first read. When off,
    /// loads select every mapped column eagerly.
    pub lazy_loading: bool,

    /// Log every rendered statement at debug level.
    pub log_sql: bool,
}

impl Default for OrmSettings {
    fn default() -> Self {
        Self {
            dialect: Dialect::default(),
            dirty_checking: DirtyChecking::default(),
            lazy_loading: true,
            log_sql: false,
        }
    }
}

/// Connection configuration (consumed by executor integrations, not by the
/// core itself).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Connection string (supports ${ENV_VAR} expansion).
    pub url: Option<String>,

    /// Default schema for unqualified tables.
    pub default_schema: Option<String>,
}

impl ConnectionSettings {
    /// Get the connection string with environment variables expanded.
    pub fn resolved_url(&self) -> Result<Option<String>, ConfigError> {
        self.url.as_deref().map(expand_env_vars).transpose()
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration from the default locations.
    ///
    /// Searches in order:
    /// 1. Environment variable `STRATA_CONFIG`
    /// 2. `./strata.toml`
    ///
    /// Falls back to defaults when no file is found.
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = env::var("STRATA_CONFIG") {
            return Self::from_file(&path);
        }
        let local = PathBuf::from("strata.toml");
        if local.exists() {
            return Self::from_file(&local);
        }
        Ok(Config::default())
    }
}

/// Expand environment variables in a string.
///
/// Supports `${VAR}` and `$VAR` syntax.
pub fn expand_env_vars(s: &str) -> Result<String, ConfigError> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' {
            if chars.peek() == Some(&'{') {
                chars.next(); // consume '{'
                let mut var_name = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch == '}' {
                        chars.next(); // consume '}'
                        break;
                    }
                    var_name.push(ch);
                    chars.next();
                }
                let value = env::var(&var_name)
                    .map_err(|_| ConfigError::MissingEnvVar(var_name.clone()))?;
                result.push_str(&value);
            } else {
                let mut var_name = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_alphanumeric() || ch == '_' {
                        var_name.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if var_name.is_empty() {
                    result.push('$');
                } else {
                    let value = env::var(&var_name)
                        .map_err(|_| ConfigError::MissingEnvVar(var_name.clone()))?;
                    result.push_str(&value);
                }
            }
        } else {
            result.push(c);
        }
    }

    Ok(result)
}
