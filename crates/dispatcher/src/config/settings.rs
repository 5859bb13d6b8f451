//! Static startup settings
//!
//! Read once from a flat `KEY=VALUE` file whose path is the only command-line
//! argument. Any missing or empty required key is fatal.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Startup configuration errors
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("cannot read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: dotenvy::Error,
    },

    #[error("missing setting: {0}")]
    Missing(&'static str),

    #[error("empty setting: {0}")]
    Empty(&'static str),

    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

/// Settings fixed for the lifetime of the process
#[derive(Clone)]
pub struct Settings {
    /// Root of the per-job working directories
    pub jobs_dir: PathBuf,
    /// Directory holding one plugin package per job type
    pub plugins_dir: PathBuf,
    /// Dynamic configuration document, reloaded every tick
    pub dynamic_config_file: PathBuf,
    pub database_url: String,
    pub database_max_connections: u32,
    /// How long a Ctrl-C shutdown waits for cancelled jobs to finish
    pub shutdown_timeout: Duration,
}

impl Settings {
    /// Load settings from a `KEY=VALUE` file
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let read_error = |source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        };

        let mut values = HashMap::new();
        for item in dotenvy::from_path_iter(path).map_err(read_error)? {
            let (key, value) = item.map_err(read_error)?;
            values.insert(key, value);
        }
        Self::from_values(&values)
    }

    /// Build settings from already parsed key/value pairs
    pub fn from_values(values: &HashMap<String, String>) -> Result<Self, SettingsError> {
        let database_max_connections = match optional(values, "DATABASE_MAX_CONNECTIONS") {
            Some(raw) => parse(raw, "DATABASE_MAX_CONNECTIONS")?,
            None => DEFAULT_DATABASE_MAX_CONNECTIONS,
        };
        let shutdown_timeout = match optional(values, "SHUTDOWN_TIMEOUT_SECONDS") {
            Some(raw) => Duration::from_secs(parse(raw, "SHUTDOWN_TIMEOUT_SECONDS")?),
            None => DEFAULT_SHUTDOWN_TIMEOUT,
        };

        Ok(Self {
            jobs_dir: PathBuf::from(required(values, "JOBS_DIR")?),
            plugins_dir: PathBuf::from(required(values, "PLUGINS_DIR")?),
            dynamic_config_file: PathBuf::from(required(values, "DYNAMIC_CONFIG_FILE")?),
            database_url: required(values, "DATABASE_URL")?.to_string(),
            database_max_connections,
            shutdown_timeout,
        })
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("jobs_dir", &self.jobs_dir)
            .field("plugins_dir", &self.plugins_dir)
            .field("dynamic_config_file", &self.dynamic_config_file)
            .field("database_url", &"<redacted>")
            .field("database_max_connections", &self.database_max_connections)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish()
    }
}

fn required<'a>(
    values: &'a HashMap<String, String>,
    key: &'static str,
) -> Result<&'a str, SettingsError> {
    let value = values.get(key).ok_or(SettingsError::Missing(key))?.trim();
    if value.is_empty() {
        return Err(SettingsError::Empty(key));
    }
    Ok(value)
}

fn optional<'a>(values: &'a HashMap<String, String>, key: &'static str) -> Option<&'a str> {
    values
        .get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

fn parse<T: std::str::FromStr>(raw: &str, key: &'static str) -> Result<T, SettingsError> {
    raw.parse().map_err(|_| SettingsError::Invalid {
        key,
        value: raw.to_string(),
    })
}
