//! Dynamic configuration document
//!
//! Reloaded in full at the start of every tick. A reload either produces a complete,
//! validated [`DynamicConfig`] or an error; values are never merged field by field.
//!
//! ```yaml
//! executor_config:
//!   min_supported_version: 2
//!   max_concurrent_jobs: 4
//!   polling_interval: 5
//!   log_level: INFO
//! processes:
//!   - type: export
//!     entry_point: run_export
//!     description: Export statistics as CSV
//!     inputs:
//!       - name: start_date
//!         type: date
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// File extension of plugin packages named by convention
pub const PACKAGE_EXTENSION: &str = "plugin";

const DEFAULT_CANCEL_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Errors produced by a configuration reload
#[derive(Debug, thiserror::Error)]
pub enum DynamicConfigError {
    /// Source could not be read
    #[error("cannot read dynamic config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Source is not a well-formed document
    #[error("malformed dynamic config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// Document parsed but carries unusable values
    #[error("invalid dynamic config: {0}")]
    Invalid(String),
}

/// Log level names accepted by `executor_config.log_level`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    /// `tracing` filter directive for this level
    pub fn as_filter(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warn",
            Self::Error | Self::Critical => "error",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(Self::Debug),
            "INFO" => Ok(Self::Info),
            "WARNING" | "WARN" => Ok(Self::Warning),
            "ERROR" => Ok(Self::Error),
            "CRITICAL" => Ok(Self::Critical),
            _ => Err(format!("unknown log level '{}'", s)),
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(value: String) -> Result<Self, String> {
        value.parse()
    }
}

/// Tuning knobs for the dispatcher
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExecutorConfig {
    /// Instances compiled with a lower version drain and exit
    #[serde(alias = "min_supported_executor_version")]
    pub min_supported_version: u32,

    /// Concurrent job slots of one instance; 0 pauses claiming
    #[serde(alias = "max_concurrent_processes")]
    pub max_concurrent_jobs: usize,

    /// Sleep between ticks
    #[serde(with = "duration_secs")]
    pub polling_interval: Duration,

    pub log_level: LogLevel,

    /// How long a cancelled plugin may keep running before it is killed
    #[serde(default = "default_cancel_grace_period", with = "duration_secs")]
    pub cancel_grace_period: Duration,
}

fn default_cancel_grace_period() -> Duration {
    DEFAULT_CANCEL_GRACE_PERIOD
}

/// Free-form descriptor of a declared input or output field
pub type FieldDescriptor = BTreeMap<String, serde_yaml::Value>;

/// Catalog entry describing one job type
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProcessDefinition {
    /// Catalog key, matched against the job's `type`
    #[serde(rename = "type")]
    pub job_type: String,

    /// Entry point passed to the package on invocation
    #[serde(alias = "class_name")]
    pub entry_point: String,

    /// Package file name; `<type>.plugin` when absent
    #[serde(default, alias = "jar_name")]
    pub package_name: Option<String>,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub inputs: Vec<FieldDescriptor>,

    #[serde(default)]
    pub outputs: Vec<FieldDescriptor>,
}

impl ProcessDefinition {
    /// File name of the package inside the plugin directory
    pub fn package_file_name(&self) -> String {
        match &self.package_name {
            Some(name) => name.clone(),
            None => format!("{}.{}", self.job_type, PACKAGE_EXTENSION),
        }
    }
}

/// Complete dynamic configuration: executor knobs plus the job-type catalog
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DynamicConfig {
    pub executor_config: ExecutorConfig,

    #[serde(default)]
    pub processes: Vec<ProcessDefinition>,
}

impl DynamicConfig {
    /// Read, parse and validate the document at `path`
    pub async fn load(path: &Path) -> Result<Self, DynamicConfigError> {
        let content =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|source| DynamicConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
        Self::from_yaml_str(&content)
    }

    /// Parse and validate a YAML document
    pub fn from_yaml_str(content: &str) -> Result<Self, DynamicConfigError> {
        let config: DynamicConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Look up a job type in the catalog
    pub fn process(&self, job_type: &str) -> Option<&ProcessDefinition> {
        self.processes.iter().find(|p| p.job_type == job_type)
    }

    fn validate(&self) -> Result<(), DynamicConfigError> {
        let executor = &self.executor_config;
        if executor.polling_interval.is_zero() {
            return Err(DynamicConfigError::Invalid(
                "polling_interval must be at least 1 second".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for process in &self.processes {
            if process.job_type.trim().is_empty() {
                return Err(DynamicConfigError::Invalid(
                    "process type must not be empty".to_string(),
                ));
            }
            if !seen.insert(process.job_type.as_str()) {
                return Err(DynamicConfigError::Invalid(format!(
                    "duplicate process type '{}'",
                    process.job_type
                )));
            }
        }
        Ok(())
    }
}

/// Serde support for Duration as whole seconds
mod duration_secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
executor_config:
  min_supported_version: 3
  max_concurrent_jobs: 4
  polling_interval: 5
  log_level: warning
processes:
  - type: export
    entry_point: run_export
    description: Export statistics
    inputs:
      - name: start_date
        type: date
  - type: report
    entry_point: generate
    package_name: reports-v2.plugin
"#;

    #[test]
    fn test_parse_sample_document() {
        let config = DynamicConfig::from_yaml_str(SAMPLE).unwrap();
        let executor = &config.executor_config;
        assert_eq!(executor.min_supported_version, 3);
        assert_eq!(executor.max_concurrent_jobs, 4);
        assert_eq!(executor.polling_interval, Duration::from_secs(5));
        assert_eq!(executor.log_level, LogLevel::Warning);
        assert_eq!(executor.cancel_grace_period, DEFAULT_CANCEL_GRACE_PERIOD);

        assert_eq!(config.processes.len(), 2);
        let export = config.process("export").unwrap();
        assert_eq!(export.entry_point, "run_export");
        assert_eq!(export.inputs.len(), 1);
        assert!(export.outputs.is_empty());
        assert!(config.process("missing").is_none());
    }

    #[test]
    fn test_package_file_name_defaults_to_type() {
        let config = DynamicConfig::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(
            config.process("export").unwrap().package_file_name(),
            "export.plugin"
        );
        assert_eq!(
            config.process("report").unwrap().package_file_name(),
            "reports-v2.plugin"
        );
    }

    #[test]
    fn test_legacy_key_names_are_accepted() {
        let config = DynamicConfig::from_yaml_str(
            r#"
executor_config:
  min_supported_executor_version: 1
  max_concurrent_processes: 2
  polling_interval: 1
  log_level: CRITICAL
processes:
  - type: test
    class_name: com.example.TestProcess
    jar_name: test.jar
"#,
        )
        .unwrap();
        assert_eq!(config.executor_config.min_supported_version, 1);
        assert_eq!(config.executor_config.max_concurrent_jobs, 2);
        assert_eq!(config.executor_config.log_level.as_filter(), "error");
        let test = config.process("test").unwrap();
        assert_eq!(test.entry_point, "com.example.TestProcess");
        assert_eq!(test.package_file_name(), "test.jar");
    }

    #[test]
    fn test_missing_executor_field_is_rejected() {
        let result = DynamicConfig::from_yaml_str(
            r#"
executor_config:
  max_concurrent_jobs: 2
  polling_interval: 1
  log_level: INFO
"#,
        );
        assert!(matches!(result, Err(DynamicConfigError::Parse(_))));
    }

    #[test]
    fn test_unknown_log_level_is_rejected() {
        let result = DynamicConfig::from_yaml_str(
            r#"
executor_config:
  min_supported_version: 1
  max_concurrent_jobs: 2
  polling_interval: 1
  log_level: VERBOSE
"#,
        );
        assert!(matches!(result, Err(DynamicConfigError::Parse(_))));
    }

    #[test]
    fn test_duplicate_types_are_rejected() {
        let result = DynamicConfig::from_yaml_str(
            r#"
executor_config:
  min_supported_version: 1
  max_concurrent_jobs: 2
  polling_interval: 1
  log_level: INFO
processes:
  - type: export
    entry_point: a
  - type: export
    entry_point: b
"#,
        );
        match result {
            Err(DynamicConfigError::Invalid(msg)) => assert!(msg.contains("export")),
            other => panic!("expected Invalid, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_capacity_is_accepted() {
        let config = DynamicConfig::from_yaml_str(
            r#"
executor_config:
  min_supported_version: 1
  max_concurrent_jobs: 0
  polling_interval: 1
  log_level: INFO
"#,
        )
        .unwrap();
        assert_eq!(config.executor_config.max_concurrent_jobs, 0);
    }

    #[test]
    fn test_zero_polling_interval_is_rejected() {
        let result = DynamicConfig::from_yaml_str(
            r#"
executor_config:
  min_supported_version: 1
  max_concurrent_jobs: 2
  polling_interval: 0
  log_level: INFO
"#,
        );
        assert!(matches!(result, Err(DynamicConfigError::Invalid(_))));
    }

    #[test]
    fn test_log_level_try_from_string() {
        assert_eq!(LogLevel::try_from("error".to_string()), Ok(LogLevel::Error));
        assert!(LogLevel::try_from("loud".to_string()).is_err());
    }

    #[test]
    fn test_demo_document_is_valid() {
        let config =
            DynamicConfig::from_yaml_str(include_str!("../../../../demos/dynamic.yaml")).unwrap();
        assert_eq!(config.executor_config.cancel_grace_period, Duration::from_secs(10));
        assert_eq!(
            config.process("sleep").unwrap().package_file_name(),
            "export.plugin"
        );
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = DynamicConfig::load(&dir.path().join("absent.yaml")).await;
        assert!(matches!(result, Err(DynamicConfigError::Io { .. })));
    }
}
