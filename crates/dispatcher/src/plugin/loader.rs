//! Resolution of job types to runnable processes

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use super::{PackagedProcess, Process, UndefinedProcess};
use crate::config::DynamicConfig;

/// A declared job type whose package cannot be used
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("package for process type '{job_type}' not found or not readable: {path}")]
    PackageNotFound { job_type: String, path: PathBuf },

    #[error("package for process type '{job_type}' not readable: {path}: {source}")]
    PackageUnreadable {
        job_type: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("package {path} for process type '{job_type}' is not executable")]
    NotInvocable { job_type: String, path: PathBuf },

    #[error("invalid package name '{package}' for process type '{job_type}'")]
    InvalidPackageName { job_type: String, package: String },

    #[error("invalid entry point '{entry_point}' for process type '{job_type}'")]
    InvalidEntryPoint {
        job_type: String,
        entry_point: String,
    },
}

/// Maps a job type to the process that runs it
///
/// Resolution happens per claimed job against the configuration of the current
/// tick, so catalog edits apply to the next launch without a restart.
#[async_trait]
pub trait ProcessResolver: Send + Sync + 'static {
    async fn resolve(
        &self,
        job_type: &str,
        config: &DynamicConfig,
    ) -> Result<Arc<dyn Process>, LoadError>;
}

/// Resolves job types to executable packages in a plugin directory
#[derive(Debug, Clone)]
pub struct PluginLoader {
    plugins_dir: PathBuf,
}

impl PluginLoader {
    pub fn new(plugins_dir: impl Into<PathBuf>) -> Self {
        Self {
            plugins_dir: plugins_dir.into(),
        }
    }
}

#[async_trait]
impl ProcessResolver for PluginLoader {
    #[instrument(skip(self, config))]
    async fn resolve(
        &self,
        job_type: &str,
        config: &DynamicConfig,
    ) -> Result<Arc<dyn Process>, LoadError> {
        let Some(definition) = config.process(job_type) else {
            warn!(job_type, "Process type not declared in catalog");
            return Ok(Arc::new(UndefinedProcess));
        };

        let package = definition.package_file_name();
        if !is_plain_file_name(&package) {
            return Err(LoadError::InvalidPackageName {
                job_type: job_type.to_string(),
                package,
            });
        }
        if !is_valid_entry_point(&definition.entry_point) {
            return Err(LoadError::InvalidEntryPoint {
                job_type: job_type.to_string(),
                entry_point: definition.entry_point.clone(),
            });
        }

        let path = self.plugins_dir.join(&package);
        info!(job_type, path = %path.display(), "Loading process definition");

        let not_found = || LoadError::PackageNotFound {
            job_type: job_type.to_string(),
            path: path.clone(),
        };
        let metadata = tokio::fs::metadata(&path).await.map_err(|_| not_found())?;
        if !metadata.is_file() {
            return Err(not_found());
        }
        tokio::fs::File::open(&path)
            .await
            .map_err(|source| LoadError::PackageUnreadable {
                job_type: job_type.to_string(),
                path: path.clone(),
                source,
            })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if metadata.permissions().mode() & 0o111 == 0 {
                return Err(LoadError::NotInvocable {
                    job_type: job_type.to_string(),
                    path,
                });
            }
        }

        debug!(job_type, entry_point = %definition.entry_point, "Process package resolved");
        Ok(Arc::new(PackagedProcess::new(
            path,
            definition.entry_point.clone(),
            config.executor_config.cancel_grace_period,
        )))
    }
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && Path::new(name).file_name().and_then(|n| n.to_str()) == Some(name)
}

fn is_valid_entry_point(entry_point: &str) -> bool {
    !entry_point.is_empty()
        && !entry_point.starts_with('-')
        && entry_point
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':' | '-'))
}
