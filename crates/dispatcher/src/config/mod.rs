//! Configuration
//!
//! - [`Settings`]: static startup settings, read once
//! - [`DynamicConfig`]: executor knobs and job-type catalog, reloaded every tick

mod dynamic;
mod settings;

pub use dynamic::{
    DynamicConfig, DynamicConfigError, ExecutorConfig, FieldDescriptor, LogLevel,
    ProcessDefinition, PACKAGE_EXTENSION,
};
pub use settings::{Settings, SettingsError};
