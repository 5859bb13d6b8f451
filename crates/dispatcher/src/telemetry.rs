// Logging setup
//
// Console logging through tracing-subscriber. The level filter sits behind a
// reload layer so `executor_config.log_level` can change it while running.
// An explicit `RUST_LOG` pins the filter and dynamic changes are ignored.

use tracing_subscriber::{
    fmt, layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter, Registry,
};

use crate::config::LogLevel;

const DEFAULT_FILTER: &str = "info";

// ============================================================================
// Telemetry Configuration
// ============================================================================

/// Logging configuration
#[derive(Debug, Clone, Default)]
pub struct TelemetryConfig {
    /// Filter directive (e.g., "info", "jobdispatch=debug"); pins the level when set
    pub log_filter: Option<String>,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl TelemetryConfig {
    /// Create configuration from environment variables
    ///
    /// - `RUST_LOG`: log filter, overrides the dynamic log level
    /// - `LOG_FORMAT`: `json` for structured output
    pub fn from_env() -> Self {
        Self {
            log_filter: std::env::var("RUST_LOG").ok().filter(|v| !v.is_empty()),
            json: std::env::var("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        }
    }
}

// ============================================================================
// Runtime Level Control
// ============================================================================

/// Changes the active log level after initialization
#[derive(Clone)]
pub struct LogLevelControl {
    handle: reload::Handle<EnvFilter, Registry>,
    pinned: bool,
}

impl LogLevelControl {
    /// Switch to `level` unless the filter was pinned at startup
    pub fn apply(&self, level: LogLevel) {
        if self.pinned {
            return;
        }
        if let Err(e) = self.handle.reload(EnvFilter::new(level.as_filter())) {
            tracing::warn!(error = %e, "Failed to change log level");
        }
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned
    }
}

// ============================================================================
// Initialization
// ============================================================================

/// Install the global subscriber
///
/// # Example
///
/// ```ignore
/// use jobdispatch::telemetry::{init_telemetry, TelemetryConfig};
///
/// let log_control = init_telemetry(TelemetryConfig::from_env());
/// ```
pub fn init_telemetry(config: TelemetryConfig) -> LogLevelControl {
    let pinned = config.log_filter.is_some();
    let filter = config
        .log_filter
        .as_ref()
        .and_then(|f| EnvFilter::try_new(f).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER));
    let (filter_layer, handle) = reload::Layer::new(filter);

    let registry = tracing_subscriber::registry().with(filter_layer);
    if config.json {
        registry
            .with(fmt::layer().json().with_target(true))
            .init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }

    LogLevelControl { handle, pinned }
}
