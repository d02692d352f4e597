//! Telemetry: structured logging and metric descriptions.
//!
//! # Example
//!
//! ```rust,no_run
//! use waypoint_core::telemetry::{init_telemetry, LoggingConfig};
//!
//! init_telemetry(&LoggingConfig::default()).expect("Failed to initialize telemetry");
//! ```

pub mod logging;
pub mod metrics;

pub use self::logging::{init_logging, LogFormat, LoggingConfig, SpanEventConfig};
pub use self::metrics::{describe_metrics, METRIC_NAMES};

/// Install logging and register metric descriptions.
pub fn init_telemetry(config: &LoggingConfig) -> anyhow::Result<()> {
    init_logging(config)?;
    describe_metrics();
    ::tracing::debug!(format = ?config.format, "Telemetry initialized");
    Ok(())
}
