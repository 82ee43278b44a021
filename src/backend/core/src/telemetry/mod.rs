//! Telemetry: structured logging and metric descriptions.
//!
//! - **Logging**: JSON/pretty/compact output through `tracing-subscriber`,
//!   with credentials stripped from logged connection URLs
//! - **Metrics**: counters and histograms recorded through the `metrics` facade
//!
//! # Example
//!
//! ```rust,no_run
//! use aegis_core::telemetry::{init_telemetry, LoggingConfig};
//!
//! init_telemetry(&LoggingConfig::default(), "production").expect("Failed to initialize telemetry");
//! ```

pub mod logging;
pub mod metrics;

pub use logging::{
    init_logging, redact_url, LogFormat, LoggingConfig, RedactionConfig, SensitiveFieldRedactor,
};
pub use metrics::{describe_metrics, LifecycleTimer};

/// Initialize logging and register metric descriptions.
///
/// Call once at startup, after a metrics recorder (if any) is installed.
///
/// # Errors
///
/// Returns an error if the log subscriber cannot be installed.
pub fn init_telemetry(logging: &LoggingConfig, environment: &str) -> anyhow::Result<()> {
    init_logging(logging, environment)?;
    describe_metrics();

    ::tracing::debug!(environment = %environment, "Telemetry initialized");
    Ok(())
}
