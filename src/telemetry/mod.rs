//! Telemetry module for logging and metrics.
//!
//! Provides:
//! - Logging configuration and initialization
//! - Metrics collection for frame classification

mod logging;
mod metrics;

pub use logging::{init_logging, LogConfig};
pub use metrics::{ClassifierMetrics, Counter};
