//! # hotplug telemetry
//!
//! Logging initialisation, structured transition events and Prometheus
//! counters for spawned helpers.

pub mod logging;
pub mod metrics;

pub use logging::EventLogger;
pub use metrics::MetricsRecorder;
