//! ## hotplug-telemetry::logging
//! **Structured logging with tracing and OpenTelemetry attributes**
//!
//! `RUST_LOG` takes precedence over the configured level.

use opentelemetry::KeyValue;
use tracing::{info_span, Instrument};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Clone)]
pub struct EventLogger;

impl EventLogger {
    pub fn init(level: &str) {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
        // A second initialisation (tests, embedding) keeps the first subscriber.
        let _ = fmt()
            .with_env_filter(filter)
            .with_thread_names(true)
            .with_span_events(FmtSpan::CLOSE)
            .try_init();
    }

    /// Emits one structured record describing a completed transition step.
    pub async fn log_event(event_type: &str, metadata: Vec<KeyValue>) {
        let span = info_span!("device_event", event_type = event_type, otel.kind = "INTERNAL");

        async {
            tracing::info!(metadata = ?metadata, "Device event processed");
        }
        .instrument(span)
        .await
    }
}
