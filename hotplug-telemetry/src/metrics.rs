//! ## hotplug-telemetry::metrics
//! **Prometheus counters for transitions and spawned helpers**

use prometheus::{Counter, Encoder, Histogram, HistogramOpts, Registry, TextEncoder};

#[derive(Debug, Clone)]
pub struct MetricsRecorder {
    pub registry: Registry,
    pub processed_events: Counter,
    pub spawned_commands: Counter,
    pub spawn_failures: Counter,
    pub spawn_timeouts: Counter,
    pub failed_exits: Counter,
    pub command_duration: Histogram,
}

impl MetricsRecorder {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let processed_events =
            Counter::new("hotplug_events_total", "Device transitions processed")?;
        let spawned_commands =
            Counter::new("hotplug_spawned_total", "External commands started")?;
        let spawn_failures = Counter::new(
            "hotplug_spawn_failures_total",
            "External commands that could not be started or waited for",
        )?;
        let spawn_timeouts = Counter::new(
            "hotplug_spawn_timeouts_total",
            "External commands killed after their deadline",
        )?;
        let failed_exits = Counter::new(
            "hotplug_failed_exits_total",
            "External commands that exited unsuccessfully",
        )?;
        let command_duration = Histogram::with_opts(
            HistogramOpts::new(
                "hotplug_command_duration_seconds",
                "Wall time of external commands",
            )
            .buckets(vec![0.01, 0.1, 1.0, 10.0, 60.0, 180.0]),
        )?;

        registry.register(Box::new(processed_events.clone()))?;
        registry.register(Box::new(spawned_commands.clone()))?;
        registry.register(Box::new(spawn_failures.clone()))?;
        registry.register(Box::new(spawn_timeouts.clone()))?;
        registry.register(Box::new(failed_exits.clone()))?;
        registry.register(Box::new(command_duration.clone()))?;

        Ok(Self {
            registry,
            processed_events,
            spawned_commands,
            spawn_failures,
            spawn_timeouts,
            failed_exits,
            command_duration,
        })
    }

    pub fn gather_metrics(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::<u8>::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    pub fn inc_processed_events(&self) {
        self.processed_events.inc();
    }
}
