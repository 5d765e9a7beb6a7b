//! ## hotplug-cli
//! **Offline harness for the device-event executor**
//!
//! Expands templates, runs helpers under the supervisor and replays a full
//! device transition against YAML fixtures, with node, netlink and builtin
//! operations only logged.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use hotplug_config::HotplugConfig;
use hotplug_telemetry::{EventLogger, MetricsRecorder};

mod commands;
mod fixture;

use commands::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => HotplugConfig::load_from_path(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => HotplugConfig::load()?,
    };
    EventLogger::init(&config.telemetry.log_level);
    let metrics = Arc::new(MetricsRecorder::new()?);

    commands::run_command(cli.command, &config, metrics).await
}
