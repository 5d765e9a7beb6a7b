use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use hotplug_config::HotplugConfig;
use hotplug_core::{Device, Event};
use hotplug_engine::dry_run::{DryRunBuiltins, DryRunNetlink, DryRunNodes, Journal};
use hotplug_engine::{EventExecutor, RuleSet, StaticRules};
use hotplug_format::{expand, PATH_SIZE};
use hotplug_spawn::{CaptureBuffer, Spawner};
use hotplug_telemetry::MetricsRecorder;
use tracing::info;

use crate::fixture::DeviceFixture;

#[derive(Parser, Debug)]
#[command(name = "hotplugctl", version, about)]
pub struct Cli {
    /// Configuration file; defaults to config/hotplug.yaml when present
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Expand a rule template against a device fixture
    Expand(ExpandArgs),
    /// Run a command line under the supervisor for a device fixture
    Spawn(SpawnArgs),
    /// Replay a full device transition with a fixed rule outcome
    Test(TestArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ExpandArgs {
    #[arg(short, long)]
    pub device: PathBuf,
    /// Output of a previous PROGRAM, for `$result`
    #[arg(long)]
    pub result: Option<String>,
    #[arg(long, default_value_t = PATH_SIZE)]
    pub capacity: usize,
    /// Collapse whitespace in substituted values
    #[arg(long)]
    pub replace_whitespace: bool,
    pub template: String,
}

#[derive(Args, Debug, Clone)]
pub struct SpawnArgs {
    #[arg(short, long)]
    pub device: PathBuf,
    /// Kill deadline in seconds; defaults to the configured budget
    #[arg(long)]
    pub timeout: Option<u64>,
    /// Warning deadline in seconds; defaults to the configured value
    #[arg(long)]
    pub warn: Option<u64>,
    #[arg(long)]
    pub accept_failure: bool,
    /// Capture and print the command's stdout
    #[arg(long)]
    pub capture: bool,
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct TestArgs {
    #[arg(short, long)]
    pub device: PathBuf,
    #[arg(short, long)]
    pub rules: PathBuf,
    /// Shared property applied to every device, as KEY=VALUE
    #[arg(short = 'p', long = "property", value_parser = parse_property)]
    pub properties: Vec<(String, String)>,
    /// Print Prometheus metrics after the run
    #[arg(long)]
    pub metrics: bool,
}

fn parse_property(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}

pub async fn run_command(
    command: Commands,
    config: &HotplugConfig,
    metrics: Arc<MetricsRecorder>,
) -> anyhow::Result<()> {
    match command {
        Commands::Expand(args) => run_expand(args),
        Commands::Spawn(args) => run_spawn(args, config, metrics).await,
        Commands::Test(args) => run_test(args, config, metrics).await,
    }
}

fn run_expand(args: ExpandArgs) -> anyhow::Result<()> {
    let (mut device, _db) = DeviceFixture::load(&args.device)?.into_device();
    let mut event = Event::new(&mut device);
    if let Some(result) = args.result {
        event.set_program_result(result);
    }
    println!(
        "{}",
        expand(&event, &args.template, args.capacity, args.replace_whitespace)
    );
    Ok(())
}

async fn run_spawn(
    args: SpawnArgs,
    config: &HotplugConfig,
    metrics: Arc<MetricsRecorder>,
) -> anyhow::Result<()> {
    let (mut device, _db) = DeviceFixture::load(&args.device)?.into_device();
    let event = Event::new(&mut device);
    let spawner = Spawner::new(&config.exec.helper_dir).with_metrics(metrics);

    let timeout = args
        .timeout
        .map_or_else(|| config.exec.timeout(), Duration::from_secs);
    let warn_after = args
        .warn
        .map_or_else(|| config.exec.timeout_warn(), Duration::from_secs);
    let mut capture = args
        .capture
        .then(|| CaptureBuffer::new(config.exec.result_capacity));

    let command = args.command.join(" ");
    let outcome = spawner
        .run(
            &event,
            &command,
            timeout,
            warn_after,
            args.accept_failure,
            capture.as_mut(),
        )
        .await?;

    println!(
        "pid={} status={} timed_out={} elapsed={:?}",
        outcome.pid, outcome.exit, outcome.timed_out, outcome.elapsed
    );
    if let Some(capture) = capture {
        println!("{}", capture.to_string_lossy());
    }
    Ok(())
}

async fn run_test(
    args: TestArgs,
    config: &HotplugConfig,
    metrics: Arc<MetricsRecorder>,
) -> anyhow::Result<()> {
    let (mut device, _db) = DeviceFixture::load(&args.device)?.into_device();
    let text = std::fs::read_to_string(&args.rules)
        .with_context(|| format!("reading rules {}", args.rules.display()))?;
    let rules: RuleSet = serde_yaml::from_str(&text)
        .with_context(|| format!("parsing rules {}", args.rules.display()))?;

    let spawner = Spawner::new(&config.exec.helper_dir).with_metrics(metrics.clone());
    let journal = Journal::new();
    let executor = EventExecutor::new(
        Arc::new(StaticRules::new(
            rules,
            spawner.clone(),
            config.exec.result_capacity,
        )?),
        Arc::new(DryRunBuiltins::new(journal.clone())),
        Arc::new(DryRunNodes::new(journal.clone())),
        Arc::new(DryRunNetlink::new(journal.clone())),
        spawner,
    )
    .with_metrics(metrics.clone());

    let mut event = Event::new(&mut device);
    let summary = executor
        .process(&mut event, &config.exec, &args.properties)
        .await;
    let name = event.name().map(str::to_string);
    drop(event);

    info!(devpath = %device.devpath(), "transition replayed");
    for entry in journal.entries() {
        println!("{entry}");
    }
    if let Some(name) = name {
        println!("NAME={name}");
    }
    for (key, value) in device.properties() {
        println!("{key}={value}");
    }
    println!(
        "builtins={} spawned={} failed={}",
        summary.builtins, summary.spawned, summary.failed
    );
    if args.metrics {
        print!("{}", metrics.gather_metrics()?);
    }
    Ok(())
}
