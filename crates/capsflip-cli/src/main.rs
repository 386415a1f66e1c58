//! CLI binary: run a pipeline and change its stream format once it is playing.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context as _;
use clap::{Parser, ValueEnum};
use tracing::warn;

use capsflip_controller::{
    run_pipeline, ControllerConfig, RunOutcome, RunReport, ScriptedEngine, SimEngine,
    DEFAULT_STAGE, DEFAULT_TARGET_FRAMERATE, DEFAULT_TOPOLOGY,
};
use capsflip_types::{Fraction, ReconfigureStrategy, HALTED_MODE_TOKEN};

#[derive(Parser)]
#[command(
    name = "capsflip",
    version,
    about = "Run a media pipeline and switch its stream format once it is playing"
)]
struct Cli {
    /// Reconfiguration mode. `stop-on-change` halts the pipeline around the
    /// change; anything else changes the format live.
    mode: Option<String>,

    /// Engine that runs the pipeline
    #[arg(long, value_enum, default_value_t = EngineKind::Sim)]
    engine: EngineKind,

    /// JSON event script replayed by the `script` engine
    #[arg(long, required_if_eq("engine", "script"))]
    script: Option<PathBuf>,

    /// Launch description of the pipeline
    #[arg(long)]
    topology: Option<String>,

    /// Name of the stage whose format is changed
    #[arg(long)]
    stage: Option<String>,

    /// Frame rate to switch to, as N/D or N
    #[arg(long)]
    framerate: Option<Fraction>,

    /// Write the run report as JSON to this file
    #[arg(long)]
    report: Option<PathBuf>,

    /// Print the parsed topology and exit
    #[arg(long)]
    describe: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum EngineKind {
    /// In-process simulation of the launch description
    Sim,
    /// Replay of a recorded event script
    Script,
    /// A real GStreamer pipeline
    Gst,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // Setup tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let topology = cli.topology.as_deref().unwrap_or(DEFAULT_TOPOLOGY);

    if cli.describe {
        cmd_describe(topology)?;
        return Ok(ExitCode::SUCCESS);
    }

    let strategy = select_strategy(cli.mode.as_deref());
    let config = ControllerConfig::for_topology(
        topology,
        cli.stage.as_deref().unwrap_or(DEFAULT_STAGE),
        cli.framerate.unwrap_or(DEFAULT_TARGET_FRAMERATE),
        strategy,
    );

    println!("Running pipeline ({strategy} reconfiguration)");
    println!("Stage: {} -> {}", config.stage_name, config.target);

    let report = match cli.engine {
        EngineKind::Sim => run_pipeline(&config, SimEngine::launch).await,
        EngineKind::Script => {
            let path = cli
                .script
                .as_deref()
                .context("--script is required with --engine script")?;
            let stage = config.stage_name.clone();
            run_pipeline(&config, |_| {
                ScriptedEngine::load(path).map(|engine| engine.with_stage(stage))
            })
            .await
        }
        EngineKind::Gst => run_gst(&config).await?,
    };

    print_summary(&report);
    if let Some(path) = cli.report.as_deref() {
        save_report(&report, path)?;
    }

    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn select_strategy(mode: Option<&str>) -> ReconfigureStrategy {
    if let Some(token) = mode {
        if token != HALTED_MODE_TOKEN {
            warn!("Unknown mode '{token}', changing the format live");
        }
    }
    ReconfigureStrategy::from_token(mode)
}

#[cfg(feature = "gstreamer")]
async fn run_gst(config: &ControllerConfig) -> anyhow::Result<RunReport> {
    Ok(run_pipeline(config, capsflip_controller::GstEngine::launch).await)
}

#[cfg(not(feature = "gstreamer"))]
async fn run_gst(_config: &ControllerConfig) -> anyhow::Result<RunReport> {
    anyhow::bail!("this build has no GStreamer support; rebuild with --features gstreamer")
}

fn cmd_describe(topology: &str) -> anyhow::Result<()> {
    let parsed = capsflip_launch::parse(topology)?;

    println!("Elements: {}", parsed.elements.len());
    for element in &parsed.elements {
        println!("  {} ({})", element.name, element.factory);
        let mut keys: Vec<_> = element.properties.keys().collect();
        keys.sort();
        for key in keys {
            println!("    {} = {}", key, element.properties[key]);
        }
    }

    println!("\n{}", serde_json::to_string_pretty(&parsed)?);
    Ok(())
}

fn print_summary(report: &RunReport) {
    println!();
    match &report.outcome {
        RunOutcome::Completed => println!("Pipeline completed"),
        RunOutcome::EngineError {
            source_name,
            message,
        } => println!("Pipeline failed: {source_name}: {message}"),
        RunOutcome::Aborted { reason } => println!("Pipeline aborted: {reason}"),
    }
    println!("Events processed: {}", report.events_processed);
    if let Some(outcome) = report.reconfiguration {
        println!("Reconfiguration: {outcome:?}");
    }
    let elapsed = report.finished_at - report.started_at;
    println!("Elapsed: {} ms", elapsed.num_milliseconds());
}

fn save_report(report: &RunReport, path: &Path) -> anyhow::Result<()> {
    report
        .save(path)
        .with_context(|| format!("failed to write report to {}", path.display()))?;
    println!("Report: {}", path.display());
    Ok(())
}
