//! `qsl`: run connection scenarios against a simulated mote.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::Ordering;

use clap::{Parser, Subcommand};
use qsl_runner::{run_scenario, InMemoryRecorder, RunOptions, RunnerError, Scenario};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "qsl", version, about = "SmartMesh IP QuickStart connection runner")]
struct Cli {
    /// Log filter used when RUST_LOG is unset.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Connect, publish and read according to a scenario file.
    Run {
        /// Scenario YAML file.
        scenario: PathBuf,

        /// Seed for the simulated mote.
        #[arg(long)]
        seed: Option<u64>,

        /// Write the JSON report here ("-" for stdout).
        #[arg(long)]
        report: Option<PathBuf>,

        /// Leave recorded metrics out of the report.
        #[arg(long)]
        no_metrics: bool,
    },

    /// Parse and validate a scenario file without running it.
    Check {
        /// Scenario YAML file.
        scenario: PathBuf,
    },
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(
    scenario: PathBuf,
    seed: Option<u64>,
    report_path: Option<PathBuf>,
    no_metrics: bool,
) -> Result<bool, RunnerError> {
    let scenario = Scenario::load(&scenario)?;

    let recorder = InMemoryRecorder::new();
    if metrics::set_global_recorder(recorder.clone()).is_ok() {
        qsl_metrics::describe_metrics();
    } else {
        warn!("a metrics recorder is already installed, metrics will be empty");
    }

    let options = RunOptions {
        seed,
        ..RunOptions::default()
    };
    let interrupt = options.interrupt.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        interrupt.store(true, Ordering::Relaxed);
    }) {
        warn!("could not install Ctrl-C handler: {}", e);
    }

    let mut report = run_scenario(&scenario, &options)?;
    if !no_metrics {
        report.metrics = Some(recorder.snapshot());
    }

    match report_path {
        Some(path) => report.write(&path)?,
        None => info!(
            "scenario {}: connected={} sent={}/{} received={}",
            report.scenario,
            report.connect.connected,
            report.sends.succeeded,
            report.sends.attempted,
            report.received.len()
        ),
    }
    Ok(report.is_success())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let result = match cli.command {
        Commands::Run {
            scenario,
            seed,
            report,
            no_metrics,
        } => run(scenario, seed, report, no_metrics),
        Commands::Check { scenario } => Scenario::load(&scenario).map(|s| {
            info!("scenario {} is valid", s.name);
            true
        }),
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            error!("{}", e);
            ExitCode::from(2)
        }
    }
}
