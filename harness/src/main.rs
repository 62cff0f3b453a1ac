//! gauntlet - run adversarial scenarios against the reference subsystems
//!
//! # Usage
//!
//! ```bash
//! # List the catalog
//! gauntlet list
//!
//! # Run everything and save a JSON report
//! gauntlet run --output reports/
//!
//! # Run two scenarios concurrently with a tighter step ceiling
//! gauntlet run -s truster -s selfie --parallel --max-steps 32
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gauntlet_harness::catalog;
use gauntlet_harness::config::HarnessConfig;

/// Adversarial invariant harness
#[derive(Parser)]
#[command(name = "gauntlet")]
#[command(about = "Adversarial invariant testing for stateful financial protocols")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List catalog scenarios and their fingerprints
    List,
    /// Run scenarios and report verdicts
    Run {
        /// Scenario to run (repeatable); defaults to the whole catalog
        #[arg(short, long = "scenario")]
        scenarios: Vec<String>,

        /// Harness configuration file (YAML or JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the exploit step ceiling
        #[arg(long)]
        max_steps: Option<usize>,

        /// Override the per-run wall-clock limit
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Run scenarios concurrently
        #[arg(long)]
        parallel: bool,

        /// Write the aggregate report to this file or directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print the report as JSON instead of the summary box
        #[arg(long)]
        json: bool,
    },
}

fn list() -> Result<bool> {
    for (scenario, exploit) in catalog::all()? {
        println!(
            "{:20} {}  {}",
            scenario.name(),
            &scenario.fingerprint()[..16],
            exploit.describe()
        );
    }
    Ok(true)
}

#[allow(clippy::too_many_arguments)]
async fn run_scenarios(
    scenarios: Vec<String>,
    config: Option<PathBuf>,
    max_steps: Option<usize>,
    timeout_ms: Option<u64>,
    parallel: bool,
    output: Option<PathBuf>,
    json: bool,
) -> Result<bool> {
    let mut config = match config {
        Some(path) => HarnessConfig::load(&path)?,
        None => HarnessConfig::default(),
    };
    if !scenarios.is_empty() {
        config.scenarios = scenarios;
    }
    if let Some(max_steps) = max_steps {
        config.max_steps = max_steps;
    }
    if let Some(timeout_ms) = timeout_ms {
        config.timeout_ms = timeout_ms;
    }
    config.parallel |= parallel;
    config.validate()?;

    let registry = catalog::registry(&config)?;
    for wanted in &config.scenarios {
        if registry.get(wanted).is_none() {
            log::warn!("No catalog scenario named '{}'", wanted);
        }
    }

    let report = registry.run_all().await;
    if json {
        let rendered =
            serde_json::to_string_pretty(&report).context("Failed to serialize report")?;
        println!("{}", rendered);
    } else {
        report.print();
    }

    if let Some(output) = output {
        report.save(&output).await?;
    }
    Ok(report.all_passed())
}

async fn run() -> Result<bool> {
    let cli = Cli::parse();
    match cli.command {
        Commands::List => list(),
        Commands::Run {
            scenarios,
            config,
            max_steps,
            timeout_ms,
            parallel,
            output,
            json,
        } => {
            run_scenarios(scenarios, config, max_steps, timeout_ms, parallel, output, json).await
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run().await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(2)
        }
    }
}
