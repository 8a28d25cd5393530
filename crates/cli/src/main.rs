mod testbench;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use orchestrator::config::CONFIG_FILE;
use orchestrator::{PhaseExecutor, Phasing, RunConfig, RunReport};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::testbench::TestbenchOptions;

#[derive(Parser)]
#[command(name = "phasekit")]
#[command(about = "Phase-driven testbench lifecycle orchestration", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ./phasekit.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log every phase state change at info level
    #[arg(long, global = true)]
    phase_trace: bool,

    /// Keep `run` open until a raise/drop cycle completes
    #[arg(long, global = true)]
    legacy_run_semantics: bool,

    #[arg(long, global = true)]
    max_ready_to_end: Option<u32>,

    /// Watchdog limit in simulated milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file
    Init,
    /// Run the demo testbench through every standard phase
    Run {
        /// Transactions the driver sends during main
        #[arg(long, default_value_t = 4)]
        transactions: u32,

        /// Simulated milliseconds between transactions
        #[arg(long, default_value_t = 10)]
        period_ms: u64,

        /// Jump back to reset once from main
        #[arg(long)]
        reset_jump: bool,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the standard phase graph in breadth-first order
    Schedule {
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main(flavor = "current_thread", start_paused = true)]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE));

    match cli.command {
        Commands::Init => init_config(&config_path).await,
        Commands::Run {
            transactions,
            period_ms,
            reset_jump,
            json,
        } => {
            let config = load_config(&cli, &config_path).await;
            let options = TestbenchOptions {
                transactions,
                period: Duration::from_millis(period_ms),
                reset_jump,
            };
            run(config, options, json).await
        }
        Commands::Schedule { json } => {
            let config = load_config(&cli, &config_path).await;
            schedule(config, json)
        }
    }
}

async fn init_config(path: &Path) -> Result<()> {
    if path.exists() {
        println!("Config already present at {}", path.display());
        return Ok(());
    }
    RunConfig::default()
        .write(path)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}

/// File, then `PHASEKIT_*` environment, then command-line flags.
async fn load_config(cli: &Cli, path: &Path) -> RunConfig {
    let mut config = RunConfig::read(path).await.apply_env();
    if cli.phase_trace {
        config.phase_trace = true;
    }
    if cli.legacy_run_semantics {
        config.legacy_run_semantics = true;
    }
    if let Some(max) = cli.max_ready_to_end {
        config.max_ready_to_end_iterations = max;
    }
    if let Some(timeout) = cli.timeout_ms {
        config.timeout_ms = Some(timeout);
    }
    config
}

async fn run(config: RunConfig, options: TestbenchOptions, json: bool) -> Result<()> {
    let timeout = config.timeout();
    let phasing = Phasing::new(config);
    let executor = PhaseExecutor::new(phasing.clone(), testbench::build(options)?);
    let started = tokio::time::Instant::now();

    let report = match timeout {
        Some(limit) => match tokio::time::timeout(limit, executor.run_phases()).await {
            Ok(result) => result?,
            Err(_) => {
                let stuck = phasing
                    .executing_phases()
                    .into_iter()
                    .map(|id| phasing.full_name(id))
                    .collect::<orchestrator::Result<Vec<_>>>()?;
                tracing::error!(timeout_ms = limit.as_millis() as u64, stuck = ?stuck, "Watchdog expired");
                bail!(
                    "watchdog expired after {} ms with phases still executing: {}",
                    limit.as_millis(),
                    stuck.join(", ")
                );
            }
        },
        None => executor.run_phases().await?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report, started.elapsed());
    }
    if !report.is_clean() {
        bail!("{} task hook(s) failed", report.hook_failures.len());
    }
    Ok(())
}

fn print_report(report: &RunReport, elapsed: Duration) {
    println!();
    println!("Completed {} phases in {} ms simulated", report.completed.len(), elapsed.as_millis());
    for name in &report.completed {
        println!("  ● {}", name);
    }
    if !report.hook_failures.is_empty() {
        println!();
        println!("Hook failures ({}):", report.hook_failures.len());
        for failure in &report.hook_failures {
            println!("  ✗ {} [{}]: {}", failure.phase, failure.component, failure.message);
        }
    }
    println!();
}

fn schedule(config: RunConfig, json: bool) -> Result<()> {
    let phasing = Phasing::new(config);
    let common = phasing.common_domain()?;
    let order = phasing.with_graph(|graph| graph.bfs_from(common));

    if json {
        let snapshot: Vec<_> = phasing
            .snapshot()
            .into_iter()
            .filter(|node| order.iter().any(|id| id.index() == node.id))
            .collect();
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    let names = |ids: Vec<orchestrator::NodeId>| {
        ids.into_iter()
            .map(|id| phasing.full_name(id))
            .collect::<orchestrator::Result<Vec<_>>>()
            .map(|names| names.join(", "))
    };
    for id in order {
        println!("{} [{}]", phasing.full_name(id)?, phasing.node_type(id)?);
        println!("    <- {}", names(phasing.predecessors(id)?)?);
        println!("    -> {}", names(phasing.successors(id)?)?);
    }
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "phasekit=info,orchestrator=info".into()),
        )
        .init();
}
