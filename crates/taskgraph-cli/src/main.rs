//! taskgraph CLI - run and validate task plans.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_stream::StreamExt;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use taskgraph_scheduler::metrics::collect_metrics;
use taskgraph_scheduler::Scheduler;

mod output;
mod plan;
mod simulate;

use plan::{CliError, Plan};
use simulate::SimulatedExecutor;

/// taskgraph CLI - capability-aware task graph scheduler
#[derive(Parser)]
#[command(name = "taskgraph")]
#[command(about = "Run task graphs over a pool of workers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a plan with the simulated executor
    Run {
        /// Plan file (JSON)
        plan: PathBuf,

        /// Override the plan's max_concurrency
        #[arg(long)]
        max_concurrency: Option<usize>,

        /// Seconds of simulated work per unit of estimated cost
        #[arg(long, default_value_t = 0.1)]
        time_scale: f64,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,

        /// Print Prometheus metrics after the run
        #[arg(long)]
        metrics: bool,
    },

    /// Check a plan without running it
    Validate {
        /// Plan file (JSON)
        plan: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            plan,
            max_concurrency,
            time_scale,
            json,
            metrics,
        } => {
            run_plan(plan, max_concurrency, time_scale, json, metrics).await?;
        }
        Commands::Validate { plan } => {
            validate_plan(plan)?;
        }
    }

    Ok(())
}

async fn run_plan(
    path: PathBuf,
    max_concurrency: Option<usize>,
    time_scale: f64,
    json: bool,
    metrics: bool,
) -> Result<(), CliError> {
    if !time_scale.is_finite() || time_scale < 0.0 {
        return Err(CliError::InvalidArgument(format!(
            "time scale must be a non-negative number, got {time_scale}"
        )));
    }

    let mut plan = Plan::load(&path)?;
    if let Some(n) = max_concurrency {
        plan.config.max_concurrency = n;
    }
    let (config, run) = plan.build()?;

    info!(plan = %path.display(), run_id = %run.id, "Loaded plan");

    let scheduler = Scheduler::new(run, config, Arc::new(SimulatedExecutor::new(time_scale)))?;

    let mut events = scheduler.events();
    let event_log = tokio::spawn(async move {
        while let Some(item) = events.next().await {
            match item {
                Ok(event) => info!(event = %output::describe_event(&event), "Progress"),
                Err(e) => warn!(error = %e, "Event stream lagged"),
            }
        }
    });

    let stop = scheduler.stop_handle();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, letting running tasks finish");
            stop.stop();
        }
    });

    let report = scheduler.run().await;
    ctrl_c.abort();

    let metrics_text = if metrics {
        Some(collect_metrics(&scheduler.state()).await)
    } else {
        None
    };

    // Dropping the scheduler closes the event stream.
    drop(scheduler);
    if let Err(e) = event_log.await {
        warn!(error = %e, "Event logger failed");
    }

    if json {
        let rendered = serde_json::to_string_pretty(&report).map_err(|e| {
            CliError::InvalidArgument(format!("report could not be serialized: {e}"))
        })?;
        println!("{rendered}");
    } else {
        print!("{}", output::render_report(&report));
    }
    if let Some(text) = metrics_text {
        println!();
        print!("{text}");
    }

    if report.is_success() {
        Ok(())
    } else {
        Err(CliError::RunIncomplete {
            failed: report.failed,
            never_started: report.never_started,
        })
    }
}

fn validate_plan(path: PathBuf) -> Result<(), CliError> {
    let plan = Plan::load(&path)?;
    let (config, run) = plan.build()?;

    println!("Plan {}", path.display());
    println!("  Tasks:           {}", run.graph.len());
    println!("  Workers:         {}", run.registry.len());
    println!("  Max concurrency: {}", config.max_concurrency);

    let unreachable = run.graph.unreachable_tasks();
    if unreachable.is_empty() {
        println!("  All tasks can become ready");
        return Ok(());
    }

    println!("  Tasks that can never become ready:");
    for task in &unreachable {
        println!("    - {task}");
    }
    Err(CliError::Unreachable(unreachable.len()))
}
