mod demos;
mod doctor;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::{CommandFactory, Parser, Subcommand};
use futures::stream::{self, StreamExt};
use rand::Rng;
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use flowdag_core::{EngineState, FlowConfig, FlowError, NodeKind, RunContext};
use flowdag_engine::{ExecutorRuntimes, FlowRunner, RunOptions};

use demos::Request;

#[derive(Parser)]
#[command(name = "flowdag", version, about = "Run dependency-graph workflows with branch pruning")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "flowdag.toml", env = "FLOWDAG_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one demo workflow and print its outcome
    Run {
        /// Workflow name (see `flowdag list`)
        #[arg(default_value = "ranking")]
        workflow: String,
        /// User id fed to the workflow
        #[arg(long, default_value = "guest")]
        user: String,
        /// Number of candidates to recall
        #[arg(long, default_value = "8")]
        candidates: usize,
    },
    /// Run a workflow many times concurrently and report throughput
    Bench {
        #[arg(default_value = "ranking")]
        workflow: String,
        /// Total number of runs
        #[arg(short = 'n', long, default_value = "1000")]
        iterations: usize,
        /// Runs in flight at once
        #[arg(short, long, default_value = "16")]
        concurrency: usize,
    },
    /// List the built-in workflows
    List,
    /// Show the effective configuration
    Config,
    /// Run system health checks
    Doctor,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("flowdag=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    if let Some(Commands::Completions { shell }) = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "flowdag", &mut std::io::stdout());
        return Ok(());
    }

    // Doctor reports config problems instead of failing on them
    if let Some(Commands::Doctor) = &cli.command {
        println!("flowdag doctor");
        println!("==============");
        doctor::run_doctor(&cli.config).await;
        return Ok(());
    }

    let config = FlowConfig::load_or_default(&cli.config)?;
    if !cli.config.exists() {
        info!(path = %cli.config.display(), "No config file, using defaults");
    }

    match cli.command {
        Some(Commands::Config) => {
            println!("{}", toml::to_string_pretty(&config)?);
            return Ok(());
        }
        Some(Commands::List) => {
            for name in demos::WORKFLOWS {
                println!("{name}");
            }
            return Ok(());
        }
        _ => {}
    }

    let runtimes = ExecutorRuntimes::build(&config.executors)?;
    let executors = runtimes
        .executors()
        .ok_or_else(|| anyhow::anyhow!("executor runtimes unavailable"))?;
    let runner = Arc::new(FlowRunner::new(&config, executors));
    demos::register_all(&runner)?;

    match cli.command {
        Some(Commands::Run {
            workflow,
            user,
            candidates,
        }) => run_once(&runner, &workflow, Request::new(user, candidates)).await?,
        Some(Commands::Bench {
            workflow,
            iterations,
            concurrency,
        }) => bench(&runner, &workflow, iterations, concurrency.max(1)).await?,
        None => run_once(&runner, "ranking", Request::new("guest", 8)).await?,
        Some(Commands::List | Commands::Config | Commands::Doctor | Commands::Completions { .. }) => {
            unreachable!("handled before runner setup")
        }
    }

    runner.stop_evictors();
    Ok(())
}

async fn run_once(runner: &FlowRunner<Request>, workflow: &str, request: Request) -> anyhow::Result<()> {
    let ctx = Arc::new(RunContext::new());
    let options = RunOptions::new()
        .before_node(Arc::new(|id: &str, kind: NodeKind| tracing::debug!(node_id = %id, %kind, "Dispatching node")))
        .on_error(Arc::new(|err: &FlowError, req: &Request, _ctx: &RunContext| {
            warn!(user = %req.user, error = %err, "Workflow failed");
        }));
    let outcome = runner
        .run_with_context(workflow, Arc::new(request), &ctx, options)
        .await?;

    let mut nodes = BTreeMap::new();
    for id in runner.graph(workflow)?.node_ids() {
        if let Some(result) = ctx.result(id) {
            nodes.insert(
                id.clone(),
                json!({
                    "state": result.state,
                    "value": result.value,
                    "elapsed_ms": result.duration_ms(),
                    "error": result.error.as_ref().map(|e| e.to_string()),
                }),
            );
        }
    }
    let report = json!({
        "run_id": outcome.run_id.to_string(),
        "workflow": outcome.workflow,
        "started_at": outcome.started_at.to_rfc3339(),
        "state": outcome.state.to_string(),
        "elapsed_ms": outcome.elapsed.as_millis() as u64,
        "error": outcome.error.as_ref().map(|e| e.to_string()),
        "data": ctx.data_snapshot(),
        "nodes": nodes,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn bench(
    runner: &Arc<FlowRunner<Request>>,
    workflow: &str,
    iterations: usize,
    concurrency: usize,
) -> anyhow::Result<()> {
    // Surface lookup errors once instead of per run.
    runner.graph(workflow)?;

    let started = Instant::now();
    let states: Vec<EngineState> = stream::iter(0..iterations)
        .map(|_| {
            let user = format!("user-{}", rand::thread_rng().gen_range(0..10_000));
            let runner = Arc::clone(runner);
            let workflow = workflow.to_string();
            async move {
                match runner.run(&workflow, Arc::new(Request::new(user, 16)), RunOptions::new()).await {
                    Ok(outcome) => outcome.state,
                    Err(_) => EngineState::Error,
                }
            }
        })
        .buffer_unordered(concurrency)
        .collect()
        .await;
    let elapsed = started.elapsed();

    let mut by_state: BTreeMap<String, usize> = BTreeMap::new();
    for state in states {
        *by_state.entry(state.to_string()).or_default() += 1;
    }
    let stats = runner.contexts().stats();
    let report = json!({
        "workflow": workflow,
        "iterations": iterations,
        "concurrency": concurrency,
        "elapsed_ms": elapsed.as_millis() as u64,
        "runs_per_sec": iterations as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
        "states": by_state,
        "context_pool": {
            "idle": runner.contexts().len(),
            "created": stats.created,
            "borrowed": stats.borrowed,
            "released": stats.released,
            "discarded": stats.discarded,
            "evicted": stats.evicted,
        },
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
