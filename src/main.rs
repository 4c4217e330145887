use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use flightlock::command::{run_command, CommandOutput};
use flightlock::config::{self, Config};
use flightlock::coordination::keys;
use flightlock::metrics::MetricsRegistry;
use flightlock::store::{KeyDbStore, KeyValueStore};
use flightlock::SingleFlight;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "flightlock", about = "Run a command at most once across a fleet")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "/etc/flightlock/config.yaml")]
    config: String,

    /// Print the collected metrics to stderr before exiting.
    #[arg(long)]
    metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a command under single-flight; concurrent callers share its output.
    Run {
        /// Resource name that identifies equivalent work.
        #[arg(short, long)]
        resource: String,
        #[arg(long)]
        lock_ttl_ms: Option<u64>,
        #[arg(long)]
        result_ttl_ms: Option<u64>,
        #[arg(long)]
        poll_interval_ms: Option<u64>,
        #[arg(long)]
        poll_timeout_ms: Option<u64>,
        /// Program and arguments.
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Show the lock holder and published result for a resource.
    Inspect {
        #[arg(short, long)]
        resource: String,
    },
}

// ---------------------------------------------------------------------------
// Subcommands
// ---------------------------------------------------------------------------

struct RunArgs {
    resource: String,
    lock_ttl_ms: Option<u64>,
    result_ttl_ms: Option<u64>,
    poll_interval_ms: Option<u64>,
    poll_timeout_ms: Option<u64>,
    command: Vec<String>,
}

async fn run(
    config: &Config,
    store: Arc<dyn KeyValueStore>,
    metrics: MetricsRegistry,
    args: RunArgs,
) -> Result<ExitCode> {
    let mut options = config.flight.to_options();
    if let Some(ms) = args.lock_ttl_ms {
        options = options.with_lock_ttl(Duration::from_millis(ms));
    }
    if let Some(ms) = args.result_ttl_ms {
        options = options.with_result_ttl(Duration::from_millis(ms));
    }
    if let Some(ms) = args.poll_interval_ms {
        options = options.with_poll_interval(Duration::from_millis(ms));
    }
    if let Some(ms) = args.poll_timeout_ms {
        options = options.with_poll_timeout(Duration::from_millis(ms));
    }

    let flight = SingleFlight::new(store, options).with_metrics(metrics);

    let (program, program_args) = args
        .command
        .split_first()
        .context("no command given")?;

    let output: CommandOutput = flight
        .run(&args.resource, || run_command(program, program_args))
        .await?;

    print!("{}", output.stdout);
    eprint!("{}", output.stderr);

    tracing::info!(resource = %args.resource, status = output.status, "command result delivered");
    Ok(exit_code(output.status))
}

async fn inspect(store: &dyn KeyValueStore, resource: &str) -> Result<ExitCode> {
    let lock_key = keys::lock_key(resource);
    let result_key = keys::result_key(resource);

    let lock_holder = store.get(&lock_key).await?;
    let result = store.get(&result_key).await?;

    let report = serde_json::json!({
        "resource": resource,
        "lock_key": lock_key,
        "lock_holder": lock_holder,
        "result_key": result_key,
        "result": result,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(ExitCode::SUCCESS)
}

fn exit_code(status: i32) -> ExitCode {
    match u8::try_from(status) {
        Ok(code) => ExitCode::from(code),
        Err(_) => ExitCode::FAILURE,
    }
}

// ---------------------------------------------------------------------------
// Shutdown
// ---------------------------------------------------------------------------

/// Resolves on Ctrl+C.  An in-flight lock is left to expire via its TTL.
async fn shutdown_signal() {
    if signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
    tracing::info!("received SIGINT");
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // ---- CLI ----
    let Cli {
        config: config_path,
        metrics: print_metrics,
        command,
    } = Cli::parse();

    // ---- Config ----
    let config = config::load_config(&config_path)?;

    // ---- Tracing ----
    // Logs go to stderr so that stdout carries only the command's output.
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .init();

    tracing::info!(%config_path, "starting flightlock");

    // ---- Store ----
    let store: Arc<dyn KeyValueStore> = Arc::new(KeyDbStore::connect(&config.keydb).await?);
    let metrics = MetricsRegistry::new();

    let work = async {
        match command {
            Commands::Run {
                resource,
                lock_ttl_ms,
                result_ttl_ms,
                poll_interval_ms,
                poll_timeout_ms,
                command,
            } => {
                let args = RunArgs {
                    resource,
                    lock_ttl_ms,
                    result_ttl_ms,
                    poll_interval_ms,
                    poll_timeout_ms,
                    command,
                };
                run(&config, Arc::clone(&store), metrics.clone(), args).await
            }
            Commands::Inspect { resource } => inspect(store.as_ref(), &resource).await,
        }
    };

    let code = tokio::select! {
        result = work => result?,
        () = shutdown_signal() => ExitCode::from(130),
    };

    if print_metrics {
        eprint!("{}", metrics.encode()?);
    }

    Ok(code)
}
