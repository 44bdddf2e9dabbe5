use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use clap::Parser;
use sweeper::{
    api::{ApiError, HttpClient, RemoteClient},
    commands::{self, Response},
    config::{ConfigError, SweeperConfig},
    events::{StateBroadcaster, StateUpdate},
    job::{JobController, JobProgress, LogEntry, Phase},
    observability,
    ratelimit::RateLimiter,
    store::{StoreError, build_store},
};
use thiserror::Error;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    sync::broadcast::error::RecvError,
};

/// How long Ctrl-C waits for the running job to reach a pause point.
const PAUSE_GRACE: Duration = Duration::from_secs(5);

/// CLI arguments for the sweeper
#[derive(Parser, Debug)]
#[command(version, about = "Resumable bulk deletion of your own messages", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path to config file (defaults to ~/.config/sweeper/sweeper.toml if it exists,
    /// otherwise built-in defaults are used)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Auth token, overriding `api.token` from the config file
    #[arg(long, global = true, env = "SWEEPER_TOKEN", hide_env_values = true)]
    token: Option<String>,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Find every server and conversation holding your messages
    Scan,
    /// Delete your messages in scanned targets (all of them when no --target is given)
    Delete {
        /// Target id to delete in; repeat for several
        #[arg(short, long = "target")]
        targets: Vec<String>,
    },
    /// Resume an interrupted run, repeat the last one, or scan again
    Retry,
    /// Print the saved job state
    Status,
    /// Speak the JSON command protocol on stdin/stdout
    Serve,
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("{0}")]
    Rejected(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode output: {0}")]
    Json(#[from] serde_json::Error),
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = observability::init_tracing(&config.observability.logging) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }

    if let Err(e) = run(args, config).await {
        tracing::error!(error = %e, "Sweeper failed");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Get the default config file path.
fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("sweeper").join("sweeper.toml"))
}

fn load_config(path: Option<&Path>) -> Result<SweeperConfig, ConfigError> {
    if let Some(path) = path {
        return SweeperConfig::from_file(path);
    }
    match default_config_path() {
        Some(path) if path.exists() => SweeperConfig::from_file(path),
        _ => Ok(SweeperConfig::default()),
    }
}

async fn run(args: Args, config: SweeperConfig) -> Result<(), CliError> {
    let store = build_store(&config.storage).await?;
    let limiter = RateLimiter::new(config.rate_limit.clone());
    let client = HttpClient::new(&config.api, limiter)?;
    if let Some(token) = args.token {
        client.set_credential(token);
    }

    let controller = JobController::new(
        Arc::new(client),
        store,
        config.job.clone(),
        StateBroadcaster::new(),
    );
    controller.restore().await?;

    match args.command {
        Command::Status => print_status(&controller.snapshot()),
        Command::Scan => run_job(&controller, commands::Command::StartScan).await?,
        Command::Delete { targets } => {
            let target_ids = if targets.is_empty() {
                controller
                    .snapshot()
                    .state
                    .scan_targets
                    .into_iter()
                    .map(|target| target.id)
                    .collect()
            } else {
                targets
            };
            run_job(&controller, commands::Command::StartDeletion { target_ids }).await?;
        }
        Command::Retry => run_job(&controller, commands::Command::Retry).await?,
        Command::Serve => serve(&controller).await?,
    }

    controller.flush().await?;
    Ok(())
}

/// Start a job and follow its log until it ends or Ctrl-C pauses it.
async fn run_job(controller: &JobController, command: commands::Command) -> Result<(), CliError> {
    let mut updates = controller.subscribe();
    let mut last_printed = controller.snapshot().logs.last().cloned();

    if let Response::Error { message } = controller.handle(command).await {
        return Err(CliError::Rejected(message));
    }

    let finished = controller.wait();
    tokio::pin!(finished);
    let interrupted = shutdown_signal();
    tokio::pin!(interrupted);

    loop {
        tokio::select! {
            _ = &mut finished => break,
            update = updates.recv() => match update {
                Ok(update) => print_new_logs(&mut last_printed, &update.logs),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Progress output fell behind");
                }
                Err(RecvError::Closed) => break,
            },
            _ = &mut interrupted => {
                pause_for_exit(controller).await;
                break;
            }
        }
    }

    let update = controller.snapshot();
    print_new_logs(&mut last_printed, &update.logs);
    print_summary(&update.state);
    Ok(())
}

/// Pause the job and give it a moment to park before the process exits.
/// The checkpoint already reflects every handled message.
async fn pause_for_exit(controller: &JobController) {
    tracing::info!("Interrupt received, pausing job");
    controller.pause();

    let mut updates = controller.subscribe();
    let parked = async {
        while !controller.phase().is_settled() {
            if matches!(updates.recv().await, Err(RecvError::Closed)) {
                break;
            }
        }
    };
    if tokio::time::timeout(PAUSE_GRACE, parked).await.is_err() {
        tracing::warn!("Job did not pause in time; exiting with the last saved checkpoint");
    }
}

/// Newline-delimited JSON: commands in on stdin, responses and state updates
/// out on stdout.
async fn serve(controller: &JobController) -> Result<(), CliError> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let mut updates = controller.subscribe();

    let interrupted = shutdown_signal();
    tokio::pin!(interrupted);

    write_line(&mut stdout, &Response::State(controller.snapshot())).await?;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                let response = match serde_json::from_str::<commands::Command>(&line) {
                    Ok(command) => controller.handle(command).await,
                    Err(e) => Response::error(format!("Invalid command: {e}")),
                };
                write_line(&mut stdout, &response).await?;
            }
            update = updates.recv() => match update {
                Ok(update) => write_line(&mut stdout, &Response::State(update)).await?,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "State updates dropped for slow reader");
                }
                Err(RecvError::Closed) => break,
            },
            _ = &mut interrupted => {
                pause_for_exit(controller).await;
                break;
            }
        }
    }
    Ok(())
}

async fn write_line(stdout: &mut tokio::io::Stdout, response: &Response) -> Result<(), CliError> {
    let mut bytes = serde_json::to_vec(response)?;
    bytes.push(b'\n');
    stdout.write_all(&bytes).await?;
    stdout.flush().await?;
    Ok(())
}

/// Print log entries that arrived after `last_printed`.
fn print_new_logs(last_printed: &mut Option<LogEntry>, logs: &[LogEntry]) {
    let start = last_printed
        .as_ref()
        .and_then(|last| logs.iter().rposition(|entry| entry == last))
        .map_or(0, |index| index + 1);
    for entry in &logs[start..] {
        println!("[{}] {}", entry.level.as_str(), entry.message);
    }
    if let Some(entry) = logs.last() {
        *last_printed = Some(entry.clone());
    }
}

fn print_summary(state: &JobProgress) {
    println!(
        "Phase: {} | Deleted: {} | Failed: {} | Skipped: {} | Found: {}",
        state.phase, state.deleted, state.failed, state.skipped, state.total_found
    );
    let breakdown: Vec<String> = sweeper::api::FailureCategory::ALL
        .iter()
        .filter_map(|category| {
            let count = state.failure_summary.get(*category);
            (count > 0).then(|| format!("{category}: {count}"))
        })
        .collect();
    if !breakdown.is_empty() {
        println!("Failures by category: {}", breakdown.join(", "));
    }
    if !state.last_error.is_empty() {
        println!("Last error: {}", state.last_error);
    }
}

fn print_status(update: &StateUpdate) {
    let state = &update.state;
    print_summary(state);
    if let Some(user) = &state.user {
        println!("User: {} ({})", user.username, user.id);
    }
    if !state.scan_targets.is_empty() {
        println!("Targets:");
        for target in &state.scan_targets {
            println!(
                "  {:<20} {:>6}  {} ({})",
                target.id,
                target.message_count,
                target.name,
                target.kind.label()
            );
        }
    }
    if matches!(state.phase, Phase::Paused | Phase::Error) {
        println!("Run `sweeper retry` to continue.");
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}
