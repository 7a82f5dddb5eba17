use std::time::Duration;

use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use tokio::signal;

use server::queue::{
    ControlAction, ControlMessage, JobState, SupervisorStatus, CONTROL_CHANNEL, EMAIL_QUEUE,
    IMPORT_QUEUE, WORKERS_STATUS_KEY,
};
use server::server_config::AppConfig;
use server::shared_store::SharedStore;
use server::{logging, scheduler, Runtime};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser)]
#[command(name = "mailspool", about = "Mailspool worker fleet and queue operations")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Worker fleet lifecycle
    Workers {
        #[command(subcommand)]
        action: WorkersCommand,
    },
    /// Operations on a single queue
    Queue {
        #[command(subcommand)]
        action: QueueCommand,
    },
}

#[derive(Subcommand)]
enum WorkersCommand {
    /// Run the worker fleet in the foreground
    Start,
    /// Ask a running fleet to drain and exit
    Stop,
    /// Stop a running fleet, then run a fresh one in the foreground
    Restart,
    /// Show the mirrored supervisor status
    Status,
    /// Show per-queue counters
    Stats,
}

#[derive(Subcommand)]
enum QueueCommand {
    Pause {
        queue: String,
    },
    Resume {
        queue: String,
    },
    Clean {
        queue: String,
        #[arg(long, default_value_t = 0)]
        grace_ms: u64,
        #[arg(long, default_value = "completed")]
        state: String,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(2);
        }
    };
    logging::init_tracing(&config.logging);

    let code = match cli.command {
        Commands::Workers { action } => match action {
            WorkersCommand::Start => start_daemon(config).await,
            WorkersCommand::Stop => stop_daemon(&config).await,
            WorkersCommand::Restart => {
                let stopped = stop_daemon(&config).await;
                if stopped != 0 {
                    tracing::warn!("No running fleet answered the stop request");
                }
                start_daemon(config).await
            }
            WorkersCommand::Status => show_status(&config).await,
            WorkersCommand::Stats => show_stats(&config).await,
        },
        Commands::Queue { action } => match action {
            QueueCommand::Pause { queue } => {
                publish_control(
                    &config,
                    ControlMessage {
                        action: ControlAction::Pause,
                        queue,
                        grace_ms: None,
                        state: None,
                    },
                )
                .await
            }
            QueueCommand::Resume { queue } => {
                publish_control(
                    &config,
                    ControlMessage {
                        action: ControlAction::Resume,
                        queue,
                        grace_ms: None,
                        state: None,
                    },
                )
                .await
            }
            QueueCommand::Clean {
                queue,
                grace_ms,
                state,
            } => {
                let state = match parse_state(&state) {
                    Some(state) => state,
                    None => {
                        eprintln!("Unknown job state: {state}");
                        std::process::exit(2);
                    }
                };
                publish_control(
                    &config,
                    ControlMessage {
                        action: ControlAction::Clean,
                        queue,
                        grace_ms: Some(grace_ms),
                        state: Some(state),
                    },
                )
                .await
            }
        },
    };

    std::process::exit(code);
}

fn parse_state(raw: &str) -> Option<JobState> {
    match raw {
        "waiting" => Some(JobState::Waiting),
        "delayed" => Some(JobState::Delayed),
        "active" => Some(JobState::Active),
        "completed" => Some(JobState::Completed),
        "failed" => Some(JobState::Failed),
        "stalled" => Some(JobState::Stalled),
        _ => None,
    }
}

async fn start_daemon(config: AppConfig) -> i32 {
    tracing::info!("Mailspool starting: {}", config);

    let runtime = match Runtime::init(config).await {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!("Startup failed: {}", e);
            return 1;
        }
    };

    let _background = runtime.start_background();

    let mut scheduler = match scheduler::build(&runtime).await {
        Ok(scheduler) => scheduler,
        Err(e) => {
            tracing::error!("Scheduler setup failed: {:?}", e);
            return 1;
        }
    };
    if let Err(e) = scheduler.start().await {
        tracing::error!("Failed to start scheduler: {:?}", e);
        return 1;
    }
    tracing::info!("Scheduler started");

    signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
    tracing::info!("Received Ctrl+C, shutting down");
    runtime.shutdown().await;
    0
}

async fn stop_daemon(config: &AppConfig) -> i32 {
    publish_control(
        config,
        ControlMessage {
            action: ControlAction::Shutdown,
            queue: "*".to_string(),
            grace_ms: None,
            state: None,
        },
    )
    .await
}

async fn publish_control(config: &AppConfig, message: ControlMessage) -> i32 {
    let store = SharedStore::connect(&config.redis).await;
    if !store.is_ready() {
        eprintln!("Shared store is unreachable; cannot reach the running fleet");
        return 1;
    }
    let payload = serde_json::to_string(&message).expect("control message serializes");
    store.publish(CONTROL_CHANNEL, &payload).await;
    // give the subscriber a beat before the process exits
    tokio::time::sleep(Duration::from_millis(100)).await;
    println!("Sent {:?} for queue {}", message.action, message.queue);
    0
}

async fn show_status(config: &AppConfig) -> i32 {
    let store = SharedStore::connect(&config.redis).await;
    if !store.is_ready() {
        eprintln!("Shared store is unreachable");
        return 1;
    }
    match store.get(WORKERS_STATUS_KEY).await {
        Some(raw) => match serde_json::from_str::<SupervisorStatus>(&raw) {
            Ok(status) => {
                println!("running: {}", status.running);
                println!("started_at: {}", status.started_at);
                println!("uptime_secs: {}", status.uptime_secs);
                for (name, stats) in status.queues {
                    println!(
                        "{name}: waiting={} active={} delayed={} completed={} failed={} paused={}",
                        stats.waiting,
                        stats.active,
                        stats.delayed,
                        stats.completed,
                        stats.failed,
                        stats.paused
                    );
                }
                0
            }
            Err(e) => {
                eprintln!("Could not parse mirrored status: {e}");
                1
            }
        },
        None => {
            eprintln!("No running supervisor found");
            1
        }
    }
}

async fn show_stats(config: &AppConfig) -> i32 {
    let store = SharedStore::connect(&config.redis).await;
    if !store.is_ready() {
        eprintln!("Shared store is unreachable");
        return 1;
    }
    let mut found = false;
    for queue in [IMPORT_QUEUE, EMAIL_QUEUE] {
        if let Some(raw) = store.get(&format!("queue:{queue}:stats")).await {
            println!("{queue}: {raw}");
            found = true;
        }
    }
    if found {
        0
    } else {
        eprintln!("No queue stats found; is the fleet running?");
        1
    }
}
