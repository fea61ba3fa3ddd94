//! Gesture bridge
//!
//! Turns hand-pose detector frames into trigger events, routes them to local
//! capabilities or remote helper sessions, and serves the bridge HTTP API.

use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use gesture_bridge::api::{self, ApiState};
use gesture_bridge::broker::CommandBroker;
use gesture_bridge::capabilities::ConsoleCapabilities;
use gesture_bridge::cli::{self, Repl};
use gesture_bridge::config::AppConfig;
use gesture_bridge::events::{spawn_event_log, EventHub};
use gesture_bridge::paths::AppPaths;
use gesture_bridge::pipeline::FramePipeline;
use gesture_bridge::pose::{FrameInput, PoseLibrary};
use gesture_bridge::router::{Router, StaticConfirmer, CATALOG};
use gesture_bridge::store::{MemoryStore, SharedStore, SledStore};
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Pending frames between ingestion and the pipeline
const FRAME_QUEUE: usize = 64;

/// Gesture bridge - hand-pose triggers for local and remote actions
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (defaults to the detected app path)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// API port (overrides server.port)
    #[arg(short, long, env = "GESTURE_BRIDGE_PORT")]
    port: Option<u16>,

    /// Replay JSON-lines frames from a file, or '-' for stdin
    #[arg(long)]
    frames: Option<String>,

    /// Start the interactive REPL
    #[arg(long)]
    repl: bool,

    /// List available actions and exit
    #[arg(long)]
    list_actions: bool,

    /// Keep library and settings in memory only
    #[arg(long)]
    no_persist: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();

    if args.list_actions {
        print_actions();
        return Ok(());
    }

    let paths = AppPaths::detect();
    paths.ensure_directories()?;
    let _log_guard = init_logging(&args.log_level, &paths)?;

    info!("🚀 Starting gesture bridge v{}...", env!("CARGO_PKG_VERSION"));
    debug!("Paths: {:?}", paths);

    let config_path = args.config.clone().unwrap_or_else(|| paths.config.clone());
    let mut config = if config_path.exists() {
        let config = AppConfig::load(&config_path).await?;
        info!("Configuration loaded from {}", config_path.display());
        config
    } else {
        info!("No config at {}, using defaults", config_path.display());
        AppConfig::default()
    };
    if let Some(port) = args.port {
        config.server.port = port;
    }

    let store: SharedStore = if args.no_persist {
        info!("Persistence disabled, state is kept in memory");
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(SledStore::open(&paths.state_dir)?)
    };

    run_app(config, store, &args).await?;

    info!("Gesture bridge shutdown complete");
    Ok(())
}

async fn run_app(config: AppConfig, store: SharedStore, args: &Args) -> Result<()> {
    let events = EventHub::default();
    let _event_log = spawn_event_log(&events);

    let broker = CommandBroker::new(config.server.command_timeout());
    let library = Arc::new(RwLock::new(PoseLibrary::new(
        config.library.to_options(),
        store.clone(),
        Some(events.clone()),
    )));
    let router = Arc::new(
        Router::new(
            Arc::new(ConsoleCapabilities::new("console")),
            Arc::new(StaticConfirmer::new(config.safety.auto_confirm)),
            broker.clone(),
            events,
            store,
        )
        .with_library(library.clone()),
    );
    router.check_availability().await;

    let mut pipeline = FramePipeline::new(library.clone(), config.triggers.clone(), config.pose_classes.clone());
    info!(
        "✋ Frame pipeline ready: {} trigger(s), {} pose slot(s)",
        pipeline.triggers().triggers().len(),
        config.library.max_poses
    );

    let (frames_tx, mut frames_rx) = mpsc::channel::<FrameInput>(FRAME_QUEUE);
    let latest_hand = Arc::new(RwLock::new(None));

    let state = Arc::new(ApiState {
        broker,
        router: router.clone(),
        library: library.clone(),
        frames: frames_tx.clone(),
        latest_hand: latest_hand.clone(),
        ping_interval: config.server.ping_interval(),
    });
    let mut server = tokio::spawn(api::start_server(state, config.server.port, config.server.max_body_bytes));

    if let Some(source) = args.frames.clone() {
        let tx = frames_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = replay_frames(&source, tx).await {
                warn!("⚠️  Frame replay stopped: {:#}", e);
            }
        });
    }
    drop(frames_tx);

    let repl_task = args.repl.then(|| {
        let repl = Repl::new(library.clone(), router.clone());
        tokio::task::spawn_blocking(move || cli::run_repl(repl))
    });
    let repl_done = async move {
        match repl_task {
            Some(task) => task.await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(repl_done);

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    info!("Starting main loop...");
    loop {
        tokio::select! {
            Some(frame) = frames_rx.recv() => {
                let now = chrono::Utc::now().timestamp_millis().max(0) as u64;
                let fired = pipeline.process(frame, now);
                *latest_hand.write() = pipeline.capture_candidate();

                for event in fired {
                    let router = router.clone();
                    tokio::spawn(async move {
                        router.handle_fired(&event).await;
                    });
                }
            }
            result = &mut server => {
                match result {
                    Ok(Ok(())) => warn!("API server stopped"),
                    Ok(Err(e)) => error!("API server failed: {:#}", e),
                    Err(e) => error!("API server task panicked: {}", e),
                }
                break;
            }
            result = &mut repl_done => {
                match result {
                    Ok(Ok(())) => info!("REPL closed"),
                    Ok(Err(e)) => error!("REPL failed: {:#}", e),
                    Err(e) => error!("REPL task panicked: {}", e),
                }
                break;
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    server.abort();
    Ok(())
}

/// Feed JSON-lines frames from a file or stdin into the pipeline
async fn replay_frames(source: &str, tx: mpsc::Sender<FrameInput>) -> Result<()> {
    let reader: Box<dyn AsyncBufRead + Unpin + Send> = if source == "-" {
        Box::new(BufReader::new(tokio::io::stdin()))
    } else {
        let file = tokio::fs::File::open(source)
            .await
            .with_context(|| format!("Failed to open frame file: {}", source))?;
        Box::new(BufReader::new(file))
    };

    info!("📼 Replaying frames from {}", if source == "-" { "stdin" } else { source });
    let mut lines = reader.lines();
    let mut count = 0usize;
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<FrameInput>(line) {
            Ok(frame) => {
                if tx.send(frame).await.is_err() {
                    break;
                }
                count += 1;
            }
            Err(e) => warn!("⚠️  Skipping malformed frame line: {}", e),
        }
    }

    info!("Frame replay finished ({} frames)", count);
    Ok(())
}

fn print_actions() {
    println!("\n{}", "=== Available Actions ===".bold().cyan());
    for spec in CATALOG.iter() {
        println!("\n  {} {}", spec.id.to_string().bright_white(), format!("({})", spec.label).dimmed());
        println!("    {}", spec.description);
        if !spec.capabilities.is_empty() {
            let caps: Vec<&str> = spec.capabilities.iter().map(|cap| cap.as_str()).collect();
            println!("    needs: {}", caps.join(", ").yellow());
        }
    }
    println!();
}

fn init_logging(level: &str, paths: &AppPaths) -> Result<WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let file_appender = tracing_appender::rolling::daily(&paths.logs_dir, "gesture-bridge.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_writer(std::io::stderr),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(guard)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for CTRL+C: {}", e);
        std::future::pending::<()>().await;
    }
}
