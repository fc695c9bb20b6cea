//! Stage worker binary.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vedit_media::FfmpegEngine;
use vedit_queue::RedisStageQueue;
use vedit_store::RedisJobStore;
use vedit_worker::{StageExecutor, WorkerConfig};

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("vedit=info,vedit_worker=info,vedit_media=info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting vedit-worker");

    let config = match WorkerConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Invalid worker configuration: {}", e);
            std::process::exit(1);
        }
    };
    info!("Worker config: {:?}", config);

    if let Some(port) = config.metrics_port {
        if let Err(e) = vedit_worker::metrics::init_metrics(port) {
            error!("Failed to start metrics endpoint: {}", e);
            std::process::exit(1);
        }
        info!("Metrics served on port {}", port);
    }

    if let Err(e) = vedit_media::check_ffmpeg() {
        error!("Transcoding engine unavailable: {}", e);
        std::process::exit(1);
    }

    let queue = match RedisStageQueue::from_env() {
        Ok(q) => q,
        Err(e) => {
            error!("Failed to create stage queue: {}", e);
            std::process::exit(1);
        }
    };

    let store = match RedisJobStore::from_env() {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to create job store: {}", e);
            std::process::exit(1);
        }
    };

    let executor = Arc::new(StageExecutor::new(
        config,
        Arc::new(store),
        Arc::new(queue),
        Arc::new(FfmpegEngine::new()),
    ));

    // Setup signal handlers
    let signal_executor = Arc::clone(&executor);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            signal_executor.shutdown();
        }
    });

    if let Err(e) = executor.run().await {
        error!("Executor error: {}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}
