//! Transformation worker binary.

use std::net::SocketAddr;
use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pixq_firestore::FirestoreJobStore;
use pixq_media::MediaTransformer;
use pixq_queue::JobQueue;
use pixq_storage::S3Client;
use pixq_worker::{WorkerConfig, WorkerContext, WorkerRuntime};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        eprintln!("rustls crypto provider was already installed");
    }

    dotenvy::dotenv().ok();
    init_tracing();

    info!("Starting pixq-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    if config.metrics_port != 0 {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
        if let Err(e) = PrometheusBuilder::new().with_http_listener(addr).install() {
            error!("Failed to start metrics exporter on {}: {}", addr, e);
            std::process::exit(1);
        }
        info!("Metrics exposed on {}", addr);
    }

    let queue = match JobQueue::from_env() {
        Ok(q) => q,
        Err(e) => {
            error!("Failed to create job queue: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = config.validate(queue.config().visibility_timeout) {
        error!("Invalid worker config: {}", e);
        std::process::exit(1);
    }
    if let Err(e) = queue.init().await {
        error!("Failed to create consumer group: {}", e);
        std::process::exit(1);
    }

    let objects = match S3Client::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to create storage client: {}", e);
            std::process::exit(1);
        }
    };

    let store = match FirestoreJobStore::from_env().await {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to create Firestore client: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = tokio::fs::create_dir_all(&config.work_dir).await {
        error!("Failed to create work dir {}: {}", config.work_dir.display(), e);
        std::process::exit(1);
    }

    let ctx = WorkerContext {
        queue: Arc::new(queue),
        store: Arc::new(store),
        objects: Arc::new(objects),
        transformer: Arc::new(MediaTransformer::default()),
        config,
    };
    let runtime = WorkerRuntime::new(ctx);

    let stop = runtime.shutdown_handle();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Received shutdown signal");
        let _ = stop.send(true);
    });

    runtime.run().await;
    info!("Worker shutdown complete");
}

fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let mut env_filter = EnvFilter::from_default_env();
    if let Ok(directive) = "pixq=info".parse() {
        env_filter = env_filter.add_directive(directive);
    }

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
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
