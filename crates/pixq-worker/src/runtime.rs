//! Process-level supervision of consumer tasks.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::consumer::{QueueConsumer, WorkerContext};

/// Runs `consumers` receive loops; each also claims stalled deliveries.
pub struct WorkerRuntime {
    ctx: WorkerContext,
    worker_id: String,
    shutdown: watch::Sender<bool>,
}

impl WorkerRuntime {
    pub fn new(ctx: WorkerContext) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            ctx,
            worker_id: format!("worker-{}", Uuid::new_v4()),
            shutdown,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Handle that stops the runtime when sent `true`.
    pub fn shutdown_handle(&self) -> watch::Sender<bool> {
        self.shutdown.clone()
    }

    /// Run until shutdown is signalled, then wait for in-flight deliveries.
    pub async fn run(&self) {
        let consumers = self.ctx.config.consumers.max(1);
        info!(
            "Starting {} with {} consumer(s), work dir {}",
            self.worker_id,
            consumers,
            self.ctx.config.work_dir.display()
        );

        let tasks: Vec<JoinHandle<()>> = (0..consumers)
            .map(|i| {
                let consumer = Arc::new(QueueConsumer::new(format!("{}-{}", self.worker_id, i), &self.ctx));
                let shutdown = self.shutdown.subscribe();
                tokio::spawn(async move { consumer.run(shutdown).await })
            })
            .collect();

        let mut shutdown_rx = self.shutdown.subscribe();
        while !*shutdown_rx.borrow() {
            if shutdown_rx.changed().await.is_err() {
                break;
            }
        }

        info!("Shutdown requested, waiting for in-flight deliveries");
        let timeout = self.ctx.config.shutdown_timeout;
        if tokio::time::timeout(timeout, join_all(tasks)).await.is_err() {
            warn!(
                "Consumers did not stop within {:?}; unacked deliveries will be claimed by other workers",
                timeout
            );
        }
        info!("Worker {} stopped", self.worker_id);
    }
}
