//! Application state.

use std::sync::Arc;

use pixq_firestore::{FirestoreJobStore, JobStore};
use pixq_models::JobChainBuilder;
use pixq_queue::{JobQueue, QueuePublisher, WorkQueue};
use pixq_storage::{ObjectStore, S3Client};

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub objects: Arc<dyn ObjectStore>,
    pub store: Arc<dyn JobStore>,
    pub queue: Arc<dyn WorkQueue>,
    pub publisher: QueuePublisher,
    pub chains: JobChainBuilder,
}

impl AppState {
    /// Create application state backed by S3, Firestore and Redis.
    pub async fn new(config: ApiConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let objects = S3Client::from_env()?;
        let store = FirestoreJobStore::from_env().await?;
        let queue = JobQueue::from_env()?;
        queue.init().await?;

        Ok(Self::from_parts(
            config,
            Arc::new(objects),
            Arc::new(store),
            Arc::new(queue),
        ))
    }

    /// Assemble state from already-built backends.
    pub fn from_parts(
        config: ApiConfig,
        objects: Arc<dyn ObjectStore>,
        store: Arc<dyn JobStore>,
        queue: Arc<dyn WorkQueue>,
    ) -> Self {
        Self {
            config,
            objects,
            store,
            publisher: QueuePublisher::new(Arc::clone(&queue)),
            queue,
            chains: JobChainBuilder::new(),
        }
    }
}
