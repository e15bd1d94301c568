//! Producer-side facade over a [`WorkQueue`].

use std::sync::Arc;

use tracing::info;

use pixq_models::Job;

use crate::error::QueueResult;
use crate::message::QueueMessage;
use crate::queue::WorkQueue;

/// Publishes jobs to the single work stream.
#[derive(Clone)]
pub struct QueuePublisher {
    queue: Arc<dyn WorkQueue>,
}

impl QueuePublisher {
    pub fn new(queue: Arc<dyn WorkQueue>) -> Self {
        Self { queue }
    }

    /// Publish one chain step. Transport errors are returned to the caller.
    pub async fn publish_job(&self, job: &Job) -> QueueResult<String> {
        let id = self.queue.publish(&QueueMessage::transform(job.clone())).await?;
        metrics::counter!("pixq_jobs_published_total", "type" => job.job_type().as_str()).increment(1);
        info!(
            job_id = %job.id,
            image_id = %job.image_id,
            job_type = %job.job_type(),
            "Published job as message {}", id
        );
        Ok(id)
    }

    /// Publish a single-stage re-encode of the object stored under `name`.
    pub async fn publish_encode(&self, name: &str) -> QueueResult<String> {
        let id = self.queue.publish(&QueueMessage::encode(name)).await?;
        metrics::counter!("pixq_jobs_published_total", "type" => "encode").increment(1);
        info!("Published encode of {} as message {}", name, id);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryQueue;
    use pixq_models::{ImageId, TransformParams};

    #[tokio::test]
    async fn test_publish_job_wraps_in_envelope() {
        let queue = Arc::new(MemoryQueue::default());
        let publisher = QueuePublisher::new(queue.clone());
        let job = Job::new(
            ImageId::from("img"),
            TransformParams::CropByPercentage { percentage: 50.0 },
            "images/img.jpg",
            "outputs/img/j.jpg",
        );

        publisher.publish_job(&job).await.unwrap();

        let published = queue.published();
        assert_eq!(published.len(), 1);
        let message = QueueMessage::from_payload(&published[0]).unwrap();
        assert_eq!(message.job_id(), Some(&job.id));
    }

    #[tokio::test]
    async fn test_publish_encode() {
        let queue = Arc::new(MemoryQueue::default());
        let publisher = QueuePublisher::new(queue.clone());

        publisher.publish_encode("movie.mov").await.unwrap();

        let message = QueueMessage::from_payload(&queue.published()[0]).unwrap();
        assert_eq!(message.label(), "encode:movie.mov");
    }
}
