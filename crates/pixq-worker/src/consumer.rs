//! Queue consumer: one delivery at a time, acknowledged only after the work
//! is durable.
//!
//! Every delivery ends in exactly one of ack, requeue or discard:
//!
//! - undecodable payload: discard (the dead-letter copy keeps the raw bytes)
//! - job already `done`: ack, then publish the successor if it is still pending
//! - job already `failed`: discard
//! - otherwise: mark `inProgress`, fetch, transform, upload, mark `done`, ack,
//!   and only then publish the successor
//! - transient failure: requeue until the delivery ceiling, then dead-letter
//!   and mark `failed`
//! - validation or permanent failure: discard and mark `failed`
//!
//! Stalled deliveries are claimed from inside the same loop, one at a time,
//! so a consumer never holds more than one unresolved delivery.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, error, info, warn, Instrument};

use pixq_firestore::{FirestoreError, JobStore, StatusUpdate};
use pixq_media::Transformer;
use pixq_models::{Job, JobId, JobStatus};
use pixq_queue::{Delivery, QueueJob, QueuePublisher, WorkQueue};
use pixq_storage::{ObjectStore, Visibility};

use crate::config::WorkerConfig;
use crate::error::{FailureClass, WorkerError, WorkerResult};
use crate::executor::TransformExecutor;
use crate::fetcher::MediaFetcher;
use crate::logging::JobLogger;
use crate::metrics;
use crate::retry::{retry_async, FailureTracker, RetryConfig};

/// Key prefix for single-stage encode outputs.
pub const ENCODED_PREFIX: &str = "encoded";

/// Pause after an empty receive so non-blocking queues do not spin.
const IDLE_BACKOFF: Duration = Duration::from_millis(50);

/// How a delivery was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Acked,
    Requeued,
    /// Dropped without retry
    Discarded,
    /// Dropped after exhausting its deliveries
    DeadLettered,
    /// Work is durable but the ack was refused; the message will come back
    AckFailed,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Acked => "acked",
            Outcome::Requeued => "requeued",
            Outcome::Discarded => "discarded",
            Outcome::DeadLettered => "dead_lettered",
            Outcome::AckFailed => "ack_failed",
        }
    }
}

/// Shared handles every consumer of a process works with.
#[derive(Clone)]
pub struct WorkerContext {
    pub queue: Arc<dyn WorkQueue>,
    pub store: Arc<dyn JobStore>,
    pub objects: Arc<dyn ObjectStore>,
    pub transformer: Arc<dyn Transformer>,
    pub config: WorkerConfig,
}

/// Result of running a chained job up to the point of acking.
enum Settled {
    /// Durably done; ack, then hand off to the successor
    Done { successor: Option<JobId> },
    /// Terminally failed earlier; discard
    AlreadyFailed(String),
}

/// Storage key for the encoded copy of `name`, with the produced extension.
pub fn encoded_key(name: &str, output: &Path) -> String {
    let name = name.trim_start_matches('/');
    let file_start = name.rfind('/').map(|i| i + 1).unwrap_or(0);
    let base = match name[file_start..].rfind('.') {
        Some(i) if i > 0 => &name[..file_start + i],
        _ => name,
    };
    let ext = output
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    format!("{}/{}{}", ENCODED_PREFIX, base, ext)
}

/// A single logical consumer with prefetch 1.
pub struct QueueConsumer {
    name: String,
    queue: Arc<dyn WorkQueue>,
    publisher: QueuePublisher,
    store: Arc<dyn JobStore>,
    objects: Arc<dyn ObjectStore>,
    fetcher: MediaFetcher,
    executor: TransformExecutor,
    job_timeout: Duration,
    claim_interval: Duration,
    publish_retry: RetryConfig,
}

impl QueueConsumer {
    pub fn new(name: impl Into<String>, ctx: &WorkerContext) -> Self {
        Self {
            name: name.into(),
            queue: Arc::clone(&ctx.queue),
            publisher: QueuePublisher::new(Arc::clone(&ctx.queue)),
            store: Arc::clone(&ctx.store),
            objects: Arc::clone(&ctx.objects),
            fetcher: MediaFetcher::new(Arc::clone(&ctx.objects), &ctx.config.work_dir),
            executor: TransformExecutor::new(Arc::clone(&ctx.transformer)),
            job_timeout: ctx.config.job_timeout,
            claim_interval: ctx.config.claim_interval,
            publish_retry: RetryConfig::new("publish_successor"),
        }
    }

    /// Override the backoff used when publishing successors.
    pub fn with_publish_retry(mut self, config: RetryConfig) -> Self {
        self.publish_retry = config;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Receive and resolve at most one delivery.
    pub async fn process_next(&self) -> WorkerResult<Option<Outcome>> {
        match self.queue.receive(&self.name).await? {
            Some(delivery) => Ok(Some(self.handle(delivery).await)),
            None => Ok(None),
        }
    }

    /// Take over one stalled delivery and resolve it before returning.
    pub async fn claim_stale(&self) -> WorkerResult<Option<Outcome>> {
        let Some(delivery) = self.queue.claim_stale(&self.name).await? else {
            return Ok(None);
        };
        info!(
            "Consumer {} claimed stalled delivery {} (attempt {})",
            self.name, delivery.id, delivery.attempt
        );
        metrics::record_claimed();
        Ok(Some(self.handle(delivery).await))
    }

    /// Receive loop. Stops reading once `shutdown` flips; the in-flight
    /// delivery is always resolved first.
    ///
    /// Every `claim_interval` the loop drains stalled deliveries one by one
    /// before going back to fresh ones.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("Consumer {} started", self.name);
        let mut failures = FailureTracker::new(3);
        let mut claim_failures = FailureTracker::new(3);
        let mut last_claim: Option<Instant> = None;

        loop {
            if *shutdown.borrow() {
                break;
            }

            if last_claim.map_or(true, |at| at.elapsed() >= self.claim_interval) {
                match self.claim_stale().await {
                    Ok(Some(_)) => {
                        claim_failures.record_success();
                        continue;
                    }
                    Ok(None) => claim_failures.record_success(),
                    Err(e) => {
                        if claim_failures.record_failure() {
                            warn!("Consumer {} failed to claim stalled deliveries: {}", self.name, e);
                        }
                    }
                }
                last_claim = Some(Instant::now());
            }

            let received = tokio::select! {
                _ = shutdown.changed() => break,
                received = self.queue.receive(&self.name) => received,
            };

            match received {
                Ok(Some(delivery)) => {
                    failures.record_success();
                    self.handle(delivery).await;
                }
                Ok(None) => {
                    failures.record_success();
                    tokio::time::sleep(IDLE_BACKOFF).await;
                }
                Err(e) => {
                    if failures.record_failure() {
                        error!("Consumer {} failed to receive: {}", self.name, e);
                    }
                    tokio::time::sleep(failures.backoff()).await;
                }
            }
        }

        info!("Consumer {} stopped", self.name);
    }

    /// Resolve one delivery.
    pub async fn handle(&self, delivery: Delivery) -> Outcome {
        let outcome = self.dispatch(&delivery).await;
        metrics::record_delivery(outcome.as_str());
        debug!("Delivery {} resolved as {}", delivery.id, outcome.as_str());
        outcome
    }

    async fn dispatch(&self, delivery: &Delivery) -> Outcome {
        let message = match delivery.decode() {
            Ok(message) => message,
            Err(e) => {
                warn!("Discarding undecodable delivery {}: {}", delivery.id, e);
                return self
                    .discard(delivery, &format!("malformed message: {}", e), Outcome::Discarded)
                    .await;
            }
        };

        match message.job {
            QueueJob::Transform { job } => {
                let logger = JobLogger::for_job(&job, delivery.attempt);
                let span = logger.create_span();
                self.handle_transform(delivery, job, &logger).instrument(span).await
            }
            QueueJob::Encode { name } => {
                let logger = JobLogger::for_encode(&name, delivery.attempt);
                let span = logger.create_span();
                self.handle_encode(delivery, &name, &logger).instrument(span).await
            }
        }
    }

    // ========================================================================
    // Chained transforms
    // ========================================================================

    async fn handle_transform(&self, delivery: &Delivery, queued: Job, logger: &JobLogger) -> Outcome {
        if let Some(outcome) = self.over_ceiling(delivery, Some(&queued.id), logger).await {
            return outcome;
        }

        match self
            .within_deadline(self.process_transform(delivery, &queued, logger))
            .await
        {
            Ok(Settled::Done { successor }) => {
                if !self.ack(delivery).await {
                    // Redelivery finds the job done and hands off from there
                    return Outcome::AckFailed;
                }
                if let Some(next) = successor {
                    self.publish_successor(&next, logger).await;
                }
                Outcome::Acked
            }
            Ok(Settled::AlreadyFailed(reason)) => {
                logger.log_warning(&format!("already failed, discarding redelivery: {}", reason));
                self.discard(delivery, &reason, Outcome::Discarded).await
            }
            Err(e) => self.fail(delivery, Some(&queued.id), e, logger).await,
        }
    }

    async fn process_transform(&self, delivery: &Delivery, queued: &Job, logger: &JobLogger) -> WorkerResult<Settled> {
        let job = self
            .store
            .get_job(&queued.id)
            .await?
            .ok_or_else(|| WorkerError::job_not_found(queued.id.as_str()))?;

        match job.status {
            JobStatus::Done => {
                logger.log_warning("already done, acknowledging redelivery");
                return Ok(Settled::Done {
                    successor: job.next_job_id,
                });
            }
            JobStatus::Failed => {
                return Ok(Settled::AlreadyFailed(
                    job.error_message.unwrap_or_else(|| "job already failed".to_string()),
                ));
            }
            JobStatus::Pending | JobStatus::InProgress => {}
        }

        if let Err(e) = self
            .store
            .update_status(&job.id, StatusUpdate::in_progress(delivery.attempt))
            .await
        {
            return self.settle_from_record(&job.id, e).await;
        }
        logger.log_start(&format!("{} -> {}", job.source_key, job.output_key));

        let input = self.fetcher.ensure(&job.source_key).await?;
        let output = self.executor.execute(&input, &job).await?;
        logger.log_progress(&format!(
            "transformed to {}x{}",
            output.width.unwrap_or_default(),
            output.height.unwrap_or_default()
        ));

        let data = tokio::fs::read(&output.path).await?;
        self.objects
            .put(&job.output_key, data, &output.content_type, Visibility::PublicRead)
            .await?;

        if let Err(e) = self.fetcher.adopt(&job.output_key, &output.path).await {
            logger.log_warning(&format!("could not cache output locally: {}", e));
        }

        if let Err(e) = self.store.update_status(&job.id, StatusUpdate::done()).await {
            return self.settle_from_record(&job.id, e).await;
        }
        logger.log_completion(&format!("uploaded {}", job.output_key));

        Ok(Settled::Done {
            successor: job.next_job_id,
        })
    }

    /// A status write was refused; decide from what the record says now.
    async fn settle_from_record(&self, job_id: &JobId, err: FirestoreError) -> WorkerResult<Settled> {
        if !matches!(err, FirestoreError::InvalidTransition { .. }) {
            return Err(err.into());
        }
        match self.store.get_job(job_id).await? {
            Some(job) if job.status == JobStatus::Done => Ok(Settled::Done {
                successor: job.next_job_id,
            }),
            Some(job) if job.status == JobStatus::Failed => Ok(Settled::AlreadyFailed(
                job.error_message.unwrap_or_else(|| "job already failed".to_string()),
            )),
            _ => Err(err.into()),
        }
    }

    /// Publish the successor if it has not been picked up yet.
    async fn publish_successor(&self, next: &JobId, logger: &JobLogger) {
        let result = retry_async(&self.publish_retry, || self.publish_if_pending(next)).await;

        match result {
            Ok(true) => logger.log_progress(&format!("published successor {}", next)),
            Ok(false) => debug!("Successor {} is no longer pending", next),
            Err((e, attempts)) => {
                metrics::record_successor_publish_failure();
                logger.log_error(&format!(
                    "successor {} left pending after {} publish attempts: {}",
                    next, attempts, e
                ));
            }
        }
    }

    async fn publish_if_pending(&self, next: &JobId) -> WorkerResult<bool> {
        let job = self
            .store
            .get_job(next)
            .await?
            .ok_or_else(|| WorkerError::job_not_found(next.as_str()))?;
        if job.status != JobStatus::Pending {
            return Ok(false);
        }
        self.publisher.publish_job(&job).await?;
        Ok(true)
    }

    // ========================================================================
    // Single-stage encodes
    // ========================================================================

    async fn handle_encode(&self, delivery: &Delivery, name: &str, logger: &JobLogger) -> Outcome {
        if let Some(outcome) = self.over_ceiling(delivery, None, logger).await {
            return outcome;
        }

        match self.within_deadline(self.process_encode(name, logger)).await {
            Ok(()) => {
                if self.ack(delivery).await {
                    Outcome::Acked
                } else {
                    Outcome::AckFailed
                }
            }
            Err(e) => self.fail(delivery, None, e, logger).await,
        }
    }

    async fn process_encode(&self, name: &str, logger: &JobLogger) -> WorkerResult<()> {
        logger.log_start(name);
        let input = self.fetcher.ensure(name).await?;
        let output = self.executor.encode(&input).await?;

        let key = encoded_key(name, &output.path);
        let data = tokio::fs::read(&output.path).await?;
        self.objects
            .put(&key, data, &output.content_type, Visibility::PublicRead)
            .await?;

        if let Err(e) = tokio::fs::remove_file(&output.path).await {
            debug!("Could not remove {}: {}", output.path.display(), e);
        }
        logger.log_completion(&format!("uploaded {}", key));
        Ok(())
    }

    // ========================================================================
    // Resolution
    // ========================================================================

    /// Bound one unit of work by the job deadline.
    async fn within_deadline<T>(&self, work: impl Future<Output = WorkerResult<T>>) -> WorkerResult<T> {
        tokio::time::timeout(self.job_timeout, work)
            .await
            .unwrap_or(Err(WorkerError::Timeout(self.job_timeout)))
    }

    /// Dead-letter deliveries that came back more often than allowed, e.g.
    /// after repeated consumer crashes.
    async fn over_ceiling(&self, delivery: &Delivery, job_id: Option<&JobId>, logger: &JobLogger) -> Option<Outcome> {
        let max = self.queue.max_deliveries();
        if delivery.attempt <= max {
            return None;
        }
        let reason = format!("delivered {} times, limit is {}", delivery.attempt, max);
        logger.log_error(&reason);
        self.mark_failed(job_id, &reason).await;
        Some(self.discard(delivery, &reason, Outcome::DeadLettered).await)
    }

    async fn fail(&self, delivery: &Delivery, job_id: Option<&JobId>, err: WorkerError, logger: &JobLogger) -> Outcome {
        let class = err.class();
        let reason = err.to_string();
        let max = self.queue.max_deliveries();

        match class {
            FailureClass::Transient if delivery.attempt < max => {
                logger.log_warning(&format!(
                    "attempt {}/{} failed, requeueing: {}",
                    delivery.attempt, max, reason
                ));
                if let Err(e) = self.queue.requeue(delivery).await {
                    error!("Failed to requeue delivery {}: {}", delivery.id, e);
                }
                Outcome::Requeued
            }
            FailureClass::Transient => {
                logger.log_error(&format!("giving up after {} deliveries: {}", delivery.attempt, reason));
                self.mark_failed(job_id, &reason).await;
                self.discard(
                    delivery,
                    &format!("max deliveries exceeded: {}", reason),
                    Outcome::DeadLettered,
                )
                .await
            }
            FailureClass::Validation | FailureClass::Permanent => {
                logger.log_error(&format!("{} failure: {}", class.as_str(), reason));
                self.mark_failed(job_id, &reason).await;
                self.discard(delivery, &reason, Outcome::Discarded).await
            }
        }
    }

    async fn mark_failed(&self, job_id: Option<&JobId>, reason: &str) {
        let Some(job_id) = job_id else {
            return;
        };
        match self.store.update_status(job_id, StatusUpdate::failed(reason)).await {
            Ok(_) => {}
            Err(e @ (FirestoreError::InvalidTransition { .. } | FirestoreError::NotFound(_))) => {
                debug!("Not marking job {} failed: {}", job_id, e);
            }
            Err(e) => warn!("Failed to mark job {} failed: {}", job_id, e),
        }
    }

    async fn ack(&self, delivery: &Delivery) -> bool {
        match self.queue.ack(delivery).await {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to ack delivery {}: {}", delivery.id, e);
                false
            }
        }
    }

    async fn discard(&self, delivery: &Delivery, reason: &str, outcome: Outcome) -> Outcome {
        if let Err(e) = self.queue.discard(delivery, reason).await {
            error!("Failed to discard delivery {}: {}", delivery.id, e);
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoded_key_swaps_extension() {
        assert_eq!(
            encoded_key("clips/a.mov", Path::new("/w/cache/clips/a-encoded.mp4")),
            "encoded/clips/a.mp4"
        );
        assert_eq!(
            encoded_key("photo.png", Path::new("/w/photo-encoded.png")),
            "encoded/photo.png"
        );
        assert_eq!(
            encoded_key("dir.v1/noext", Path::new("/w/noext-encoded")),
            "encoded/dir.v1/noext"
        );
    }
}
