//! Record store contract used by the API and workers.

use async_trait::async_trait;
use tracing::debug;

use pixq_models::{Image, ImageId, Job, JobId, JobStatus};

use crate::client::FirestoreClient;
use crate::error::{FirestoreError, FirestoreResult};
use crate::repos::{ImageRepository, JobRepository};

/// A job status change.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub status: JobStatus,
    /// Delivery attempt to record, if it changed.
    pub attempts: Option<u32>,
    pub error_message: Option<String>,
}

impl StatusUpdate {
    pub fn in_progress(attempt: u32) -> Self {
        Self {
            status: JobStatus::InProgress,
            attempts: Some(attempt),
            error_message: None,
        }
    }

    pub fn done() -> Self {
        Self {
            status: JobStatus::Done,
            attempts: None,
            error_message: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            attempts: None,
            error_message: Some(error.into()),
        }
    }

    /// Apply to an in-memory job record.
    pub fn apply(&self, job: &mut Job) {
        match self.status {
            JobStatus::InProgress => job.start(self.attempts.unwrap_or(job.attempts)),
            JobStatus::Done => job.complete(),
            JobStatus::Failed => job.fail(self.error_message.clone().unwrap_or_default()),
            JobStatus::Pending => job.status = JobStatus::Pending,
        }
        if let Some(attempts) = self.attempts {
            job.attempts = attempts;
        }
    }
}

/// Persistence for Image and Job records.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert_image(&self, image: &Image) -> FirestoreResult<()>;

    async fn get_image(&self, image_id: &ImageId) -> FirestoreResult<Option<Image>>;

    /// Persist a chain atomically: either every job is stored or none is.
    async fn insert_jobs(&self, jobs: &[Job]) -> FirestoreResult<()>;

    async fn get_job(&self, job_id: &JobId) -> FirestoreResult<Option<Job>>;

    /// Move a job to a new status.
    ///
    /// Fails with `NotFound` for unknown jobs and `InvalidTransition` when the
    /// stored status does not allow the change.
    async fn update_status(&self, job_id: &JobId, update: StatusUpdate) -> FirestoreResult<Job>;
}

/// `JobStore` backed by Firestore.
#[derive(Clone)]
pub struct FirestoreJobStore {
    images: ImageRepository,
    jobs: JobRepository,
}

impl FirestoreJobStore {
    pub fn new(client: FirestoreClient) -> Self {
        Self {
            images: ImageRepository::new(client.clone()),
            jobs: JobRepository::new(client),
        }
    }

    pub async fn from_env() -> FirestoreResult<Self> {
        Ok(Self::new(FirestoreClient::from_env().await?))
    }
}

#[async_trait]
impl JobStore for FirestoreJobStore {
    async fn insert_image(&self, image: &Image) -> FirestoreResult<()> {
        self.images.create(image).await
    }

    async fn get_image(&self, image_id: &ImageId) -> FirestoreResult<Option<Image>> {
        self.images.get(image_id).await
    }

    async fn insert_jobs(&self, jobs: &[Job]) -> FirestoreResult<()> {
        self.jobs.create_chain(jobs).await
    }

    async fn get_job(&self, job_id: &JobId) -> FirestoreResult<Option<Job>> {
        Ok(self.jobs.get(job_id).await?.map(|v| v.job))
    }

    async fn update_status(&self, job_id: &JobId, update: StatusUpdate) -> FirestoreResult<Job> {
        let current = self
            .jobs
            .get(job_id)
            .await?
            .ok_or_else(|| FirestoreError::not_found(format!("jobs/{}", job_id)))?;

        let mut job = current.job;
        if !job.status.can_transition_to(update.status) {
            return Err(FirestoreError::InvalidTransition {
                job_id: job_id.to_string(),
                from: job.status.to_string(),
                to: update.status.to_string(),
            });
        }

        self.jobs
            .update_status(
                job_id,
                update.status,
                update.attempts,
                update.error_message.as_deref(),
                current.update_time.as_deref(),
            )
            .await?;

        debug!(job_id = %job_id, from = %job.status, to = %update.status, "Updated job status");
        update.apply(&mut job);
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pixq_models::TransformParams;

    #[test]
    fn test_status_update_apply() {
        let mut job = Job::new(
            ImageId::from("img"),
            TransformParams::ResizeToHeightPx { height: 10 },
            "a.png",
            "b.png",
        );

        StatusUpdate::in_progress(2).apply(&mut job);
        assert_eq!(job.status, JobStatus::InProgress);
        assert_eq!(job.attempts, 2);

        StatusUpdate::failed("decode error").apply(&mut job);
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("decode error"));
        assert_eq!(job.attempts, 2);
    }
}
