//! In-memory record store.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use pixq_models::{Image, ImageId, Job, JobId};

use crate::error::{FirestoreError, FirestoreResult};
use crate::store::{JobStore, StatusUpdate};

#[derive(Default)]
struct Records {
    images: HashMap<ImageId, Image>,
    jobs: HashMap<JobId, Job>,
    /// Remaining injected failures for `update_status`.
    failing_updates: u32,
}

/// `JobStore` kept in process memory, with the same transition rules as Firestore.
#[derive(Default)]
pub struct MemoryJobStore {
    records: Mutex<Records>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> MutexGuard<'_, Records> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next `count` status updates fail with a transient server error.
    pub fn fail_next_updates(&self, count: u32) {
        self.records().failing_updates = count;
    }

    pub fn job_count(&self) -> usize {
        self.records().jobs.len()
    }

    /// All jobs of an image, in no particular order.
    pub fn jobs_for_image(&self, image_id: &ImageId) -> Vec<Job> {
        self.records()
            .jobs
            .values()
            .filter(|j| &j.image_id == image_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert_image(&self, image: &Image) -> FirestoreResult<()> {
        let mut records = self.records();
        if records.images.contains_key(&image.id) {
            return Err(FirestoreError::AlreadyExists(format!("images/{}", image.id)));
        }
        records.images.insert(image.id.clone(), image.clone());
        Ok(())
    }

    async fn get_image(&self, image_id: &ImageId) -> FirestoreResult<Option<Image>> {
        Ok(self.records().images.get(image_id).cloned())
    }

    async fn insert_jobs(&self, jobs: &[Job]) -> FirestoreResult<()> {
        let mut records = self.records();
        if let Some(existing) = jobs.iter().find(|j| records.jobs.contains_key(&j.id)) {
            return Err(FirestoreError::AlreadyExists(format!("jobs/{}", existing.id)));
        }
        for job in jobs {
            records.jobs.insert(job.id.clone(), job.clone());
        }
        Ok(())
    }

    async fn get_job(&self, job_id: &JobId) -> FirestoreResult<Option<Job>> {
        Ok(self.records().jobs.get(job_id).cloned())
    }

    async fn update_status(&self, job_id: &JobId, update: StatusUpdate) -> FirestoreResult<Job> {
        let mut records = self.records();
        if records.failing_updates > 0 {
            records.failing_updates -= 1;
            return Err(FirestoreError::ServerError(503, "injected failure".to_string()));
        }

        let job = records
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| FirestoreError::not_found(format!("jobs/{}", job_id)))?;

        if !job.status.can_transition_to(update.status) {
            return Err(FirestoreError::InvalidTransition {
                job_id: job_id.to_string(),
                from: job.status.to_string(),
                to: update.status.to_string(),
            });
        }

        update.apply(job);
        Ok(job.clone())
    }
}
