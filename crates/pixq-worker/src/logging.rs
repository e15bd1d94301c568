//! Structured per-delivery logging.

use tracing::{error, info, warn, Span};

use pixq_models::Job;

/// Logs delivery events with the job's identifying fields attached.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    image_id: String,
    job_type: String,
    attempt: u32,
}

impl JobLogger {
    pub fn for_job(job: &Job, attempt: u32) -> Self {
        Self {
            job_id: job.id.to_string(),
            image_id: job.image_id.to_string(),
            job_type: job.job_type().to_string(),
            attempt,
        }
    }

    /// Logger for a single-stage encode of `name`.
    pub fn for_encode(name: &str, attempt: u32) -> Self {
        Self {
            job_id: format!("encode:{}", name),
            image_id: String::new(),
            job_type: "encode".to_string(),
            attempt,
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            image_id = %self.image_id,
            job_type = %self.job_type,
            attempt = self.attempt,
            "Job started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            job_type = %self.job_type,
            attempt = self.attempt,
            "Job progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            image_id = %self.image_id,
            job_type = %self.job_type,
            attempt = self.attempt,
            "Job warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            image_id = %self.image_id,
            job_type = %self.job_type,
            attempt = self.attempt,
            "Job error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            image_id = %self.image_id,
            job_type = %self.job_type,
            attempt = self.attempt,
            "Job completed: {}", message
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Span covering the whole delivery.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            image_id = %self.image_id,
            job_type = %self.job_type,
            attempt = self.attempt
        )
    }
}
