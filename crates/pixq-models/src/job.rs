//! Transformation job records.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::image::ImageId;
use crate::params::{JobType, TransformParams};

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Job lifecycle status.
///
/// `pending -> inProgress -> done | failed`. A redelivered job may move
/// `inProgress -> inProgress`; `done` and `failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub enum JobStatus {
    #[default]
    Pending,
    InProgress,
    Done,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "inProgress",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "inProgress" => Some(JobStatus::InProgress),
            "done" => Some(JobStatus::Done),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (InProgress, InProgress)
                | (InProgress, Done)
                | (Pending, Failed)
                | (InProgress, Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single transformation step of an image's chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub image_id: ImageId,
    /// Typed parameters; also carries the job type
    pub params: TransformParams,
    /// Job that becomes eligible once this one is done
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_job_id: Option<JobId>,
    #[serde(default)]
    pub status: JobStatus,
    /// Storage key this job reads
    pub source_key: String,
    /// Storage key this job writes
    pub output_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Deliveries attempted so far
    #[serde(default)]
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a pending job with no successor.
    pub fn new(
        image_id: ImageId,
        params: TransformParams,
        source_key: impl Into<String>,
        output_key: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            image_id,
            params,
            next_job_id: None,
            status: JobStatus::Pending,
            source_key: source_key.into(),
            output_key: output_key.into(),
            error_message: None,
            attempts: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn job_type(&self) -> JobType {
        self.params.job_type()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Mark as in progress for the given delivery attempt.
    pub fn start(&mut self, attempt: u32) {
        self.status = JobStatus::InProgress;
        self.attempts = attempt;
        self.updated_at = Utc::now();
    }

    pub fn complete(&mut self) {
        self.status = JobStatus::Done;
        self.error_message = None;
        self.updated_at = Utc::now();
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = JobStatus::Failed;
        self.error_message = Some(error.into());
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_job() -> Job {
        Job::new(
            ImageId::from("img-1"),
            TransformParams::ResizeToWidthPx { width: 100 },
            "images/img-1.png",
            "outputs/img-1/a.png",
        )
    }

    #[test]
    fn test_status_transitions() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::InProgress));
        assert!(JobStatus::InProgress.can_transition_to(JobStatus::InProgress));
        assert!(JobStatus::InProgress.can_transition_to(JobStatus::Done));
        assert!(JobStatus::InProgress.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Done));
        assert!(!JobStatus::Done.can_transition_to(JobStatus::InProgress));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::InProgress));
    }

    #[test]
    fn test_status_wire_names() {
        for status in [JobStatus::Pending, JobStatus::InProgress, JobStatus::Done, JobStatus::Failed] {
            assert_eq!(serde_json::to_value(status).unwrap(), serde_json::json!(status.as_str()));
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn test_job_lifecycle() {
        let mut job = sample_job();
        assert_eq!(job.status, JobStatus::Pending);

        job.start(1);
        assert_eq!(job.status, JobStatus::InProgress);
        assert_eq!(job.attempts, 1);

        job.fail("decode error");
        assert!(job.is_terminal());
        assert_eq!(job.error_message.as_deref(), Some("decode error"));
    }

    #[test]
    fn test_job_json_shape() {
        let job = sample_job();
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["params"]["jobType"], "resizeToWidthPx");
        assert_eq!(json["status"], "pending");
        assert!(json.get("nextJobId").is_none());

        let back: Job = serde_json::from_value(json).unwrap();
        assert_eq!(back, job);
    }
}
