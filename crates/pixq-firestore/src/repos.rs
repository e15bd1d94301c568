//! Typed repositories for Images and Jobs.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::info;

use pixq_models::{Image, ImageId, Job, JobId, JobStatus, TransformParams};

use crate::client::FirestoreClient;
use crate::error::{FirestoreError, FirestoreResult};
use crate::types::{fields, Document, FromFirestoreValue, ToFirestoreValue, Value, Write};

pub const IMAGES_COLLECTION: &str = "images";
pub const JOBS_COLLECTION: &str = "jobs";

/// Repository for image documents.
#[derive(Clone)]
pub struct ImageRepository {
    client: FirestoreClient,
}

impl ImageRepository {
    pub fn new(client: FirestoreClient) -> Self {
        Self { client }
    }

    pub async fn get(&self, image_id: &ImageId) -> FirestoreResult<Option<Image>> {
        let doc = self
            .client
            .with_retry("get_image", || {
                self.client.get_document(IMAGES_COLLECTION, image_id.as_str())
            })
            .await?;

        doc.map(|d| document_to_image(&d, image_id)).transpose()
    }

    /// Create an image record; fails if the id is already taken.
    pub async fn create(&self, image: &Image) -> FirestoreResult<()> {
        self.client
            .with_retry("create_image", || {
                self.client.create_document(
                    IMAGES_COLLECTION,
                    image.id.as_str(),
                    image_to_fields(image),
                )
            })
            .await?;
        info!("Created image record: {}", image.id);
        Ok(())
    }
}

/// Repository for job documents.
#[derive(Clone)]
pub struct JobRepository {
    client: FirestoreClient,
}

/// A job document together with its last update time.
#[derive(Debug, Clone)]
pub struct VersionedJob {
    pub job: Job,
    pub update_time: Option<String>,
}

impl JobRepository {
    pub fn new(client: FirestoreClient) -> Self {
        Self { client }
    }

    pub async fn get(&self, job_id: &JobId) -> FirestoreResult<Option<VersionedJob>> {
        let doc = self
            .client
            .with_retry("get_job", || {
                self.client.get_document(JOBS_COLLECTION, job_id.as_str())
            })
            .await?;

        doc.map(|d| {
            Ok(VersionedJob {
                job: document_to_job(&d, job_id)?,
                update_time: d.update_time.clone(),
            })
        })
        .transpose()
    }

    /// Insert a whole chain in one atomic commit; no job is stored if any id exists.
    pub async fn create_chain(&self, jobs: &[Job]) -> FirestoreResult<()> {
        let writes: Vec<Write> = jobs
            .iter()
            .map(|job| {
                Write::create(Document::named(
                    self.client.full_document_name(JOBS_COLLECTION, job.id.as_str()),
                    job_to_fields(job),
                ))
            })
            .collect();

        self.client
            .with_retry("create_chain", || self.client.commit(writes.clone()))
            .await?;
        info!(jobs = jobs.len(), "Created job chain");
        Ok(())
    }

    /// Write a status change, guarded by the update time seen when it was read.
    pub async fn update_status(
        &self,
        job_id: &JobId,
        status: JobStatus,
        attempts: Option<u32>,
        error_message: Option<&str>,
        update_time: Option<&str>,
    ) -> FirestoreResult<()> {
        let mut updates: Vec<(&str, Value)> = vec![
            ("status", status.as_str().to_firestore_value()),
            ("updated_at", Utc::now().to_firestore_value()),
        ];
        if let Some(attempts) = attempts {
            updates.push(("attempts", attempts.to_firestore_value()));
        }
        if let Some(msg) = error_message {
            updates.push(("error_message", msg.to_firestore_value()));
        }
        let mask: Vec<&str> = updates.iter().map(|(k, _)| *k).collect();
        let fields = fields(updates.iter().cloned());

        self.client
            .with_retry("update_job_status", || {
                self.client.update_document(
                    JOBS_COLLECTION,
                    job_id.as_str(),
                    fields.clone(),
                    &mask,
                    update_time,
                )
            })
            .await?;
        Ok(())
    }
}

// =============================================================================
// Document mapping
// =============================================================================

fn image_to_fields(image: &Image) -> HashMap<String, Value> {
    fields([
        ("storage_key", image.storage_key.to_firestore_value()),
        ("original_file_name", image.original_file_name.to_firestore_value()),
        ("content_type", image.content_type.to_firestore_value()),
        ("created_at", image.created_at.to_firestore_value()),
    ])
}

fn document_to_image(doc: &Document, image_id: &ImageId) -> FirestoreResult<Image> {
    Ok(Image {
        id: image_id.clone(),
        storage_key: doc.require("storage_key")?,
        original_file_name: doc.get("original_file_name").unwrap_or_default(),
        content_type: doc.get("content_type").unwrap_or_default(),
        created_at: doc.get("created_at").unwrap_or_else(Utc::now),
    })
}

pub(crate) fn job_to_fields(job: &Job) -> HashMap<String, Value> {
    // Serializing the tagged enum cannot fail; fall back to null regardless.
    let params = serde_json::to_value(&job.params).unwrap_or(serde_json::Value::Null);

    fields([
        ("image_id", job.image_id.as_str().to_firestore_value()),
        ("job_type", job.job_type().as_str().to_firestore_value()),
        ("params", params.to_firestore_value()),
        (
            "next_job_id",
            job.next_job_id
                .as_ref()
                .map(|id| id.as_str())
                .to_firestore_value(),
        ),
        ("status", job.status.as_str().to_firestore_value()),
        ("source_key", job.source_key.to_firestore_value()),
        ("output_key", job.output_key.to_firestore_value()),
        ("error_message", job.error_message.clone().to_firestore_value()),
        ("attempts", job.attempts.to_firestore_value()),
        ("created_at", job.created_at.to_firestore_value()),
        ("updated_at", job.updated_at.to_firestore_value()),
    ])
}

pub(crate) fn document_to_job(doc: &Document, job_id: &JobId) -> FirestoreResult<Job> {
    let params_json: serde_json::Value = doc.require("params")?;
    let params: TransformParams = serde_json::from_value(params_json).map_err(|e| {
        FirestoreError::invalid_response(format!("Job {} has malformed params: {}", job_id, e))
    })?;

    let status_str: String = doc.require("status")?;
    let status = JobStatus::parse(&status_str).ok_or_else(|| {
        FirestoreError::invalid_response(format!(
            "Job {} has unknown status '{}'",
            job_id, status_str
        ))
    })?;

    let timestamp = |key: &str| -> DateTime<Utc> { doc.get(key).unwrap_or_else(Utc::now) };

    Ok(Job {
        id: job_id.clone(),
        image_id: ImageId::from_string(doc.require::<String>("image_id")?),
        params,
        next_job_id: doc.get::<String>("next_job_id").map(JobId::from_string),
        status,
        source_key: doc.require("source_key")?,
        output_key: doc.require("output_key")?,
        error_message: doc.get("error_message"),
        attempts: doc.get("attempts").unwrap_or(0),
        created_at: timestamp("created_at"),
        updated_at: timestamp("updated_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_job() -> Job {
        let mut job = Job::new(
            ImageId::from("img-1"),
            TransformParams::ResizeByPercentage { percentage: 50.0 },
            "images/img-1.png",
            "outputs/img-1/job.png",
        );
        job.next_job_id = Some(JobId::from("job-2"));
        job
    }

    #[test]
    fn test_job_fields_round_trip_through_document() {
        let job = sample_job();
        let doc = Document::new(job_to_fields(&job));
        let restored = document_to_job(&doc, &job.id).unwrap();

        assert_eq!(restored.params, job.params);
        assert_eq!(restored.next_job_id, job.next_job_id);
        assert_eq!(restored.status, JobStatus::Pending);
        assert_eq!(restored.source_key, job.source_key);
        assert!(restored.error_message.is_none());
    }

    #[test]
    fn test_terminal_job_has_null_successor() {
        let mut job = sample_job();
        job.next_job_id = None;
        let fields = job_to_fields(&job);
        assert_eq!(fields.get("next_job_id"), Some(&Value::NullValue(())));

        let restored = document_to_job(&Document::new(fields), &job.id).unwrap();
        assert!(restored.next_job_id.is_none());
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        let job = sample_job();
        let mut fields = job_to_fields(&job);
        fields.insert("status".into(), "paused".to_firestore_value());
        let err = document_to_job(&Document::new(fields), &job.id).unwrap_err();
        assert!(matches!(err, FirestoreError::InvalidResponse(_)));
    }

    #[test]
    fn test_image_requires_storage_key() {
        let doc = Document::new(fields([("content_type", "image/png".to_firestore_value())]));
        assert!(document_to_image(&doc, &ImageId::from("img")).is_err());
    }
}
