//! Versioned queue message envelope.
//!
//! Every payload on the stream has the shape
//! `{"version": 1, "job": {"type": "...", ...}}`. Receivers reject anything
//! else, including other versions.

use serde::{Deserialize, Serialize};

use pixq_models::{Job, JobId};

use crate::error::{QueueError, QueueResult};

/// Current envelope version.
pub const MESSAGE_VERSION: u32 = 1;

/// Work carried by a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueJob {
    /// One step of an image's transformation chain
    Transform { job: Job },
    /// Single-stage re-encode of a stored object
    Encode { name: String },
}

/// Envelope published to the stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub version: u32,
    pub job: QueueJob,
}

#[derive(Deserialize)]
struct VersionProbe {
    version: Option<u32>,
}

impl QueueMessage {
    pub fn transform(job: Job) -> Self {
        Self {
            version: MESSAGE_VERSION,
            job: QueueJob::Transform { job },
        }
    }

    pub fn encode(name: impl Into<String>) -> Self {
        Self {
            version: MESSAGE_VERSION,
            job: QueueJob::Encode { name: name.into() },
        }
    }

    /// Serialize to the wire payload.
    pub fn to_payload(&self) -> QueueResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a wire payload, rejecting unknown versions and shapes.
    pub fn from_payload(payload: &str) -> QueueResult<Self> {
        let probe: VersionProbe = serde_json::from_str(payload)
            .map_err(|e| QueueError::malformed(format!("not a message envelope: {}", e)))?;

        match probe.version {
            Some(MESSAGE_VERSION) => {}
            Some(other) => return Err(QueueError::UnsupportedVersion(other)),
            None => return Err(QueueError::malformed("missing version")),
        }

        serde_json::from_str(payload).map_err(|e| QueueError::malformed(e.to_string()))
    }

    /// Job ID for chained work.
    pub fn job_id(&self) -> Option<&JobId> {
        match &self.job {
            QueueJob::Transform { job } => Some(&job.id),
            QueueJob::Encode { .. } => None,
        }
    }

    /// Short identifier for logs.
    pub fn label(&self) -> String {
        match &self.job {
            QueueJob::Transform { job } => format!("transform:{}", job.id),
            QueueJob::Encode { name } => format!("encode:{}", name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pixq_models::{ImageId, TransformParams};
    use serde_json::json;

    fn job() -> Job {
        Job::new(
            ImageId::from("img"),
            TransformParams::ResizeToWidthPx { width: 100 },
            "images/img.png",
            "outputs/img/j.png",
        )
    }

    #[test]
    fn test_transform_payload_shape() {
        let message = QueueMessage::transform(job());
        let value: serde_json::Value = serde_json::from_str(&message.to_payload().unwrap()).unwrap();
        assert_eq!(value["version"], 1);
        assert_eq!(value["job"]["type"], "transform");
        assert_eq!(value["job"]["job"]["params"]["width"], 100);

        let parsed = QueueMessage::from_payload(&message.to_payload().unwrap()).unwrap();
        assert_eq!(parsed, message);
    }

    #[test]
    fn test_encode_payload_shape() {
        let payload = json!({"version": 1, "job": {"type": "encode", "name": "clip.mp4"}}).to_string();
        let message = QueueMessage::from_payload(&payload).unwrap();
        assert_eq!(message.job, QueueJob::Encode { name: "clip.mp4".into() });
        assert!(message.job_id().is_none());
        assert_eq!(message.label(), "encode:clip.mp4");
    }

    #[test]
    fn test_rejects_other_versions() {
        let payload = json!({"version": 2, "job": {"type": "encode", "name": "x"}}).to_string();
        assert!(matches!(
            QueueMessage::from_payload(&payload),
            Err(QueueError::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn test_rejects_garbage() {
        for payload in ["not json", "{}", r#"{"version":1,"job":{"type":"nope"}}"#, r#"{"name":"legacy.mp4"}"#] {
            let err = QueueMessage::from_payload(payload).unwrap_err();
            assert!(err.is_malformed(), "{} should be malformed", payload);
        }
    }
}
