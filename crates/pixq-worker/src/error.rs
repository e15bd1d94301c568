//! Worker error types and failure classification.

use std::time::Duration;

use thiserror::Error;

use pixq_firestore::FirestoreError;
use pixq_media::MediaError;
use pixq_queue::QueueError;
use pixq_storage::StorageError;

use crate::fetcher::FetchError;

pub type WorkerResult<T> = Result<T, WorkerError>;

/// How the consumer reacts to a failed delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Bad message, job type or parameters; never retried
    Validation,
    /// Infrastructure hiccup; requeued up to the delivery ceiling
    Transient,
    /// Will fail the same way again; job marked failed at once
    Permanent,
}

impl FailureClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureClass::Validation => "validation",
            FailureClass::Transient => "transient",
            FailureClass::Permanent => "permanent",
        }
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Job record not found: {0}")]
    JobNotFound(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Job exceeded its {0:?} deadline")]
    Timeout(Duration),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Store error: {0}")]
    Store(#[from] FirestoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn job_not_found(id: impl Into<String>) -> Self {
        Self::JobNotFound(id.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Classify for the ack/requeue/discard decision.
    pub fn class(&self) -> FailureClass {
        match self {
            WorkerError::InvalidMessage(_) => FailureClass::Validation,
            WorkerError::Queue(e) if e.is_malformed() => FailureClass::Validation,
            WorkerError::JobNotFound(_) | WorkerError::ConfigError(_) => FailureClass::Permanent,
            WorkerError::Fetch(e) if e.is_permanent() => FailureClass::Permanent,
            WorkerError::Media(e) if e.is_permanent() => FailureClass::Permanent,
            WorkerError::Storage(e) if e.is_permanent() => FailureClass::Permanent,
            WorkerError::Store(FirestoreError::InvalidTransition { .. }) => FailureClass::Permanent,
            _ => FailureClass::Transient,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == FailureClass::Transient
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(
            WorkerError::from(MediaError::decode("bad")).class(),
            FailureClass::Permanent
        );
        assert_eq!(
            WorkerError::from(MediaError::invalid_parameter("zero height")).class(),
            FailureClass::Permanent
        );
        assert_eq!(
            WorkerError::from(MediaError::Timeout(3)).class(),
            FailureClass::Transient
        );
        assert_eq!(
            WorkerError::from(FetchError::Fetch("connection reset".into())).class(),
            FailureClass::Transient
        );
        assert_eq!(
            WorkerError::from(FetchError::Write("disk full".into())).class(),
            FailureClass::Transient
        );
        assert_eq!(
            WorkerError::from(FetchError::InvalidKey("../etc".into())).class(),
            FailureClass::Permanent
        );
        assert_eq!(
            WorkerError::from(StorageError::upload_failed("503")).class(),
            FailureClass::Transient
        );
        assert_eq!(
            WorkerError::from(FirestoreError::ServerError(503, "unavailable".into())).class(),
            FailureClass::Transient
        );
        assert_eq!(
            WorkerError::from(QueueError::malformed("not json")).class(),
            FailureClass::Validation
        );
        assert_eq!(WorkerError::job_not_found("j1").class(), FailureClass::Permanent);
        assert!(WorkerError::Timeout(Duration::from_secs(300)).is_retryable());
    }
}
