//! Queue error types.

use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Publish failed: {0}")]
    PublishFailed(String),

    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Unsupported message version {0}")]
    UnsupportedVersion(u32),

    #[error("Unknown delivery: {0}")]
    UnknownDelivery(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QueueError {
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    pub fn publish_failed(msg: impl Into<String>) -> Self {
        Self::PublishFailed(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }

    /// True for payload problems that no redelivery can fix.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            QueueError::Malformed(_) | QueueError::UnsupportedVersion(_) | QueueError::Json(_)
        )
    }

    /// True for transport problems worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            QueueError::ConnectionFailed(_) | QueueError::PublishFailed(_) | QueueError::Redis(_)
        )
    }
}
