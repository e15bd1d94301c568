//! Storage error types.

use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage client misconfigured: {0}")]
    ConfigError(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Put failed: {0}")]
    UploadFailed(String),

    #[error("Get failed: {0}")]
    DownloadFailed(String),

    #[error("Could not sign URL: {0}")]
    PresignFailed(String),

    /// Key is empty, absolute or walks out of its prefix.
    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("S3 error: {0}")]
    AwsSdk(String),
}

impl StorageError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound(key.into())
    }

    pub fn upload_failed(msg: impl Into<String>) -> Self {
        Self::UploadFailed(msg.into())
    }

    pub fn download_failed(msg: impl Into<String>) -> Self {
        Self::DownloadFailed(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }

    /// Errors no retry can fix.
    ///
    /// `NotFound` is not among them: a chain step may read an object its
    /// predecessor has not finished writing yet.
    pub fn is_permanent(&self) -> bool {
        matches!(self, StorageError::InvalidKey(_) | StorageError::ConfigError(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(StorageError::InvalidKey("../x".into()).is_permanent());
        assert!(StorageError::config_error("no bucket").is_permanent());
        assert!(!StorageError::not_found("images/a.png").is_permanent());
        assert!(!StorageError::upload_failed("503").is_permanent());
        assert!(StorageError::not_found("k").is_not_found());
    }
}
