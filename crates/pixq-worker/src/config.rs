//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{WorkerError, WorkerResult};

/// Headroom between the job deadline and the queue's visibility timeout,
/// covering the status write and ack that follow the deadline.
pub const VISIBILITY_MARGIN: Duration = Duration::from_secs(60);

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Consumer tasks in this process, each with prefetch 1
    pub consumers: usize,
    /// Local directory for fetched sources and produced outputs
    pub work_dir: PathBuf,
    /// Deadline for one delivery: fetch, transform, upload and status writes
    pub job_timeout: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// How often each consumer looks for deliveries abandoned by crashed consumers
    pub claim_interval: Duration,
    /// Port for the Prometheus scrape endpoint; 0 disables it
    pub metrics_port: u16,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            consumers: 1,
            work_dir: PathBuf::from("/tmp/pixq"),
            job_timeout: Duration::from_secs(300),
            shutdown_timeout: Duration::from_secs(30),
            claim_interval: Duration::from_secs(30),
            metrics_port: 9091,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            consumers: std::env::var("WORKER_CONSUMERS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.consumers),
            work_dir: std::env::var("WORKER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            job_timeout: Duration::from_secs(
                std::env::var("WORKER_JOB_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(300),
            ),
            shutdown_timeout: Duration::from_secs(
                std::env::var("WORKER_SHUTDOWN_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            claim_interval: Duration::from_secs(
                std::env::var("WORKER_CLAIM_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            metrics_port: std::env::var("WORKER_METRICS_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.metrics_port),
        }
    }

    /// Reject a job deadline that would let a live delivery be claimed by
    /// another consumer before it is acked.
    pub fn validate(&self, visibility_timeout: Duration) -> WorkerResult<()> {
        if self.job_timeout + VISIBILITY_MARGIN >= visibility_timeout {
            return Err(WorkerError::config_error(format!(
                "WORKER_JOB_TIMEOUT ({}s) plus {}s margin must be below QUEUE_VISIBILITY_TIMEOUT ({}s)",
                self.job_timeout.as_secs(),
                VISIBILITY_MARGIN.as_secs(),
                visibility_timeout.as_secs()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        std::env::set_var("WORKER_CONSUMERS", "4");
        std::env::set_var("WORKER_WORK_DIR", "/var/pixq");
        std::env::set_var("WORKER_JOB_TIMEOUT", "5");

        let config = WorkerConfig::from_env();
        assert_eq!(config.consumers, 4);
        assert_eq!(config.work_dir, PathBuf::from("/var/pixq"));
        assert_eq!(config.job_timeout, Duration::from_secs(5));

        std::env::remove_var("WORKER_CONSUMERS");
        std::env::remove_var("WORKER_WORK_DIR");
        std::env::remove_var("WORKER_JOB_TIMEOUT");
    }

    #[test]
    fn test_defaults_fit_default_visibility() {
        let config = WorkerConfig::default();
        assert!(config.validate(Duration::from_secs(600)).is_ok());
    }

    #[test]
    fn test_job_timeout_must_leave_margin() {
        let config = WorkerConfig {
            job_timeout: Duration::from_secs(600),
            ..WorkerConfig::default()
        };
        let err = config.validate(Duration::from_secs(600)).unwrap_err();
        assert!(matches!(err, WorkerError::ConfigError(_)));
        assert!(err.to_string().contains("QUEUE_VISIBILITY_TIMEOUT"));

        // Inside the margin is still rejected
        let config = WorkerConfig {
            job_timeout: Duration::from_secs(541),
            ..WorkerConfig::default()
        };
        assert!(config.validate(Duration::from_secs(600)).is_err());

        let config = WorkerConfig {
            job_timeout: Duration::from_secs(539),
            ..WorkerConfig::default()
        };
        assert!(config.validate(Duration::from_secs(600)).is_ok());
    }

    #[test]
    #[serial]
    fn test_zero_consumers_falls_back() {
        std::env::set_var("WORKER_CONSUMERS", "0");
        assert_eq!(WorkerConfig::from_env().consumers, 1);
        std::env::remove_var("WORKER_CONSUMERS");
    }
}
