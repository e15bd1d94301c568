//! Transformation job worker.
//!
//! This crate provides:
//! - `QueueConsumer`: prefetch-1 receive, execute, ack/requeue/discard loop
//!   with a per-delivery deadline
//! - `MediaFetcher`: idempotent local cache of stored objects
//! - `TransformExecutor`: transforms with timing metrics
//! - Failure classification and crash recovery of stalled deliveries
//! - Graceful shutdown

pub mod config;
pub mod consumer;
pub mod error;
pub mod executor;
pub mod fetcher;
pub mod logging;
pub mod metrics;
pub mod retry;
pub mod runtime;

pub use config::WorkerConfig;
pub use consumer::{encoded_key, Outcome, QueueConsumer, WorkerContext};
pub use error::{FailureClass, WorkerError, WorkerResult};
pub use executor::{output_path_for, TransformExecutor};
pub use fetcher::{FetchError, FetchResult, MediaFetcher};
pub use logging::JobLogger;
pub use runtime::WorkerRuntime;
