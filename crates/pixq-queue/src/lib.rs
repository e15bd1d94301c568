//! Durable work queue on Redis Streams.
//!
//! This crate provides:
//! - A single versioned message envelope for all job kinds
//! - The `WorkQueue` contract: publish, receive, ack, requeue, discard
//! - A Redis Streams consumer-group implementation with a dead-letter stream
//! - An in-memory implementation for tests and local runs
//! - `QueuePublisher`, the producer-side facade

pub mod error;
pub mod memory;
pub mod message;
pub mod publisher;
pub mod queue;

pub use error::{QueueError, QueueResult};
pub use memory::MemoryQueue;
pub use message::{QueueJob, QueueMessage, MESSAGE_VERSION};
pub use publisher::QueuePublisher;
pub use queue::{Delivery, JobQueue, QueueConfig, WorkQueue};
