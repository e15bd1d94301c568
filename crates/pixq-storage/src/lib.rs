//! S3-compatible object storage.
//!
//! This crate provides:
//! - The `ObjectStore` contract used by the API and workers
//! - An S3 client (AWS S3, R2, MinIO) with public or presigned object URLs
//! - An in-memory store for tests

pub mod client;
pub mod error;
pub mod memory;
pub mod store;

pub use client::{S3Client, S3Config};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryObjectStore;
pub use store::{ObjectStore, Visibility};
