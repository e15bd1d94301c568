//! Firestore REST API client and record store.
//!
//! This crate provides:
//! - The `JobStore` contract for Image and Job records
//! - Typed repositories over the Firestore REST API
//! - Service account authentication via gcp_auth, or a static token for the emulator
//! - Masked merge updates, atomic batch inserts and retry with backoff
//! - An in-memory store that enforces job status transitions

pub mod client;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod repos;
pub mod retry;
pub mod store;
pub mod token_cache;
pub mod types;


pub use client::{FirestoreClient, FirestoreConfig};
pub use error::{FirestoreError, FirestoreResult};
pub use memory::MemoryJobStore;
pub use repos::{ImageRepository, JobRepository};
pub use retry::RetryConfig;
pub use store::{FirestoreJobStore, JobStore, StatusUpdate};
pub use token_cache::{TokenCache, TokenSource};
pub use types::{Document, FromFirestoreValue, ToFirestoreValue, Value};
