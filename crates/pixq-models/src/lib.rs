//! Shared data models for the pixq image pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Uploaded images
//! - Transformation jobs and their status
//! - Typed, per-job-type transformation parameters
//! - Building linked job chains from a client request

pub mod chain;
pub mod formats;
pub mod image;
pub mod job;
pub mod params;

// Re-export common types
pub use chain::{ChainBuild, JobChainBuilder, RejectedTransformation, TransformationDescriptor, TransformationRequest};
pub use formats::{content_type_for, extension_of, is_image_file, is_video_file};
pub use image::{Image, ImageId};
pub use job::{Job, JobId, JobStatus};
pub use params::{JobType, ParamError, TransformParams};
