//! Media transforms for the pixq workers.
//!
//! This crate provides:
//! - Dimension arithmetic for resize and crop jobs
//! - Image decode, transform and re-encode on the blocking pool
//! - Type-safe FFmpeg command building for video re-encodes
//! - The `Transformer` capability the worker executes jobs through

pub mod command;
pub mod error;
pub mod fs_utils;
pub mod geometry;
pub mod image_ops;
pub mod transformer;
pub mod video;

pub use command::{FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use geometry::{plan, Geometry, MAX_DIMENSION};
pub use transformer::{MediaTransformer, Operation, TransformOutput, Transformer};
pub use video::EncodingConfig;
