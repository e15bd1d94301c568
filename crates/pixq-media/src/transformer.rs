//! The transform capability the worker executes jobs through.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use pixq_models::{content_type_for, is_image_file, is_video_file, TransformParams};

use crate::error::{MediaError, MediaResult};
use crate::image_ops::transform_image;
use crate::video::{encode_video, EncodingConfig};

/// What to do with an input file.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// One chained resize or crop step
    Transform(TransformParams),
    /// Re-encode without changing geometry
    Encode,
}

/// A produced artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformOutput {
    pub path: PathBuf,
    /// Pixel dimensions, when known
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub content_type: String,
}

#[async_trait]
pub trait Transformer: Send + Sync {
    /// Apply `op` to `input`, writing the result to `output`.
    ///
    /// `output` only ever holds a complete artifact once this returns `Ok`.
    async fn transform(&self, input: &Path, output: &Path, op: &Operation) -> MediaResult<TransformOutput>;
}

/// Production transformer: `image` for stills, FFmpeg for video.
#[derive(Debug, Clone, Default)]
pub struct MediaTransformer {
    encoding: EncodingConfig,
}

impl MediaTransformer {
    pub fn new(encoding: EncodingConfig) -> Self {
        Self { encoding }
    }
}

#[async_trait]
impl Transformer for MediaTransformer {
    async fn transform(&self, input: &Path, output: &Path, op: &Operation) -> MediaResult<TransformOutput> {
        if input == output {
            return Err(MediaError::invalid_parameter(format!(
                "output path equals input {}",
                input.display()
            )));
        }

        let name = input.to_string_lossy();
        match op {
            Operation::Transform(params) if is_video_file(&name) => Err(MediaError::UnsupportedFormat(format!(
                "{} cannot be applied to video {}",
                params.job_type(),
                name
            ))),
            Operation::Transform(params) => transform_image(input, output, Some(params)).await,
            Operation::Encode if is_video_file(&name) => {
                encode_video(input, output, &self.encoding).await?;
                Ok(TransformOutput {
                    path: output.to_path_buf(),
                    width: None,
                    height: None,
                    content_type: content_type_for(&output.to_string_lossy()).to_string(),
                })
            }
            Operation::Encode if is_image_file(&name) => transform_image(input, output, None).await,
            Operation::Encode => Err(MediaError::UnsupportedFormat(format!(
                "no encoder for {}",
                name
            ))),
        }
    }
}
