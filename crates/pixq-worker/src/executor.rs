//! Runs one job's transform against a local file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use pixq_media::{Operation, TransformOutput, Transformer};
use pixq_models::{is_video_file, Job};

use crate::error::WorkerResult;
use crate::metrics;

/// Tag used in local output names of single-stage encodes.
pub const ENCODE_TAG: &str = "encoded";

/// `<dir>/<stem>-<tag><ext>` for `input`.
///
/// The tag is never empty, so the result never equals `input`.
pub fn output_path_for(input: &Path, tag: &str, ext: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let tag = if tag.is_empty() { "out" } else { tag };
    input.with_file_name(format!("{}-{}{}", stem, tag, ext))
}

fn extension_with_dot(path: &Path) -> String {
    path.extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

/// Invokes the transform capability and records its timing.
#[derive(Clone)]
pub struct TransformExecutor {
    transformer: Arc<dyn Transformer>,
}

impl TransformExecutor {
    pub fn new(transformer: Arc<dyn Transformer>) -> Self {
        Self { transformer }
    }

    /// Apply `job`'s parameters to `input`.
    ///
    /// The output lands next to the input as `<stem>-<job_id><ext>`.
    pub async fn execute(&self, input: &Path, job: &Job) -> WorkerResult<TransformOutput> {
        let output = output_path_for(input, job.id.as_str(), &extension_with_dot(input));
        let op = Operation::Transform(job.params.clone());
        self.run(input, &output, &op, job.job_type().as_str()).await
    }

    /// Re-encode `input` without changing its geometry.
    ///
    /// Videos always come out as MP4.
    pub async fn encode(&self, input: &Path) -> WorkerResult<TransformOutput> {
        let ext = if is_video_file(&input.to_string_lossy()) {
            ".mp4".to_string()
        } else {
            extension_with_dot(input)
        };
        let output = output_path_for(input, ENCODE_TAG, &ext);
        self.run(input, &output, &Operation::Encode, "encode").await
    }

    async fn run(&self, input: &Path, output: &Path, op: &Operation, label: &str) -> WorkerResult<TransformOutput> {
        let started = Instant::now();
        let result = self.transformer.transform(input, output, op).await;

        let outcome = if result.is_ok() { "ok" } else { "error" };
        metrics::record_transform(label, outcome, started.elapsed());

        let produced = result?;
        debug!(
            "{} produced {} in {:?}",
            label,
            produced.path.display(),
            started.elapsed()
        );
        Ok(produced)
    }
}
