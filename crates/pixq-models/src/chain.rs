//! Building linked job chains from a client transformation request.
//!
//! The builder is pure: it validates each descriptor against its job type,
//! assigns job IDs, links every job to its successor and derives the storage
//! keys each step reads and writes. Nothing is persisted or published here.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::formats::extension_of;
use crate::image::Image;
use crate::job::Job;
use crate::params::{JobType, TransformParams};

/// One entry of a client request: `{"jobType": "...", ...params}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformationDescriptor {
    #[serde(rename = "jobType", default)]
    pub job_type: String,
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl TransformationDescriptor {
    pub fn new(job_type: impl Into<String>, params: Value) -> Self {
        Self {
            job_type: job_type.into(),
            params: match params {
                Value::Object(map) => map,
                _ => Map::new(),
            },
        }
    }
}

/// Ordered list of transformations requested for one image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformationRequest {
    pub transformations: Vec<TransformationDescriptor>,
}

/// A descriptor that did not become a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedTransformation {
    /// Position in the original request
    pub index: usize,
    pub descriptor: TransformationDescriptor,
    pub reason: String,
}

/// Result of building a chain: accepted jobs in order plus rejected entries.
#[derive(Debug, Clone, Default)]
pub struct ChainBuild {
    pub chain: Vec<Job>,
    pub invalid: Vec<RejectedTransformation>,
}

impl ChainBuild {
    /// True when some descriptors were rejected.
    pub fn is_partial(&self) -> bool {
        !self.invalid.is_empty()
    }

    pub fn head(&self) -> Option<&Job> {
        self.chain.first()
    }
}

/// Turns a transformation request into a linked chain of jobs.
#[derive(Debug, Clone)]
pub struct JobChainBuilder {
    output_prefix: String,
}

impl Default for JobChainBuilder {
    fn default() -> Self {
        Self {
            output_prefix: "outputs".to_string(),
        }
    }
}

impl JobChainBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different key prefix for job outputs.
    pub fn with_output_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.output_prefix = prefix.into().trim_end_matches('/').to_string();
        self
    }

    /// Build the chain for `image`.
    ///
    /// The first job reads the image's storage key; every later job reads its
    /// predecessor's output. Each job writes `<prefix>/<image_id>/<job_id><ext>`.
    pub fn build(&self, image: &Image, descriptors: &[TransformationDescriptor]) -> ChainBuild {
        let ext = extension_of(&image.storage_key);
        let mut build = ChainBuild::default();

        for (index, descriptor) in descriptors.iter().enumerate() {
            let params = descriptor
                .job_type
                .parse::<JobType>()
                .and_then(|job_type| TransformParams::decode(job_type, &descriptor.params));

            match params {
                Ok(params) => {
                    let source_key = build
                        .chain
                        .last()
                        .map(|prev| prev.output_key.clone())
                        .unwrap_or_else(|| image.storage_key.clone());
                    let mut job = Job::new(image.id.clone(), params, source_key, String::new());
                    job.output_key = format!("{}/{}/{}{}", self.output_prefix, image.id, job.id, ext);
                    build.chain.push(job);
                }
                Err(e) => build.invalid.push(RejectedTransformation {
                    index,
                    descriptor: descriptor.clone(),
                    reason: e.to_string(),
                }),
            }
        }

        let next_ids: Vec<_> = build.chain.iter().skip(1).map(|j| j.id.clone()).collect();
        for (job, next) in build.chain.iter_mut().zip(next_ids) {
            job.next_job_id = Some(next);
        }

        build
    }
}
