//! Image upload and transformation request handlers.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use tracing::{info, warn};

use pixq_models::{content_type_for, is_image_file, Image, ImageId, Job, RejectedTransformation, TransformationRequest};
use pixq_storage::Visibility;

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

/// Multipart field carrying the uploaded file.
pub const UPLOAD_FIELD: &str = "imageUpload";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub image: Image,
    pub url: String,
}

/// Accepted and rejected parts of a transformation request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformationResponse {
    pub image_id: ImageId,
    pub jobs: Vec<Job>,
    pub invalid: Vec<RejectedTransformation>,
}

/// Store an uploaded image and create its record.
pub async fn upload_image(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<UploadResponse>)> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e.to_string(), e.status()))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let file_name = field
            .file_name()
            .map(|s| s.to_string())
            .ok_or_else(|| ApiError::bad_request("upload has no file name"))?;
        let content_type = field
            .content_type()
            .filter(|ct| ct.starts_with("image/"))
            .map(|s| s.to_string())
            .unwrap_or_else(|| content_type_for(&file_name).to_string());
        let data = field
            .bytes()
            .await
            .map_err(|e| multipart_error(e.to_string(), e.status()))?;
        upload = Some((file_name, content_type, data));
        break;
    }

    let (file_name, content_type, data) =
        upload.ok_or_else(|| ApiError::bad_request(format!("missing multipart field '{}'", UPLOAD_FIELD)))?;

    if data.is_empty() {
        return Err(ApiError::bad_request("uploaded file is empty"));
    }
    if !is_image_file(&file_name) {
        return Err(ApiError::bad_request(format!("unsupported image type: {}", file_name)));
    }

    let image = Image::new(file_name, content_type);
    let size = data.len();
    let url = state
        .objects
        .put(&image.storage_key, data.to_vec(), &image.content_type, Visibility::Private)
        .await?;
    state.store.insert_image(&image).await?;

    metrics::record_image_uploaded();
    info!(
        image_id = %image.id,
        storage_key = %image.storage_key,
        size,
        "Stored uploaded image"
    );

    Ok((StatusCode::CREATED, Json(UploadResponse { image, url })))
}

pub async fn get_image(State(state): State<AppState>, Path(image_id): Path<String>) -> ApiResult<Json<Image>> {
    let image_id = ImageId::from_string(image_id);
    state
        .store
        .get_image(&image_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("image {}", image_id)))
}

/// Build, persist and start a transformation chain for an image.
///
/// Responds 202 with both the accepted jobs and the rejected descriptors, or
/// 400 with the same body when nothing was accepted. Only the chain head is
/// published; every later job is published by the worker that finishes its
/// predecessor.
pub async fn request_transformations(
    State(state): State<AppState>,
    Path(image_id): Path<String>,
    body: Result<Json<TransformationRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<TransformationResponse>)> {
    let Json(request) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    if request.transformations.is_empty() {
        return Err(ApiError::bad_request("no transformations requested"));
    }

    let image_id = ImageId::from_string(image_id);
    let image = state
        .store
        .get_image(&image_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("image {}", image_id)))?;

    let build = state.chains.build(&image, &request.transformations);
    if build.is_partial() {
        metrics::record_rejected(build.invalid.len());
        warn!(
            image_id = %image.id,
            rejected = build.invalid.len(),
            accepted = build.chain.len(),
            "Rejected transformation descriptors"
        );
    }

    let Some(head) = build.head() else {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(TransformationResponse {
                image_id: image.id,
                jobs: Vec::new(),
                invalid: build.invalid,
            }),
        ));
    };

    state.store.insert_jobs(&build.chain).await?;
    let message_id = state.publisher.publish_job(head).await?;

    for job in &build.chain {
        metrics::record_job_enqueued(job.job_type().as_str());
    }
    info!(
        image_id = %image.id,
        head_job_id = %head.id,
        message_id = %message_id,
        jobs = build.chain.len(),
        "Published transformation chain"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(TransformationResponse {
            image_id: image.id,
            jobs: build.chain,
            invalid: build.invalid,
        }),
    ))
}

fn multipart_error(msg: String, status: StatusCode) -> ApiError {
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(msg)
    } else {
        ApiError::bad_request(msg)
    }
}
