//! Job status and single-stage encode handlers.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use pixq_models::{is_image_file, is_video_file, Job, JobId};

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

pub async fn get_job(State(state): State<AppState>, Path(job_id): Path<String>) -> ApiResult<Json<Job>> {
    let job_id = JobId::from_string(job_id);
    state
        .store
        .get_job(&job_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("job {}", job_id)))
}

#[derive(Debug, Deserialize)]
pub struct EncodeRequest {
    /// Storage key of the object to re-encode
    pub name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodeResponse {
    pub name: String,
    pub message_id: String,
}

/// Queue a single-stage re-encode of an existing object.
pub async fn request_encode(
    State(state): State<AppState>,
    body: Result<Json<EncodeRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<EncodeResponse>)> {
    let Json(request) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let name = request.name.trim().to_string();
    if name.is_empty() {
        return Err(ApiError::bad_request("name is required"));
    }
    if !is_image_file(&name) && !is_video_file(&name) {
        return Err(ApiError::bad_request(format!("unsupported media type: {}", name)));
    }
    if !state.objects.exists(&name).await? {
        return Err(ApiError::not_found(format!("object {}", name)));
    }

    let message_id = state.publisher.publish_encode(&name).await?;
    metrics::record_job_enqueued("encode");
    info!(name = %name, message_id = %message_id, "Published encode job");

    Ok((StatusCode::ACCEPTED, Json(EncodeResponse { name, message_id })))
}
