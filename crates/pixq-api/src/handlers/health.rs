//! Liveness and readiness.
//!
//! `/ready` answers 200 only when the queue, the record store and the bucket
//! all respond, and reports the queue and dead-letter depths so an operator
//! can see a backlog or a pile of poison messages from the same call.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use pixq_models::ImageId;

use crate::metrics;
use crate::state::AppState;

#[derive(Serialize)]
pub struct Liveness {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health() -> Json<Liveness> {
    Json(Liveness {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// A backend that did not answer.
#[derive(Debug, Serialize)]
pub struct Unavailable {
    pub backend: &'static str,
    pub error: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Readiness {
    pub ready: bool,
    /// Messages waiting or in flight; absent when the queue is unreachable
    pub queue_depth: Option<u64>,
    /// Messages that were discarded or ran out of deliveries
    pub dead_letter_depth: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unavailable: Vec<Unavailable>,
}

pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<Readiness>) {
    let mut unavailable = Vec::new();
    let mut note = |backend: &'static str, error: String| unavailable.push(Unavailable { backend, error });

    let queue_depth = match state.queue.depth().await {
        Ok(depth) => {
            metrics::set_queue_length(depth);
            Some(depth)
        }
        Err(e) => {
            note("queue", e.to_string());
            None
        }
    };

    let dead_letter_depth = match state.queue.dead_letter_depth().await {
        Ok(depth) => {
            metrics::set_dead_letter_length(depth);
            Some(depth)
        }
        Err(e) => {
            note("deadLetters", e.to_string());
            None
        }
    };

    // A missing record still proves the store answered
    match state.store.get_image(&ImageId::from("_health")).await {
        Ok(_) => {}
        Err(e) if e.is_not_found() => {}
        Err(e) => note("store", e.to_string()),
    }

    if let Err(e) = state.objects.check_connectivity().await {
        note("storage", e.to_string());
    }

    let readiness = Readiness {
        ready: unavailable.is_empty(),
        queue_depth,
        dead_letter_depth,
        unavailable,
    };
    let status = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(readiness))
}
