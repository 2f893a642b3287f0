use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use stacks_infra::jobs::JobId;

use crate::app::{errors, services::AppServices};

pub async fn health() -> axum::response::Response {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" }))).into_response()
}

pub fn health_router() -> Router {
    Router::new()
        .route("/cache", get(cache_health))
        .route("/queues", get(queue_status))
        .route("/queues/dead/:id/retry", post(retry_dead_job))
}

pub async fn cache_health(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    if services.cache().ping() {
        (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "healthy",
                "message": "cache round-trip ok",
            })),
        )
            .into_response()
    } else {
        errors::json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "unhealthy",
            "cache connection failed",
        )
    }
}

/// Queue visibility, including the dead-letter queue: a job that exhausted
/// its retries shows up here instead of disappearing.
pub async fn queue_status(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    let stats = match services.jobs().stats().await {
        Ok(stats) => stats,
        Err(e) => {
            return errors::json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "queue_error",
                e.to_string(),
            )
        }
    };
    let dead = match services.jobs().list_dead_letters(50).await {
        Ok(dead) => dead,
        Err(e) => {
            return errors::json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "queue_error",
                e.to_string(),
            )
        }
    };

    let dead: Vec<_> = dead
        .iter()
        .map(|entry| {
            serde_json::json!({
                "id": entry.job.id.to_string(),
                "kind": entry.job.kind.type_name(),
                "attempts": entry.job.attempt,
                "reason": entry.reason,
                "deadLetteredAt": entry.dead_lettered_at,
            })
        })
        .collect();

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "stats": stats,
            "deadLetters": dead,
        })),
    )
        .into_response()
}

pub async fn retry_dead_job(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let job_id = match id.parse::<uuid::Uuid>() {
        Ok(uuid) => JobId::from_uuid(uuid),
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid job id")
        }
    };

    match services.jobs().retry_dead_letter(job_id).await {
        Ok(job) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "message": "job requeued",
                "id": job.id.to_string(),
            })),
        )
            .into_response(),
        Err(stacks_infra::jobs::JobStoreError::NotFound(_)) => {
            errors::json_error(StatusCode::NOT_FOUND, "not_found", "dead job not found")
        }
        Err(e) => errors::json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "queue_error",
            e.to_string(),
        ),
    }
}
