use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use stacks_infra::circulation::CirculationError;
use stacks_infra::store::StoreError;

/// Map a circulation failure onto the wire contract: 404 for validation
/// failures, 400 for policy denials, 500 for everything infrastructural.
pub fn circulation_error_to_response(err: CirculationError) -> axum::response::Response {
    if err.is_not_found() {
        return json_error(StatusCode::NOT_FOUND, "not_found", err.to_string());
    }
    if err.is_denial() {
        return json_error(StatusCode::BAD_REQUEST, "denied", err.to_string());
    }
    match err {
        CirculationError::Contention(msg) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "contention",
            format!("operation kept losing commit races: {msg}"),
        ),
        other => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            other.to_string(),
        ),
    }
}

pub fn store_error_to_response(err: StoreError) -> axum::response::Response {
    match err {
        StoreError::NotFound(msg) => json_error(StatusCode::NOT_FOUND, "not_found", msg),
        other => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "store_error",
            other.to_string(),
        ),
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
