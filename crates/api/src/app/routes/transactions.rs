use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};

use stacks_core::ItemId;
use stacks_infra::circulation::Completed;

use crate::app::{errors, services::AppServices};
use crate::context::CallerContext;

pub fn router() -> Router {
    Router::new()
        .route("/borrow/:item_id", post(borrow))
        .route("/return/:item_id", post(return_item))
        .route("/purchase/:item_id", post(purchase))
}

/// An id that does not parse cannot name a known item.
fn parse_item_id(raw: &str) -> Result<ItemId, axum::response::Response> {
    raw.parse().map_err(|_| {
        errors::json_error(StatusCode::NOT_FOUND, "not_found", "Book not found")
    })
}

/// Run the returned post-commit hooks, then answer 200.
async fn completed_response(
    services: &AppServices,
    done: Completed,
) -> axum::response::Response {
    let message = done.message;
    services.hooks().run(done.hooks).await;
    (
        StatusCode::OK,
        Json(serde_json::json!({ "message": message })),
    )
        .into_response()
}

pub async fn borrow(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Path(item_id): Path<String>,
) -> axum::response::Response {
    let item_id = match parse_item_id(&item_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.circulation().borrow(caller.user(), item_id).await {
        Ok(done) => completed_response(&services, done).await,
        Err(e) => errors::circulation_error_to_response(e),
    }
}

pub async fn return_item(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Path(item_id): Path<String>,
) -> axum::response::Response {
    let item_id = match parse_item_id(&item_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services
        .circulation()
        .return_item(caller.user(), item_id)
        .await
    {
        Ok(done) => completed_response(&services, done).await,
        Err(e) => errors::circulation_error_to_response(e),
    }
}

pub async fn purchase(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Path(item_id): Path<String>,
) -> axum::response::Response {
    let item_id = match parse_item_id(&item_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.circulation().buy(caller.user(), item_id).await {
        Ok(done) => completed_response(&services, done).await,
        Err(e) => errors::circulation_error_to_response(e),
    }
}
