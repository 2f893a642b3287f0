use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use stacks_catalog::{AuditAction, SearchQuery};
use stacks_core::ItemId;
use stacks_infra::store::AuditFilter;

use crate::app::{dto, errors, services::AppServices};

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_books))
        .route("/logs", get(book_logs))
        .route("/users", get(users_summary))
        .route("/:id", get(book_detail))
}

pub async fn list_books(
    Extension(services): Extension<Arc<AppServices>>,
    Query(params): Query<dto::SearchParams>,
) -> axum::response::Response {
    let query = params.into_query();

    let listing = match services.reader().search(&query).await {
        Ok(listing) => listing,
        Err(e) => return errors::store_error_to_response(e),
    };

    let books: Vec<_> = listing.items.iter().map(dto::book_to_json).collect();
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "books": books,
            "pagination": dto::pagination_to_json(listing.total, query.page, query.limit),
        })),
    )
        .into_response()
}

pub async fn book_logs(
    Extension(services): Extension<Arc<AppServices>>,
    Query(params): Query<dto::LogParams>,
) -> axum::response::Response {
    let item_id = match params.book_id.as_deref() {
        Some(raw) => match raw.parse::<ItemId>() {
            Ok(id) => Some(id),
            Err(_) => {
                return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid book id")
            }
        },
        None => None,
    };

    let action = match params.action.as_deref() {
        Some(raw) => match raw.parse::<AuditAction>() {
            Ok(action) => Some(action),
            // Surfaces the valid values verbatim.
            Err(e) => {
                return errors::json_error(StatusCode::BAD_REQUEST, "invalid_action", e.to_string())
            }
        },
        None => None,
    };

    let entries = match services
        .store()
        .audit_entries(&AuditFilter {
            item_id,
            action,
            limit: None,
        })
        .await
    {
        Ok(entries) => entries,
        Err(e) => return errors::store_error_to_response(e),
    };

    // Join titles the way the original log view did.
    let titles = match title_index(&services).await {
        Ok(titles) => titles,
        Err(resp) => return resp,
    };
    let rows: Vec<_> = entries
        .iter()
        .map(|e| dto::audit_to_json(e, titles.get(&e.item_id).map(String::as_str)))
        .collect();

    (StatusCode::OK, Json(rows)).into_response()
}

pub async fn users_summary(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    match services.reader().holdings_summary().await {
        Ok(summary) => (StatusCode::OK, Json(summary)).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn book_detail(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let item_id: ItemId = match id.parse() {
        Ok(id) => id,
        Err(_) => {
            return errors::json_error(StatusCode::NOT_FOUND, "not_found", "Book not found")
        }
    };

    match services.reader().item_detail(item_id).await {
        Ok(Some((item, activity))) => {
            let mut body = dto::book_to_json(&item);
            body["recentActivity"] = serde_json::Value::Array(
                activity
                    .iter()
                    .map(|e| dto::audit_to_json(e, Some(item.title.as_str())))
                    .collect(),
            );
            (StatusCode::OK, Json(body)).into_response()
        }
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", "Book not found"),
        Err(e) => errors::store_error_to_response(e),
    }
}

async fn title_index(
    services: &AppServices,
) -> Result<HashMap<ItemId, String>, axum::response::Response> {
    let listing = services
        .store()
        .search_items(&SearchQuery {
            get_all: true,
            ..Default::default()
        })
        .await
        .map_err(errors::store_error_to_response)?;
    Ok(listing
        .items
        .into_iter()
        .map(|i| (i.id, i.title))
        .collect())
}
