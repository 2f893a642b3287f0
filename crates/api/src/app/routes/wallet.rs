use std::sync::Arc;

use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use stacks_ledger::EntryKind;
use stacks_infra::store::LedgerFilter;

use crate::app::{dto, errors, services::AppServices};

pub fn router() -> Router {
    Router::new()
        .route("/", get(balance))
        .route("/transactions", get(movements))
        .route("/milestone-check", post(milestone_check))
}

pub async fn balance(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    match services.store().wallet().await {
        Ok(wallet) => (
            StatusCode::OK,
            Json(serde_json::json!({ "balance": wallet.formatted_balance() })),
        )
            .into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn movements(
    Extension(services): Extension<Arc<AppServices>>,
    Query(params): Query<dto::LedgerParams>,
) -> axum::response::Response {
    let kind = match params.kind.as_deref() {
        Some(raw) => match raw.parse::<EntryKind>() {
            Ok(kind) => Some(kind),
            Err(e) => {
                return errors::json_error(StatusCode::BAD_REQUEST, "invalid_type", e.to_string())
            }
        },
        None => None,
    };

    let filter = LedgerFilter {
        kind,
        reason_contains: params.reason,
    };
    match services.store().ledger_entries(&filter).await {
        Ok(entries) => {
            let movements: Vec<_> = entries.iter().map(dto::ledger_entry_to_json).collect();
            (
                StatusCode::OK,
                Json(serde_json::json!({ "movements": movements })),
            )
                .into_response()
        }
        Err(e) => errors::store_error_to_response(e),
    }
}

/// Manual trigger for the one-time milestone watcher.
pub async fn milestone_check(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    match services.watcher().run().await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(serde_json::json!({ "outcome": outcome })),
        )
            .into_response(),
        Err(e) => errors::json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "watcher_error",
            e.to_string(),
        ),
    }
}
