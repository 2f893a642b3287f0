//! HTTP API application wiring (Axum router + service wiring).
//!
//! Folder layout:
//! - `services.rs`: infrastructure wiring (store, jobs, cache, notifier)
//! - `routes/`: HTTP routes + handlers (one file per domain area)
//! - `dto.rs`: response JSON mapping helpers and query-param DTOs
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router (public entrypoint used by `main.rs` and the
/// black-box tests).
pub fn build_app(services: Arc<services::AppServices>) -> Router {
    // State-changing operations require a caller identity.
    let transactions = routes::transactions::router()
        .layer(axum::middleware::from_fn(middleware::caller_identity));

    Router::new()
        .route("/health", get(routes::system::health))
        .nest("/transactions", transactions)
        .nest("/admin", routes::admin_router())
        .layer(Extension(services))
}
