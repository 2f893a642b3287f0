use axum::Router;

pub mod books;
pub mod system;
pub mod transactions;
pub mod wallet;

/// Router for the reporting/operations surface.
pub fn admin_router() -> Router {
    Router::new()
        .nest("/book", books::router())
        .nest("/wallet", wallet::router())
        .nest("/health", system::health_router())
}
