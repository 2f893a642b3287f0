use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    stacks_observability::init();

    let services = Arc::new(stacks_api::app::services::build_services().await?);

    // Deferred jobs run on their own worker; the handle keeps it alive for
    // the process lifetime.
    let _executor = services.spawn_job_executor();

    let app = stacks_api::app::build_app(services);

    let port = std::env::var("PORT").unwrap_or_else(|_| "8080".to_string());
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
