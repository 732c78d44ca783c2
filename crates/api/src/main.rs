use std::sync::Arc;

use classbook_api::app::{self, services};
use classbook_api::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    classbook_observability::init();

    let config = AppConfig::from_env();
    let services = Arc::new(services::build_services(&config).await?);
    let app = app::router(services.clone(), &config);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(
        addr = %listener.local_addr()?,
        cancellation_window_hours = config.cancellation_window_hours,
        "listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    services.shutdown().await;
    tracing::info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
