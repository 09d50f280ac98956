use anyhow::Context;

use docgen_infra::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    docgen_observability::init();

    let config = AppConfig::from_env();
    let app = docgen_api::app::build_app(&config).await?;

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!(
        addr = %listener.local_addr()?,
        prefix = %config.api_prefix,
        persistent = config.use_persistent_stores,
        "listening"
    );

    axum::serve(listener, app.router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    // Let an in-flight delivery finish and settle before exiting.
    app.trigger.shutdown().await;
    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
