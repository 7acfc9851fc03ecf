use anyhow::Context;

use commandrelay_api::app::{build_app, Relay};
use commandrelay_infra::RelayConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    commandrelay_observability::init();

    let config = RelayConfig::from_env().context("invalid configuration")?;
    let relay = Relay::start(&config).await?;

    let app = build_app(relay.services());

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;

    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    relay.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
