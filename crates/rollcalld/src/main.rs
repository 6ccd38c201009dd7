use anyhow::{Context, Result};
use rollcalld::{build_service, routes, Config};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = Config::from_env()?;
    tracing::debug!(?config, "configuration loaded");

    let service = build_service(&config).await?;
    let app = routes::router(service);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    tracing::info!(
        addr = %config.listen_addr,
        threshold = config.match_threshold,
        admins = config.admin_emails.len(),
        "rollcalld ready"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    tracing::info!("rollcalld shutting down");
    Ok(())
}
