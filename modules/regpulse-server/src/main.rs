mod routes;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use regpulse_common::Config;
use regpulse_store::Store;

pub struct AppState {
    pub store: Store,
    pub config: Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    config.log_redacted();

    let store = Store::connect(&config.database_path).await?;

    // A crash mid-run leaves a `running` row that would wedge the trigger
    // surface; reconcile before anything else.
    store.reconcile_stale_runs().await?;

    match store.backfill_laws().await {
        Ok(summary) => info!(
            laws = summary.laws,
            law_updates = summary.law_updates,
            "Startup law backfill complete"
        ),
        Err(e) => warn!(error = %e, "Startup law backfill failed"),
    }

    let addr = format!("{}:{}", config.web_host, config.web_port);
    let state = Arc::new(AppState { store, config });
    let app = routes::router(state);

    info!(addr, "regpulse server listening");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    axum::serve(listener, app).await.context("Server exited")?;

    Ok(())
}
