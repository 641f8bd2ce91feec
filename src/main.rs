use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use gauntlet::api;
use gauntlet::config::Config;
use gauntlet::profile_lock::ProfileLock;
use gauntlet::state::{AppState, AppStateInner};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,reqwest=warn,hyper=warn")),
        )
        .init();

    let config = Config::from_env().context("failed to load configuration")?;

    tracing::info!(
        "gauntlet starting, profile: {}, server: {}, mode: {:?}, fights: {}, listen: {}",
        config.profile,
        config.base_url,
        config.arena.mode,
        config.arena.fights,
        config.listen_addr,
    );

    // Held until exit; a second process on the same profile fails here.
    let _lock = match &config.lock_dir {
        Some(dir) => Some(
            ProfileLock::acquire(dir, &config.profile).context("failed to lock profile")?,
        ),
        None => None,
    };

    let state: AppState = Arc::new(Mutex::new(AppStateInner::new(config.clone())));

    if config.autostart {
        tracing::info!("autostart enabled, starting run");
        api::spawn_run(&state).await;
    }

    let app = api::router(state).layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .context(format!("failed to bind to {}", config.listen_addr))?;

    tracing::info!("listening on {}", config.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
}
