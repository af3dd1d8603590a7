mod config;
mod sweep;

use std::sync::Arc;

use piggies_api::geocode::Geocoder;
use piggies_api::media::LocalMediaStore;
use piggies_api::state::{AppState, AppStateInner};
use piggies_core::collaborators::KeywordChecker;
use piggies_db::Database;
use piggies_gateway::dispatcher::Dispatcher;
use tracing::{info, warn};

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "piggies=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    let db = Database::open(&config.db_path)?;
    let media =
        LocalMediaStore::new(config.media_dir.clone(), config.media_base_url.clone()).await?;
    let geocoder = match &config.geocoder_url {
        Some(url) => Some(Geocoder::new(url.clone())?),
        None => {
            warn!("PIGGIES_GEOCODER_URL unset; venue submissions must carry coordinates");
            None
        }
    };
    if !config.blocked_words.is_empty() {
        info!("Content checker loaded with {} blocked words", config.blocked_words.len());
    }

    let state: AppState = Arc::new(AppStateInner {
        db,
        dispatcher: Dispatcher::default(),
        jwt_secret: config.jwt_secret.clone(),
        media,
        checker: Box::new(KeywordChecker::new(&config.blocked_words)),
        geocoder,
        bootstrap_admins: config.bootstrap_admins.clone(),
    });

    // Background referral sweep
    tokio::spawn(sweep::run_sweep_loop(state.clone(), config.sweep_interval));
    info!("Referral sweep running every {}s", config.sweep_interval.as_secs());

    let app = piggies_api::router(state);

    info!("Piggies server listening on {}", config.addr);
    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Piggies server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
