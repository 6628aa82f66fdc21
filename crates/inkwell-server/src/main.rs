mod cleanup;
mod config;

use std::sync::Arc;

use anyhow::Context;
use rand::RngCore;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use inkwell_api::auth::ensure_user;
use inkwell_api::session::SessionManager;
use inkwell_api::uploads::UploadStore;
use inkwell_api::{AppState, AppStateInner};

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "inkwell_server=debug,inkwell_api=debug,inkwell_db=info,tower_http=debug".into()
            }),
        )
        .init();

    let config = Config::from_env()?;

    let secret = match &config.session_secret {
        Some(secret) => secret.as_bytes().to_vec(),
        None => {
            warn!("INKWELL_SESSION_SECRET is unset; using a random secret, sessions will not survive a restart");
            let mut bytes = vec![0u8; 32];
            rand::rng().fill_bytes(&mut bytes);
            hex::encode(bytes).into_bytes()
        }
    };

    // Init database
    let db = inkwell_db::Database::open(&config.db_path)?;
    let uploads = UploadStore::new(config.uploads_dir.clone(), config.max_upload_bytes).await?;
    let sessions = SessionManager::new(&secret, config.session_ttl_secs(), config.cookie_secure);

    let state: AppState = Arc::new(AppStateInner { db, sessions, uploads });

    if let Some((username, password)) = &config.seed_user {
        match ensure_user(&state.db, username, password) {
            Ok(true) => info!("Seeded user {}", username),
            Ok(false) => info!("Seed user {} already exists", username),
            Err(e) => warn!("Could not seed user {}: {}", username, e),
        }
    }

    // Hourly session pruning
    tokio::spawn(cleanup::run_cleanup_loop(state.clone(), 3600));

    let app = inkwell_api::router(state).layer(TraceLayer::new_for_http());

    let listener = bind_listener(&config.host, config.port).await?;
    info!("Inkwell listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Bind the HTTP listener. `host` may be an IP literal or a hostname.
async fn bind_listener(host: &str, port: u16) -> anyhow::Result<TcpListener> {
    TcpListener::bind((host, port))
        .await
        .with_context(|| format!("failed to bind {}:{}", host, port))
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
