// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::{error::Error, sync::Arc};

use heron_auth_server::{
    api::router,
    auth::{
        jwks::GOOGLE_JWKS_URL, GoogleProvider, GoogleProviderConfig, JwksManager, JwksVerifier,
    },
    clock::SystemClock,
    config::{AuthSettings, LogFormat},
    state::AppState,
    storage::{MemoryStore, RedbStore},
    sweeper::ExpirySweeper,
};
use tokio::{net::TcpListener, signal};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let settings = AuthSettings::from_env()?;
    init_tracing(settings.log_format);

    let http = reqwest::Client::builder()
        .timeout(settings.provider_timeout)
        .build()?;

    let google = GoogleProviderConfig::new(
        settings.google.client_id.clone(),
        settings.google.client_secret.clone(),
        settings.google.redirect_url.as_str(),
    )?;
    let provider = Arc::new(GoogleProvider::new(google, http.clone()));
    let jwks = JwksManager::new(GOOGLE_JWKS_URL, http);
    let verifier = Arc::new(JwksVerifier::new(
        jwks.clone(),
        settings.google.client_id.clone(),
    ));
    let clock = Arc::new(SystemClock);

    let state = match &settings.data_dir {
        Some(dir) => {
            let store = RedbStore::open_in(dir)?;
            info!(path = %store.path().display(), "Using redb store");
            AppState::build(Arc::new(store), provider, verifier, clock, &settings)?
        }
        None => {
            warn!("DATA_DIR not set; sessions and the allow-list live in memory only");
            AppState::build(Arc::new(MemoryStore::new()), provider, verifier, clock, &settings)?
        }
    }
    .with_jwks(jwks);

    info!(
        policy = state.policy().kind(),
        pkce = state.challenges.pkce_enabled(),
        session_ttl_secs = state.sessions.ttl().num_seconds(),
        "Auth core ready"
    );

    let shutdown = CancellationToken::new();
    let sweeper = ExpirySweeper::new(
        state.challenges.clone(),
        state.sessions.clone(),
        settings.sweep_interval,
    );
    let sweeper_task = tokio::spawn(sweeper.run(shutdown.clone()));

    let app = router(state, &settings.allowed_origins);
    let listener = TcpListener::bind(settings.bind_address()).await?;
    info!(address = %listener.local_addr()?, "Heron auth server listening (docs at /docs)");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown.cancel();
    if let Err(e) = sweeper_task.await {
        warn!(error = %e, "Expiry sweeper ended abnormally");
    }

    info!("Shutdown complete");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().flatten_event(true))
            .init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
