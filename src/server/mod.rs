//! The firmware distribution server.
//!
//! Wires configuration into the component set, builds the axum router and
//! runs it until ctrl-c. TLS termination is a packaging concern handled in
//! front of this listener.

pub mod handlers;
pub mod router;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use tracing::info;

use crate::audit::AuditLog;
use crate::config::ServerConfig;
use crate::crypto::EcdhKeypair;
use crate::registry::DeviceRegistry;
use crate::session::SessionManager;
use crate::state::AppState;

/// Build the application state from configuration.
///
/// Loads (or generates) the server keypair and opens the durable registry
/// and audit snapshots.
pub fn build_state(config: &ServerConfig) -> Result<AppState> {
    let keypair = EcdhKeypair::load_or_generate(&config.private_key_path)
        .context("failed to load or generate private key")?;
    info!(path = %config.private_key_path.display(), "server keypair ready");

    let registry = Arc::new(
        DeviceRegistry::open(config.registry_path.clone(), config.allowance)
            .context("failed to open device registry")?,
    );
    let sessions = Arc::new(SessionManager::new(config.challenge_ttl));
    let audit = Arc::new(AuditLog::open(config.audit_path.clone()));

    Ok(AppState::new(
        sessions,
        registry.clone(),
        registry,
        audit,
        Arc::new(keypair),
        config.pre_shared_key.as_bytes().to_vec(),
    ))
}

/// Run the server until ctrl-c.
pub async fn serve(config: ServerConfig) -> Result<()> {
    let state = build_state(&config)?;
    let app = router::build_router(&state, config.request_timeout);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, allowance = config.allowance, "server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
