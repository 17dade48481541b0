//! Shared harness: boots the real server on an ephemeral port.

#![allow(dead_code)] // not every test binary uses every helper

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use fss::AppState;
use fss::audit::AuditLog;
use fss::config::DEFAULT_PRE_SHARED_KEY;
use fss::crypto::EcdhKeypair;
use fss::registry::DeviceRegistry;
use fss::server::router::build_router;
use fss::session::SessionManager;

/// A running server plus its scratch directory.
pub struct TestServer {
    /// `host:port` of the listening server.
    pub addr: String,
    dir: tempfile::TempDir,
}

impl TestServer {
    /// Read the allowance straight out of the durable registry snapshot.
    pub fn persisted_allowance(&self) -> i64 {
        let data = std::fs::read(self.dir.path().join("registry.json")).unwrap();
        let doc: serde_json::Value = serde_json::from_slice(&data).unwrap();
        doc["allowance"].as_i64().unwrap()
    }

    /// Scratch directory shared with device state files.
    pub fn state_dir(&self) -> std::path::PathBuf {
        self.dir.path().to_path_buf()
    }
}

/// Boot a server with the given allowance and the default 5-minute
/// challenge TTL.
pub async fn spawn_server(allowance: i64) -> TestServer {
    spawn_server_with_ttl(allowance, Duration::from_secs(300)).await
}

/// Boot a server with an explicit challenge TTL (tests use tiny TTLs to
/// exercise expiry without waiting out real time).
pub async fn spawn_server_with_ttl(allowance: i64, challenge_ttl: Duration) -> TestServer {
    let dir = tempfile::tempdir().unwrap();

    let keypair = EcdhKeypair::load_or_generate(&dir.path().join("server_key.pem")).unwrap();
    let registry =
        Arc::new(DeviceRegistry::open(dir.path().join("registry.json"), allowance).unwrap());
    let sessions = Arc::new(SessionManager::new(challenge_ttl));
    let audit = Arc::new(AuditLog::open(dir.path().join("audit.json")));

    let state = AppState::new(
        sessions,
        registry.clone(),
        registry,
        audit,
        Arc::new(keypair),
        DEFAULT_PRE_SHARED_KEY.as_bytes().to_vec(),
    );

    let app = build_router(&state, Duration::from_secs(180));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    TestServer {
        addr: addr.to_string(),
        dir,
    }
}
