//! Simulator-side flows: background registration and the control plane.

mod common;

use std::time::Duration;

use fss::client::AdminClient;
use fss::client::SimulatorClient;
use fss::config::DEFAULT_PRE_SHARED_KEY;
use fss::config::SimulatorConfig;
use fss::simulator::Simulator;

use common::TestServer;
use common::spawn_server;

fn simulator_config(server: &TestServer, state_dir: &std::path::Path) -> SimulatorConfig {
    SimulatorConfig {
        port: 0,
        server_addr: server.addr.clone(),
        state_dir: state_dir.to_path_buf(),
        pre_shared_key: DEFAULT_PRE_SHARED_KEY.to_string(),
        register_interval: Duration::from_millis(100),
    }
}

/// Poll the server's device list until it reaches `expected` entries.
async fn wait_for_registrations(admin: &AdminClient, expected: usize) -> bool {
    for _ in 0..100 {
        if admin.device_list().await.map(|d| d.len() == expected).unwrap_or(false) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test]
async fn test_background_registration_retries_until_success() {
    let server = spawn_server(3).await;
    let dir = tempfile::tempdir().unwrap();
    let simulator = Simulator::new(simulator_config(&server, dir.path()));

    let created = simulator.generate_devices(&server.addr, 2, 1).unwrap();
    assert_eq!(created, 2);

    let admin = AdminClient::new(&server.addr);
    assert!(
        wait_for_registrations(&admin, 2).await,
        "devices did not register in time"
    );

    // Both devices hold the server key now.
    for handle in simulator.device_handles() {
        assert!(handle.lock().await.is_paired());
    }
    simulator.shutdown();
}

#[tokio::test]
async fn test_generate_skips_existing_serials() {
    let server = spawn_server(5).await;
    let dir = tempfile::tempdir().unwrap();
    let simulator = Simulator::new(simulator_config(&server, dir.path()));

    assert_eq!(simulator.generate_devices(&server.addr, 3, 1).unwrap(), 3);
    assert_eq!(simulator.generate_devices(&server.addr, 3, 1).unwrap(), 0);
    simulator.shutdown();
}

#[tokio::test]
async fn test_control_plane_update_and_replay() {
    let server = spawn_server(3).await;
    let dir = tempfile::tempdir().unwrap();
    let simulator = Simulator::new(simulator_config(&server, dir.path()));

    // Serve the control plane on an ephemeral port.
    let app = fss::simulator::build_control_router(simulator.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

    let control = SimulatorClient::new(&addr);
    control.generate_devices(&server.addr, 1, 7).await.unwrap();

    let admin = AdminClient::new(&server.addr);
    assert!(
        wait_for_registrations(&admin, 1).await,
        "device did not register in time"
    );

    control.update_device(7, "1.0.1").await.unwrap();
    let status = control.device_status(7).await.unwrap();
    assert_eq!(status["firmware_version"], "1.0.1");
    assert_eq!(status["state"], "updated");

    // The replay attack: one accepted, one rejected.
    control.replay(7).await.unwrap();
    let incidents = admin.audit_logs("incidents").await.unwrap();
    assert_eq!(incidents.last().unwrap()["code"], 401);

    simulator.shutdown();
}

#[tokio::test]
async fn test_devices_restored_from_state_dir() {
    let server = spawn_server(3).await;
    let dir = tempfile::tempdir().unwrap();

    {
        let simulator = Simulator::new(simulator_config(&server, dir.path()));
        simulator.generate_devices(&server.addr, 2, 1).unwrap();
        simulator.shutdown();
    }

    let simulator = Simulator::new(simulator_config(&server, dir.path()));
    assert_eq!(simulator.restore_devices().unwrap(), 2);
    simulator.shutdown();
}
