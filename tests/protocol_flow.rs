//! End-to-end protocol scenarios against a real server.

mod common;

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use fss::client::AdminClient;
use fss::client::ClientError;
use fss::client::DeviceClient;
use fss::config::DEFAULT_PRE_SHARED_KEY;
use fss::crypto;
use fss::crypto::EcdhKeypair;
use fss::simulator::Device;
use fss::simulator::DeviceState;

use common::spawn_server;
use common::spawn_server_with_ttl;

const SERIAL: &str = "0000000001";

/// Drive challenge -> verify by hand, returning a fresh bearer.
async fn acquire_token(client: &DeviceClient, serial: &str) -> String {
    let challenge = client.get_challenge(serial).await.unwrap();
    let signature = crypto::sign(&challenge, DEFAULT_PRE_SHARED_KEY.as_bytes());
    client.get_token(serial, &challenge, &signature).await.unwrap()
}

#[tokio::test]
async fn test_full_update_flow() {
    let server = spawn_server(1).await;
    let mut device =
        Device::load_or_create(&server.state_dir(), &server.addr, 1, DEFAULT_PRE_SHARED_KEY)
            .unwrap();

    device.register().await.unwrap();
    device.update("1.0.1").await.unwrap();

    assert_eq!(device.firmware_version, "1.0.1");
    assert_eq!(device.state, DeviceState::Updated);
    assert_eq!(device.update_history.len(), 1);
    assert_eq!(server.persisted_allowance(), 0);

    // Exactly one updates entry (the success), one normal entry (register).
    let admin = AdminClient::new(&server.addr);
    let updates = admin.audit_logs("updates").await.unwrap();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0]["description"], "success");
    let normal = admin.audit_logs("normal").await.unwrap();
    assert_eq!(normal.len(), 1);
}

#[tokio::test]
async fn test_firmware_payload_round_trip() {
    let server = spawn_server(1).await;
    let client = DeviceClient::new(&server.addr);
    let keypair = EcdhKeypair::generate();

    let token = acquire_token(&client, SERIAL).await;
    let server_pub = client
        .register(SERIAL, &keypair.public_key_base64(), "bootloader", &token)
        .await
        .unwrap();
    let server_pub = crypto::public_key_from_base64(&server_pub).unwrap();

    let token = acquire_token(&client, SERIAL).await;
    let response = client.get_firmware("1.0.1", &token).await.unwrap();
    assert_eq!(response.serial_number, SERIAL);
    assert_eq!(response.version, "1.0.1");

    // The MAC binds the base64 text and the payload opens to the version.
    let (enc_key, mac_key) = crypto::derive_keys(&keypair.shared_secret(&server_pub));
    assert!(crypto::verify(&response.data, &mac_key, &response.signature));
    assert_eq!(response.signature.len(), 64);

    let sealed = BASE64.decode(&response.data).unwrap();
    assert_eq!(crypto::open(&enc_key, &sealed).unwrap(), b"1.0.1");
}

#[tokio::test]
async fn test_tampered_payload_fails_verification() {
    let server = spawn_server(1).await;
    let client = DeviceClient::new(&server.addr);
    let keypair = EcdhKeypair::generate();

    let token = acquire_token(&client, SERIAL).await;
    let server_pub = client
        .register(SERIAL, &keypair.public_key_base64(), "bootloader", &token)
        .await
        .unwrap();
    let server_pub = crypto::public_key_from_base64(&server_pub).unwrap();

    let token = acquire_token(&client, SERIAL).await;
    let mut response = client.get_firmware("1.0.1", &token).await.unwrap();

    let mut data = response.data.into_bytes();
    data[0] = if data[0] == b'A' { b'B' } else { b'A' };
    response.data = String::from_utf8(data).unwrap();

    let (_, mac_key) = crypto::derive_keys(&keypair.shared_secret(&server_pub));
    assert!(!crypto::verify(&response.data, &mac_key, &response.signature));
}

#[tokio::test]
async fn test_verify_rejected_when_allowance_spent() {
    let server = spawn_server(0).await;
    let client = DeviceClient::new(&server.addr);

    let challenge = client.get_challenge(SERIAL).await.unwrap();
    let signature = crypto::sign(&challenge, DEFAULT_PRE_SHARED_KEY.as_bytes());
    let err = client.get_token(SERIAL, &challenge, &signature).await.unwrap_err();

    match err {
        ClientError::Api { code, msg } => {
            assert_eq!(code, 403);
            assert_eq!(msg, "allowance exceeded");
        }
        other => panic!("expected api error, got {other}"),
    }

    let incidents = AdminClient::new(&server.addr).audit_logs("incidents").await.unwrap();
    assert_eq!(incidents.len(), 1);
    assert_eq!(incidents[0]["description"], "allowance exceeded");
}

#[tokio::test]
async fn test_replayed_bearer_is_rejected() {
    let server = spawn_server(1).await;
    let mut device =
        Device::load_or_create(&server.state_dir(), &server.addr, 1, DEFAULT_PRE_SHARED_KEY)
            .unwrap();
    device.register().await.unwrap();

    let admin = AdminClient::new(&server.addr);
    let incidents_before = admin.audit_logs("incidents").await.unwrap().len();

    // Two concurrent requests on one bearer: exactly one may win.
    let outcome = device.replay("1.0.1").await.unwrap();
    assert_eq!(outcome.accepted, 1);
    assert_eq!(outcome.rejected, 1);
    assert_eq!(device.firmware_version, "1.0.1");

    let incidents = admin.audit_logs("incidents").await.unwrap();
    assert_eq!(incidents.len(), incidents_before + 1);
    assert_eq!(incidents[incidents.len() - 1]["code"], 401);
}

#[tokio::test]
async fn test_token_cannot_be_rebound() {
    let server = spawn_server(2).await;
    let client = DeviceClient::new(&server.addr);
    let keypair = EcdhKeypair::generate();

    // Token minted for device A, register body claims device B.
    let token = acquire_token(&client, "0000000001").await;
    let err = client
        .register("0000000002", &keypair.public_key_base64(), "bootloader", &token)
        .await
        .unwrap_err();
    match err {
        ClientError::Api { code, msg } => {
            assert_eq!(code, 400);
            assert_eq!(msg, "serial number mismatch");
        }
        other => panic!("expected api error, got {other}"),
    }

    // The mismatch burned the token: an honest retry with the right serial
    // now fails unauthorized.
    let err = client
        .register("0000000001", &keypair.public_key_base64(), "bootloader", &token)
        .await
        .unwrap_err();
    match err {
        ClientError::Api { code, .. } => assert_eq!(code, 401),
        other => panic!("expected api error, got {other}"),
    }
}

#[tokio::test]
async fn test_expired_challenge_rejected() {
    let server = spawn_server_with_ttl(1, Duration::from_secs(0)).await;
    let client = DeviceClient::new(&server.addr);

    let challenge = client.get_challenge(SERIAL).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let signature = crypto::sign(&challenge, DEFAULT_PRE_SHARED_KEY.as_bytes());
    let err = client.get_token(SERIAL, &challenge, &signature).await.unwrap_err();
    match err {
        ClientError::Api { code, msg } => {
            assert_eq!(code, 400);
            assert_eq!(msg, "invalid or expired session");
        }
        other => panic!("expected api error, got {other}"),
    }
}

#[tokio::test]
async fn test_challenge_verify_is_one_shot() {
    let server = spawn_server(2).await;
    let client = DeviceClient::new(&server.addr);

    let challenge = client.get_challenge(SERIAL).await.unwrap();
    let signature = crypto::sign(&challenge, DEFAULT_PRE_SHARED_KEY.as_bytes());

    client.get_token(SERIAL, &challenge, &signature).await.unwrap();
    let err = client.get_token(SERIAL, &challenge, &signature).await.unwrap_err();
    match err {
        ClientError::Api { code, msg } => {
            assert_eq!(code, 400);
            assert_eq!(msg, "invalid or verified session");
        }
        other => panic!("expected api error, got {other}"),
    }
}

#[tokio::test]
async fn test_bad_signature_rejected() {
    let server = spawn_server(1).await;
    let client = DeviceClient::new(&server.addr);

    let challenge = client.get_challenge(SERIAL).await.unwrap();
    let signature = crypto::sign(&challenge, b"not-the-fleet-key");
    let err = client.get_token(SERIAL, &challenge, &signature).await.unwrap_err();
    match err {
        ClientError::Api { code, msg } => {
            assert_eq!(code, 401);
            assert_eq!(msg, "invalid signature");
        }
        other => panic!("expected api error, got {other}"),
    }

    let incidents = AdminClient::new(&server.addr).audit_logs("incidents").await.unwrap();
    assert_eq!(incidents.len(), 1);
    assert_eq!(incidents[0]["description"], "invalid signature");
}
