//! Authenticated firmware delivery.

use std::net::SocketAddr;

use axum::Json;
use axum::extract::ConnectInfo;
use axum::extract::Path;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use serde_json::Value;
use serde_json::json;
use tracing::info;

use crate::audit::AuditCategory;
use crate::crypto;
use crate::error::ApiError;
use crate::state::AppState;

/// `GET /api/firmware/{version}`
///
/// Delivers the sealed firmware payload to an authenticated, registered
/// device:
///
/// 1. consume the one-shot bearer (replayed tokens die here),
/// 2. check the device is registered and authorized,
/// 3. ECDH against the stored device public key, HKDF into `(enc, mac)`,
/// 4. AES-GCM-seal the payload, base64 it, HMAC-tag the base64 text.
///
/// The MAC binds the base64 ciphertext, not the plaintext, so the device
/// verifies before it ever feeds bytes to the cipher. Every outcome of this
/// handler past authentication lands in the `updates` audit category.
pub async fn firmware_update(
    State(app): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(version): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let remote = addr.to_string();
    let auth = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    let serial_number = match app.sessions().consume_token(auth) {
        Ok(serial_number) => serial_number,
        Err(e) => {
            app.audit().append(
                AuditCategory::Incidents,
                &remote,
                "",
                "missing or invalid authorization header",
                401,
                Some(e.to_string()),
            );
            return Err(ApiError::unauthorized("missing or invalid authorization header"));
        }
    };

    if version.is_empty() {
        app.audit().append(
            AuditCategory::Updates,
            &remote,
            &serial_number,
            "request invalid version",
            400,
            None,
        );
        return Err(ApiError::bad_request("invalid version"));
    }

    if let Err(e) = app.devices().is_registered(&serial_number) {
        app.audit().append(
            AuditCategory::Updates,
            &remote,
            &serial_number,
            "device not registered",
            409,
            Some(e.to_string()),
        );
        return Err(ApiError::conflict("device not registered"));
    }

    let device_key = match crypto::public_key_from_base64(&app.devices().public_key(&serial_number)) {
        Ok(key) => key,
        Err(e) => {
            app.audit().append(
                AuditCategory::Updates,
                &remote,
                &serial_number,
                "invalid public key",
                400,
                Some(e.to_string()),
            );
            return Err(ApiError::bad_request(format!("invalid public key: {e}")));
        }
    };

    let shared_secret = app.keypair().shared_secret(&device_key);
    let (enc_key, mac_key) = crypto::derive_keys(&shared_secret);

    // The payload stands in for an opaque firmware blob; the sealing scheme
    // applies to any byte sequence the server maps a version to.
    let firmware_bytes = version.as_bytes();
    let sealed = match crypto::seal(&enc_key, firmware_bytes) {
        Ok(sealed) => sealed,
        Err(e) => {
            app.audit().append(
                AuditCategory::Updates,
                &remote,
                &serial_number,
                "failed to encrypt response",
                500,
                Some(e.to_string()),
            );
            return Err(ApiError::internal("failed to encrypt response"));
        }
    };

    let data = BASE64.encode(&sealed);
    let signature = crypto::sign(&data, &mac_key);

    app.audit()
        .append(AuditCategory::Updates, &remote, &serial_number, "success", 200, None);
    info!(%serial_number, %version, "firmware delivered");

    Ok(Json(json!({
        "code": 0,
        "msg": "success",
        "serial_number": serial_number,
        "data": data,
        "version": version,
        "timestamp": Utc::now().timestamp(),
        "signature": signature,
    })))
}
