//! Challenge verification: the one-shot gate that mints bearer tokens.

use std::net::SocketAddr;

use axum::Json;
use axum::extract::ConnectInfo;
use axum::extract::State;
use serde::Deserialize;
use serde_json::Value;
use serde_json::json;
use tracing::debug;

use crate::audit::AuditCategory;
use crate::crypto;
use crate::error::ApiError;
use crate::registry::RegistryError;
use crate::state::AppState;

/// Body of `POST /api/verify`.
#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    /// 10-digit device serial number.
    #[serde(default)]
    pub serial_number: String,
    /// The challenge previously issued for this serial number.
    #[serde(default)]
    pub challenge: String,
    /// Hex HMAC-SHA256 of the challenge under the fleet key.
    #[serde(default)]
    pub signature: String,
}

/// `POST /api/verify`
///
/// Proof-of-identity gate. The session must exist and be unexpired, the
/// HMAC must check out, and the session must never have been verified
/// before; only then is a bearer token minted. This handler is the sole
/// producer of bearer tokens.
///
/// Unknown serial numbers are rejected outright when the allowance is
/// spent: there is no point handing out tokens for registrations that
/// cannot succeed. Serials already in the registry are exempt, since their
/// tokens pay for re-registration or firmware fetches, not quota.
pub async fn verify_challenge(
    State(app): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(req): Json<VerifyRequest>,
) -> Result<Json<Value>, ApiError> {
    let remote = addr.to_string();

    if req.serial_number.is_empty() || req.challenge.is_empty() || req.signature.is_empty() {
        app.audit().append(
            AuditCategory::Incidents,
            &remote,
            &req.serial_number,
            "missing required fields",
            400,
            None,
        );
        return Err(ApiError::bad_request("missing required fields"));
    }

    let is_known_device = !matches!(
        app.devices().is_registered(&req.serial_number),
        Err(RegistryError::NotRegistered)
    );
    if !is_known_device && app.allowance().allowance() <= 0 {
        app.audit().append(
            AuditCategory::Incidents,
            &remote,
            &req.serial_number,
            "allowance exceeded",
            403,
            None,
        );
        return Err(ApiError::forbidden("allowance exceeded"));
    }

    if !app.sessions().is_valid(&req.serial_number, &req.challenge) {
        app.audit().append(
            AuditCategory::Incidents,
            &remote,
            &req.serial_number,
            "invalid or expired session",
            400,
            None,
        );
        return Err(ApiError::bad_request("invalid or expired session"));
    }

    if !crypto::verify(&req.challenge, app.pre_shared_key(), &req.signature) {
        app.audit().append(
            AuditCategory::Incidents,
            &remote,
            &req.serial_number,
            "invalid signature",
            401,
            None,
        );
        return Err(ApiError::unauthorized("invalid signature"));
    }

    // The single idempotency-breaking transition: a second verify of the
    // same session lands here and fails.
    if !app.sessions().mark_verified(&req.serial_number, &req.challenge) {
        app.audit().append(
            AuditCategory::Incidents,
            &remote,
            &req.serial_number,
            "invalid or verified session",
            400,
            None,
        );
        return Err(ApiError::bad_request("invalid or verified session"));
    }

    let token = app.sessions().mint_token(&req.serial_number);
    debug!(serial_number = %req.serial_number, "challenge verified, bearer minted");

    Ok(Json(json!({
        "code": 0,
        "msg": "success",
        "serial_number": req.serial_number,
        "status": "verified",
        "token": token,
    })))
}
