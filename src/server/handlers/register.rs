//! Device registration.

use std::net::SocketAddr;

use axum::Json;
use axum::extract::ConnectInfo;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::http::header::AUTHORIZATION;
use axum::response::IntoResponse;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::audit::AuditCategory;
use crate::error::ApiError;
use crate::state::AppState;

/// Body of `POST /api/register`.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    /// 10-digit device serial number; must match the one bound into the
    /// bearer token.
    #[serde(default)]
    pub serial_number: String,
    /// Device ECDH public key, base64 of the raw point.
    #[serde(default)]
    pub public_key: String,
    /// Device-reported state, e.g. `bootloader`.
    #[serde(default)]
    pub state: String,
}

/// `POST /api/register`
///
/// Consumes the bearer minted by the verify gate, cross-checks the body
/// serial number against the one embedded in the token, and inserts the
/// device record (debiting the allowance for first-time serials). Responds
/// `201 Created` with the server public key the device will need for key
/// agreement.
///
/// The token is consumed before the cross-check, so a mismatch burns it; a
/// valid token can never be rebound to a different identity.
pub async fn register_device(
    State(app): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
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

    if req.serial_number != serial_number {
        app.audit().append(
            AuditCategory::Incidents,
            &remote,
            &serial_number,
            "serial number mismatch",
            400,
            None,
        );
        return Err(ApiError::bad_request("serial number mismatch"));
    }

    if let Err(e) = app
        .devices()
        .register(&serial_number, &req.public_key, &req.state, true)
    {
        app.audit().append(
            AuditCategory::Incidents,
            &remote,
            &serial_number,
            "failed to register device",
            500,
            Some(e.to_string()),
        );
        return Err(ApiError::internal(format!("failed to register device: {e}")));
    }

    app.audit()
        .append(AuditCategory::Normal, &remote, &serial_number, "success", 200, None);
    info!(%serial_number, "device registered");

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "code": 0,
            "msg": "success",
            "serial_number": serial_number,
            "public_key": app.server_public_key(),
        })),
    ))
}
