//! Challenge issuance.

use axum::Json;
use axum::extract::Path;
use axum::extract::State;
use serde_json::Value;
use serde_json::json;

use crate::error::ApiError;
use crate::state::AppState;

/// `GET /api/challenge/{serial_number}`
///
/// Issues a fresh 32-byte challenge for the serial number and opens a
/// session that stays valid until `expires_at`. Unauthenticated: the
/// challenge is worthless without the fleet key.
pub async fn issue_challenge(
    State(app): State<AppState>,
    Path(serial_number): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if serial_number.is_empty() {
        return Err(ApiError::bad_request("serial number is required"));
    }

    let (challenge, expires_at) = app.sessions().issue(&serial_number);

    Ok(Json(json!({
        "code": 0,
        "msg": "ok",
        "serial_number": serial_number,
        "challenge": challenge,
        "expires_at": expires_at.to_rfc3339(),
    })))
}
