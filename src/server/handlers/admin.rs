//! Admin channel: quota, device lifecycle, audit queries.

use std::net::SocketAddr;

use axum::Json;
use axum::extract::ConnectInfo;
use axum::extract::Path;
use axum::extract::State;
use serde::Deserialize;
use serde_json::Value;
use serde_json::json;
use tracing::info;

use crate::audit::AuditCategory;
use crate::error::ApiError;
use crate::registry::RegistryError;
use crate::state::AppState;

/// Body of `POST /api/update-allowance`.
#[derive(Debug, Deserialize)]
pub struct UpdateAllowanceRequest {
    /// How many registrations to add to the quota; must be positive.
    #[serde(default)]
    pub increase_allowance: i64,
}

/// `POST /api/update-allowance`
pub async fn update_allowance(
    State(app): State<AppState>,
    Json(req): Json<UpdateAllowanceRequest>,
) -> Result<Json<Value>, ApiError> {
    let allowance = app
        .allowance()
        .increase_allowance(req.increase_allowance)
        .map_err(|e| match e {
            RegistryError::InvalidIncrease => ApiError::bad_request("invalid increase_allowance"),
            other => ApiError::internal(other.to_string()),
        })?;
    info!(allowance, "allowance raised");

    Ok(Json(json!({
        "code": 0,
        "msg": "ok",
        "allowance": allowance,
    })))
}

/// `GET /api/devices`
pub async fn list_devices(State(app): State<AppState>) -> Json<Value> {
    let devices = app.devices().list();
    Json(json!({
        "code": 0,
        "msg": "success",
        "total": devices.len(),
        "devices": devices,
    }))
}

/// `POST /api/devices/{serial_number}/block`
pub async fn block_device(
    State(app): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(serial_number): Path<String>,
) -> Result<Json<Value>, ApiError> {
    set_device_authorization(&app, &addr.to_string(), &serial_number, "block").await
}

/// `POST /api/devices/{serial_number}/authorize`
pub async fn authorize_device(
    State(app): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(serial_number): Path<String>,
) -> Result<Json<Value>, ApiError> {
    set_device_authorization(&app, &addr.to_string(), &serial_number, "authorize").await
}

/// Shared body of block/authorize. Both are idempotent and create a
/// placeholder record when the serial number is unknown.
async fn set_device_authorization(
    app: &AppState,
    remote: &str,
    serial_number: &str,
    operation: &str,
) -> Result<Json<Value>, ApiError> {
    let result = match operation {
        "block" => app.devices().block(serial_number),
        _ => app.devices().authorize(serial_number),
    };
    if let Err(e) = result {
        app.audit().append(
            AuditCategory::Incidents,
            remote,
            serial_number,
            &format!("failed to {operation}"),
            500,
            Some(e.to_string()),
        );
        return Err(ApiError::internal(e.to_string()));
    }

    app.audit()
        .append(AuditCategory::Normal, remote, serial_number, "success", 200, None);
    info!(serial_number, operation, "device authorization changed");

    Ok(Json(json!({
        "code": 0,
        "msg": "success",
        "serial_number": serial_number,
        "operation": operation,
    })))
}

/// `GET /api/logs/{category}`
pub async fn audit_logs(
    State(app): State<AppState>,
    Path(category): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let entries = app
        .audit()
        .query(&category)
        .map_err(|e| ApiError::not_found(e.to_string()))?;

    Ok(Json(json!({
        "code": 0,
        "msg": "success",
        "type": category,
        "count": entries.len(),
        "audit_logs": entries,
    })))
}
