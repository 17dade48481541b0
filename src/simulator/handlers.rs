//! Simulator control-plane HTTP API.

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::Path;
use axum::extract::State;
use axum::routing::get;
use axum::routing::post;
use serde::Deserialize;
use serde_json::Value;
use serde_json::json;

use crate::error::ApiError;

use super::DEFAULT_UPDATE_VERSION;
use super::Simulator;

/// Build the control-plane router.
pub fn build_router(simulator: Arc<Simulator>) -> Router {
    Router::new()
        .nest(
            "/api",
            Router::new()
                .route("/devices", post(generate_devices).get(list_devices))
                .route("/update/{serial}", post(update_device))
                .route("/batch-update", post(batch_update))
                .route("/status/{serial}", get(device_status))
                .route("/replay/{serial}", post(replay_device))
                .route("/batch-replay", post(batch_replay)),
        )
        .with_state(simulator)
}

/// Body of `POST /api/devices`.
#[derive(Debug, Deserialize)]
struct GenerateRequest {
    /// Firmware server address; defaults to the configured one.
    #[serde(default)]
    server: Option<String>,
    count: u32,
    start_serial: u32,
}

async fn generate_devices(
    State(simulator): State<Arc<Simulator>>,
    Json(req): Json<GenerateRequest>,
) -> Result<Json<Value>, ApiError> {
    if req.count == 0 {
        return Err(ApiError::bad_request("count must be positive"));
    }
    let server = req
        .server
        .unwrap_or_else(|| simulator.config().server_addr.clone());

    let created = simulator
        .generate_devices(&server, req.count, req.start_serial)
        .map_err(|e| ApiError::internal(format!("failed to generate devices: {e}")))?;

    Ok(Json(json!({
        "code": 0,
        "msg": "success",
        "created": created,
    })))
}

async fn list_devices(State(simulator): State<Arc<Simulator>>) -> Json<Value> {
    let mut devices = Vec::new();
    for handle in simulator.device_handles() {
        let device = handle.lock().await;
        devices.push(device_summary(&device));
    }
    Json(json!({
        "code": 0,
        "msg": "success",
        "total": devices.len(),
        "devices": devices,
    }))
}

/// Body of `POST /api/update/{serial}`.
#[derive(Debug, Deserialize)]
struct UpdateRequest {
    #[serde(default)]
    version: Option<String>,
}

async fn update_device(
    State(simulator): State<Arc<Simulator>>,
    Path(serial): Path<u32>,
    Json(req): Json<UpdateRequest>,
) -> Result<Json<Value>, ApiError> {
    let version = req.version.unwrap_or_else(|| DEFAULT_UPDATE_VERSION.to_string());
    let handle = simulator
        .device(serial)
        .ok_or_else(|| ApiError::not_found("device not found"))?;

    let mut device = handle.lock().await;
    device
        .update(&version)
        .await
        .map_err(|e| ApiError::internal(format!("failed to update device: {e}")))?;

    Ok(Json(json!({
        "code": 0,
        "msg": "success",
        "serial_number": device.serial_number,
        "version": device.firmware_version,
    })))
}

/// Body of `POST /api/batch-update` and `POST /api/batch-replay`.
#[derive(Debug, Deserialize)]
struct RangeRequest {
    start_serial: u32,
    end_serial: u32,
    #[serde(default)]
    version: Option<String>,
}

async fn batch_update(
    State(simulator): State<Arc<Simulator>>,
    Json(req): Json<RangeRequest>,
) -> Result<Json<Value>, ApiError> {
    if req.end_serial < req.start_serial {
        return Err(ApiError::bad_request("invalid serial range"));
    }
    let version = req.version.unwrap_or_else(|| DEFAULT_UPDATE_VERSION.to_string());

    // Per-device failures (e.g. not yet registered) do not abort the batch.
    let mut updated = 0;
    for serial in req.start_serial..=req.end_serial {
        if let Some(handle) = simulator.device(serial) {
            if handle.lock().await.update(&version).await.is_ok() {
                updated += 1;
            }
        }
    }

    Ok(Json(json!({
        "code": 0,
        "msg": "success",
        "updated": updated,
    })))
}

async fn device_status(
    State(simulator): State<Arc<Simulator>>,
    Path(serial): Path<u32>,
) -> Result<Json<Value>, ApiError> {
    let handle = simulator
        .device(serial)
        .ok_or_else(|| ApiError::not_found("device not found"))?;
    let device = handle.lock().await;

    Ok(Json(json!({
        "code": 0,
        "msg": "success",
        "serial_number": device.serial_number,
        "firmware_version": device.firmware_version,
        "state": device.state.as_str(),
        "update_history": device.update_history,
    })))
}

async fn replay_device(
    State(simulator): State<Arc<Simulator>>,
    Path(serial): Path<u32>,
) -> Result<Json<Value>, ApiError> {
    let handle = simulator
        .device(serial)
        .ok_or_else(|| ApiError::not_found("device not found"))?;

    let mut device = handle.lock().await;
    let outcome = device
        .replay(DEFAULT_UPDATE_VERSION)
        .await
        .map_err(|e| ApiError::internal(format!("failed to replay device: {e}")))?;

    Ok(Json(json!({
        "code": 0,
        "msg": "success",
        "serial_number": device.serial_number,
        "accepted": outcome.accepted,
        "rejected": outcome.rejected,
    })))
}

async fn batch_replay(
    State(simulator): State<Arc<Simulator>>,
    Json(req): Json<RangeRequest>,
) -> Result<Json<Value>, ApiError> {
    if req.end_serial < req.start_serial {
        return Err(ApiError::bad_request("invalid serial range"));
    }

    let mut outcomes = Vec::new();
    for serial in req.start_serial..=req.end_serial {
        let handle = simulator
            .device(serial)
            .ok_or_else(|| ApiError::not_found("device not found"))?;
        let mut device = handle.lock().await;
        let outcome = device
            .replay(DEFAULT_UPDATE_VERSION)
            .await
            .map_err(|e| ApiError::internal(format!("failed to replay device: {e}")))?;
        outcomes.push(json!({
            "serial_number": device.serial_number,
            "accepted": outcome.accepted,
            "rejected": outcome.rejected,
        }));
    }

    Ok(Json(json!({
        "code": 0,
        "msg": "success",
        "results": outcomes,
    })))
}

fn device_summary(device: &super::Device) -> Value {
    json!({
        "serial_number": device.serial_number,
        "firmware_version": device.firmware_version,
        "state": device.state.as_str(),
        "update_history": device.update_history,
    })
}
