//! Axum router configuration.
//!
//! Route structure:
//!
//! ```text
//! /api
//! ├── GET  /challenge/{serial_number}     - issue challenge          (open)
//! ├── POST /verify                        - verify HMAC, mint bearer (open)
//! ├── POST /register                      - register device          (bearer)
//! ├── GET  /firmware/{version}            - fetch sealed firmware    (bearer)
//! ├── POST /update-allowance              - raise quota              (admin)
//! ├── GET  /devices                       - list devices             (admin)
//! ├── POST /devices/{serial_number}/block     - disable device       (admin)
//! ├── POST /devices/{serial_number}/authorize - re-enable device     (admin)
//! └── GET  /logs/{category}               - query audit log          (admin)
//! ```

use std::time::Duration;

use axum::Router;
use axum::extract::Request;
use axum::extract::State;
use axum::middleware;
use axum::middleware::Next;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;

use crate::error::ApiError;
use crate::state::AppState;

use super::handlers;

/// Build the complete router with the request deadline applied.
pub fn build_router(state: &AppState, request_timeout: Duration) -> Router {
    Router::new()
        .nest("/api", api_router())
        .layer(middleware::from_fn_with_state(request_timeout, deadline))
        .with_state(state.clone())
}

fn api_router() -> Router<AppState> {
    Router::new()
        // Device-facing protocol
        .route("/challenge/{serial_number}", get(handlers::issue_challenge))
        .route("/verify", post(handlers::verify_challenge))
        .route("/register", post(handlers::register_device))
        .route("/firmware/{version}", get(handlers::firmware_update))
        // Admin channel
        .route("/update-allowance", post(handlers::update_allowance))
        .route("/devices", get(handlers::list_devices))
        .route("/devices/{serial_number}/block", post(handlers::block_device))
        .route("/devices/{serial_number}/authorize", post(handlers::authorize_device))
        .route("/logs/{category}", get(handlers::audit_logs))
}

/// Abort a request that outlives the configured deadline.
///
/// Handlers commit no side effects after their final `.await` point, so an
/// abort here never leaves half-finished state behind.
async fn deadline(State(timeout): State<Duration>, request: Request, next: Next) -> Response {
    match tokio::time::timeout(timeout, next.run(request)).await {
        Ok(response) => response,
        Err(_) => ApiError::internal("request deadline exceeded").into_response(),
    }
}
