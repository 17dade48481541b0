//! HTTP clients for the server and simulator APIs.
//!
//! Three thin wrappers over one [`ApiClient`]: the device-side protocol
//! client ([`DeviceClient`]), the server admin client ([`AdminClient`]) and
//! the simulator control-plane client ([`SimulatorClient`]). All of them
//! speak the `{code, msg}` envelope; a non-zero `code` surfaces as
//! [`ClientError::Api`].

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use serde_json::json;
use snafu::ResultExt;
use snafu::Snafu;

/// Client-side request timeout.
const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

/// Errors from API clients.
#[derive(Debug, Snafu)]
pub enum ClientError {
    /// Transport-level failure.
    #[snafu(display("request failed: {source}"))]
    Http {
        /// The underlying reqwest error.
        source: reqwest::Error,
    },

    /// The server answered with a non-zero envelope code.
    #[snafu(display("{msg}"))]
    Api {
        /// Envelope code (mirrors the HTTP status).
        code: i64,
        /// Envelope message.
        msg: String,
    },

    /// The response body did not have the expected shape.
    #[snafu(display("unexpected response: {reason}"))]
    Malformed {
        /// What was missing or wrong.
        reason: String,
    },
}

/// Convenience alias for client results.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Shared HTTP plumbing for the typed clients.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    /// Client for `http://{addr}`.
    pub fn new(addr: &str) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(HTTP_TIMEOUT)
                .build()
                .expect("reqwest client construction cannot fail with static options"),
            base_url: format!("http://{addr}"),
        }
    }

    /// Send a request and decode the `{code, msg}` envelope.
    async fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&Value>,
        bearer: Option<&str>,
    ) -> Result<Value> {
        let mut builder = self.http.request(method, format!("{}{path}", self.base_url));
        if let Some(body) = body {
            builder = builder.json(body);
        }
        if let Some(bearer) = bearer {
            builder = builder.header(reqwest::header::AUTHORIZATION, bearer);
        }

        let response = builder.send().await.context(HttpSnafu)?;
        let out: Value = response.json().await.context(HttpSnafu)?;

        let code = out.get("code").and_then(Value::as_i64).unwrap_or(0);
        if code != 0 {
            let msg = out
                .get("msg")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            return Err(ClientError::Api { code, msg });
        }
        Ok(out)
    }

    async fn get(&self, path: &str) -> Result<Value> {
        self.request(reqwest::Method::GET, path, None, None).await
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        self.request(reqwest::Method::POST, path, Some(body), None).await
    }
}

fn str_field(value: &Value, field: &str) -> Result<String> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ClientError::Malformed {
            reason: format!("missing field '{field}'"),
        })
}

// ============================================================================
// Device protocol client
// ============================================================================

/// A successful firmware response, still sealed.
#[derive(Debug, Clone, Deserialize)]
pub struct FirmwareResponse {
    /// Serial number the payload was sealed for.
    pub serial_number: String,
    /// Base64 of `nonce || ciphertext || tag`.
    pub data: String,
    /// Version string the server delivered.
    pub version: String,
    /// Server-side unix timestamp.
    pub timestamp: i64,
    /// Hex HMAC-SHA256 over `data` under the derived MAC key.
    pub signature: String,
}

/// Device-side protocol driver: challenge, verify, register, fetch.
///
/// Owns no key material; callers sign challenges and open payloads
/// themselves.
#[derive(Debug, Clone)]
pub struct DeviceClient {
    api: ApiClient,
}

impl DeviceClient {
    /// Client for the server at `addr` (`host:port`).
    pub fn new(addr: &str) -> Self {
        Self {
            api: ApiClient::new(addr),
        }
    }

    /// Fetch a challenge for `serial_number`.
    ///
    /// Rejects a response echoing a different serial number.
    pub async fn get_challenge(&self, serial_number: &str) -> Result<String> {
        let out = self.api.get(&format!("/api/challenge/{serial_number}")).await?;
        let echoed = str_field(&out, "serial_number")?;
        if echoed != serial_number {
            return Err(ClientError::Malformed {
                reason: format!("serial number mismatch: expected {serial_number}, got {echoed}"),
            });
        }
        str_field(&out, "challenge")
    }

    /// Trade a signed challenge for a one-shot bearer token.
    pub async fn get_token(
        &self,
        serial_number: &str,
        challenge: &str,
        signature: &str,
    ) -> Result<String> {
        let out = self
            .api
            .post(
                "/api/verify",
                &json!({
                    "serial_number": serial_number,
                    "challenge": challenge,
                    "signature": signature,
                }),
            )
            .await?;
        str_field(&out, "token")
    }

    /// Register the device, returning the server's public key (base64).
    pub async fn register(
        &self,
        serial_number: &str,
        public_key: &str,
        state: &str,
        bearer: &str,
    ) -> Result<String> {
        let out = self
            .api
            .request(
                reqwest::Method::POST,
                "/api/register",
                Some(&json!({
                    "serial_number": serial_number,
                    "public_key": public_key,
                    "state": state,
                })),
                Some(bearer),
            )
            .await?;
        str_field(&out, "public_key")
    }

    /// Fetch the sealed firmware payload for `version`.
    pub async fn get_firmware(&self, version: &str, bearer: &str) -> Result<FirmwareResponse> {
        let out = self
            .api
            .request(
                reqwest::Method::GET,
                &format!("/api/firmware/{version}"),
                None,
                Some(bearer),
            )
            .await?;
        serde_json::from_value(out).map_err(|e| ClientError::Malformed {
            reason: e.to_string(),
        })
    }
}

// ============================================================================
// Admin client
// ============================================================================

/// Admin channel client used by the `fss-server` CLI subcommands.
#[derive(Debug, Clone)]
pub struct AdminClient {
    api: ApiClient,
}

impl AdminClient {
    /// Client for the server at `addr` (`host:port`).
    pub fn new(addr: &str) -> Self {
        Self {
            api: ApiClient::new(addr),
        }
    }

    /// List registered devices.
    pub async fn device_list(&self) -> Result<Vec<Value>> {
        let out = self.api.get("/api/devices").await?;
        Ok(out
            .get("devices")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    /// Block a device.
    pub async fn block_device(&self, serial_number: &str) -> Result<()> {
        self.api
            .post(&format!("/api/devices/{serial_number}/block"), &json!({}))
            .await
            .map(|_| ())
    }

    /// Re-authorize a device.
    pub async fn authorize_device(&self, serial_number: &str) -> Result<()> {
        self.api
            .post(&format!("/api/devices/{serial_number}/authorize"), &json!({}))
            .await
            .map(|_| ())
    }

    /// Raise the allowance, returning the new value.
    pub async fn increase_allowance(&self, increase: i64) -> Result<i64> {
        let out = self
            .api
            .post("/api/update-allowance", &json!({ "increase_allowance": increase }))
            .await?;
        out.get("allowance")
            .and_then(Value::as_i64)
            .ok_or_else(|| ClientError::Malformed {
                reason: "missing field 'allowance'".to_string(),
            })
    }

    /// Query one audit category.
    pub async fn audit_logs(&self, category: &str) -> Result<Vec<Value>> {
        let out = self.api.get(&format!("/api/logs/{category}")).await?;
        Ok(out
            .get("audit_logs")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }
}

// ============================================================================
// Simulator control-plane client
// ============================================================================

/// Client for the simulator's own HTTP API, used by the `fss-simulator`
/// CLI subcommands.
#[derive(Debug, Clone)]
pub struct SimulatorClient {
    api: ApiClient,
}

impl SimulatorClient {
    /// Client for the simulator at `addr` (`host:port`).
    pub fn new(addr: &str) -> Self {
        Self {
            api: ApiClient::new(addr),
        }
    }

    /// Generate `count` devices starting at `start_serial`.
    pub async fn generate_devices(&self, server: &str, count: u32, start_serial: u32) -> Result<()> {
        self.api
            .post(
                "/api/devices",
                &json!({ "server": server, "count": count, "start_serial": start_serial }),
            )
            .await
            .map(|_| ())
    }

    /// Update one device to `version`.
    pub async fn update_device(&self, serial: u32, version: &str) -> Result<()> {
        self.api
            .post(&format!("/api/update/{serial}"), &json!({ "version": version }))
            .await
            .map(|_| ())
    }

    /// Update an inclusive serial range to `version`.
    pub async fn batch_update(&self, start: u32, end: u32, version: &str) -> Result<()> {
        self.api
            .post(
                "/api/batch-update",
                &json!({ "start_serial": start, "end_serial": end, "version": version }),
            )
            .await
            .map(|_| ())
    }

    /// One device's status and update history.
    pub async fn device_status(&self, serial: u32) -> Result<Value> {
        self.api.get(&format!("/api/status/{serial}")).await
    }

    /// List all simulated devices.
    pub async fn device_list(&self) -> Result<Vec<Value>> {
        let out = self.api.get("/api/devices").await?;
        Ok(out
            .get("devices")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    /// Mount the replay attack for one device.
    pub async fn replay(&self, serial: u32) -> Result<()> {
        self.api
            .post(&format!("/api/replay/{serial}"), &json!({}))
            .await
            .map(|_| ())
    }

    /// Mount the replay attack over an inclusive serial range.
    pub async fn batch_replay(&self, start: u32, end: u32) -> Result<()> {
        self.api
            .post(
                "/api/batch-replay",
                &json!({ "start_serial": start, "end_serial": end }),
            )
            .await
            .map(|_| ())
    }
}
