//! # tRPC Transport
//!
//! The network seam of the connectivity layer. Everything above this module
//! talks to a [`Transport`]; only [`HttpTransport`] knows about HTTP.
//!
//! ## Wire Format
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    tRPC over HTTP                                       │
//! │                                                                         │
//! │  READ   GET  {base}{prefix}/getUnits?input={"page":1}                  │
//! │  WRITE  POST {base}{prefix}/createUnit                                 │
//! │         Content-Type: application/json                                 │
//! │         Idempotency-Key: 3f2a…                                         │
//! │         {"name":"Cedar Loft 3"}                                        │
//! │                                                                         │
//! │  200 {"result":{"data": <value>}}              → Ok(<value>)           │
//! │  200 {"result":{"data":{"json": <value>}}}     → Ok(<value>) superjson │
//! │  4xx {"error":{"message": "..."}}              → Rejected  (final)     │
//! │  5xx                                           → Server    (retryable) │
//! │  no response                                   → NetworkFailure        │
//! │                                                                         │
//! │  HEALTH GET {base}{healthPath}  2xx → reachable                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Attempt timeouts are applied by the caller, not here.

use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use unitlink_core::{Policy, RequestDescriptor, RequestKind};

use crate::error::{LinkError, LinkResult};

/// Header carrying a write's idempotency key.
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

const USER_AGENT: &str = concat!("unitlink/", env!("CARGO_PKG_VERSION"));

// =============================================================================
// Transport Trait
// =============================================================================

/// A single remote call, with no retry and no timeout of its own.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Performs one attempt of a procedure call and returns the unwrapped
    /// response value.
    async fn call(&self, descriptor: &RequestDescriptor) -> LinkResult<Value>;

    /// Performs one lightweight health call.
    async fn health(&self) -> LinkResult<()>;
}

// =============================================================================
// HTTP Transport
// =============================================================================

/// [`Transport`] over HTTP using the tRPC conventions above.
///
/// ## Usage
/// ```rust,ignore
/// let policy = Arc::new(LinkConfig::load(None)?.policy()?);
/// let transport = HttpTransport::new(policy.clone())?;
/// let units = transport.call(&RequestDescriptor::read("getUnits", json!({}))).await?;
/// ```
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    policy: Arc<Policy>,
}

impl HttpTransport {
    /// Creates a transport for the policy's base URL.
    pub fn new(policy: Arc<Policy>) -> LinkResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(policy.timeout().min(Duration::from_secs(10)))
            .build()
            .map_err(|e| LinkError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(HttpTransport { client, policy })
    }

    fn network_error(&self, procedure: &str, err: reqwest::Error) -> LinkError {
        if err.is_timeout() {
            LinkError::Timeout {
                procedure: procedure.to_string(),
                after_ms: self.policy.timeout().as_millis() as u64,
            }
        } else {
            LinkError::NetworkFailure {
                procedure: procedure.to_string(),
                reason: err.to_string(),
            }
        }
    }

    async fn read_body(&self, procedure: &str, response: Response) -> LinkResult<Value> {
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| self.network_error(procedure, e))?;

        if status.is_success() {
            let body: Value = serde_json::from_str(&text).map_err(|e| LinkError::Protocol {
                procedure: procedure.to_string(),
                reason: format!("response is not JSON: {}", e),
            })?;
            return Ok(unwrap_trpc(body));
        }

        Err(status_error(procedure, status, &text))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn call(&self, descriptor: &RequestDescriptor) -> LinkResult<Value> {
        let procedure = descriptor.procedure.as_str();
        let url = self.policy.procedure_url(procedure);

        debug!(procedure = %procedure, kind = %descriptor.kind, url = %url, "HTTP call");

        let request = match descriptor.kind {
            RequestKind::Read => {
                let mut request = self.client.get(&url);
                if !descriptor.payload.is_null() {
                    request = request.query(&[("input", descriptor.payload.to_string())]);
                }
                request
            }
            RequestKind::Write => self
                .client
                .post(&url)
                .header(IDEMPOTENCY_HEADER, descriptor.key())
                .json(&descriptor.payload),
        };

        let response = request
            .send()
            .await
            .map_err(|e| self.network_error(procedure, e))?;

        self.read_body(procedure, response).await
    }

    async fn health(&self) -> LinkResult<()> {
        let url = self.policy.health_url();

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.network_error("health", e))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let text = response.text().await.unwrap_or_default();
            Err(status_error("health", status, &text))
        }
    }
}

// =============================================================================
// Envelope Handling
// =============================================================================

/// Extracts the procedure value from a tRPC success envelope.
///
/// Bodies without a `result.data` member are returned unchanged.
pub fn unwrap_trpc(body: Value) -> Value {
    let data = match body.pointer("/result/data") {
        Some(data) => data,
        None => return body,
    };

    // superjson wraps the value as {"json": value, "meta": {...}}
    if let Some(object) = data.as_object() {
        let only_superjson_keys = object.keys().all(|k| k == "json" || k == "meta");
        if only_superjson_keys {
            if let Some(inner) = object.get("json") {
                return inner.clone();
            }
        }
    }

    data.clone()
}

/// Message of a tRPC error envelope, if the body is one.
pub fn trpc_error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    let error = value.get("error")?;
    error
        .pointer("/json/message")
        .or_else(|| error.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn status_error(procedure: &str, status: StatusCode, body: &str) -> LinkError {
    let message = trpc_error_message(body).unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("unexpected status")
            .to_string()
    });

    if status.is_server_error() {
        LinkError::Server {
            procedure: procedure.to_string(),
            status: status.as_u16(),
            message,
        }
    } else {
        LinkError::Rejected {
            procedure: procedure.to_string(),
            status: status.as_u16(),
            message,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Query;
    use axum::http::{HeaderMap, StatusCode as AxumStatus};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::json;
    use std::collections::HashMap;
    use unitlink_core::{resolve, RawBackendConfig, RawConfig};

    async fn get_units(Query(params): Query<HashMap<String, String>>) -> Json<Value> {
        let input: Value = params
            .get("input")
            .and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or(Value::Null);
        Json(json!({"result": {"data": {"units": [], "total": 0, "page": input["page"], "pageSize": 20}}}))
    }

    async fn get_profile() -> Json<Value> {
        Json(json!({"result": {"data": {"json": {"id": "user-9", "name": "Ada", "email": "a@x", "role": "admin"}, "meta": {}}}}))
    }

    async fn create_unit(headers: HeaderMap, Json(body): Json<Value>) -> Json<Value> {
        let key = headers
            .get(IDEMPOTENCY_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        Json(json!({"result": {"data": {"name": body["name"], "key": key}}}))
    }

    async fn rejected() -> (AxumStatus, Json<Value>) {
        (
            AxumStatus::UNPROCESSABLE_ENTITY,
            Json(json!({"error": {"message": "capacity must be positive", "code": -32600}})),
        )
    }

    async fn broken() -> AxumStatus {
        AxumStatus::SERVICE_UNAVAILABLE
    }

    async fn healthy() -> &'static str {
        "ok"
    }

    async fn spawn_server() -> String {
        let app = Router::new()
            .route("/api/trpc/getUnits", get(get_units))
            .route("/api/trpc/getProfile", get(get_profile))
            .route("/api/trpc/createUnit", post(create_unit))
            .route("/api/trpc/updateUnit", post(rejected))
            .route("/api/trpc/getUnitStats", get(broken))
            .route("/health", get(healthy));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{}", addr)
    }

    fn transport_for(base_url: &str, health_path: Option<&str>) -> HttpTransport {
        let raw = RawConfig {
            api_url: None,
            backend_config: RawBackendConfig {
                base_url: Some(base_url.to_string()),
                health_path: health_path.map(str::to_string),
                ..Default::default()
            },
        };
        HttpTransport::new(Arc::new(resolve(&raw).unwrap())).unwrap()
    }

    #[tokio::test]
    async fn test_read_sends_input_query() {
        let transport = transport_for(&spawn_server().await, None);
        let value = transport
            .call(&RequestDescriptor::read("getUnits", json!({"page": 2})))
            .await
            .unwrap();
        assert_eq!(value["page"], 2);
        assert_eq!(value["total"], 0);
    }

    #[tokio::test]
    async fn test_superjson_is_unwrapped() {
        let transport = transport_for(&spawn_server().await, None);
        let value = transport
            .call(&RequestDescriptor::read("getProfile", Value::Null))
            .await
            .unwrap();
        assert_eq!(value["id"], "user-9");
        assert!(value.get("json").is_none());
    }

    #[tokio::test]
    async fn test_write_sends_idempotency_header() {
        let transport = transport_for(&spawn_server().await, None);
        let descriptor =
            RequestDescriptor::write_with_key("createUnit", json!({"name": "Fir Annex"}), "key-42");
        let value = transport.call(&descriptor).await.unwrap();
        assert_eq!(value["name"], "Fir Annex");
        assert_eq!(value["key"], "key-42");
    }

    #[tokio::test]
    async fn test_4xx_is_rejected_with_trpc_message() {
        let transport = transport_for(&spawn_server().await, None);
        let descriptor = RequestDescriptor::write_with_key("updateUnit", json!({}), "k");
        match transport.call(&descriptor).await {
            Err(LinkError::Rejected {
                status, message, ..
            }) => {
                assert_eq!(status, 422);
                assert_eq!(message, "capacity must be positive");
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_5xx_is_retryable() {
        let transport = transport_for(&spawn_server().await, None);
        let err = transport
            .call(&RequestDescriptor::read("getUnitStats", Value::Null))
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::Server { status: 503, .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_unknown_route_is_rejected() {
        let transport = transport_for(&spawn_server().await, None);
        let err = transport
            .call(&RequestDescriptor::read("getWidgets", Value::Null))
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::Rejected { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_health() {
        let base = spawn_server().await;
        assert!(transport_for(&base, None).health().await.is_ok());
        assert!(transport_for(&base, Some("/nope")).health().await.is_err());
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_failure() {
        // Bind then drop to get a port nobody listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = transport_for(&format!("http://{}", addr), None);
        let err = transport
            .call(&RequestDescriptor::read("getUnits", Value::Null))
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::NetworkFailure { .. }));
        assert!(transport.health().await.is_err());
    }

    #[test]
    fn test_unwrap_trpc() {
        assert_eq!(unwrap_trpc(json!({"result": {"data": [1, 2]}})), json!([1, 2]));
        assert_eq!(
            unwrap_trpc(json!({"result": {"data": {"json": {"a": 1}, "meta": {"values": {}}}}})),
            json!({"a": 1})
        );
        // "json" alongside other keys is an ordinary field
        assert_eq!(
            unwrap_trpc(json!({"result": {"data": {"json": 1, "other": 2}}})),
            json!({"json": 1, "other": 2})
        );
        assert_eq!(unwrap_trpc(json!({"plain": true})), json!({"plain": true}));
    }

    #[test]
    fn test_trpc_error_message() {
        assert_eq!(
            trpc_error_message(r#"{"error":{"json":{"message":"nope"}}}"#).as_deref(),
            Some("nope")
        );
        assert_eq!(trpc_error_message("not json"), None);
    }
}
