//! Request transport and response-envelope validation
//!
//! The service wraps every response in an envelope with an application-level
//! `code`. A transport-level success still has to pass validation: the body
//! must parse and the code must be non-negative. Interpreting a non-zero
//! code (403 logout, generic failure) is the worker's job, not the client's.
//!
//! `ApiTransport` is the seam between the pool and the network. Workers hold
//! it as `Arc<dyn ApiTransport>` so tests can substitute a scripted
//! transport. Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use common::Secret;

use crate::endpoints::Endpoint;
use crate::error::{Error, Result};
use crate::proxy::ProxyAddr;

/// Validated response envelope.
///
/// `code == 0` is success; positive codes are application failures that the
/// worker classifies. Negative codes never reach the caller — they fail
/// validation as `InvalidResponse`.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    pub code: i64,
    #[serde(default)]
    pub data: Option<Value>,
}

impl Envelope {
    /// Validate a raw response body into an envelope.
    pub fn validate(endpoint: Endpoint, body: Value) -> Result<Self> {
        let envelope: Envelope = serde_json::from_value(body).map_err(|e| {
            Error::InvalidResponse {
                endpoint,
                reason: e.to_string(),
            }
        })?;
        if envelope.code < 0 {
            return Err(Error::InvalidResponse {
                endpoint,
                reason: format!("negative code {}", envelope.code),
            });
        }
        Ok(envelope)
    }

    /// Account payload carried in `data`.
    ///
    /// A missing or unexpected `data` shape yields an empty `AccountInfo`
    /// (no `uid`), which the bootstrapper treats as "no account" — not as a
    /// transport error.
    pub fn account_info(&self) -> AccountInfo {
        self.data
            .clone()
            .and_then(|value| serde_json::from_value(value).ok())
            .unwrap_or_default()
    }
}

/// Account payload from the session endpoint.
///
/// Only `uid` is interpreted; everything else is preserved verbatim so the
/// persisted session round-trips whatever the service sent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Heartbeat request body.
///
/// Field names are the wire format of the service. Absent values serialize
/// as `null` rather than being omitted.
#[derive(Debug, Clone, Serialize)]
pub struct PingPayload {
    pub id: Option<String>,
    pub browser_id: Option<String>,
    pub timestamp: u64,
}

/// Abstraction over the two remote calls a worker makes.
pub trait ApiTransport: Send + Sync {
    /// POST an empty payload to the session endpoint through `proxy`.
    fn open_session<'a>(
        &'a self,
        proxy: &'a ProxyAddr,
    ) -> Pin<Box<dyn Future<Output = Result<Envelope>> + Send + 'a>>;

    /// POST one heartbeat through `proxy`.
    fn send_ping<'a>(
        &'a self,
        proxy: &'a ProxyAddr,
        payload: PingPayload,
    ) -> Pin<Box<dyn Future<Output = Result<Envelope>> + Send + 'a>>;
}

/// HTTPS transport routed through a per-call proxy.
///
/// Stateless apart from the process-wide bearer token: each call builds a
/// client bound to the given proxy, issues one request with the fixed
/// timeout, and validates the envelope. No internal retry.
pub struct HttpApiClient {
    token: Secret<String>,
    timeout: Duration,
}

impl HttpApiClient {
    pub fn new(token: Secret<String>, timeout: Duration) -> Self {
        Self { token, timeout }
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        endpoint: Endpoint,
        proxy: &ProxyAddr,
        body: &B,
    ) -> Result<Envelope> {
        let egress = reqwest::Proxy::all(proxy.as_str())
            .map_err(|e| Error::MalformedProxy(format!("{proxy}: {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .proxy(egress)
            .build()
            .map_err(|e| Error::Transport {
                endpoint,
                reason: format!("building client: {e}"),
            })?;

        let response = client
            .post(endpoint.url())
            .bearer_auth(self.token.expose())
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout { endpoint }
                } else {
                    Error::Transport {
                        endpoint,
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Status {
                endpoint,
                status: status.as_u16(),
            });
        }

        let body: Value = response.json().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout { endpoint }
            } else {
                Error::InvalidResponse {
                    endpoint,
                    reason: e.to_string(),
                }
            }
        })?;

        Envelope::validate(endpoint, body)
    }
}

impl ApiTransport for HttpApiClient {
    fn open_session<'a>(
        &'a self,
        proxy: &'a ProxyAddr,
    ) -> Pin<Box<dyn Future<Output = Result<Envelope>> + Send + 'a>> {
        Box::pin(async move {
            self.post(Endpoint::Session, proxy, &serde_json::json!({}))
                .await
        })
    }

    fn send_ping<'a>(
        &'a self,
        proxy: &'a ProxyAddr,
        payload: PingPayload,
    ) -> Pin<Box<dyn Future<Output = Result<Envelope>> + Send + 'a>> {
        Box::pin(async move { self.post(Endpoint::Ping, proxy, &payload).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn validate_accepts_zero_code() {
        let envelope =
            Envelope::validate(Endpoint::Ping, json!({"code": 0, "data": null})).unwrap();
        assert_eq!(envelope.code, 0);
    }

    #[test]
    fn validate_accepts_positive_code() {
        let envelope = Envelope::validate(Endpoint::Ping, json!({"code": 403})).unwrap();
        assert_eq!(envelope.code, 403);
    }

    #[test]
    fn validate_rejects_negative_code() {
        let err = Envelope::validate(Endpoint::Session, json!({"code": -1})).unwrap_err();
        assert!(matches!(err, Error::InvalidResponse { .. }), "got {err:?}");
    }

    #[test]
    fn validate_rejects_missing_code() {
        let err = Envelope::validate(Endpoint::Session, json!({"data": {}})).unwrap_err();
        assert!(matches!(err, Error::InvalidResponse { .. }), "got {err:?}");
    }

    #[test]
    fn validate_rejects_non_object_body() {
        let err = Envelope::validate(Endpoint::Ping, json!("ok")).unwrap_err();
        assert!(matches!(err, Error::InvalidResponse { .. }), "got {err:?}");
    }

    #[test]
    fn account_info_extracts_uid_and_preserves_extras() {
        let envelope = Envelope::validate(
            Endpoint::Session,
            json!({"code": 0, "data": {"uid": "acct-7", "name": "n", "balance": 12}}),
        )
        .unwrap();

        let account = envelope.account_info();
        assert_eq!(account.uid.as_deref(), Some("acct-7"));
        assert_eq!(account.extra["name"], "n");
        assert_eq!(account.extra["balance"], 12);
    }

    #[test]
    fn account_info_missing_uid_is_no_account() {
        let envelope =
            Envelope::validate(Endpoint::Session, json!({"code": 0, "data": {"plan": "x"}}))
                .unwrap();
        assert!(envelope.account_info().uid.is_none());
    }

    #[test]
    fn account_info_absent_data_is_no_account() {
        let envelope = Envelope::validate(Endpoint::Session, json!({"code": 0})).unwrap();
        assert!(envelope.account_info().uid.is_none());
    }

    #[test]
    fn ping_payload_serializes_nulls_not_omissions() {
        let payload = PingPayload {
            id: None,
            browser_id: None,
            timestamp: 1_700_000_000,
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert!(value.get("id").unwrap().is_null());
        assert!(value.get("browser_id").unwrap().is_null());
        assert_eq!(value["timestamp"], 1_700_000_000);
    }

    #[test]
    fn ping_payload_wire_field_names() {
        let payload = PingPayload {
            id: Some("acct-1".into()),
            browser_id: Some("bid-1".into()),
            timestamp: 42,
        };
        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains("\"id\":\"acct-1\""));
        assert!(json.contains("\"browser_id\":\"bid-1\""));
        assert!(json.contains("\"timestamp\":42"));
    }
}
