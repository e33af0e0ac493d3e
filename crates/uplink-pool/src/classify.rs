//! Failure classification for heartbeat and bootstrap errors
//!
//! Distinguishes failures that a worker rides out (state goes Disconnected,
//! loop continues) from the two terminal ones: a mandatory logout and a dead
//! proxy. The classification is a closed match on the structured client
//! error, so nothing downstream ever inspects message text.

use uplink_client::Error;

/// Application code that forces a logout.
pub const LOGOUT_CODE: i64 = 403;

/// What a failed call means for the worker.
///
/// - `Transient`: absorbed locally, connection state only
/// - `AuthRequired`: clear the session and terminate the worker
/// - `ProxyDead`: terminate the worker and retire the proxy permanently
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Transient,
    AuthRequired,
    ProxyDead,
}

impl FailureKind {
    /// Label for logging and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            FailureKind::Transient => "transient",
            FailureKind::AuthRequired => "auth_required",
            FailureKind::ProxyDead => "proxy_dead",
        }
    }
}

/// Classify a client error.
///
/// The dead-proxy signature is HTTP 500 from the service. A client-side
/// request timeout is a plain transport failure: the worker rides it out as
/// Disconnected rather than losing the proxy over one slow request. An HTTP
/// 401/403 status is *not* a logout — only the application code 403 inside
/// a valid envelope is; a 4xx status from a flaky egress is also transient.
pub fn classify_failure(error: &Error) -> FailureKind {
    match error {
        Error::Status { status: 500, .. } => FailureKind::ProxyDead,
        Error::Api { code, .. } if *code == LOGOUT_CODE => FailureKind::AuthRequired,
        _ => FailureKind::Transient,
    }
}
