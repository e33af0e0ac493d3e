//! Error types for API and session-store operations
//!
//! Every API failure mode is a distinct variant so the pool's failure
//! classifier can match on structure instead of scanning message text.

use crate::endpoints::Endpoint;

/// Errors from API calls and session storage.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The request did not complete within the client timeout.
    #[error("request to {endpoint} timed out")]
    Timeout { endpoint: Endpoint },

    /// Connection-level failure (DNS, TLS, proxy handshake, reset).
    #[error("transport error calling {endpoint}: {reason}")]
    Transport { endpoint: Endpoint, reason: String },

    /// The service answered with a non-2xx HTTP status.
    #[error("{endpoint} returned HTTP {status}")]
    Status { endpoint: Endpoint, status: u16 },

    /// Body absent, unparseable, or carrying a negative `code`.
    #[error("invalid response from {endpoint}: {reason}")]
    InvalidResponse { endpoint: Endpoint, reason: String },

    /// A well-formed envelope with a non-zero application `code`.
    #[error("{endpoint} returned application code {code}")]
    Api { endpoint: Endpoint, code: i64 },

    #[error("malformed proxy address: {0}")]
    MalformedProxy(String),

    #[error("proxy list unreadable: {0}")]
    ProxyList(String),

    #[error("session store I/O error: {0}")]
    Io(String),

    #[error("session store parse error: {0}")]
    SessionParse(String),
}

/// Result alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;
