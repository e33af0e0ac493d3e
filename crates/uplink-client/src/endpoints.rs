//! Fixed remote endpoints and default timings

use std::fmt;
use std::time::Duration;

/// Session-open endpoint (empty payload, returns account info).
pub const SESSION_URL: &str = "https://api.nodepay.ai/api/auth/session";

/// Heartbeat endpoint (carries account id, browser id, timestamp).
pub const PING_URL: &str = "https://nw2.nodepay.ai/api/network/ping";

/// Per-request timeout. Retry policy belongs to the caller, not the client.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Interval between heartbeats for one worker.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);

/// The two endpoints the client ever calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Session,
    Ping,
}

impl Endpoint {
    pub fn url(&self) -> &'static str {
        match self {
            Endpoint::Session => SESSION_URL,
            Endpoint::Ping => PING_URL,
        }
    }

    /// Short label for logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Endpoint::Session => "session",
            Endpoint::Ping => "ping",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
