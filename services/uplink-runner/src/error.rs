//! Service-specific error types

use thiserror::Error;

/// Runner startup errors.
///
/// Per-call failures never surface here: workers absorb or classify them
/// internally. The only fatal conditions are the ones detected before any
/// worker is spawned.
#[derive(Error, Debug)]
pub enum Error {
    #[error("proxy list {path} is empty")]
    EmptyProxyList { path: String },

    #[error("failed to load proxy list {path}: {reason}")]
    ProxyList { path: String, reason: String },
}
