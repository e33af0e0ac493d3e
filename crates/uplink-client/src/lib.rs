//! Uplink API client library
//!
//! Everything a worker needs to talk to the central service through one
//! egress proxy: the two fixed endpoints, response-envelope validation,
//! proxy address parsing, and the file-backed session store. This crate is
//! a standalone library with no dependency on the pool or the runner binary.
//!
//! Request flow:
//! 1. Runner loads the proxy list via `proxy::load_proxy_file()`
//! 2. Each line that passes `ProxyAddr::parse()` may be assigned to a worker
//! 3. Worker opens a session via `ApiTransport::open_session()` (or adopts a
//!    cached one from `SessionStore`)
//! 4. Worker sends periodic pings via `ApiTransport::send_ping()`
//! 5. Session updates are persisted via `SessionStore::save()` / `clear()`

pub mod api;
pub mod endpoints;
pub mod error;
pub mod proxy;
pub mod session;

pub use api::{AccountInfo, ApiTransport, Envelope, HttpApiClient, PingPayload};
pub use endpoints::Endpoint;
pub use error::{Error, Result};
pub use proxy::{ProxyAddr, load_proxy_file};
pub use session::{Session, SessionStore};
