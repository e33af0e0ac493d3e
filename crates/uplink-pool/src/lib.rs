//! Proxy-worker pool orchestration
//!
//! Runs one worker task per active proxy, each driving the session and
//! heartbeat state machine against the central service. The pool reacts to
//! the first worker completion (never batch-waits), vacates the slot,
//! refills from the backlog, and reconciles bookkeeping drift.
//!
//! Proxy lifecycle:
//! 1. Runner loads the ordered proxy list → pool takes the well-formed front
//!    up to `max_concurrency` as the active set, the rest is the backlog
//! 2. Worker bootstraps a session (cached or via the session endpoint),
//!    then pings on a fixed interval
//! 3. Envelope code 403 → mandatory logout: session cleared, slot vacated
//! 4. Fatal failure signature (HTTP 500) → proxy retired for good
//! 5. Any vacated slot is refilled from the backlog; a proxy that failed
//!    bootstrap generically is respawned in place by the reconcile pass
//! 6. Shutdown cancels workers cooperatively at their sleep boundary

pub mod classify;
pub mod pool;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use classify::{FailureKind, classify_failure};
pub use pool::{Pool, PoolConfig};
pub use worker::{ConnectionState, Worker, WorkerExit, WorkerOutcome};
