//! Per-proxy worker: session bootstrap and heartbeat loop
//!
//! A worker owns everything about its proxy's lifecycle: the optional
//! session, the connection state, and the consecutive-failure counter.
//! Nothing here touches pool bookkeeping — the worker's only report to the
//! orchestrator is the terminal `WorkerExit` it returns.
//!
//! State transitions:
//! - NoneConnection → Connected (first successful ping)
//! - Connected → Disconnected (generic ping failure)
//! - Disconnected → Connected (next successful ping)
//! - any → NoneConnection (mandatory logout, session cleared)

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use uplink_client::{
    ApiTransport, Endpoint, Error as ApiError, PingPayload, ProxyAddr, Session, SessionStore,
};

use crate::classify::{FailureKind, classify_failure};

/// Connection status of one worker.
///
/// Driven only by the heartbeat loop and the failure classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
    /// No session yet (initial state, and after logout).
    NoneConnection,
}

impl ConnectionState {
    /// Status label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::NoneConnection => "none_connection",
        }
    }
}

/// Why a worker stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// Orchestrator shutdown, observed at the sleep boundary.
    Cancelled,
    /// Mandatory logout; the session was cleared, the slot is vacated.
    LoggedOut,
    /// Fatal failure signature; the proxy must be retired.
    ProxyDead,
    /// Generic bootstrap failure; the orchestrator respawns the same proxy.
    Retry,
}

impl WorkerOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            WorkerOutcome::Cancelled => "cancelled",
            WorkerOutcome::LoggedOut => "logged_out",
            WorkerOutcome::ProxyDead => "proxy_dead",
            WorkerOutcome::Retry => "retry",
        }
    }
}

/// Terminal report a worker hands back to the orchestrator.
#[derive(Debug)]
pub struct WorkerExit {
    pub proxy: ProxyAddr,
    pub outcome: WorkerOutcome,
}

/// One proxy's session + heartbeat state machine.
pub struct Worker {
    proxy: ProxyAddr,
    transport: Arc<dyn ApiTransport>,
    sessions: Arc<SessionStore>,
    ping_interval: Duration,
    shutdown: watch::Receiver<bool>,
    state: ConnectionState,
    session: Option<Session>,
    consecutive_failures: u32,
}

impl Worker {
    pub fn new(
        proxy: ProxyAddr,
        transport: Arc<dyn ApiTransport>,
        sessions: Arc<SessionStore>,
        ping_interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            proxy,
            transport,
            sessions,
            ping_interval,
            shutdown,
            state: ConnectionState::NoneConnection,
            session: None,
            consecutive_failures: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Run the worker to completion: bootstrap once, then heartbeat until a
    /// terminal outcome.
    pub async fn run(mut self) -> WorkerExit {
        let outcome = match self.bootstrap().await {
            Ok(()) => self.heartbeat_loop().await,
            Err(outcome) => outcome,
        };
        info!(proxy = %self.proxy, outcome = outcome.label(), "worker exiting");
        WorkerExit {
            proxy: self.proxy,
            outcome,
        }
    }

    /// Establish or restore the session.
    ///
    /// A cached session is adopted with no network call. Otherwise the
    /// session endpoint is asked; a response without a uid means "no
    /// account" and forces a logout.
    async fn bootstrap(&mut self) -> Result<(), WorkerOutcome> {
        if let Some(cached) = self.sessions.get(&self.proxy).await {
            debug!(proxy = %self.proxy, "adopting cached session");
            self.session = Some(cached);
            return Ok(());
        }

        let envelope = match self.transport.open_session(&self.proxy).await {
            Ok(envelope) => envelope,
            Err(e) => return Err(self.bootstrap_failure(e).await),
        };

        let account = envelope.account_info();
        if account.uid.is_none() {
            info!(proxy = %self.proxy, "session response carried no account, logging out");
            self.logout().await;
            return Err(WorkerOutcome::LoggedOut);
        }

        let session = Session {
            browser_id: Uuid::new_v4().to_string(),
            account,
        };
        if let Err(e) = self.sessions.save(&self.proxy, session.clone()).await {
            // The worker can still run; only the cache misses out.
            warn!(proxy = %self.proxy, error = %e, "failed to persist session");
        }
        info!(proxy = %self.proxy, uid = session.uid(), "session established");
        self.session = Some(session);
        Ok(())
    }

    async fn bootstrap_failure(&mut self, error: ApiError) -> WorkerOutcome {
        error!(proxy = %self.proxy, error = %error, "session bootstrap failed");
        match classify_failure(&error) {
            FailureKind::ProxyDead => WorkerOutcome::ProxyDead,
            FailureKind::AuthRequired => {
                self.logout().await;
                WorkerOutcome::LoggedOut
            }
            FailureKind::Transient => WorkerOutcome::Retry,
        }
    }

    /// Ping immediately, then on the fixed interval until a terminal
    /// outcome. Cancellation is observed only at the sleep boundary — an
    /// in-flight request is never interrupted.
    async fn heartbeat_loop(&mut self) -> WorkerOutcome {
        loop {
            // A receiver handed out after the shutdown send never sees it as
            // a change, so the flag is also checked directly.
            if *self.shutdown.borrow() {
                info!(proxy = %self.proxy, "heartbeat loop cancelled");
                return WorkerOutcome::Cancelled;
            }

            if let Some(outcome) = self.ping().await {
                return outcome;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.ping_interval) => {}
                _ = self.shutdown.changed() => {
                    info!(proxy = %self.proxy, "heartbeat loop cancelled");
                    return WorkerOutcome::Cancelled;
                }
            }
        }
    }

    /// Send one heartbeat. `None` means the loop continues.
    async fn ping(&mut self) -> Option<WorkerOutcome> {
        let payload = PingPayload {
            id: self
                .session
                .as_ref()
                .and_then(|s| s.uid())
                .map(str::to_owned),
            browser_id: self.session.as_ref().map(|s| s.browser_id.clone()),
            timestamp: common::unix_timestamp(),
        };

        let started = std::time::Instant::now();
        let result = self.transport.send_ping(&self.proxy, payload).await;
        metrics::histogram!("uplink_heartbeat_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        let error = match result {
            Ok(envelope) if envelope.code == 0 => {
                debug!(proxy = %self.proxy, "ping ok");
                self.consecutive_failures = 0;
                self.state = ConnectionState::Connected;
                metrics::counter!("uplink_heartbeats_total", "result" => "ok").increment(1);
                return None;
            }
            Ok(envelope) => ApiError::Api {
                endpoint: Endpoint::Ping,
                code: envelope.code,
            },
            Err(e) => e,
        };

        self.handle_ping_failure(error).await
    }

    async fn handle_ping_failure(&mut self, error: ApiError) -> Option<WorkerOutcome> {
        self.consecutive_failures += 1;
        warn!(
            proxy = %self.proxy,
            error = %error,
            failures = self.consecutive_failures,
            "ping failed"
        );
        metrics::counter!("uplink_heartbeats_total", "result" => "failed").increment(1);

        match classify_failure(&error) {
            FailureKind::AuthRequired => {
                self.logout().await;
                Some(WorkerOutcome::LoggedOut)
            }
            FailureKind::ProxyDead => {
                error!(proxy = %self.proxy, "fatal failure signature, proxy is dead");
                Some(WorkerOutcome::ProxyDead)
            }
            FailureKind::Transient => {
                // The counter is tracked but never terminates the loop on
                // its own; repeated generic failures just stay Disconnected.
                self.state = ConnectionState::Disconnected;
                None
            }
        }
    }

    /// Drop the session, reset to the unauthenticated state, and delete the
    /// persisted copy.
    async fn logout(&mut self) {
        self.session = None;
        self.state = ConnectionState::NoneConnection;
        if let Err(e) = self.sessions.clear(&self.proxy).await {
            warn!(proxy = %self.proxy, error = %e, "failed to clear persisted session");
        }
        info!(proxy = %self.proxy, "logged out and cleared session");
    }
}
