//! Pool orchestration: backlog, active set, retirement, reconciliation
//!
//! The pool owns all shared bookkeeping. Workers never touch it — they only
//! return a `WorkerExit`, and the run loop is the single writer for the
//! backlog, active, running, and retired sets. `status()` and the test
//! accessors take read locks only.
//!
//! Scheduling: the loop waits for the *first* worker completion, never for
//! all of them, so a single dead proxy is replaced while its neighbors keep
//! pinging. A short pause between iterations rate-limits respawns when
//! proxies fail immediately and repeatedly.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, watch};
use tokio::task::{self, JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use uplink_client::{ApiTransport, ProxyAddr, SessionStore};

use crate::worker::{Worker, WorkerExit, WorkerOutcome};

/// How long shutdown waits for workers to observe cancellation before
/// aborting the stragglers. Larger than the request timeout so an in-flight
/// ping can finish.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(15);

/// Orchestrator tuning knobs.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Hard cap on concurrently running workers.
    pub max_concurrency: usize,
    /// Interval between heartbeats within one worker.
    pub ping_interval: Duration,
    /// Pause between orchestration iterations (respawn rate-limit).
    pub reconcile_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 100,
            ping_interval: uplink_client::endpoints::DEFAULT_PING_INTERVAL,
            reconcile_interval: Duration::from_secs(3),
        }
    }
}

/// Proxy-worker pool orchestrator.
pub struct Pool {
    transport: Arc<dyn ApiTransport>,
    sessions: Arc<SessionStore>,
    config: PoolConfig,
    /// Raw proxy lines not yet assigned; validated at assignment time.
    backlog: RwLock<VecDeque<String>>,
    /// Proxies configured to have a worker.
    active: RwLock<HashSet<ProxyAddr>>,
    /// Proxies that currently have a live task.
    running: RwLock<HashSet<ProxyAddr>>,
    /// Proxies removed from all future consideration.
    retired: RwLock<HashSet<ProxyAddr>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Pool {
    /// Build a pool from the full ordered proxy list.
    ///
    /// Takes well-formed proxies from the front until `max_concurrency`
    /// slots are filled; the remainder is the backlog. Malformed lines are
    /// skipped and never assigned.
    pub fn new(
        proxies: Vec<String>,
        transport: Arc<dyn ApiTransport>,
        sessions: Arc<SessionStore>,
        config: PoolConfig,
    ) -> Self {
        let mut backlog: VecDeque<String> = proxies.into();
        let mut active = HashSet::new();
        while active.len() < config.max_concurrency {
            let Some(raw) = backlog.pop_front() else { break };
            match ProxyAddr::parse(&raw) {
                Ok(proxy) => {
                    active.insert(proxy);
                }
                Err(e) => warn!(error = %e, "skipping malformed proxy"),
            }
        }
        info!(
            active = active.len(),
            backlog = backlog.len(),
            max_concurrency = config.max_concurrency,
            "pool initialized"
        );

        let (shutdown_tx, _) = watch::channel(false);
        Self {
            transport,
            sessions,
            config,
            backlog: RwLock::new(backlog),
            active: RwLock::new(active),
            running: RwLock::new(HashSet::new()),
            retired: RwLock::new(HashSet::new()),
            shutdown_tx,
        }
    }

    /// Request shutdown. Workers observe it at their next sleep boundary.
    pub fn shutdown(&self) {
        info!("pool shutdown requested");
        let _ = self.shutdown_tx.send(true);
    }

    /// Run the orchestration loop until shutdown.
    ///
    /// There is no natural completion state — the pool is a long-lived
    /// service loop that heals itself until the process is interrupted.
    pub async fn run(self: Arc<Self>) {
        let mut tasks: JoinSet<WorkerExit> = JoinSet::new();
        let mut task_proxies: HashMap<task::Id, ProxyAddr> = HashMap::new();
        let mut shutdown = self.shutdown_tx.subscribe();
        if *shutdown.borrow_and_update() {
            return;
        }

        let initial: Vec<ProxyAddr> = self.active.read().await.iter().cloned().collect();
        for proxy in initial {
            self.spawn_worker(&mut tasks, &mut task_proxies, proxy).await;
        }

        loop {
            // First-completion wait: react as soon as any one worker exits.
            tokio::select! {
                _ = shutdown.changed() => break,
                joined = tasks.join_next_with_id(), if !tasks.is_empty() => {
                    if let Some(result) = joined {
                        self.handle_exit(&mut task_proxies, result).await;
                        while let Some(extra) = tasks.try_join_next_with_id() {
                            self.handle_exit(&mut task_proxies, extra).await;
                        }
                    }
                }
                // Nothing running: wake on the poll interval so refill and
                // reconcile can still make progress.
                _ = tokio::time::sleep(self.config.reconcile_interval), if tasks.is_empty() => {}
            }

            self.refill(&mut tasks, &mut task_proxies).await;
            self.reconcile(&mut tasks, &mut task_proxies).await;
            self.publish_gauges().await;

            tokio::select! {
                _ = tokio::time::sleep(self.config.reconcile_interval) => {}
                _ = shutdown.changed() => break,
            }
        }

        self.drain(tasks).await;
    }

    /// Retire a proxy from all future consideration. Idempotent.
    pub async fn retire(&self, proxy: &ProxyAddr) {
        let newly_retired = self.retired.write().await.insert(proxy.clone());
        if newly_retired {
            warn!(%proxy, "proxy retired, never to be reused");
        }
    }

    /// Pool status snapshot for the health endpoint.
    ///
    /// Status mapping: every configured slot has a live worker → healthy,
    /// some do → degraded, none do → unhealthy.
    pub async fn status(&self) -> serde_json::Value {
        let active = self.active.read().await.len();
        let running = self.running.read().await.len();
        let backlog = self.backlog.read().await.len();
        let retired = self.retired.read().await.len();

        let pool_status = if active > 0 && running == active {
            "healthy"
        } else if running > 0 {
            "degraded"
        } else {
            "unhealthy"
        };

        serde_json::json!({
            "status": pool_status,
            "proxies_active": active,
            "workers_running": running,
            "proxies_backlog": backlog,
            "proxies_retired": retired,
        })
    }

    /// Snapshot of the configured-active proxies.
    pub async fn active_proxies(&self) -> HashSet<ProxyAddr> {
        self.active.read().await.clone()
    }

    pub async fn backlog_len(&self) -> usize {
        self.backlog.read().await.len()
    }

    pub async fn is_retired(&self, proxy: &ProxyAddr) -> bool {
        self.retired.read().await.contains(proxy)
    }

    async fn spawn_worker(
        &self,
        tasks: &mut JoinSet<WorkerExit>,
        task_proxies: &mut HashMap<task::Id, ProxyAddr>,
        proxy: ProxyAddr,
    ) {
        self.running.write().await.insert(proxy.clone());
        let worker = Worker::new(
            proxy.clone(),
            self.transport.clone(),
            self.sessions.clone(),
            self.config.ping_interval,
            self.shutdown_tx.subscribe(),
        );
        debug!(%proxy, "spawning worker");
        let handle = tasks.spawn(worker.run());
        task_proxies.insert(handle.id(), proxy);
    }

    async fn handle_exit(
        &self,
        task_proxies: &mut HashMap<task::Id, ProxyAddr>,
        result: Result<(task::Id, WorkerExit), JoinError>,
    ) {
        match result {
            Ok((id, exit)) => {
                task_proxies.remove(&id);
                self.apply_outcome(exit).await;
            }
            Err(e) => match task_proxies.remove(&e.id()) {
                // A panicked worker vacates its slot like a generic
                // completion; the proxy is not requeued.
                Some(proxy) => {
                    error!(%proxy, error = %e, "worker task failed");
                    self.running.write().await.remove(&proxy);
                    self.active.write().await.remove(&proxy);
                }
                None => error!(error = %e, "worker task failed with unknown proxy"),
            },
        }
    }

    async fn apply_outcome(&self, exit: WorkerExit) {
        let WorkerExit { proxy, outcome } = exit;
        self.running.write().await.remove(&proxy);
        metrics::counter!("uplink_worker_exits_total", "outcome" => outcome.label()).increment(1);

        match outcome {
            WorkerOutcome::Retry => {
                // Stays configured-active; the reconcile pass respawns it.
                debug!(%proxy, "worker will be respawned on the same proxy");
            }
            WorkerOutcome::Cancelled | WorkerOutcome::LoggedOut => {
                self.active.write().await.remove(&proxy);
                info!(%proxy, outcome = outcome.label(), "worker slot vacated");
            }
            WorkerOutcome::ProxyDead => {
                self.active.write().await.remove(&proxy);
                self.retire(&proxy).await;
            }
        }
    }

    /// Promote backlog proxies into vacated slots, skipping malformed and
    /// retired addresses, and spawn a worker for each promotion.
    async fn refill(
        &self,
        tasks: &mut JoinSet<WorkerExit>,
        task_proxies: &mut HashMap<task::Id, ProxyAddr>,
    ) {
        loop {
            if self.active.read().await.len() >= self.config.max_concurrency {
                break;
            }
            let raw = self.backlog.write().await.pop_front();
            let Some(raw) = raw else { break };

            let proxy = match ProxyAddr::parse(&raw) {
                Ok(proxy) => proxy,
                Err(e) => {
                    warn!(error = %e, "skipping malformed proxy from backlog");
                    continue;
                }
            };
            if self.retired.read().await.contains(&proxy) {
                debug!(%proxy, "skipping retired proxy in backlog");
                continue;
            }
            if !self.active.write().await.insert(proxy.clone()) {
                // Duplicate list entry already active.
                continue;
            }
            info!(%proxy, "promoting proxy from backlog");
            self.spawn_worker(tasks, task_proxies, proxy).await;
        }
    }

    /// Self-healing: any configured-active proxy without a live task gets
    /// one spawned.
    async fn reconcile(
        &self,
        tasks: &mut JoinSet<WorkerExit>,
        task_proxies: &mut HashMap<task::Id, ProxyAddr>,
    ) {
        let missing: Vec<ProxyAddr> = {
            let active = self.active.read().await;
            let running = self.running.read().await;
            active.difference(&running).cloned().collect()
        };
        for proxy in missing {
            debug!(%proxy, "reconciling proxy without a live task");
            self.spawn_worker(tasks, task_proxies, proxy).await;
        }
    }

    async fn publish_gauges(&self) {
        metrics::gauge!("uplink_pool_active").set(self.active.read().await.len() as f64);
        metrics::gauge!("uplink_pool_running").set(self.running.read().await.len() as f64);
        metrics::gauge!("uplink_pool_backlog").set(self.backlog.read().await.len() as f64);
        metrics::gauge!("uplink_pool_retired").set(self.retired.read().await.len() as f64);
    }

    /// Wait for workers to observe cancellation, aborting stragglers after
    /// the drain timeout.
    async fn drain(&self, mut tasks: JoinSet<WorkerExit>) {
        info!(workers = tasks.len(), "draining workers");
        let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
            while let Some(result) = tasks.join_next().await {
                if let Ok(exit) = result {
                    self.running.write().await.remove(&exit.proxy);
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                remaining = tasks.len(),
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, aborting remaining workers"
            );
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
            self.running.write().await.clear();
        }
        info!("pool stopped");
    }
}
