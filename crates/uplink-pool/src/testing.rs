//! Scripted in-memory transport for worker and pool tests

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::json;
use uplink_client::{ApiTransport, Endpoint, Envelope, Error, PingPayload, ProxyAddr, Result};

/// One scripted response step.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Step {
    /// `code == 0`; the session endpoint also returns a uid.
    Ok,
    /// Session endpoint only: `code == 0` with a uid-less data object.
    NoUid,
    /// A valid envelope with the given application code.
    Code(i64),
    /// Non-2xx HTTP status.
    Http(u16),
    /// Client-side timeout.
    Timeout,
    /// Connection-level failure.
    Transport,
}

impl Step {
    fn into_result(self, endpoint: Endpoint, proxy: &ProxyAddr) -> Result<Envelope> {
        match self {
            Step::Ok => {
                let data = match endpoint {
                    Endpoint::Session => json!({"uid": format!("uid-{proxy}")}),
                    Endpoint::Ping => json!(null),
                };
                Ok(Envelope {
                    code: 0,
                    data: Some(data),
                })
            }
            Step::NoUid => Ok(Envelope {
                code: 0,
                data: Some(json!({})),
            }),
            Step::Code(code) => Ok(Envelope { code, data: None }),
            Step::Http(status) => Err(Error::Status { endpoint, status }),
            Step::Timeout => Err(Error::Timeout { endpoint }),
            Step::Transport => Err(Error::Transport {
                endpoint,
                reason: "connection reset by peer".into(),
            }),
        }
    }
}

/// Per-proxy script: the session step repeats on every bootstrap; the ping
/// sequence is consumed one step per heartbeat, with the last step repeating.
#[derive(Debug, Clone)]
pub(crate) struct Script {
    pub session: Step,
    pub pings: Vec<Step>,
}

impl Script {
    pub fn healthy() -> Self {
        Self {
            session: Step::Ok,
            pings: vec![Step::Ok],
        }
    }

    pub fn pings(steps: Vec<Step>) -> Self {
        Self {
            session: Step::Ok,
            pings: steps,
        }
    }
}

#[derive(Default)]
struct Counters {
    session_calls: HashMap<String, usize>,
    ping_calls: HashMap<String, usize>,
}

/// `ApiTransport` driven by per-proxy scripts, with call counters and an
/// in-flight probe for the sequential-pings property.
pub(crate) struct ScriptedTransport {
    scripts: Mutex<HashMap<String, Script>>,
    default: Script,
    counters: Mutex<Counters>,
    last_ping: Mutex<Option<PingPayload>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    call_delay: Duration,
}

impl ScriptedTransport {
    pub fn with_default(default: Script) -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            default,
            counters: Mutex::new(Counters::default()),
            last_ping: Mutex::new(None),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            call_delay: Duration::ZERO,
        }
    }

    pub fn healthy() -> Self {
        Self::with_default(Script::healthy())
    }

    /// Override the script for one proxy.
    pub fn script(&self, proxy: &ProxyAddr, script: Script) {
        self.scripts
            .lock()
            .unwrap()
            .insert(proxy.as_str().to_owned(), script);
    }

    /// Hold every call open for `delay` (for the overlap probe).
    pub fn with_call_delay(mut self, delay: Duration) -> Self {
        self.call_delay = delay;
        self
    }

    pub fn session_calls(&self, proxy: &ProxyAddr) -> usize {
        *self
            .counters
            .lock()
            .unwrap()
            .session_calls
            .get(proxy.as_str())
            .unwrap_or(&0)
    }

    pub fn total_session_calls(&self) -> usize {
        self.counters.lock().unwrap().session_calls.values().sum()
    }

    pub fn ping_calls(&self, proxy: &ProxyAddr) -> usize {
        *self
            .counters
            .lock()
            .unwrap()
            .ping_calls
            .get(proxy.as_str())
            .unwrap_or(&0)
    }

    pub fn last_ping_payload(&self) -> Option<PingPayload> {
        self.last_ping.lock().unwrap().clone()
    }

    /// Highest number of calls ever in flight concurrently.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn call(&self, endpoint: Endpoint, proxy: &ProxyAddr) -> Result<Envelope> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if !self.call_delay.is_zero() {
            tokio::time::sleep(self.call_delay).await;
        }

        let step = {
            let scripts = self.scripts.lock().unwrap();
            let script = scripts.get(proxy.as_str()).unwrap_or(&self.default);
            let mut counters = self.counters.lock().unwrap();
            match endpoint {
                Endpoint::Session => {
                    *counters
                        .session_calls
                        .entry(proxy.as_str().to_owned())
                        .or_insert(0) += 1;
                    script.session
                }
                Endpoint::Ping => {
                    let count = counters
                        .ping_calls
                        .entry(proxy.as_str().to_owned())
                        .or_insert(0);
                    let idx = (*count).min(script.pings.len().saturating_sub(1));
                    *count += 1;
                    script.pings.get(idx).copied().unwrap_or(Step::Ok)
                }
            }
        };

        let result = step.into_result(endpoint, proxy);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

impl ApiTransport for ScriptedTransport {
    fn open_session<'a>(
        &'a self,
        proxy: &'a ProxyAddr,
    ) -> Pin<Box<dyn Future<Output = Result<Envelope>> + Send + 'a>> {
        Box::pin(self.call(Endpoint::Session, proxy))
    }

    fn send_ping<'a>(
        &'a self,
        proxy: &'a ProxyAddr,
        payload: PingPayload,
    ) -> Pin<Box<dyn Future<Output = Result<Envelope>> + Send + 'a>> {
        *self.last_ping.lock().unwrap() = Some(payload);
        Box::pin(self.call(Endpoint::Ping, proxy))
    }
}
