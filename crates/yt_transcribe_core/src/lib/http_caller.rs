//! A pooled HTTP client with per-host health counters and a recycling
//! policy (§4.1). An explicit struct the `Services` bundle owns, rather
//! than a module-level client singleton, so tests can substitute it
//! (§9's "global clients" design note).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use reqwest::Client;

const MAX_CONNECTIONS: usize = 100;
const MAX_KEEPALIVE_CONNECTIONS: usize = 20;
const KEEPALIVE_EXPIRY: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const READ_TIMEOUT: Duration = Duration::from_secs(30);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(5);
const RECYCLE_REUSE_THRESHOLD: u64 = 1000;
const RECYCLE_IDLE_THRESHOLD: Duration = Duration::from_secs(300);
const MIN_ATTEMPTS_FOR_SUCCESS_CHECK: u64 = 10;
const MIN_SUCCESS_RATE: f64 = 0.8;
pub const HEALTH_LOOP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Default, Clone)]
pub struct HostCounters {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub last_used: Option<Instant>,
    pub reuse_count: u64,
}

impl HostCounters {
    fn success_rate(&self) -> f64 {
        if self.attempts == 0 {
            1.0
        } else {
            self.successes as f64 / self.attempts as f64
        }
    }

    fn needs_recycle(&self) -> bool {
        if self.reuse_count > RECYCLE_REUSE_THRESHOLD {
            return true;
        }
        if let Some(last_used) = self.last_used {
            if last_used.elapsed() > RECYCLE_IDLE_THRESHOLD {
                return true;
            }
        }
        self.attempts >= MIN_ATTEMPTS_FOR_SUCCESS_CHECK && self.success_rate() < MIN_SUCCESS_RATE
    }
}

struct Inner {
    client: Client,
    hosts: HashMap<String, HostCounters>,
}

/// Shared, thread-safe wrapper around a pooled `reqwest::Client`. Exposes
/// only the request surface; callers supply timeouts and headers per
/// request as needed via `client()`.
pub struct HttpCaller {
    inner: Mutex<Inner>,
}

impl HttpCaller {
    pub fn new() -> Self {
        HttpCaller {
            inner: Mutex::new(Inner {
                client: build_client(),
                hosts: HashMap::new(),
            }),
        }
    }

    /// Returns the current pooled client, recording the call against the
    /// given host's counters and recycling the client first if the host has
    /// crossed a recycling threshold.
    pub fn client_for(&self, host: &str) -> Client {
        let mut guard = self.inner.lock().expect("http caller mutex poisoned");

        let needs_recycle = guard
            .hosts
            .get(host)
            .map(HostCounters::needs_recycle)
            .unwrap_or(false);

        if needs_recycle {
            tracing::info!(host, "recycling pooled http client");
            guard.client = build_client();
            guard.hosts.remove(host);
        }

        let counters = guard.hosts.entry(host.to_string()).or_default();
        counters.reuse_count += 1;
        counters.last_used = Some(Instant::now());

        guard.client.clone()
    }

    pub fn record_attempt(&self, host: &str, success: bool) {
        let mut guard = self.inner.lock().expect("http caller mutex poisoned");
        let counters = guard.hosts.entry(host.to_string()).or_default();
        counters.attempts += 1;
        if success {
            counters.successes += 1;
        } else {
            counters.failures += 1;
        }
    }

    pub fn host_counters(&self, host: &str) -> HostCounters {
        let guard = self.inner.lock().expect("http caller mutex poisoned");
        guard.hosts.get(host).cloned().unwrap_or_default()
    }

    /// The async health loop: periodically sweeps every tracked host and
    /// recycles the client proactively, rather than waiting for the next
    /// request to discover a stale connection pool.
    pub async fn run_health_loop(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(HEALTH_LOOP_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.sweep(),
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    fn sweep(&self) {
        let mut guard = self.inner.lock().expect("http caller mutex poisoned");
        let stale: Vec<String> = guard
            .hosts
            .iter()
            .filter(|(_, c)| c.needs_recycle())
            .map(|(h, _)| h.clone())
            .collect();

        if !stale.is_empty() {
            tracing::info!(?stale, "health loop recycling stale hosts");
            guard.client = build_client();
            for host in stale {
                guard.hosts.remove(&host);
            }
        }
    }
}

impl Default for HttpCaller {
    fn default() -> Self {
        Self::new()
    }
}

fn build_client() -> Client {
    Client::builder()
        .http2_adaptive_window(true)
        .pool_max_idle_per_host(MAX_KEEPALIVE_CONNECTIONS)
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .tcp_keepalive(KEEPALIVE_EXPIRY)
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(READ_TIMEOUT)
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Declared for documentation/parity with §4.1's stated default; not
/// enforced directly since `reqwest` bounds total connections per-host, not
/// globally.
pub const MAX_CONNECTIONS_DEFAULT: usize = MAX_CONNECTIONS;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recycles_after_reuse_threshold() {
        let counters = HostCounters {
            reuse_count: RECYCLE_REUSE_THRESHOLD + 1,
            ..Default::default()
        };
        assert!(counters.needs_recycle());
    }

    #[test]
    fn recycles_below_success_rate_after_min_attempts() {
        let counters = HostCounters {
            attempts: 20,
            successes: 10,
            failures: 10,
            ..Default::default()
        };
        assert!(counters.needs_recycle());
    }

    #[test]
    fn does_not_recycle_low_success_rate_before_min_attempts() {
        let counters = HostCounters {
            attempts: 3,
            successes: 0,
            failures: 3,
            ..Default::default()
        };
        assert!(!counters.needs_recycle());
    }

    #[test]
    fn client_for_tracks_reuse_count() {
        let caller = HttpCaller::new();
        caller.client_for("example.com");
        caller.client_for("example.com");
        assert_eq!(caller.host_counters("example.com").reuse_count, 2);
    }
}
