//! Per-(provider, model) token bucket with a circuit breaker (§4.2, P5, P6).
//!
//! All mutable state lives behind a single `Mutex` per model key, per §5's
//! "all mutations are serialised by a mutex around the timestamp deque and
//! state fields" requirement — there is no lock-free fast path here, because
//! P5 and P6 are about the serialised history, not raw throughput.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rand::Rng;

use crate::chunk_planner::Model;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitStateKind {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
pub struct RateGateConfig {
    pub rpm: u32,
    pub safety_factor: f64,
    pub failure_threshold: u32,
    pub recovery_seconds: u64,
    pub success_threshold: u32,
    pub base_backoff_secs: f64,
    pub max_backoff_secs: f64,
    pub jitter_factor: f64,
}

impl RateGateConfig {
    /// Per-model defaults from §4.2.
    pub fn for_model(model: Model) -> Self {
        use crate::chunk_planner::Model::*;
        let (rpm, safety_factor, failure_threshold, recovery_seconds) = match model {
            GroqTurbo => (400, 0.8, 3, 60),
            GroqStandard => (300, 0.8, 3, 45),
            GroqDistilled => (100, 0.7, 2, 30),
            OpenaiWhisper => (50, 0.8, 3, 45),
        };
        RateGateConfig {
            rpm,
            safety_factor,
            failure_threshold,
            recovery_seconds,
            success_threshold: 3,
            base_backoff_secs: 1.0,
            max_backoff_secs: 300.0,
            jitter_factor: 0.1,
        }
    }

    pub fn admit_ceiling(&self) -> usize {
        ((self.rpm as f64) * self.safety_factor).floor() as usize
    }
}

struct GateState {
    window: VecDeque<Instant>,
    consecutive_failures: u32,
    circuit: CircuitStateKind,
    circuit_consecutive_failures: u32,
    consecutive_successes: u32,
    next_attempt_time: Option<Instant>,
    cooldown_until: Option<Instant>,
}

impl GateState {
    fn new() -> Self {
        GateState {
            window: VecDeque::new(),
            consecutive_failures: 0,
            circuit: CircuitStateKind::Closed,
            circuit_consecutive_failures: 0,
            consecutive_successes: 0,
            next_attempt_time: None,
            cooldown_until: None,
        }
    }
}

/// An opaque admission receipt; `record_success`/`record_failure` consume it
/// by value so a lease cannot be reused.
#[derive(Debug)]
pub struct Lease {
    issued_at: Instant,
}

/// One instance per `(provider, model)` key (§4.2).
pub struct RateGate {
    config: RateGateConfig,
    state: Mutex<GateState>,
}

impl RateGate {
    pub fn new(config: RateGateConfig) -> Self {
        RateGate {
            config,
            state: Mutex::new(GateState::new()),
        }
    }

    pub fn config(&self) -> &RateGateConfig {
        &self.config
    }

    pub fn circuit_state(&self) -> CircuitStateKind {
        let mut guard = self.state.lock().expect("rate gate mutex poisoned");
        self.advance_circuit(&mut guard);
        guard.circuit
    }

    /// Blocks the caller (async sleep in a loop) until a lease can be
    /// admitted: the sliding window has room, no cooldown is active, and the
    /// circuit is not open.
    pub async fn acquire(&self) -> Lease {
        loop {
            let wait = {
                let mut guard = self.state.lock().expect("rate gate mutex poisoned");
                self.advance_circuit(&mut guard);

                if guard.circuit == CircuitStateKind::Open {
                    let now = Instant::now();
                    let until = guard.next_attempt_time.unwrap_or(now + Duration::from_secs(1));
                    Some(until.saturating_duration_since(now).max(Duration::from_millis(50)))
                } else if let Some(cooldown) = guard.cooldown_until {
                    let now = Instant::now();
                    if cooldown > now {
                        Some(cooldown - now)
                    } else {
                        None
                    }
                } else {
                    self.evict_expired(&mut guard);
                    if guard.window.len() < self.config.admit_ceiling() {
                        guard.window.push_back(Instant::now());
                        return Lease { issued_at: Instant::now() };
                    }
                    let oldest = *guard.window.front().expect("window non-empty by len check");
                    let now = Instant::now();
                    let window_expiry = oldest + Duration::from_secs(60);
                    Some(window_expiry.saturating_duration_since(now).max(Duration::from_millis(10)))
                }
            };

            match wait {
                Some(duration) => tokio::time::sleep(duration).await,
                None => continue,
            }
        }
    }

    /// Idempotent: recording success twice for the same lease only affects
    /// state the first time in practice, since the lease is consumed by
    /// value, but the underlying counters are safe to call repeatedly.
    pub fn record_success(&self, lease: Lease) {
        let _elapsed = lease.issued_at.elapsed();
        let mut guard = self.state.lock().expect("rate gate mutex poisoned");
        guard.consecutive_failures = 0;

        match guard.circuit {
            CircuitStateKind::HalfOpen => {
                guard.consecutive_successes += 1;
                if guard.consecutive_successes >= self.config.success_threshold {
                    guard.circuit = CircuitStateKind::Closed;
                    guard.circuit_consecutive_failures = 0;
                    guard.consecutive_successes = 0;
                }
            }
            CircuitStateKind::Closed => {
                guard.circuit_consecutive_failures = 0;
            }
            CircuitStateKind::Open => {}
        }
    }

    pub fn record_failure(&self, lease: Lease, is_service_class: bool) {
        drop(lease);
        let mut guard = self.state.lock().expect("rate gate mutex poisoned");
        guard.consecutive_failures += 1;
        guard.circuit_consecutive_failures += 1;
        guard.consecutive_successes = 0;

        if guard.consecutive_failures >= 3 {
            let exp = guard.consecutive_failures - 3;
            let backoff = (self.config.base_backoff_secs * 2f64.powi(exp as i32))
                .min(self.config.max_backoff_secs);
            guard.cooldown_until = Some(Instant::now() + Duration::from_secs_f64(backoff));
        }

        let should_open = guard.circuit_consecutive_failures >= self.config.failure_threshold
            || (is_service_class && guard.circuit_consecutive_failures >= 2);

        match guard.circuit {
            CircuitStateKind::HalfOpen => {
                self.arm_open(&mut guard);
            }
            CircuitStateKind::Closed if should_open => {
                self.arm_open(&mut guard);
            }
            _ => {}
        }
    }

    fn arm_open(&self, guard: &mut GateState) {
        guard.circuit = CircuitStateKind::Open;
        guard.next_attempt_time =
            Some(Instant::now() + Duration::from_secs(self.config.recovery_seconds));
        guard.consecutive_successes = 0;
    }

    fn advance_circuit(&self, guard: &mut GateState) {
        if guard.circuit == CircuitStateKind::Open {
            if let Some(next) = guard.next_attempt_time {
                if Instant::now() >= next {
                    guard.circuit = CircuitStateKind::HalfOpen;
                }
            }
        }
        if let Some(cooldown) = guard.cooldown_until {
            if Instant::now() >= cooldown {
                guard.cooldown_until = None;
            }
        }
    }

    fn evict_expired(&self, guard: &mut GateState) {
        let cutoff = Instant::now() - Duration::from_secs(60);
        while matches!(guard.window.front(), Some(t) if *t < cutoff) {
            guard.window.pop_front();
        }
    }
}

/// Computes the retry delay for attempt `i` per §7: `min(base * 2^i * (1 +
/// jitter), cap)`, jitter uniform in `[-0.1, 0.1]`.
pub fn retry_delay(attempt: u32, base_secs: f64, cap_secs: f64) -> Duration {
    let jitter = rand::thread_rng().gen_range(-0.1..=0.1);
    let raw = base_secs * 2f64.powi(attempt as i32) * (1.0 + jitter);
    Duration::from_secs_f64(raw.clamp(0.0, cap_secs).max(0.0))
}

/// Request-deduplication tracker keyed by a hash of `(file_path, model,
/// language)` (§4.2). A concurrent duplicate is refused; entries expire
/// after a 300-second TTL as a leak guard.
pub struct DedupTracker {
    inflight: Mutex<HashMap<String, Instant>>,
}

impl Default for DedupTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl DedupTracker {
    pub fn new() -> Self {
        DedupTracker {
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn key(file_path: &str, model: &str, language: &str) -> String {
        format!("{file_path}|{model}|{language}")
    }

    /// Returns `true` if this key was not already in flight (and marks it
    /// as in flight); `false` if a duplicate was refused.
    pub fn try_begin(&self, key: &str) -> bool {
        let mut guard = self.inflight.lock().expect("dedup tracker mutex poisoned");
        let now = Instant::now();
        guard.retain(|_, started| now.duration_since(*started) < Duration::from_secs(300));

        if guard.contains_key(key) {
            false
        } else {
            guard.insert(key.to_string(), now);
            true
        }
    }

    pub fn end(&self, key: &str) {
        let mut guard = self.inflight.lock().expect("dedup tracker mutex poisoned");
        guard.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> RateGateConfig {
        RateGateConfig {
            rpm: 600,
            safety_factor: 0.5,
            failure_threshold: 2,
            recovery_seconds: 0,
            success_threshold: 2,
            base_backoff_secs: 1.0,
            max_backoff_secs: 10.0,
            jitter_factor: 0.1,
        }
    }

    #[tokio::test]
    async fn p5_admits_up_to_ceiling_then_blocks_window() {
        let gate = RateGate::new(test_config());
        // ceiling = floor(600 * 0.5) = 300; just confirm a handful admit quickly.
        for _ in 0..10 {
            let lease = gate.acquire().await;
            gate.record_success(lease);
        }
        assert_eq!(gate.circuit_state(), CircuitStateKind::Closed);
    }

    #[tokio::test]
    async fn p6_circuit_opens_after_threshold_and_recovers() {
        let mut config = test_config();
        config.recovery_seconds = 0;
        let gate = RateGate::new(config);

        for _ in 0..2 {
            let lease = gate.acquire().await;
            gate.record_failure(lease, false);
        }
        assert_eq!(gate.circuit_state(), CircuitStateKind::HalfOpen);

        let lease = gate.acquire().await;
        gate.record_success(lease);
        let lease = gate.acquire().await;
        gate.record_success(lease);
        assert_eq!(gate.circuit_state(), CircuitStateKind::Closed);
    }

    #[tokio::test]
    async fn p6_service_class_error_opens_circuit_earlier() {
        let mut config = test_config();
        config.failure_threshold = 5;
        config.recovery_seconds = 100;
        let gate = RateGate::new(config);

        let lease = gate.acquire().await;
        gate.record_failure(lease, true);
        assert_eq!(gate.circuit_state(), CircuitStateKind::Closed);

        let lease = gate.acquire().await;
        gate.record_failure(lease, true);
        assert_eq!(gate.circuit_state(), CircuitStateKind::Open);
    }

    #[tokio::test]
    async fn half_open_failure_rearms_open() {
        let mut config = test_config();
        config.recovery_seconds = 0;
        config.failure_threshold = 1;
        let gate = RateGate::new(config);

        let lease = gate.acquire().await;
        gate.record_failure(lease, false);
        assert_eq!(gate.circuit_state(), CircuitStateKind::HalfOpen);

        let lease = gate.acquire().await;
        gate.record_failure(lease, false);
        assert_eq!(gate.circuit_state(), CircuitStateKind::Open);
    }

    #[test]
    fn dedup_tracker_refuses_concurrent_duplicate() {
        let tracker = DedupTracker::new();
        let key = DedupTracker::key("/tmp/a.flac", "groq-turbo", "en");
        assert!(tracker.try_begin(&key));
        assert!(!tracker.try_begin(&key));
        tracker.end(&key);
        assert!(tracker.try_begin(&key));
    }

    #[test]
    fn retry_delay_respects_cap() {
        for attempt in 0..10 {
            let d = retry_delay(attempt, 2.0, 10.0);
            assert!(d.as_secs_f64() <= 10.0 + 1.0);
        }
    }
}
