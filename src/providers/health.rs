//! Circuit Breaker for Provider Health Tracking
//!
//! Isolates failing backends from selection. Two states:
//!
//!   Closed (eligible) --[N consecutive failures]--> Open (excluded)
//!   Open --[next query after cooldown since last failure]--> Closed
//!
//! The Open -> Closed transition is lazy: it happens when the breaker is
//! queried, and resets the failure count to zero. There is no half-open
//! probe state.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::providers::ProviderKind;

// ---------------------------------------------------------------------------
// Circuit State
// ---------------------------------------------------------------------------

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Provider is eligible for selection.
    #[default]
    Closed,
    /// Provider is excluded until the cooldown elapses.
    Open,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration knobs for the circuit breaker.
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures required to trip from Closed to Open.
    pub failure_threshold: u32,
    /// How long after the last failure an Open breaker closes again.
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(60),
        }
    }
}

// ---------------------------------------------------------------------------
// CircuitBreaker
// ---------------------------------------------------------------------------

/// Per-provider circuit breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    state: CircuitState,
    failures: u32,
    last_failure: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
    total_successes: u64,
    total_failures: u64,
    config: CircuitBreakerConfig,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::with_config(CircuitBreakerConfig::default())
    }
}

impl CircuitBreaker {
    /// Create a circuit breaker with default thresholds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a circuit breaker with custom thresholds.
    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self {
            state: CircuitState::Closed,
            failures: 0,
            last_failure: None,
            last_failure_at: None,
            total_successes: 0,
            total_failures: 0,
            config,
        }
    }

    // -- queries -------------------------------------------------------------

    /// Current state, without applying the cooldown.
    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Number of consecutive failures recorded.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Wall-clock time of the most recent failure, if any.
    pub fn last_failure_at(&self) -> Option<DateTime<Utc>> {
        self.last_failure_at
    }

    /// Percentage of successful calls seen by this breaker (100 when idle).
    pub fn uptime(&self) -> f64 {
        let total = self.total_successes + self.total_failures;
        if total == 0 {
            return 100.0;
        }
        self.total_successes as f64 / total as f64 * 100.0
    }

    /// Whether the breaker excludes its provider at `now`.
    ///
    /// Side-effect: an Open breaker whose cooldown has strictly elapsed since
    /// the last failure closes and forgets its failures.
    pub fn is_open_at(&mut self, now: Instant) -> bool {
        if self.state == CircuitState::Closed {
            return false;
        }
        let expired = self
            .last_failure
            .is_none_or(|last| now.saturating_duration_since(last) > self.config.cooldown);
        if expired {
            self.state = CircuitState::Closed;
            self.failures = 0;
            return false;
        }
        true
    }

    pub fn is_open(&mut self) -> bool {
        self.is_open_at(Instant::now())
    }

    // -- recording -----------------------------------------------------------

    /// Record a successful call.
    pub fn record_success(&mut self) {
        self.failures = 0;
        self.total_successes += 1;
        self.state = CircuitState::Closed;
    }

    /// Record a failed call observed at `now`.
    pub fn record_failure_at(&mut self, now: Instant) {
        self.failures += 1;
        self.total_failures += 1;
        self.last_failure = Some(now);
        self.last_failure_at = Some(Utc::now());

        if self.failures >= self.config.failure_threshold {
            self.state = CircuitState::Open;
        }
    }

    pub fn record_failure(&mut self) {
        self.record_failure_at(Instant::now());
    }

    // -- manual control ------------------------------------------------------

    /// Force the circuit Open as of `now` (e.g. for maintenance).
    pub fn force_open_at(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.last_failure = Some(now);
        self.last_failure_at = Some(Utc::now());
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Point-in-time view of one breaker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failures: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub uptime: f64,
}

/// Process-wide breaker state, one entry per provider.
///
/// Each read-modify-write happens under the map's per-key lock, so updates to
/// one provider never block another and no lock is held across I/O.
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: DashMap<ProviderKind, CircuitBreaker>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    pub fn config(&self) -> CircuitBreakerConfig {
        self.config
    }

    fn with_breaker<T>(&self, kind: ProviderKind, f: impl FnOnce(&mut CircuitBreaker) -> T) -> T {
        let mut entry = self
            .breakers
            .entry(kind)
            .or_insert_with(|| CircuitBreaker::with_config(self.config));
        f(entry.value_mut())
    }

    /// Whether `kind` is currently excluded, applying the lazy cooldown.
    pub fn is_open(&self, kind: ProviderKind) -> bool {
        self.is_open_at(kind, Instant::now())
    }

    pub fn is_open_at(&self, kind: ProviderKind, now: Instant) -> bool {
        self.with_breaker(kind, |b| b.is_open_at(now))
    }

    pub fn record_success(&self, kind: ProviderKind) {
        self.with_breaker(kind, CircuitBreaker::record_success);
    }

    pub fn record_failure(&self, kind: ProviderKind) {
        self.record_failure_at(kind, Instant::now());
    }

    pub fn record_failure_at(&self, kind: ProviderKind, now: Instant) {
        let opened = self.with_breaker(kind, |b| {
            let was_open = b.state() == CircuitState::Open;
            b.record_failure_at(now);
            !was_open && b.state() == CircuitState::Open
        });
        if opened {
            tracing::warn!(provider = %kind, "Circuit breaker opened");
        }
    }

    pub fn force_open_at(&self, kind: ProviderKind, now: Instant) {
        self.with_breaker(kind, |b| b.force_open_at(now));
    }

    /// Snapshot of `kind` after applying the lazy cooldown.
    pub fn snapshot(&self, kind: ProviderKind) -> BreakerSnapshot {
        self.with_breaker(kind, |b| {
            b.is_open();
            BreakerSnapshot {
                state: b.state(),
                failures: b.failures(),
                last_failure_at: b.last_failure_at(),
                uptime: b.uptime(),
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn quick_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 1,
            cooldown: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_default_state_is_closed() {
        let mut cb = CircuitBreaker::new();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(!cb.is_open());
    }

    #[test]
    fn test_opens_after_threshold_failures() {
        let mut cb = CircuitBreaker::new(); // threshold = 3
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.is_open());
    }

    #[test]
    fn test_success_resets_failure_count() {
        let mut cb = CircuitBreaker::new();
        cb.record_failure();
        cb.record_failure();
        cb.record_success();

        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failures(), 0);
    }

    #[test]
    fn test_closes_after_cooldown_and_resets_failures() {
        let mut cb = CircuitBreaker::with_config(quick_config());
        let t = Instant::now();
        cb.record_failure_at(t);
        assert_eq!(cb.state(), CircuitState::Open);

        assert!(cb.is_open_at(t + Duration::from_secs(30)));
        assert_eq!(cb.failures(), 1);

        assert!(!cb.is_open_at(t + Duration::from_secs(61)));
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failures(), 0);
    }

    #[test]
    fn test_cooldown_boundary_is_exclusive() {
        let mut cb = CircuitBreaker::with_config(quick_config());
        let t = Instant::now();
        cb.record_failure_at(t);
        assert!(cb.is_open_at(t + Duration::from_secs(60)));
        assert!(!cb.is_open_at(t + Duration::from_millis(60_001)));
    }


    #[test]
    fn test_force_open() {
        let mut cb = CircuitBreaker::new();
        cb.force_open_at(Instant::now());
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.is_open()); // cooldown hasn't elapsed yet
    }

    #[test]
    fn test_circuit_state_display() {
        assert_eq!(CircuitState::Closed.to_string(), "closed");
        assert_eq!(CircuitState::Open.to_string(), "open");
    }

    #[test]
    fn test_uptime() {
        let mut cb = CircuitBreaker::new();
        assert!((cb.uptime() - 100.0).abs() < f64::EPSILON);
        cb.record_success();
        cb.record_success();
        cb.record_success();
        cb.record_failure();
        assert!((cb.uptime() - 75.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_last_failure_at_recorded() {
        let mut cb = CircuitBreaker::new();
        assert!(cb.last_failure_at().is_none());
        cb.record_failure();
        assert!(cb.last_failure_at().is_some());
    }

    #[test]
    fn test_registry_is_per_provider() {
        let registry = CircuitBreakerRegistry::new(quick_config());
        registry.record_failure(ProviderKind::Relay);

        assert!(registry.is_open(ProviderKind::Relay));
        assert!(!registry.is_open(ProviderKind::Direct));
    }

    #[test]
    fn test_registry_lazy_close() {
        let registry = CircuitBreakerRegistry::new(quick_config());
        let t = Instant::now();
        registry.force_open_at(ProviderKind::Budget, t);
        assert!(registry.is_open_at(ProviderKind::Budget, t + Duration::from_secs(1)));
        assert!(!registry.is_open_at(ProviderKind::Budget, t + Duration::from_secs(61)));
        assert_eq!(registry.snapshot(ProviderKind::Budget).failures, 0);
    }

    #[test]
    fn test_registry_snapshot() {
        let registry = CircuitBreakerRegistry::default();
        registry.record_success(ProviderKind::Local);
        registry.record_failure(ProviderKind::Local);

        let snap = registry.snapshot(ProviderKind::Local);
        assert_eq!(snap.state, CircuitState::Closed);
        assert_eq!(snap.failures, 1);
        assert!((snap.uptime - 50.0).abs() < f64::EPSILON);
        assert!(snap.last_failure_at.is_some());
    }
}
