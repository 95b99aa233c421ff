//! Circuit breaker implementation.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::state::{CircuitSnapshot, CircuitState, CircuitStatus};
use crate::clock::{to_iso, Clock};
use crate::config::CircuitBreakerConfig;

/// Returned instead of running the operation while a circuit is open.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Circuit breaker is open for '{key}' until {next_retry_at_iso}")]
pub struct CircuitOpenError {
    /// Circuit key
    pub key: String,
    /// Earliest instant a probe will be let through
    pub next_retry_at_iso: String,
}

/// Error returned by [`CircuitBreaker::execute`].
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The circuit was open; the operation was not invoked
    #[error(transparent)]
    Open(#[from] CircuitOpenError),

    /// The operation ran and failed; this is its original error
    #[error("Operation failed: {0}")]
    Inner(#[source] E),
}

impl<E> BreakerError<E> {
    /// Returns true if the operation was rejected without running.
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open(_))
    }

    /// The operation's own error, if it ran.
    pub fn into_inner(self) -> Option<E> {
        match self {
            BreakerError::Inner(e) => Some(e),
            BreakerError::Open(_) => None,
        }
    }
}

/// Per-key three-state circuit breaker.
///
/// The state map lock is only held for the synchronous admission check and
/// for bookkeeping after the operation settles, never across the operation
/// itself. Concurrent calls for one key in `closed` all run and each records
/// its own outcome, so more than `failure_threshold` calls can be in flight
/// before the circuit opens.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    circuits: Mutex<BTreeMap<String, CircuitState>>,
}

impl CircuitBreaker {
    /// Create a breaker. Out-of-range settings are raised to their minimums.
    pub fn new(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config: config.clamped(),
            clock,
            circuits: Mutex::new(BTreeMap::new()),
        }
    }

    /// Effective configuration.
    pub fn config(&self) -> CircuitBreakerConfig {
        self.config
    }

    /// Run `operation` under the circuit for `key`.
    ///
    /// While the circuit is open, `operation` is never called and
    /// [`BreakerError::Open`] is returned. Otherwise the outcome is recorded
    /// and the operation's result is passed through, with failures wrapped in
    /// [`BreakerError::Inner`].
    pub async fn execute<F, Fut, T, E>(&self, key: &str, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.admit(key)?;

        match operation().await {
            Ok(value) => {
                self.record_success(key);
                Ok(value)
            }
            Err(err) => {
                self.record_failure(key);
                Err(BreakerError::Inner(err))
            }
        }
    }

    /// Snapshot of one circuit, creating it as `closed` if unseen.
    pub fn get_state(&self, key: &str) -> CircuitSnapshot {
        let now = self.clock.now_ms();
        let mut circuits = self.circuits.lock();
        let state = Self::state_mut(&mut circuits, key, now);
        state.snapshot(key)
    }

    /// Snapshots of every known circuit, ordered by key.
    pub fn list_states(&self) -> Vec<CircuitSnapshot> {
        let now = self.clock.now_ms();
        let mut circuits = self.circuits.lock();
        let snapshots = circuits
            .iter_mut()
            .map(|(key, state)| {
                if state.apply_cooldown(now) {
                    info!(key = %key, "Circuit breaker half-open");
                }
                state.snapshot(key)
            })
            .collect();
        snapshots
    }

    /// Forget one circuit, or all of them when `key` is `None`.
    pub fn reset(&self, key: Option<&str>) {
        let mut circuits = self.circuits.lock();
        match key {
            Some(key) => {
                circuits.remove(key);
            }
            None => circuits.clear(),
        }
    }

    fn admit(&self, key: &str) -> Result<(), CircuitOpenError> {
        let now = self.clock.now_ms();
        let mut circuits = self.circuits.lock();
        let state = Self::state_mut(&mut circuits, key, now);

        if state.status == CircuitStatus::Open {
            let next_retry_at_iso = to_iso(state.next_retry_at_ms.unwrap_or(now));
            warn!(
                key = %key,
                next_retry_at = %next_retry_at_iso,
                "Circuit breaker OPEN - rejecting call"
            );
            return Err(CircuitOpenError {
                key: key.to_string(),
                next_retry_at_iso,
            });
        }

        Ok(())
    }

    fn record_success(&self, key: &str) {
        let now = self.clock.now_ms();
        let mut circuits = self.circuits.lock();
        let state = Self::state_mut(&mut circuits, key, now);

        match state.status {
            CircuitStatus::HalfOpen => {
                state.success_count += 1;
                state.updated_at_ms = now;
                if state.success_count >= self.config.success_threshold {
                    state.close(now);
                    info!(key = %key, "Circuit breaker CLOSED - dependency recovered");
                } else {
                    debug!(
                        key = %key,
                        successes = state.success_count,
                        threshold = self.config.success_threshold,
                        "Circuit breaker half-open - success recorded"
                    );
                }
            }
            CircuitStatus::Closed => {
                state.failure_count = 0;
                state.success_count = 0;
                state.updated_at_ms = now;
            }
            // Another in-flight call reopened the circuit.
            CircuitStatus::Open => {}
        }
    }

    fn record_failure(&self, key: &str) {
        let now = self.clock.now_ms();
        let mut circuits = self.circuits.lock();
        let state = Self::state_mut(&mut circuits, key, now);
        let CircuitBreakerConfig {
            failure_threshold,
            cooldown_ms,
            ..
        } = self.config;

        match state.status {
            CircuitStatus::HalfOpen => {
                state.open(failure_threshold, cooldown_ms, now);
                warn!(key = %key, "Circuit breaker REOPENED - probe failed");
            }
            CircuitStatus::Closed => {
                state.failure_count += 1;
                state.updated_at_ms = now;
                if state.failure_count >= failure_threshold {
                    state.open(failure_threshold, cooldown_ms, now);
                    warn!(
                        key = %key,
                        threshold = failure_threshold,
                        cooldown_ms = cooldown_ms,
                        "Circuit breaker OPENED - too many failures"
                    );
                } else {
                    debug!(
                        key = %key,
                        failures = state.failure_count,
                        threshold = failure_threshold,
                        "Circuit breaker failure recorded"
                    );
                }
            }
            CircuitStatus::Open => {}
        }
    }

    /// Fetch or lazily create the state for `key`, applying the cooldown check.
    fn state_mut<'a>(
        circuits: &'a mut BTreeMap<String, CircuitState>,
        key: &str,
        now: i64,
    ) -> &'a mut CircuitState {
        let state = circuits.entry(key.to_string()).or_insert_with(|| {
            debug!(key = %key, "Creating new circuit");
            CircuitState::closed(now)
        });
        if state.apply_cooldown(now) {
            info!(key = %key, "Circuit breaker half-open");
        }
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio_test::{assert_err, assert_ok};

    const T0: i64 = 1_714_566_600_000;

    fn breaker(failure_threshold: u32, success_threshold: u32) -> (CircuitBreaker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(T0));
        let config = CircuitBreakerConfig {
            failure_threshold,
            success_threshold,
            cooldown_ms: 1_000,
        };
        (CircuitBreaker::new(config, clock.clone()), clock)
    }

    async fn fail(cb: &CircuitBreaker, key: &str, calls: &AtomicU32) -> Result<u32, BreakerError<String>> {
        cb.execute(key, || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<u32, _>("boom".to_string())
        })
        .await
    }

    async fn succeed(cb: &CircuitBreaker, key: &str, calls: &AtomicU32) -> Result<u32, BreakerError<String>> {
        cb.execute(key, || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(42)
        })
        .await
    }

    async fn open_circuit(cb: &CircuitBreaker, key: &str, failures: u32) {
        let calls = AtomicU32::new(0);
        for _ in 0..failures {
            let _ = fail(cb, key, &calls).await;
        }
    }

    #[tokio::test]
    async fn test_unseen_key_starts_closed() {
        let (cb, _) = breaker(5, 1);
        let state = cb.get_state("K");
        assert_eq!(state.status, CircuitStatus::Closed);
        assert_eq!(state.failure_count, 0);
        assert_eq!(state.updated_at_iso, to_iso(T0));
    }

    #[tokio::test]
    async fn test_opens_after_threshold_and_fails_fast() {
        let (cb, _) = breaker(5, 1);
        let calls = AtomicU32::new(0);

        for i in 1..=5 {
            let err = assert_err!(fail(&cb, "K", &calls).await);
            assert_eq!(err.into_inner(), Some("boom".to_string()), "call {}", i);
        }

        let state = cb.get_state("K");
        assert_eq!(state.status, CircuitStatus::Open);
        assert_eq!(state.failure_count, 5);
        assert_eq!(calls.load(Ordering::SeqCst), 5);

        let err = assert_err!(succeed(&cb, "K", &calls).await);
        assert!(err.is_open());
        match err {
            BreakerError::Open(open) => {
                assert_eq!(open.key, "K");
                assert_eq!(open.next_retry_at_iso, to_iso(T0 + 1_000));
            }
            BreakerError::Inner(_) => panic!("expected open circuit"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_success_in_closed_forgives_failures() {
        let (cb, _) = breaker(3, 1);
        let calls = AtomicU32::new(0);

        let _ = fail(&cb, "K", &calls).await;
        let _ = fail(&cb, "K", &calls).await;
        assert_eq!(cb.get_state("K").failure_count, 2);

        assert_ok!(succeed(&cb, "K", &calls).await);
        assert_eq!(cb.get_state("K").failure_count, 0);

        let _ = fail(&cb, "K", &calls).await;
        assert_eq!(cb.get_state("K").status, CircuitStatus::Closed);
    }

    #[tokio::test]
    async fn test_cooldown_then_success_closes() {
        let (cb, clock) = breaker(5, 1);
        open_circuit(&cb, "K", 5).await;

        clock.advance(1_001);
        let calls = AtomicU32::new(0);
        let value = assert_ok!(succeed(&cb, "K", &calls).await);
        assert_eq!(value, 42);

        let state = cb.get_state("K");
        assert_eq!(state.status, CircuitStatus::Closed);
        assert_eq!(state.failure_count, 0);
        assert_eq!(state.opened_at_iso, None);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens_immediately() {
        let (cb, clock) = breaker(5, 3);
        open_circuit(&cb, "K", 5).await;

        clock.advance(1_000);
        assert_eq!(cb.get_state("K").status, CircuitStatus::HalfOpen);

        let calls = AtomicU32::new(0);
        assert_ok!(succeed(&cb, "K", &calls).await);
        assert_eq!(cb.get_state("K").success_count, 1);

        let _ = fail(&cb, "K", &calls).await;
        let state = cb.get_state("K");
        assert_eq!(state.status, CircuitStatus::Open);
        assert_eq!(state.failure_count, 5);
        assert_eq!(state.success_count, 0);
        assert_eq!(state.next_retry_at_iso, Some(to_iso(T0 + 2_000)));
    }

    #[tokio::test]
    async fn test_half_open_needs_success_threshold() {
        let (cb, clock) = breaker(1, 2);
        open_circuit(&cb, "K", 1).await;
        clock.advance(1_000);

        let calls = AtomicU32::new(0);
        assert_ok!(succeed(&cb, "K", &calls).await);
        assert_eq!(cb.get_state("K").status, CircuitStatus::HalfOpen);

        assert_ok!(succeed(&cb, "K", &calls).await);
        assert_eq!(cb.get_state("K").status, CircuitStatus::Closed);
    }

    #[tokio::test]
    async fn test_list_states_applies_cooldown() {
        let (cb, clock) = breaker(1, 1);
        open_circuit(&cb, "b", 1).await;
        let _ = cb.get_state("a");

        let states = cb.list_states();
        assert_eq!(states.len(), 2);
        assert_eq!(states[0].key, "a");
        assert_eq!(states[1].status, CircuitStatus::Open);

        clock.advance(1_000);
        let states = cb.list_states();
        assert_eq!(states[1].status, CircuitStatus::HalfOpen);
    }

    #[tokio::test]
    async fn test_concurrent_calls_each_count() {
        let (cb, _) = breaker(2, 1);
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let slow_failure = move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            Err::<u32, _>("boom".to_string())
        };
        let (a, b) = futures::join!(cb.execute("K", slow_failure), cb.execute("K", slow_failure));

        assert!(matches!(a, Err(BreakerError::Inner(_))));
        assert!(matches!(b, Err(BreakerError::Inner(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cb.get_state("K").status, CircuitStatus::Open);
    }

    #[tokio::test]
    async fn test_reset() {
        let (cb, _) = breaker(1, 1);
        open_circuit(&cb, "a", 1).await;
        open_circuit(&cb, "b", 1).await;

        cb.reset(Some("a"));
        assert_eq!(cb.get_state("a").status, CircuitStatus::Closed);
        assert_eq!(cb.list_states().len(), 2);

        cb.reset(None);
        assert!(cb.list_states().is_empty());
    }

    #[test]
    fn test_config_is_clamped() {
        let clock = Arc::new(ManualClock::new(T0));
        let cb = CircuitBreaker::new(
            CircuitBreakerConfig {
                failure_threshold: 0,
                success_threshold: 0,
                cooldown_ms: 5,
            },
            clock,
        );
        assert_eq!(cb.config().failure_threshold, 1);
        assert_eq!(cb.config().cooldown_ms, 1_000);
    }
}
