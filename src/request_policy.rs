//! Request Policy — token-bucket rate limiting, jittered exponential
//! backoff, and a circuit breaker wrapping every outbound venue call
//! (§4.A).
//!
//! The token-bucket counter uses the atomic-counter idiom the teacher's
//! `binance::rate_limit::RateLimitTracker` uses for tracking request
//! weight; the circuit breaker is the generic `call<F, T, E>` wrapper
//! pattern from `Zuytan-rustrade`'s `CircuitBreaker`, adapted to use
//! `parking_lot::RwLock` to match the rest of this crate's shared-state
//! style.

use std::future::Future;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use rand::Rng;
use tracing::{info, warn};

use crate::config::RequestPolicyConfig;
use crate::errors::{RequestPolicyError, VenueError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct CircuitBreakerState {
    state: CircuitState,
    failure_count: usize,
    success_count: usize,
    last_failure_at: Option<Instant>,
}

/// Public mirror of [`CircuitState`], returned by [`RequestPolicy::snapshot`]
/// for the observability surface named in §6 — the core only emits this,
/// it does not expose it over HTTP itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitBreakerObservedState {
    Closed,
    Open,
    HalfOpen,
}

/// Point-in-time view of one [`RequestPolicy`]'s breaker, for an embedder
/// to log or serialize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerSnapshot {
    pub policy: String,
    pub state: CircuitBreakerObservedState,
    pub failure_count: usize,
    pub success_count: usize,
}

/// Token bucket refilled at a fixed rate; lock-free on the hot path.
struct TokenBucket {
    tokens: AtomicI64,
    capacity: i64,
    refill_per_sec: i64,
    last_refill_ms: AtomicI64,
    start: Instant,
}

impl TokenBucket {
    fn new(capacity: u32, refill_per_sec: u32) -> Self {
        Self {
            tokens: AtomicI64::new(capacity as i64),
            capacity: capacity as i64,
            refill_per_sec: refill_per_sec as i64,
            last_refill_ms: AtomicI64::new(0),
            start: Instant::now(),
        }
    }

    fn refill(&self) {
        let now_ms = self.start.elapsed().as_millis() as i64;
        let last = self.last_refill_ms.load(Ordering::Relaxed);
        let elapsed_ms = now_ms - last;
        if elapsed_ms <= 0 {
            return;
        }
        let refill_amount = (elapsed_ms * self.refill_per_sec) / 1000;
        if refill_amount <= 0 {
            return;
        }
        self.last_refill_ms.store(now_ms, Ordering::Relaxed);
        let mut current = self.tokens.load(Ordering::Relaxed);
        loop {
            let next = (current + refill_amount).min(self.capacity);
            match self.tokens.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }

    fn try_acquire(&self) -> bool {
        self.refill();
        let mut current = self.tokens.load(Ordering::Relaxed);
        loop {
            if current <= 0 {
                return false;
            }
            match self.tokens.compare_exchange_weak(
                current,
                current - 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }
}

/// Wraps every outbound venue call with rate limiting, a circuit breaker,
/// and jittered exponential backoff retries.
pub struct RequestPolicy {
    name: String,
    bucket: TokenBucket,
    breaker: RwLock<CircuitBreakerState>,
    config: RequestPolicyConfig,
    consecutive_rate_limit_hits: AtomicU32,
}

impl RequestPolicy {
    pub fn new(name: impl Into<String>, config: RequestPolicyConfig) -> Self {
        Self {
            name: name.into(),
            bucket: TokenBucket::new(config.token_bucket_capacity, config.token_bucket_refill_per_sec),
            breaker: RwLock::new(CircuitBreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_at: None,
            }),
            consecutive_rate_limit_hits: AtomicU32::new(0),
            config,
        }
    }

    /// Execute `f`, retrying on transport/rate-limit failures with
    /// jittered exponential backoff, honoring the venue's `Retry-After`
    /// hint when present, and failing fast while the circuit is open.
    pub async fn execute<F, Fut, T>(&self, mut f: F) -> Result<T, RequestPolicyError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, VenueError>>,
    {
        if !self.acquire_token_bounded().await {
            warn!(policy = %self.name, "request blocked by token bucket after bounded wait");
            return Err(RequestPolicyError::RateLimitExceeded);
        }

        if let Some(retry_after_ms) = self.circuit_open_retry_after() {
            return Err(RequestPolicyError::CircuitOpen { retry_after_ms });
        }

        let mut attempt: u32 = 0;
        loop {
            match f().await {
                Ok(value) => {
                    self.on_success();
                    return Ok(value);
                }
                Err(VenueError::RateLimit { retry_after_ms }) => {
                    self.consecutive_rate_limit_hits.fetch_add(1, Ordering::Relaxed);
                    attempt += 1;
                    if attempt > self.config.max_retries {
                        self.on_failure();
                        return Err(RequestPolicyError::MaxRetriesExceeded(attempt));
                    }
                    tokio::time::sleep(Duration::from_millis(retry_after_ms)).await;
                }
                Err(e @ VenueError::Transport(_)) => {
                    attempt += 1;
                    if attempt > self.config.max_retries {
                        self.on_failure();
                        return Err(RequestPolicyError::MaxRetriesExceeded(attempt));
                    }
                    let backoff = self.jittered_backoff(attempt);
                    warn!(policy = %self.name, attempt, backoff_ms = backoff.as_millis() as u64, error = %e, "retrying after transport error");
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    self.on_failure();
                    return Err(RequestPolicyError::Venue(e));
                }
            }
        }
    }

    /// Wait up to `token_wait_timeout_ms` for a token to free up, polling
    /// rather than failing the instant the bucket is momentarily empty —
    /// a burst that drains the bucket for a few milliseconds shouldn't
    /// reject a call outright if tokens are refilling continuously.
    async fn acquire_token_bounded(&self) -> bool {
        if self.bucket.try_acquire() {
            return true;
        }
        let deadline = Instant::now() + Duration::from_millis(self.config.token_wait_timeout_ms);
        let poll_interval = Duration::from_millis(10);
        loop {
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(poll_interval).await;
            if self.bucket.try_acquire() {
                return true;
            }
        }
    }

    fn jittered_backoff(&self, attempt: u32) -> Duration {
        let exp = self.config.base_backoff_ms.saturating_mul(1u64 << attempt.min(16));
        let capped = exp.min(self.config.max_backoff_ms);
        let jitter = rand::thread_rng().gen_range(0..=capped / 2 + 1);
        Duration::from_millis(capped / 2 + jitter)
    }

    fn circuit_open_retry_after(&self) -> Option<u64> {
        let mut state = self.breaker.write();
        if state.state == CircuitState::Open {
            if let Some(last_failure) = state.last_failure_at {
                let timeout = Duration::from_millis(self.config.breaker_timeout_ms);
                if last_failure.elapsed() > timeout {
                    info!(policy = %self.name, "circuit breaker Open -> HalfOpen (timeout elapsed)");
                    state.state = CircuitState::HalfOpen;
                    state.success_count = 0;
                    return None;
                }
                return Some((timeout - last_failure.elapsed()).as_millis() as u64);
            }
        }
        None
    }

    fn on_success(&self) {
        self.consecutive_rate_limit_hits.store(0, Ordering::Relaxed);
        let mut state = self.breaker.write();
        match state.state {
            CircuitState::HalfOpen => {
                state.success_count += 1;
                if state.success_count >= self.config.breaker_success_threshold {
                    info!(policy = %self.name, "circuit breaker HalfOpen -> Closed");
                    state.state = CircuitState::Closed;
                    state.failure_count = 0;
                    state.success_count = 0;
                }
            }
            CircuitState::Closed => {
                state.failure_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self) {
        let mut state = self.breaker.write();
        state.failure_count += 1;
        state.last_failure_at = Some(Instant::now());
        match state.state {
            CircuitState::Closed => {
                if state.failure_count >= self.config.breaker_failure_threshold {
                    warn!(policy = %self.name, failures = state.failure_count, "circuit breaker Closed -> Open");
                    state.state = CircuitState::Open;
                }
            }
            CircuitState::HalfOpen => {
                warn!(policy = %self.name, "circuit breaker HalfOpen -> Open (failure during recovery)");
                state.state = CircuitState::Open;
                state.success_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    pub fn is_open(&self) -> bool {
        self.breaker.read().state == CircuitState::Open
    }

    /// Read the breaker's current state without mutating it.
    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let state = self.breaker.read();
        CircuitBreakerSnapshot {
            policy: self.name.clone(),
            state: match state.state {
                CircuitState::Closed => CircuitBreakerObservedState::Closed,
                CircuitState::Open => CircuitBreakerObservedState::Open,
                CircuitState::HalfOpen => CircuitBreakerObservedState::HalfOpen,
            },
            failure_count: state.failure_count,
            success_count: state.success_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32 as TestCounter;
    use std::sync::Arc;

    fn test_config() -> RequestPolicyConfig {
        RequestPolicyConfig {
            max_retries: 3,
            base_backoff_ms: 1,
            max_backoff_ms: 10,
            breaker_failure_threshold: 2,
            breaker_success_threshold: 1,
            breaker_timeout_ms: 50,
            token_bucket_capacity: 100,
            token_bucket_refill_per_sec: 1000,
            token_wait_timeout_ms: 2_000,
        }
    }

    #[tokio::test]
    async fn succeeds_on_first_try() {
        let policy = RequestPolicy::new("test", test_config());
        let result = policy.execute(|| async { Ok::<_, VenueError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn opens_circuit_after_repeated_transport_failures() {
        let policy = RequestPolicy::new("test", test_config());
        for _ in 0..2 {
            let _ = policy
                .execute(|| async { Err::<i32, _>(VenueError::Rejected("nope".into())) })
                .await;
        }
        assert!(policy.is_open());
    }

    #[tokio::test]
    async fn circuit_open_fails_fast() {
        let policy = RequestPolicy::new("test", test_config());
        for _ in 0..2 {
            let _ = policy
                .execute(|| async { Err::<i32, _>(VenueError::Rejected("nope".into())) })
                .await;
        }
        let result = policy.execute(|| async { Ok::<_, VenueError>(1) }).await;
        assert!(matches!(result, Err(RequestPolicyError::CircuitOpen { .. })));
    }

    #[tokio::test]
    async fn retries_transport_errors_then_succeeds() {
        let policy = RequestPolicy::new("test", test_config());
        let attempts = Arc::new(TestCounter::new(0));
        let attempts_clone = attempts.clone();
        let result = policy
            .execute(move || {
                let attempts = attempts_clone.clone();
                async move {
                    let n = attempts.fetch_add(1, Ordering::SeqCst);
                    if n < 1 {
                        Err(VenueError::Transport("timeout".into()))
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn rate_limit_honors_retry_after_then_succeeds() {
        let policy = RequestPolicy::new("test", test_config());
        let attempts = Arc::new(TestCounter::new(0));
        let attempts_clone = attempts.clone();
        let result = policy
            .execute(move || {
                let attempts = attempts_clone.clone();
                async move {
                    let n = attempts.fetch_add(1, Ordering::SeqCst);
                    if n < 1 {
                        Err(VenueError::RateLimit { retry_after_ms: 1 })
                    } else {
                        Ok(3)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn snapshot_reflects_open_breaker() {
        let policy = RequestPolicy::new("test", test_config());
        for _ in 0..2 {
            let _ = policy
                .execute(|| async { Err::<i32, _>(VenueError::Rejected("nope".into())) })
                .await;
        }
        let snapshot = policy.snapshot();
        assert_eq!(snapshot.policy, "test");
        assert_eq!(snapshot.state, CircuitBreakerObservedState::Open);
        assert_eq!(snapshot.failure_count, 2);
    }

    #[tokio::test]
    async fn token_bucket_blocks_when_exhausted() {
        let mut cfg = test_config();
        cfg.token_bucket_capacity = 1;
        cfg.token_bucket_refill_per_sec = 0;
        cfg.token_wait_timeout_ms = 20;
        let policy = RequestPolicy::new("test", cfg);
        let _ = policy.execute(|| async { Ok::<_, VenueError>(1) }).await;
        let result = policy.execute(|| async { Ok::<_, VenueError>(1) }).await;
        assert!(matches!(result, Err(RequestPolicyError::RateLimitExceeded)));
    }

    #[tokio::test]
    async fn exhausted_bucket_waits_for_refill_instead_of_failing_immediately() {
        let mut cfg = test_config();
        cfg.token_bucket_capacity = 1;
        cfg.token_bucket_refill_per_sec = 100; // one token every 10ms
        cfg.token_wait_timeout_ms = 200;
        let policy = RequestPolicy::new("test", cfg);
        let _ = policy.execute(|| async { Ok::<_, VenueError>(1) }).await;
        let result = policy.execute(|| async { Ok::<_, VenueError>(2) }).await;
        assert_eq!(result.unwrap(), 2);
    }
}
