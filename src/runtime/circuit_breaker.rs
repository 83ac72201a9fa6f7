//! Circuit breaker
//!
//! Guards a call path that can fail repeatedly. Closed passes calls
//! through; enough consecutive failures open the circuit, which rejects
//! immediately until a cooldown elapses. The first call after the cooldown
//! probes recovery in half-open state: one failure reopens, enough
//! consecutive successes close.

use crate::config::BreakerConfig;
use crate::error::{Error, Result};
use serde::Serialize;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    next_retry_at: Option<Instant>,
    probe_in_flight: bool,
    total_requests: u64,
    successful_requests: u64,
    failed_requests: u64,
    rejected_requests: u64,
    timeouts: u64,
}

impl BreakerInner {
    fn open(&mut self, reset_timeout: Duration) {
        self.state = CircuitState::Open;
        self.consecutive_successes = 0;
        self.probe_in_flight = false;
        // Opening always recomputes the retry time.
        self.next_retry_at = Some(Instant::now() + reset_timeout);
    }
}

/// A call guard with closed/open/half-open states.
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a breaker in the closed state.
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                next_retry_at: None,
                probe_in_flight: false,
                total_requests: 0,
                successful_requests: 0,
                failed_requests: 0,
                rejected_requests: 0,
                timeouts: 0,
            }),
        }
    }

    /// Current state.
    pub async fn state(&self) -> CircuitState {
        self.inner.lock().await.state
    }

    /// Run a call through the breaker.
    ///
    /// Rejections carry the time until the next probe is allowed. An
    /// optional per-call operation timeout fails the call (and counts
    /// toward the failure threshold) if it does not settle in time.
    pub async fn execute<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.admit().await?;

        let outcome = match self.config.operation_timeout_ms {
            Some(limit_ms) => {
                match tokio::time::timeout(Duration::from_millis(limit_ms), fut).await {
                    Ok(result) => result,
                    Err(_) => {
                        self.on_timeout().await;
                        return Err(Error::Internal(format!(
                            "operation timed out after {}ms",
                            limit_ms
                        )));
                    }
                }
            }
            None => fut.await,
        };

        match outcome {
            Ok(value) => {
                self.on_success().await;
                Ok(value)
            }
            Err(err) => {
                self.on_failure().await;
                Err(err)
            }
        }
    }

    async fn admit(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitState::Closed => {}
            CircuitState::Open => {
                let now = Instant::now();
                let retry_at = inner.next_retry_at.unwrap_or(now);
                if now >= retry_at {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    tracing::debug!("circuit half-open, probing recovery");
                } else {
                    inner.rejected_requests += 1;
                    return Err(Error::CircuitOpen {
                        retry_after_ms: retry_at.duration_since(now).as_millis() as u64,
                    });
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    inner.rejected_requests += 1;
                    let retry_after_ms = inner
                        .next_retry_at
                        .map(|t| t.saturating_duration_since(Instant::now()).as_millis() as u64)
                        .unwrap_or(0);
                    return Err(Error::CircuitOpen { retry_after_ms });
                }
                inner.probe_in_flight = true;
            }
        }
        inner.total_requests += 1;
        Ok(())
    }

    async fn on_success(&self) {
        let mut inner = self.inner.lock().await;
        inner.successful_requests += 1;
        inner.probe_in_flight = false;
        match inner.state {
            CircuitState::HalfOpen => {
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.success_threshold {
                    tracing::info!("circuit closed after successful probes");
                    inner.state = CircuitState::Closed;
                    inner.consecutive_failures = 0;
                    inner.consecutive_successes = 0;
                    inner.next_retry_at = None;
                }
            }
            _ => {
                inner.consecutive_failures = 0;
            }
        }
    }

    async fn on_failure(&self) {
        let mut inner = self.inner.lock().await;
        inner.failed_requests += 1;
        inner.probe_in_flight = false;
        self.count_failure(&mut inner);
    }

    async fn on_timeout(&self) {
        let mut inner = self.inner.lock().await;
        inner.failed_requests += 1;
        inner.timeouts += 1;
        inner.probe_in_flight = false;
        self.count_failure(&mut inner);
    }

    fn count_failure(&self, inner: &mut BreakerInner) {
        let reset = Duration::from_millis(self.config.reset_timeout_ms);
        match inner.state {
            CircuitState::HalfOpen => {
                // A single half-open failure reopens immediately.
                tracing::warn!("probe failed, circuit reopened");
                inner.open(reset);
            }
            _ => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    tracing::warn!(
                        failures = inner.consecutive_failures,
                        "failure threshold reached, circuit opened"
                    );
                    inner.open(reset);
                }
            }
        }
    }

    /// Stats export envelope.
    pub async fn stats(&self) -> BreakerStatsExport {
        let inner = self.inner.lock().await;
        BreakerStatsExport {
            state: inner.state.to_string(),
            failures: inner.consecutive_failures,
            successes: inner.consecutive_successes,
            total_requests: inner.total_requests,
            successful_requests: inner.successful_requests,
            failed_requests: inner.failed_requests,
            rejected_requests: inner.rejected_requests,
            timeouts: inner.timeouts,
        }
    }
}

/// Wire form of breaker stats.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerStatsExport {
    pub state: String,
    pub failures: u32,
    pub successes: u32,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub rejected_requests: u64,
    pub timeouts: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn breaker(failure_threshold: u32, success_threshold: u32, reset_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(BreakerConfig {
            failure_threshold,
            success_threshold,
            reset_timeout_ms: reset_ms,
            operation_timeout_ms: None,
        })
    }

    async fn fail(b: &CircuitBreaker) -> Result<u32> {
        b.execute(async { Err::<u32, _>(Error::Internal("down".to_string())) })
            .await
    }

    #[tokio::test]
    async fn test_opens_after_threshold() {
        let b = breaker(3, 1, 60_000);
        for _ in 0..3 {
            let _ = fail(&b).await;
        }
        assert_eq!(b.state().await, CircuitState::Open);

        // Next call is rejected without invoking the wrapped function.
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let err = b
            .execute(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(1u32)
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CircuitOpen { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_success_resets_streak() {
        let b = breaker(3, 1, 60_000);
        let _ = fail(&b).await;
        let _ = fail(&b).await;
        b.execute(async { Ok(1u32) }).await.unwrap();
        let _ = fail(&b).await;
        let _ = fail(&b).await;
        assert_eq!(b.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_after_reset_timeout() {
        let b = breaker(1, 1, 50);
        let _ = fail(&b).await;
        assert_eq!(b.state().await, CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(70)).await;

        // Exactly one call is let through and closes the circuit.
        b.execute(async { Ok(1u32) }).await.unwrap();
        assert_eq!(b.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens_immediately() {
        let b = breaker(2, 2, 50);
        let _ = fail(&b).await;
        let _ = fail(&b).await;
        assert_eq!(b.state().await, CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(70)).await;
        let _ = fail(&b).await;
        assert_eq!(b.state().await, CircuitState::Open);

        let stats = b.stats().await;
        assert_eq!(stats.state, "open");
    }

    #[tokio::test]
    async fn test_success_threshold_closes() {
        let b = breaker(1, 2, 50);
        let _ = fail(&b).await;

        tokio::time::sleep(Duration::from_millis(70)).await;
        b.execute(async { Ok(1u32) }).await.unwrap();
        assert_eq!(b.state().await, CircuitState::HalfOpen);

        b.execute(async { Ok(1u32) }).await.unwrap();
        assert_eq!(b.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_rejection_carries_retry_after() {
        let b = breaker(1, 1, 60_000);
        let _ = fail(&b).await;

        match fail(&b).await.unwrap_err() {
            Error::CircuitOpen { retry_after_ms } => {
                assert!(retry_after_ms > 0);
                assert!(retry_after_ms <= 60_000);
            }
            other => panic!("expected CircuitOpen, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_operation_timeout_counts_as_failure() {
        let b = CircuitBreaker::new(BreakerConfig {
            failure_threshold: 1,
            success_threshold: 1,
            reset_timeout_ms: 60_000,
            operation_timeout_ms: Some(20),
        });

        let err = b
            .execute(async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(1u32)
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
        assert_eq!(b.state().await, CircuitState::Open);

        let stats = b.stats().await;
        assert_eq!(stats.timeouts, 1);
    }

    #[tokio::test]
    async fn test_stats_counters() {
        let b = breaker(5, 1, 60_000);
        b.execute(async { Ok(1u32) }).await.unwrap();
        let _ = fail(&b).await;

        let stats = b.stats().await;
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.successful_requests, 1);
        assert_eq!(stats.failed_requests, 1);
        assert_eq!(stats.rejected_requests, 0);
        assert_eq!(stats.state, "closed");
    }
}
