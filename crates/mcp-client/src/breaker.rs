//! Per-client circuit breaker.
//!
//! Counts consecutive failures from discovery and invocation; past the
//! threshold the breaker opens and refuses operations until the reset
//! window elapses, then admits a single half-open probe.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

use fleet_domain::error::{Error, Result};

/// Consecutive failures before the breaker opens.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// How long an open breaker refuses operations.
pub const DEFAULT_RESET_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    HalfOpen,
    Open,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    last_failure_at: Option<Instant>,
    /// Only one probe is admitted while half-open.
    probe_in_flight: bool,
}

pub struct CircuitBreaker {
    threshold: u32,
    reset_timeout: Duration,
    inner: Mutex<BreakerInner>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD, DEFAULT_RESET_TIMEOUT)
    }
}

impl CircuitBreaker {
    pub fn new(threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            threshold,
            reset_timeout,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_at: None,
                probe_in_flight: false,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    /// Gate an operation. Closed admits everything; open refuses until the
    /// reset window elapses, then flips to half-open and admits exactly one
    /// probe.
    pub fn try_acquire(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure_at
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed < self.reset_timeout {
                    return Err(Error::CircuitOpen(format!(
                        "retry in {:?}",
                        self.reset_timeout.saturating_sub(elapsed)
                    )));
                }
                inner.state = CircuitState::HalfOpen;
                inner.probe_in_flight = true;
                Ok(())
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(Error::CircuitOpen("probe already in flight".into()))
                } else {
                    inner.probe_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.last_failure_at = None;
        inner.probe_in_flight = false;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.failure_count += 1;
        inner.last_failure_at = Some(Instant::now());
        inner.probe_in_flight = false;
        if inner.state == CircuitState::HalfOpen || inner.failure_count >= self.threshold {
            inner.state = CircuitState::Open;
        }
    }
}
