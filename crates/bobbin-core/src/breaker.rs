//! Circuit breaker over consecutive breaker-relevant failures.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::config::OrchestratorConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Requests pass.
    Closed,
    /// Requests fail fast until the cooldown elapses.
    Open,
    /// Cooldown elapsed; trial requests pass. A success closes the circuit,
    /// a relevant failure opens it again.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    failure_count: u32,
    /// Set when the threshold is crossed, until the next success.
    reopen_at: Option<Instant>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerStatus {
    pub state: CircuitState,
    pub failure_count: u32,
    pub threshold: u32,
    /// Remaining cooldown while open.
    pub retry_after_ms: Option<u64>,
}

impl CircuitBreaker {
    pub fn new(config: &OrchestratorConfig) -> Self {
        Self::with_threshold(
            config.circuit_breaker_threshold,
            config.circuit_breaker_cooldown(),
        )
    }

    pub fn with_threshold(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold,
            cooldown,
            failure_count: 0,
            reopen_at: None,
        }
    }

    /// True exactly while open and the cooldown has not elapsed.
    pub fn is_open(&self, now: Instant) -> bool {
        self.reopen_at.is_some_and(|at| now < at)
    }

    pub fn state(&self, now: Instant) -> CircuitState {
        match self.reopen_at {
            None => CircuitState::Closed,
            Some(at) if now < at => CircuitState::Open,
            Some(_) => CircuitState::HalfOpen,
        }
    }

    /// Count a breaker-relevant failure. Returns `true` when this failure
    /// moved the circuit into `Open`.
    pub fn record_failure(&mut self, now: Instant) -> bool {
        self.failure_count = self.failure_count.saturating_add(1);
        if self.failure_count < self.threshold {
            return false;
        }
        let was_open = self.is_open(now);
        self.reopen_at = Some(now + self.cooldown);
        !was_open
    }

    /// Reset after a success. Returns `true` when this closed an open or
    /// half-open circuit.
    pub fn record_success(&mut self) -> bool {
        self.failure_count = 0;
        self.reopen_at.take().is_some()
    }

    pub fn retry_after(&self, now: Instant) -> Duration {
        self.reopen_at
            .map(|at| at.saturating_duration_since(now))
            .unwrap_or_default()
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    pub fn status(&self, now: Instant) -> BreakerStatus {
        let state = self.state(now);
        BreakerStatus {
            state,
            failure_count: self.failure_count,
            threshold: self.threshold,
            retry_after_ms: (state == CircuitState::Open)
                .then(|| self.retry_after(now).as_millis() as u64),
        }
    }
}
