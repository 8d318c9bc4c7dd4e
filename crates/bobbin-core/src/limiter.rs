//! Token bucket rate limiter with overload penalties.
//!
//! Tokens are concurrency credits bounded by `max_concurrent`. They refill
//! lazily: every call computes how many whole refill intervals have elapsed.
//! The interval grows when the backend signals overload and relaxes one step
//! per penalty once `decay_after` has passed.
//!
//! All methods take `now` explicitly and never await, so acquiring a token is
//! a single synchronous step inside the admission loop.

use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::config::OrchestratorConfig;

#[derive(Debug, Clone)]
pub struct RateLimiter {
    max_tokens: usize,
    tokens: usize,
    base_delay: Duration,
    current_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    decay_after: Duration,
    last_refill: Instant,
    /// Deadlines at which one penalty step is undone.
    pending_decays: VecDeque<Instant>,
}

/// Point-in-time view of a limiter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LimiterStatus {
    pub tokens: usize,
    pub max_tokens: usize,
    pub current_delay_ms: u64,
    pub base_delay_ms: u64,
}

impl RateLimiter {
    pub fn new(config: &OrchestratorConfig, now: Instant) -> Self {
        let base_delay = config.rate_limit_delay();
        Self {
            max_tokens: config.max_concurrent,
            tokens: config.max_concurrent,
            base_delay,
            current_delay: base_delay,
            max_delay: config.max_delay().max(base_delay),
            multiplier: config.backoff_multiplier,
            decay_after: config.rate_limit_decay(),
            last_refill: now,
            pending_decays: VecDeque::new(),
        }
    }

    /// Take one token if available.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        self.apply_decays(now);
        self.refill(now);
        if self.tokens > 0 {
            self.tokens -= 1;
            true
        } else {
            false
        }
    }

    /// Backend signalled overload: widen the refill interval.
    /// Returns the new interval.
    pub fn penalize(&mut self, now: Instant) -> Duration {
        self.apply_decays(now);
        let next = self.current_delay.as_secs_f64() * self.multiplier;
        self.current_delay = Duration::from_secs_f64(next.min(self.max_delay.as_secs_f64()));
        self.pending_decays.push_back(now + self.decay_after);
        self.current_delay
    }

    /// Back to the baseline interval; pending decays become moot.
    pub fn reset_delay(&mut self) {
        self.current_delay = self.base_delay;
        self.pending_decays.clear();
    }

    /// How long until the next token is due.
    pub fn next_refill_in(&self, now: Instant) -> Duration {
        self.current_delay
            .saturating_sub(now.saturating_duration_since(self.last_refill))
    }

    pub fn current_delay(&self) -> Duration {
        self.current_delay
    }

    pub fn tokens(&self) -> usize {
        self.tokens
    }

    /// Snapshot as of `now`, with due decays and pending refills projected
    /// but not applied.
    pub fn status(&self, now: Instant) -> LimiterStatus {
        let delay = self.decayed_delay(now);
        let due = now.saturating_duration_since(self.last_refill).as_nanos() / delay.as_nanos().max(1);
        let due = usize::try_from(due).unwrap_or(usize::MAX);
        LimiterStatus {
            tokens: self.tokens.saturating_add(due).min(self.max_tokens),
            max_tokens: self.max_tokens,
            current_delay_ms: delay.as_millis() as u64,
            base_delay_ms: self.base_delay.as_millis() as u64,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        let to_add = elapsed.as_nanos() / self.current_delay.as_nanos().max(1);
        if to_add > 0 {
            let to_add = usize::try_from(to_add).unwrap_or(usize::MAX);
            self.tokens = self.tokens.saturating_add(to_add).min(self.max_tokens);
            self.last_refill = now;
        }
    }

    /// Interval after undoing every penalty whose deadline has passed.
    /// Deadlines are pushed in order, so the due ones form a prefix.
    fn decayed_delay(&self, now: Instant) -> Duration {
        self.pending_decays
            .iter()
            .take_while(|&&due| due <= now)
            .fold(self.current_delay, |delay, _| self.relax(delay))
    }

    fn relax(&self, delay: Duration) -> Duration {
        Duration::from_secs_f64(delay.as_secs_f64() / self.multiplier).max(self.base_delay)
    }

    fn apply_decays(&mut self, now: Instant) {
        self.current_delay = self.decayed_delay(now);
        while self.pending_decays.front().is_some_and(|&due| due <= now) {
            self.pending_decays.pop_front();
        }
    }
}
