//! Admission loop and attempt execution.
//!
//! # 学習ポイント
//! - 同期的な admission (`pump`) と非同期の attempt (`tokio::spawn`) の分離
//! - `tokio::select!` による timeout / abort の合成
//! - `Weak` で Orchestrator の寿命に縛られないタイマー
//! - `JoinHandle` の監視で task の panic を attempt の失敗に変換

use std::any::Any;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::time::{Instant, sleep_until, timeout};
use tracing::{debug, info, warn};

use super::{Inner, State};
use crate::breaker::CircuitBreaker;
use crate::domain::{Event, EventKind, RequestStatus, TicketId};
use crate::error::{RequestError, TaskError};
use crate::limiter::RateLimiter;
use crate::queue::{Decision, QueuedTicket, ScheduledRetry};
use crate::task::{AbortSignal, DynTask, SharedValue, abort_pair};

/// Shortest wake-up delay, so a limiter that is due "now" does not spin.
const MIN_WAKE: Duration = Duration::from_millis(1);

impl Inner {
    /// Promote due retries, then start queued requests while a concurrency
    /// slot and a token are available. Requests whose limiter is dry stay
    /// queued and a timer is armed for the next refill.
    pub(crate) fn pump(self: &Arc<Self>, state: &mut State) {
        let now = Instant::now();
        promote_due_retries(state, now);

        let mut wake: Option<Instant> = None;
        let mut idx = 0;
        while state.active.len() < self.config.max_concurrent {
            let Some(&QueuedTicket { ticket, .. }) = state.queue.get(idx) else {
                break;
            };
            let Some(record) = state.records.get(&ticket) else {
                // cancelled while queued
                state.queue.remove(idx);
                continue;
            };
            let namespace = record.spec.namespace.clone();

            let breaker_key = self.config.breaker_scope.key(&namespace).to_string();
            let breaker = state
                .breakers
                .entry(breaker_key)
                .or_insert_with(|| CircuitBreaker::new(&self.config));
            if breaker.is_open(now) {
                let retry_after = breaker.retry_after(now);
                state.queue.remove(idx);
                self.reject_open(state, ticket, retry_after);
                continue;
            }

            let limiter_key = self.config.limiter_scope.key(&namespace).to_string();
            let limiter = state
                .limiters
                .entry(limiter_key)
                .or_insert_with(|| RateLimiter::new(&self.config, now));
            if !limiter.try_acquire(now) {
                let at = now + limiter.next_refill_in(now).max(MIN_WAKE);
                wake = Some(wake.map_or(at, |w| w.min(at)));
                idx += 1;
                continue;
            }

            state.queue.remove(idx);
            self.dispatch(state, ticket);
        }

        if let Some(next) = state.scheduled.peek() {
            let at = next.next_run_at;
            wake = Some(wake.map_or(at, |w| w.min(at)));
        }
        if let Some(at) = wake {
            self.schedule_wake(state, at);
        }
    }

    fn reject_open(&self, state: &mut State, ticket: TicketId, retry_after: Duration) {
        let Some(mut record) = state.records.remove(&ticket) else {
            return;
        };
        let error = RequestError::CircuitOpen {
            namespace: record.spec.namespace.clone(),
            retry_after,
        };
        record.mark_failed();
        state.metrics.record_circuit_rejection();
        warn!(id = %record.id, ticket = %ticket, ?retry_after, "circuit open, dropping queued request");
        self.emit(Event::new(
            Some(ticket),
            &record.id,
            &record.spec.namespace,
            EventKind::CircuitRejected,
        ));
        record.resolve(Err(error));
    }

    fn dispatch(self: &Arc<Self>, state: &mut State, ticket: TicketId) {
        let Some(record) = state.records.get_mut(&ticket) else {
            return;
        };
        let (abort, signal) = abort_pair();
        record.start_attempt(abort);
        state.active.insert(ticket);

        let attempt = record.attempts;
        let task = Arc::clone(&record.task);
        let limit = record.spec.timeout;
        debug!(id = %record.id, ticket = %ticket, attempt, "attempt started");
        self.emit(Event::new(
            Some(ticket),
            &record.id,
            &record.spec.namespace,
            EventKind::Started { attempt },
        ));

        // the attempt runs in its own task so a panic surfaces as a JoinError
        // here and the slot is always released
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let started = Instant::now();
            let result = match tokio::spawn(run_attempt(task, signal, limit)).await {
                Ok(result) => result,
                Err(err) if err.is_panic() => {
                    let message = panic_message(err.into_panic());
                    warn!(ticket = %ticket, %message, "task panicked");
                    Err(TaskError::Panicked(message))
                }
                Err(_) => Err(TaskError::Aborted),
            };
            inner.finish_attempt(ticket, result, started.elapsed());
        });
    }

    fn finish_attempt(
        self: &Arc<Self>,
        ticket: TicketId,
        result: Result<SharedValue, TaskError>,
        elapsed: Duration,
    ) {
        let now = Instant::now();
        let mut guard = self.lock();
        let state = &mut *guard;
        state.active.remove(&ticket);

        let Some(mut record) = state.records.remove(&ticket) else {
            // cancelled mid-flight; the slot is free again
            self.pump(state);
            return;
        };
        let namespace = record.spec.namespace.clone();
        let breaker_key = self.config.breaker_scope.key(&namespace).to_string();
        let limiter_key = self.config.limiter_scope.key(&namespace).to_string();

        match result {
            Ok(value) => {
                record.mark_completed();
                if let Some(breaker) = state.breakers.get_mut(&breaker_key)
                    && breaker.record_success()
                {
                    info!(scope = %breaker_key, "circuit closed");
                    self.emit(Event::new(
                        Some(ticket),
                        &record.id,
                        &namespace,
                        EventKind::CircuitClosed { scope: breaker_key },
                    ));
                }
                if let Some(limiter) = state.limiters.get_mut(&limiter_key) {
                    limiter.reset_delay();
                }
                if record.spec.deduplicate {
                    state
                        .dedup
                        .store(&namespace, &record.id, Arc::clone(&value), now);
                }
                state.metrics.record_success(&namespace, elapsed);
                debug!(id = %record.id, ticket = %ticket, attempts = record.attempts, ?elapsed, "request succeeded");
                self.emit(Event::new(
                    Some(ticket),
                    &record.id,
                    &namespace,
                    EventKind::Succeeded {
                        attempts: record.attempts,
                        elapsed_ms: millis(elapsed),
                    },
                ));
                record.resolve(Ok(value));
            }
            Err(error) => {
                if let Some(abort) = record.abort.take() {
                    abort.abort();
                }
                let class = self.classifier.classify(&error);

                if class.trips_breaker {
                    let breaker = state
                        .breakers
                        .entry(breaker_key.clone())
                        .or_insert_with(|| CircuitBreaker::new(&self.config));
                    if breaker.record_failure(now) {
                        info!(scope = %breaker_key, failures = breaker.failure_count(), "circuit opened");
                        self.emit(Event::new(
                            Some(ticket),
                            &record.id,
                            &namespace,
                            EventKind::CircuitOpened { scope: breaker_key },
                        ));
                    }
                }
                if class.overload
                    && let Some(limiter) = state.limiters.get_mut(&limiter_key)
                {
                    let delay = limiter.penalize(now);
                    warn!(scope = %limiter_key, ?delay, "backend overloaded, slowing down");
                    self.emit(Event::new(
                        Some(ticket),
                        &record.id,
                        &namespace,
                        EventKind::RateLimitPenalized {
                            delay_ms: millis(delay),
                        },
                    ));
                }

                match self
                    .policy
                    .decide(record.attempts, record.spec.max_attempts, class)
                {
                    Decision::Retry { delay, reason } => {
                        let next_run_at = now + delay;
                        warn!(id = %record.id, ticket = %ticket, error = %error, %reason, "attempt failed, retrying");
                        record.schedule_retry();
                        state.metrics.record_retry(&namespace);
                        self.emit(Event::new(
                            Some(ticket),
                            &record.id,
                            &namespace,
                            EventKind::RetryScheduled {
                                attempt: record.attempts + 1,
                                delay_ms: millis(delay),
                            },
                        ));
                        state.scheduled.push(ScheduledRetry {
                            next_run_at,
                            ticket,
                        });
                        state.records.insert(ticket, record);
                    }
                    Decision::Fail { reason } => {
                        warn!(id = %record.id, ticket = %ticket, error = %error, %reason, "request failed");
                        record.mark_failed();
                        state.metrics.record_failure(&namespace);
                        self.emit(Event::new(
                            Some(ticket),
                            &record.id,
                            &namespace,
                            EventKind::Failed {
                                attempts: record.attempts,
                                error: error.to_string(),
                            },
                        ));
                        let failure = RequestError::Failed {
                            id: record.id.clone(),
                            attempts: record.attempts,
                            elapsed: now.saturating_duration_since(record.created_at),
                            retriable: class.retriable,
                            source: error,
                        };
                        record.resolve(Err(failure));
                    }
                }
            }
        }

        self.pump(state);
    }

    /// Arm a timer unless an earlier one is already pending.
    fn schedule_wake(self: &Arc<Self>, state: &mut State, at: Instant) {
        if state.wake_at.is_some_and(|pending| pending <= at) {
            return;
        }
        state.wake_at = Some(at);
        let weak: Weak<Inner> = Arc::downgrade(self);
        tokio::spawn(async move {
            sleep_until(at).await;
            if let Some(inner) = weak.upgrade() {
                inner.on_wake(at);
            }
        });
    }

    fn on_wake(self: &Arc<Self>, at: Instant) {
        let mut state = self.lock();
        // a superseded timer only clears its own slot
        if state.wake_at == Some(at) {
            state.wake_at = None;
        }
        self.pump(&mut state);
    }
}

/// Move every backoff entry whose delay elapsed back into the ready queue.
fn promote_due_retries(state: &mut State, now: Instant) {
    while let Some(next) = state.scheduled.peek() {
        if next.next_run_at > now {
            break;
        }
        let ticket = next.ticket;
        state.scheduled.pop();
        // skip records cancelled while backing off
        let Some(record) = state.records.get_mut(&ticket) else {
            continue;
        };
        if record.status != RequestStatus::Backoff {
            continue;
        }
        record.requeue();
        debug!(id = %record.id, ticket = %ticket, attempt = record.attempts + 1, "retry due, requeued");
        state.queue.enqueue(QueuedTicket {
            ticket,
            priority: record.priority,
        });
    }
}

/// One attempt: the task raced against its timeout and the abort signal.
async fn run_attempt(
    task: Arc<dyn DynTask>,
    signal: AbortSignal,
    limit: Duration,
) -> Result<SharedValue, TaskError> {
    let watcher = signal.clone();
    tokio::select! {
        res = timeout(limit, task.run_dyn(signal)) => match res {
            Ok(res) => res,
            Err(_) => Err(TaskError::Timeout(limit)),
        },
        () = watcher.aborted() => Err(TaskError::Aborted),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "opaque panic payload".to_string()
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

