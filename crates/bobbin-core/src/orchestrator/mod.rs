//! Orchestrator: the public entry point.
//!
//! Data flow:
//! submit → dedup check → breaker admission → enqueue with priority →
//! admission loop (concurrency cap + rate limiter) → attempt with timeout →
//! success (record, cache, resolve) or failure (retry with backoff at high
//! priority, or reject) → admission loop again.
//!
//! All state lives behind one mutex that is never held across an `.await`.
//! Every mutation, token acquisition included, is a synchronous step, so
//! attempts interleaving on a multi-threaded runtime cannot overcommit the
//! concurrency cap or the token bucket.

mod builder;
mod client;
mod executor;
mod handle;


pub use builder::{BuildError, OrchestratorBuilder};
pub use client::ScopedClient;
pub use handle::{BatchItem, RequestHandle};

use std::any::TypeId;
use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::{broadcast, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::breaker::{BreakerStatus, CircuitBreaker};
use crate::config::{OrchestratorConfig, SHARED_KEY, Scope};
use crate::dedup::DedupCache;
use crate::domain::{
    ErrorClassifier, Event, EventKind, RequestOptions, RequestStatus, TicketId,
};
use crate::error::{ConfigError, RequestError, TaskError};
use crate::limiter::{LimiterStatus, RateLimiter};
use crate::metrics::{Counters, Metrics};
use crate::queue::record::{Outcome, RequestRecord};
use crate::queue::{PriorityQueue, QueuedTicket, RetryPolicy, ScheduledRetry};
use crate::task::{AbortSignal, DynTask, Task, TypedTask, downcast};

/// Request orchestrator. Cheap to clone; clones share all state.
///
/// Must be used from within a Tokio runtime: attempts and wake-up timers are
/// spawned onto it.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

pub(crate) struct Inner {
    config: OrchestratorConfig,
    policy: RetryPolicy,
    classifier: Arc<dyn ErrorClassifier>,
    state: Mutex<State>,
    events: broadcast::Sender<Event>,
}

pub(crate) struct State {
    /// Every non-terminal request, by ticket.
    records: HashMap<TicketId, RequestRecord>,
    queue: PriorityQueue<QueuedTicket>,
    active: HashSet<TicketId>,
    /// Requests waiting out a backoff delay.
    scheduled: BinaryHeap<ScheduledRetry>,
    limiters: HashMap<String, RateLimiter>,
    breakers: HashMap<String, CircuitBreaker>,
    dedup: DedupCache,
    metrics: Metrics,
    /// Earliest pending wake-up timer, if any.
    wake_at: Option<Instant>,
}

/// Observability snapshot. Taking it has no side effects.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Status {
    pub active: usize,
    pub pending: usize,
    pub backing_off: usize,
    pub dedup_entries: usize,
    /// Keyed by namespace, or `"*"` for the shared instance.
    pub limiters: BTreeMap<String, LimiterStatus>,
    pub breakers: BTreeMap<String, BreakerStatus>,
    pub metrics: Metrics,
}

/// Outcome of the synchronous part of a submission.
pub(crate) enum Admission {
    Ready(Outcome),
    Waiting(TicketId, oneshot::Receiver<Outcome>),
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    /// Orchestrator with the default classifier.
    pub fn new(config: OrchestratorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::from_parts(
            config,
            Arc::new(crate::domain::DefaultClassifier),
        ))
    }

    pub(crate) fn from_parts(
        config: OrchestratorConfig,
        classifier: Arc<dyn ErrorClassifier>,
    ) -> Self {
        let now = Instant::now();
        let mut limiters = HashMap::new();
        if config.limiter_scope == Scope::Shared {
            limiters.insert(SHARED_KEY.to_string(), RateLimiter::new(&config, now));
        }
        let mut breakers = HashMap::new();
        if config.breaker_scope == Scope::Shared {
            breakers.insert(SHARED_KEY.to_string(), CircuitBreaker::new(&config));
        }
        let (events, _) = broadcast::channel(config.event_capacity);

        let state = State {
            records: HashMap::new(),
            queue: PriorityQueue::new(),
            active: HashSet::new(),
            scheduled: BinaryHeap::new(),
            limiters,
            breakers,
            dedup: DedupCache::new(config.deduplication_window()),
            metrics: Metrics::default(),
            wake_at: None,
        };

        Self {
            inner: Arc::new(Inner {
                policy: RetryPolicy::from_config(&config),
                config,
                classifier,
                state: Mutex::new(state),
                events,
            }),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    /// Submit a closure task and wait for its result.
    pub async fn execute<T, F, Fut>(
        &self,
        id: impl Into<String>,
        task: F,
        options: RequestOptions,
    ) -> Result<T, RequestError>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(AbortSignal) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
    {
        self.submit(id, task, options)?.wait().await
    }

    /// Enqueue a closure task without waiting.
    ///
    /// Fails immediately with `CircuitOpen` or `InvalidOptions`. Dropping the
    /// returned handle does not cancel the request.
    pub fn submit<T, F, Fut>(
        &self,
        id: impl Into<String>,
        task: F,
        options: RequestOptions,
    ) -> Result<RequestHandle<T>, RequestError>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(AbortSignal) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
    {
        self.submit_task(id, task, options)
    }

    /// Like [`Self::execute`], for any [`Task`] implementation.
    pub async fn execute_task<T, K>(
        &self,
        id: impl Into<String>,
        task: K,
        options: RequestOptions,
    ) -> Result<T, RequestError>
    where
        T: Clone + Send + Sync + 'static,
        K: Task<T>,
    {
        self.submit_task(id, task, options)?.wait().await
    }

    pub fn submit_task<T, K>(
        &self,
        id: impl Into<String>,
        task: K,
        options: RequestOptions,
    ) -> Result<RequestHandle<T>, RequestError>
    where
        T: Clone + Send + Sync + 'static,
        K: Task<T>,
    {
        self.submit_erased::<T>(id.into(), TypedTask::<T, K>::erase(task), &options)
    }

    pub(crate) fn submit_erased<T>(
        &self,
        id: String,
        task: Arc<dyn DynTask>,
        options: &RequestOptions,
    ) -> Result<RequestHandle<T>, RequestError>
    where
        T: Clone + Send + Sync + 'static,
    {
        let admission = self
            .inner
            .admit(id.clone(), task, TypeId::of::<T>(), options, |value| {
                downcast::<T>(value).is_some()
            })?;
        Ok(RequestHandle::new(id, admission))
    }

    /// Submit every item at high priority and wait for them in submission
    /// order. Returns the first error in that order, so a later item that
    /// failed sooner is only reported once every earlier item has succeeded.
    /// Items that were already submitted keep running.
    pub async fn batch<T>(&self, items: Vec<BatchItem<T>>) -> Result<Vec<T>, RequestError>
    where
        T: Clone + Send + Sync + 'static,
    {
        let mut handles = Vec::with_capacity(items.len());
        for item in items {
            handles.push(item.submit_high(self, &RequestOptions::default())?);
        }
        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(handle.wait().await?);
        }
        Ok(results)
    }

    /// Submit every item at high priority and report each outcome.
    pub async fn batch_settled<T>(&self, items: Vec<BatchItem<T>>) -> Vec<Result<T, RequestError>>
    where
        T: Clone + Send + Sync + 'static,
    {
        let submitted: Vec<_> = items
            .into_iter()
            .map(|item| item.submit_high(self, &RequestOptions::default()))
            .collect();
        let mut results = Vec::with_capacity(submitted.len());
        for handle in submitted {
            results.push(match handle {
                Ok(handle) => handle.wait().await,
                Err(err) => Err(err),
            });
        }
        results
    }

    /// Cancel every pending, active or backing-off request with this id.
    /// Returns whether anything was found.
    pub fn cancel(&self, id: &str) -> bool {
        self.inner.cancel_where(|r| r.id == id) > 0
    }

    /// Cancel everything, or everything in `namespace`. Returns the count.
    pub fn cancel_all(&self, namespace: Option<&str>) -> usize {
        self.inner
            .cancel_where(|r| namespace.is_none_or(|ns| r.spec.namespace == ns))
    }

    /// Cancel everything, drop cached results and zero the metrics.
    pub fn clear(&self) {
        let cancelled = self.cancel_all(None);
        let mut state = self.inner.lock();
        state.dedup.clear();
        state.metrics = Metrics::default();
        info!(cancelled, "orchestrator cleared");
    }

    pub fn create_client(
        &self,
        namespace: impl Into<String>,
        defaults: RequestOptions,
    ) -> ScopedClient {
        ScopedClient::new(self.clone(), namespace.into(), defaults)
    }

    pub fn status(&self) -> Status {
        let now = Instant::now();
        let state = self.inner.lock();
        Status {
            active: state.active.len(),
            pending: state.queue.len(),
            backing_off: state
                .records
                .values()
                .filter(|r| r.status == RequestStatus::Backoff)
                .count(),
            dedup_entries: state.dedup.len(),
            limiters: state
                .limiters
                .iter()
                .map(|(k, l)| (k.clone(), l.status(now)))
                .collect(),
            breakers: state
                .breakers
                .iter()
                .map(|(k, b)| (k.clone(), b.status(now)))
                .collect(),
            metrics: state.metrics.clone(),
        }
    }

    pub fn metrics(&self) -> Metrics {
        self.inner.lock().metrics.clone()
    }

    pub(crate) fn namespace_counters(&self, namespace: &str) -> Counters {
        self.inner.lock().metrics.namespace(namespace)
    }

    /// Stream of request and component events. Slow subscribers lag; they
    /// never slow the orchestrator down.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.inner.events.subscribe()
    }
}

impl Inner {
    pub(crate) fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn emit(&self, event: Event) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    /// Synchronous part of a submission: dedup, coalescing, breaker admission,
    /// enqueue.
    fn admit(
        self: &Arc<Self>,
        id: String,
        task: Arc<dyn DynTask>,
        result_type: TypeId,
        options: &RequestOptions,
        type_matches: impl Fn(&crate::task::SharedValue) -> bool,
    ) -> Result<Admission, RequestError> {
        let spec = options.resolve(&self.config)?;
        let now = Instant::now();
        let mut state = self.lock();
        state.metrics.record_submitted(&spec.namespace);

        if spec.deduplicate {
            if let Some(value) = state.dedup.check(&spec.namespace, &id, now)
                && type_matches(&value)
            {
                state.metrics.record_deduplicated(&spec.namespace);
                debug!(id = %id, namespace = %spec.namespace, "served from dedup cache");
                self.emit(Event::new(None, &id, &spec.namespace, EventKind::Deduplicated));
                return Ok(Admission::Ready(Ok(value)));
            }

            if let Some(record) = state
                .records
                .values_mut()
                .find(|r| {
                    r.id == id
                        && r.spec.namespace == spec.namespace
                        && r.accepts_coalescing(result_type)
                })
            {
                let (tx, rx) = oneshot::channel();
                record.waiters.push(tx);
                let ticket = record.ticket;
                state.metrics.record_deduplicated(&spec.namespace);
                debug!(id = %id, ticket = %ticket, "attached to in-flight request");
                self.emit(Event::new(
                    Some(ticket),
                    &id,
                    &spec.namespace,
                    EventKind::Deduplicated,
                ));
                return Ok(Admission::Waiting(ticket, rx));
            }
        }

        let breaker_key = self.config.breaker_scope.key(&spec.namespace);
        if let Some(retry_after) = state
            .breakers
            .get(breaker_key)
            .filter(|b| b.is_open(now))
            .map(|b| b.retry_after(now))
        {
            state.metrics.record_circuit_rejection();
            warn!(id = %id, namespace = %spec.namespace, ?retry_after, "circuit open, rejecting request");
            self.emit(Event::new(None, &id, &spec.namespace, EventKind::CircuitRejected));
            return Err(RequestError::CircuitOpen {
                namespace: spec.namespace,
                retry_after,
            });
        }

        let (tx, rx) = oneshot::channel();
        let record = RequestRecord::new(id, spec, task, result_type, tx);
        let ticket = record.ticket;
        debug!(
            id = %record.id,
            namespace = %record.spec.namespace,
            ticket = %ticket,
            priority = ?record.priority,
            "request enqueued"
        );
        self.emit(Event::new(
            Some(ticket),
            &record.id,
            &record.spec.namespace,
            EventKind::Enqueued,
        ));
        state.queue.enqueue(QueuedTicket {
            ticket,
            priority: record.priority,
        });
        state.records.insert(ticket, record);

        self.pump(&mut state);
        Ok(Admission::Waiting(ticket, rx))
    }

    fn cancel_where(self: &Arc<Self>, pred: impl Fn(&RequestRecord) -> bool) -> usize {
        let mut state = self.lock();
        let tickets: HashSet<TicketId> = state
            .records
            .values()
            .filter(|r| pred(r))
            .map(|r| r.ticket)
            .collect();
        if tickets.is_empty() {
            return 0;
        }

        // Pending entries leave the queue now; backoff heap entries are
        // skipped lazily once their record is gone. Active tickets keep their
        // slot until the aborted attempt returns.
        state.queue.drain_where(|q| tickets.contains(&q.ticket));
        for ticket in &tickets {
            let Some(mut record) = state.records.remove(ticket) else {
                continue;
            };
            record.mark_cancelled();
            state.metrics.record_cancelled(&record.spec.namespace);
            debug!(id = %record.id, ticket = %ticket, "request cancelled");
            self.emit(Event::new(
                Some(*ticket),
                &record.id,
                &record.spec.namespace,
                EventKind::Cancelled,
            ));
            let id = record.id.clone();
            record.resolve(Err(RequestError::Cancelled { id }));
        }

        self.pump(&mut state);
        tickets.len()
    }
}
