//! Request record: the single source of truth for one submission.

use std::any::TypeId;
use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::domain::{Priority, RequestSpec, RequestStatus, TicketId};
use crate::error::RequestError;
use crate::task::{AbortHandle, DynTask, SharedValue};

pub(crate) type Outcome = Result<SharedValue, RequestError>;
pub(crate) type Waiter = oneshot::Sender<Outcome>;

/// Queue structures (ready queue, backoff heap, active set) hold `TicketId`s
/// only; every state transition happens on the record.
pub(crate) struct RequestRecord {
    pub ticket: TicketId,
    pub id: String,
    pub spec: RequestSpec,
    /// Current queue tier. Bumped to `High` on retry.
    pub priority: Priority,
    pub task: Arc<dyn DynTask>,
    /// Result type expected by the submitters; coalescing requires a match.
    pub result_type: TypeId,
    pub status: RequestStatus,
    /// Attempts started so far (including the running one).
    pub attempts: u32,
    /// Abort handle of the running attempt.
    pub abort: Option<AbortHandle>,
    pub waiters: Vec<Waiter>,
    /// Start of the request's lifetime, reported as `elapsed` on failure.
    pub created_at: Instant,
}

impl RequestRecord {
    pub fn new(
        id: String,
        spec: RequestSpec,
        task: Arc<dyn DynTask>,
        result_type: TypeId,
        waiter: Waiter,
    ) -> Self {
        Self {
            ticket: TicketId::generate(),
            id,
            priority: spec.priority,
            spec,
            task,
            result_type,
            status: RequestStatus::Pending,
            attempts: 0,
            abort: None,
            waiters: vec![waiter],
            created_at: Instant::now(),
        }
    }

    /// Whether a new submission with this id may attach to this record.
    pub fn accepts_coalescing(&self, result_type: TypeId) -> bool {
        self.spec.deduplicate && self.result_type == result_type && !self.status.is_terminal()
    }

    /// Pending -> Active.
    pub fn start_attempt(&mut self, abort: AbortHandle) {
        self.status = RequestStatus::Active;
        self.attempts += 1;
        self.abort = Some(abort);
    }

    /// Active -> Backoff. The wake-up deadline lives in the backoff heap.
    pub fn schedule_retry(&mut self) {
        self.status = RequestStatus::Backoff;
        self.abort = None;
    }

    /// Backoff -> Pending, at high priority so retries do not starve behind
    /// fresh work.
    pub fn requeue(&mut self) {
        self.status = RequestStatus::Pending;
        self.priority = Priority::High;
    }

    pub fn mark_completed(&mut self) {
        self.status = RequestStatus::Completed;
        self.abort = None;
    }

    pub fn mark_failed(&mut self) {
        self.status = RequestStatus::Failed;
        self.abort = None;
    }

    /// Any state -> Cancelled. Fires the abort signal of a running attempt.
    pub fn mark_cancelled(&mut self) {
        if let Some(abort) = self.abort.take() {
            abort.abort();
        }
        self.status = RequestStatus::Cancelled;
    }

    /// Hand the outcome to every waiter. Waiters that stopped listening are
    /// ignored.
    pub fn resolve(&mut self, outcome: Outcome) {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(outcome.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrchestratorConfig;
    use crate::domain::RequestOptions;
    use crate::error::TaskError;
    use crate::task::{AbortSignal, TypedTask, abort_pair};

    fn record(deduplicate: bool) -> (RequestRecord, oneshot::Receiver<Outcome>) {
        let spec = RequestOptions::new()
            .deduplicate(deduplicate)
            .resolve(&OrchestratorConfig::default())
            .unwrap();
        let task = TypedTask::<u32, _>::erase(|_s: AbortSignal| async { Ok::<_, TaskError>(1u32) });
        let (tx, rx) = oneshot::channel();
        (
            RequestRecord::new("r".into(), spec, task, TypeId::of::<u32>(), tx),
            rx,
        )
    }

    #[tokio::test]
    async fn retry_cycle_bumps_priority() {
        let (mut r, _rx) = record(true);
        assert_eq!(r.priority, Priority::Normal);

        let (abort, _signal) = abort_pair();
        r.start_attempt(abort);
        assert_eq!(r.status, RequestStatus::Active);
        assert_eq!(r.attempts, 1);

        r.schedule_retry();
        assert_eq!(r.status, RequestStatus::Backoff);
        assert!(r.abort.is_none());

        r.requeue();
        assert_eq!(r.status, RequestStatus::Pending);
        assert_eq!(r.priority, Priority::High);
        assert_eq!(r.attempts, 1);
    }

    #[tokio::test]
    async fn cancel_fires_abort_signal() {
        let (mut r, _rx) = record(true);
        let (abort, signal) = abort_pair();
        r.start_attempt(abort);
        r.mark_cancelled();
        assert!(signal.is_aborted());
        assert_eq!(r.status, RequestStatus::Cancelled);
    }

    #[tokio::test]
    async fn resolve_reaches_every_waiter() {
        let (mut r, rx1) = record(true);
        let (tx2, rx2) = oneshot::channel();
        r.waiters.push(tx2);

        r.resolve(Err(RequestError::Cancelled { id: "r".into() }));
        assert!(rx1.await.unwrap().unwrap_err().is_cancelled());
        assert!(rx2.await.unwrap().unwrap_err().is_cancelled());
        assert!(r.waiters.is_empty());
    }

    #[tokio::test]
    async fn coalescing_requires_dedup_and_matching_type() {
        let (r, _rx) = record(true);
        assert!(r.accepts_coalescing(TypeId::of::<u32>()));
        assert!(!r.accepts_coalescing(TypeId::of::<String>()));

        let (r, _rx) = record(false);
        assert!(!r.accepts_coalescing(TypeId::of::<u32>()));
    }
}
