//! Submission handles and batch items.

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;

use super::{Admission, Orchestrator};
use crate::domain::{Priority, RequestOptions, TicketId};
use crate::error::{RequestError, TaskError};
use crate::queue::record::Outcome;
use crate::task::{AbortSignal, DynTask, Task, TypedTask, downcast};

/// Pending result of a submitted request.
///
/// Dropping the handle does not cancel the request; use
/// [`Orchestrator::cancel`] for that.
pub struct RequestHandle<T> {
    id: String,
    ticket: Option<TicketId>,
    state: HandleState,
    _marker: PhantomData<fn() -> T>,
}

enum HandleState {
    Ready(Outcome),
    Waiting(oneshot::Receiver<Outcome>),
}

impl<T> RequestHandle<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(id: String, admission: Admission) -> Self {
        let (ticket, state) = match admission {
            Admission::Ready(outcome) => (None, HandleState::Ready(outcome)),
            Admission::Waiting(ticket, rx) => (Some(ticket), HandleState::Waiting(rx)),
        };
        Self {
            id,
            ticket,
            state,
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Ticket of the underlying execution. `None` when served from the
    /// dedup cache.
    pub fn ticket(&self) -> Option<TicketId> {
        self.ticket
    }

    pub async fn wait(self) -> Result<T, RequestError> {
        let outcome = match self.state {
            HandleState::Ready(outcome) => outcome,
            HandleState::Waiting(rx) => rx
                .await
                .unwrap_or_else(|_| Err(RequestError::Closed { id: self.id.clone() })),
        };
        let value = outcome?;
        // coalescing and cache hits both check the result type first
        downcast::<T>(&value).ok_or_else(|| RequestError::Failed {
            id: self.id.clone(),
            attempts: 0,
            elapsed: Duration::ZERO,
            retriable: false,
            source: TaskError::other("result type mismatch"),
        })
    }
}

impl<T> fmt::Debug for RequestHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestHandle")
            .field("id", &self.id)
            .field("ticket", &self.ticket)
            .field(
                "ready",
                &matches!(self.state, HandleState::Ready(_)),
            )
            .finish()
    }
}

/// One entry of [`Orchestrator::batch`].
pub struct BatchItem<T> {
    id: String,
    task: Arc<dyn DynTask>,
    options: RequestOptions,
    _marker: PhantomData<fn() -> T>,
}

impl<T> BatchItem<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new<F, Fut>(id: impl Into<String>, task: F) -> Self
    where
        F: Fn(AbortSignal) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
    {
        Self::from_task(id, task)
    }

    pub fn from_task<K: Task<T>>(id: impl Into<String>, task: K) -> Self {
        Self {
            id: id.into(),
            task: TypedTask::<T, K>::erase(task),
            options: RequestOptions::default(),
            _marker: PhantomData,
        }
    }

    /// Per-item options. Priority is always forced to `High`.
    pub fn options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    pub(crate) fn submit_high(
        self,
        orchestrator: &Orchestrator,
        defaults: &RequestOptions,
    ) -> Result<RequestHandle<T>, RequestError> {
        let options = self.options.or(defaults).priority(Priority::High);
        orchestrator.submit_erased(self.id, self.task, &options)
    }

    pub(crate) fn scoped(mut self, namespace: &str, defaults: &RequestOptions) -> Self {
        self.options = self.options.namespace(namespace).or(defaults);
        self
    }
}
