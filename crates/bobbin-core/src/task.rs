//! Task seam: what the orchestrator runs.
//!
//! # 学習ポイント
//! - ジェネリック trait (`Task<T>`) と closure への blanket impl
//! - Object-safe trait (`DynTask`) による type erasure
//!   (`TypedTask<T, K>` → `Arc<dyn DynTask>`)
//!
//! Results cross the erased boundary as `Arc<dyn Any + Send + Sync>` and are
//! downcast back to `T` by the submitter. This is what lets one orchestrator
//! (one queue, one breaker, one limiter) serve requests of different result
//! types.

use std::any::Any;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::TaskError;

/// Type-erased task result.
pub type SharedValue = Arc<dyn Any + Send + Sync>;

/// Create a linked abort handle/signal pair. One pair is created per attempt.
pub fn abort_pair() -> (AbortHandle, AbortSignal) {
    let (tx, rx) = watch::channel(false);
    (AbortHandle { tx }, AbortSignal { rx })
}

/// Triggers the paired [`AbortSignal`].
#[derive(Debug)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl AbortHandle {
    pub fn abort(&self) {
        // send_replace: no error even when every signal is already dropped
        self.tx.send_replace(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Cooperative cancellation signal handed to tasks.
///
/// A task that ignores it still gets its future dropped by the executor on
/// abort or timeout, but work it spawned elsewhere keeps running.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
}

impl AbortSignal {
    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the signal fires. Never resolves if the handle is
    /// dropped without aborting.
    pub async fn aborted(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// An asynchronous operation producing `T`.
///
/// Implemented for any `Fn(AbortSignal) -> impl Future<Output = Result<T, TaskError>>`,
/// so most callers pass a closure:
///
/// ```ignore
/// orchestrator.execute("balance", |_signal| async { fetch_balance().await }, opts).await?;
/// ```
#[async_trait]
pub trait Task<T: Send + 'static>: Send + Sync + 'static {
    async fn run(&self, signal: AbortSignal) -> Result<T, TaskError>;
}

#[async_trait]
impl<T, F, Fut> Task<T> for F
where
    T: Send + 'static,
    F: Fn(AbortSignal) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
{
    async fn run(&self, signal: AbortSignal) -> Result<T, TaskError> {
        (self)(signal).await
    }
}

/// Object-safe view of a [`Task`], used inside the orchestrator.
#[async_trait]
pub(crate) trait DynTask: Send + Sync {
    async fn run_dyn(&self, signal: AbortSignal) -> Result<SharedValue, TaskError>;
}

pub(crate) struct TypedTask<T, K> {
    task: K,
    _marker: PhantomData<fn() -> T>,
}

impl<T, K> TypedTask<T, K>
where
    T: Send + Sync + 'static,
    K: Task<T>,
{
    pub(crate) fn erase(task: K) -> Arc<dyn DynTask> {
        Arc::new(Self {
            task,
            _marker: PhantomData,
        })
    }
}

#[async_trait]
impl<T, K> DynTask for TypedTask<T, K>
where
    T: Send + Sync + 'static,
    K: Task<T>,
{
    async fn run_dyn(&self, signal: AbortSignal) -> Result<SharedValue, TaskError> {
        let value = self.task.run(signal).await?;
        Ok(Arc::new(value))
    }
}

/// Recover a typed result from an erased one.
pub(crate) fn downcast<T: Clone + 'static>(value: &SharedValue) -> Option<T> {
    (**value).downcast_ref::<T>().cloned()
}
