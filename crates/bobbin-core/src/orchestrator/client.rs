//! Namespaced view over a shared orchestrator.

use std::future::Future;

use super::{BatchItem, Orchestrator, RequestHandle, Status};
use crate::domain::RequestOptions;
use crate::error::{RequestError, TaskError};
use crate::metrics::Counters;
use crate::task::{AbortSignal, Task};

/// Client bound to one namespace.
///
/// Requests always carry the client's namespace; other unset options fall
/// back to the client's defaults, then to the orchestrator config. The
/// queue, limiter, breaker and dedup cache stay shared with every other
/// client of the same orchestrator.
#[derive(Clone)]
pub struct ScopedClient {
    orchestrator: Orchestrator,
    namespace: String,
    defaults: RequestOptions,
}

impl ScopedClient {
    pub(crate) fn new(orchestrator: Orchestrator, namespace: String, defaults: RequestOptions) -> Self {
        Self {
            orchestrator,
            namespace,
            defaults,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn scoped(&self, options: RequestOptions) -> RequestOptions {
        options.namespace(self.namespace.clone()).or(&self.defaults)
    }

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
        self.orchestrator
            .execute(id, task, self.scoped(options))
            .await
    }

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
        self.orchestrator.submit(id, task, self.scoped(options))
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
        self.orchestrator.submit_task(id, task, self.scoped(options))
    }

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
        self.orchestrator
            .execute_task(id, task, self.scoped(options))
            .await
    }

    pub async fn batch<T>(&self, items: Vec<BatchItem<T>>) -> Result<Vec<T>, RequestError>
    where
        T: Clone + Send + Sync + 'static,
    {
        let items = items
            .into_iter()
            .map(|item| item.scoped(&self.namespace, &self.defaults))
            .collect();
        self.orchestrator.batch(items).await
    }

    pub async fn batch_settled<T>(&self, items: Vec<BatchItem<T>>) -> Vec<Result<T, RequestError>>
    where
        T: Clone + Send + Sync + 'static,
    {
        let items = items
            .into_iter()
            .map(|item| item.scoped(&self.namespace, &self.defaults))
            .collect();
        self.orchestrator.batch_settled(items).await
    }

    /// Cancel requests with this id, only within this namespace.
    pub fn cancel(&self, id: &str) -> bool {
        self.orchestrator
            .inner
            .cancel_where(|r| r.id == id && r.spec.namespace == self.namespace)
            > 0
    }

    /// Cancel everything in this namespace.
    pub fn cancel_all(&self) -> usize {
        self.orchestrator.cancel_all(Some(&self.namespace))
    }

    /// Snapshot of the shared orchestrator.
    pub fn status(&self) -> Status {
        self.orchestrator.status()
    }

    /// This namespace's counters.
    pub fn metrics(&self) -> Counters {
        self.orchestrator.namespace_counters(&self.namespace)
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }
}
