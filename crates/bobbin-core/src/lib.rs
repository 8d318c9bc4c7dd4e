//! bobbin-core
//!
//! Client-side request orchestration: rate limiting, deduplication, circuit
//! breaking, prioritised queueing and retries with backoff, behind one
//! [`Orchestrator`] facade.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, request options, classification, events）
//! - **task**: Task trait と型消去、abort signal
//! - **limiter / dedup / breaker**: resilience components（同期・`now` 注入）
//! - **queue**: priority queue, retry policy, request record
//! - **orchestrator**: facade, admission loop, scoped client
//! - **config / error / metrics**: 設定の読み込みと検証、エラー型、カウンタ

pub mod breaker;
pub mod config;
pub mod dedup;
pub mod domain;
pub mod error;
pub mod limiter;
pub mod metrics;
pub mod orchestrator;
pub mod queue;
pub mod task;

pub use config::{OrchestratorConfig, Scope};
pub use domain::{Event, EventKind, Priority, RequestOptions, TicketId};
pub use error::{ConfigError, ErrorKind, RequestError, TaskError};
pub use metrics::{Counters, Metrics};
pub use orchestrator::{
    BatchItem, BuildError, Orchestrator, OrchestratorBuilder, RequestHandle, ScopedClient, Status,
};
pub use task::{AbortSignal, Task};
