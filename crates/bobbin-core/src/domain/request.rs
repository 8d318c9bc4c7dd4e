//! Request model: priority, per-request options, lifecycle status.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::OrchestratorConfig;
use crate::error::RequestError;

/// Queue priority tier. Ordered `Low < Normal < High`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

/// Request lifecycle state.
///
/// State transitions:
/// - Pending -> Active -> Completed
/// - Pending -> Active -> Backoff -> Pending (retry, priority bumped to High)
/// - Pending -> Active -> Failed
/// - Pending | Active | Backoff -> Cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Waiting in the priority queue.
    Pending,
    /// Dispatched; an attempt is running.
    Active,
    /// Failed a retriable attempt; waiting out the backoff delay.
    Backoff,
    Completed,
    Failed,
    Cancelled,
}

impl RequestStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestStatus::Completed | RequestStatus::Failed | RequestStatus::Cancelled
        )
    }
}

/// Caller-facing options. Unset fields fall back to the orchestrator config
/// (or to a scoped client's defaults).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestOptions {
    pub priority: Option<Priority>,
    pub namespace: Option<String>,
    pub timeout: Option<Duration>,
    pub retry_attempts: Option<u32>,
    pub deduplicate: Option<bool>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = Some(attempts);
        self
    }

    pub fn deduplicate(mut self, deduplicate: bool) -> Self {
        self.deduplicate = Some(deduplicate);
        self
    }

    /// Fill unset fields from `defaults`.
    pub fn or(self, defaults: &RequestOptions) -> Self {
        Self {
            priority: self.priority.or(defaults.priority),
            namespace: self.namespace.or_else(|| defaults.namespace.clone()),
            timeout: self.timeout.or(defaults.timeout),
            retry_attempts: self.retry_attempts.or(defaults.retry_attempts),
            deduplicate: self.deduplicate.or(defaults.deduplicate),
        }
    }

    /// Validate and resolve against the orchestrator configuration.
    pub fn resolve(&self, config: &OrchestratorConfig) -> Result<RequestSpec, RequestError> {
        let timeout = self.timeout.unwrap_or_else(|| config.request_timeout());
        if timeout.is_zero() {
            return Err(RequestError::InvalidOptions(
                "timeout must be positive".to_string(),
            ));
        }

        let namespace = match self.namespace.as_deref().map(str::trim) {
            Some("") | None => config.default_namespace.clone(),
            Some(ns) => ns.to_string(),
        };

        Ok(RequestSpec {
            priority: self.priority.unwrap_or_default(),
            namespace,
            timeout,
            // at least one attempt always runs
            max_attempts: self.retry_attempts.unwrap_or(config.retry_attempts).max(1),
            deduplicate: self.deduplicate.unwrap_or(true),
        })
    }
}

/// Fully resolved options of a submitted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSpec {
    pub priority: Priority,
    pub namespace: String,
    pub timeout: Duration,
    /// Attempts allowed before terminal failure (`retry_attempts`).
    pub max_attempts: u32,
    pub deduplicate: bool,
}
