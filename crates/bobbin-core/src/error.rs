use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error produced by a caller-supplied task (or by the executor on its behalf).
///
/// Classification into retriable / terminal / overload lives in
/// [`crate::domain::ErrorClassifier`]; this type only carries what happened.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// The transport answered with an HTTP-like status code.
    #[error("status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    /// The attempt exceeded its per-attempt timeout.
    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),

    /// The attempt observed its abort signal.
    #[error("aborted")]
    Aborted,

    /// The task panicked. The panic is contained to its attempt.
    #[error("task panicked: {0}")]
    Panicked(String),

    #[error("{0}")]
    Other(String),
}

impl TaskError {
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }

    /// Status code, if the failure carried one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Coarse error category for callers that build user-facing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Retry budget was spent on transient failures.
    Transient,
    /// Failed with an error that retrying cannot fix (401/403, ...).
    Terminal,
    Cancelled,
    /// Rejected at admission by an open circuit breaker.
    CircuitOpen,
    Invalid,
}

/// Error returned to the submitter of a request.
///
/// `Clone` because coalesced submitters all receive the same outcome.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RequestError {
    #[error("circuit breaker open for `{namespace}`; retry after {retry_after:?}")]
    CircuitOpen {
        namespace: String,
        retry_after: Duration,
    },

    #[error("request `{id}` was cancelled")]
    Cancelled { id: String },

    #[error("request `{id}` failed after {attempts} attempt(s) in {elapsed:?}: {source}")]
    Failed {
        id: String,
        attempts: u32,
        elapsed: Duration,
        retriable: bool,
        #[source]
        source: TaskError,
    },

    #[error("invalid request options: {0}")]
    InvalidOptions(String),

    #[error("request `{id}` was dropped before it completed")]
    Closed { id: String },
}

impl RequestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Self::Cancelled { .. } | Self::Closed { .. } => ErrorKind::Cancelled,
            Self::Failed { retriable: true, .. } => ErrorKind::Transient,
            Self::Failed { .. } => ErrorKind::Terminal,
            Self::InvalidOptions(_) => ErrorKind::Invalid,
        }
    }

    /// Attempts made before the request gave up (0 if it never ran).
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Failed { attempts, .. } => *attempts,
            _ => 0,
        }
    }

    /// The task's own error for terminal failures.
    pub fn task_error(&self) -> Option<&TaskError> {
        match self {
            Self::Failed { source, .. } => Some(source),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("invalid value for {var}: {value:?}")]
    Env { var: String, value: String },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),
}
