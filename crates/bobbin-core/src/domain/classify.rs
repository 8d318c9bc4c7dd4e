//! Failure classification: how the executor reacts to a failed attempt.
//!
//! Classifiers are pure: they look at the error and nothing else. The retry
//! budget and backoff are applied afterwards by [`crate::queue::RetryPolicy`].

use crate::error::TaskError;

/// What a failed attempt means for the request and for the shared components.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureClass {
    /// Another attempt may succeed.
    pub retriable: bool,
    /// The backend signalled overload; the rate limiter is penalized.
    pub overload: bool,
    /// Counts toward opening the circuit breaker.
    pub trips_breaker: bool,
}

impl FailureClass {
    pub const TERMINAL: Self = Self {
        retriable: false,
        overload: false,
        trips_breaker: false,
    };
}

pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, error: &TaskError) -> FailureClass;
}

/// Default classification for HTTP-like transports.
///
/// | error | retriable | overload | trips breaker |
/// |---|---|---|---|
/// | network, timeout, 5xx | yes | no | yes |
/// | 429 | yes | yes | no |
/// | 401, 403 | no | no | no |
/// | other 4xx, other | yes | no | no |
/// | aborted, panicked | no | no | no |
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClassifier;

impl ErrorClassifier for DefaultClassifier {
    fn classify(&self, error: &TaskError) -> FailureClass {
        match error {
            TaskError::Aborted | TaskError::Panicked(_) => FailureClass::TERMINAL,
            TaskError::Status { status: 401 | 403, .. } => FailureClass::TERMINAL,
            TaskError::Status { status: 429, .. } => FailureClass {
                retriable: true,
                overload: true,
                trips_breaker: false,
            },
            TaskError::Status { status, .. } => FailureClass {
                retriable: true,
                overload: false,
                trips_breaker: *status >= 500,
            },
            TaskError::Network(_) | TaskError::Timeout(_) => FailureClass {
                retriable: true,
                overload: false,
                trips_breaker: true,
            },
            TaskError::Other(_) => FailureClass {
                retriable: true,
                overload: false,
                trips_breaker: false,
            },
        }
    }
}
