//! Events emitted by an orchestrator to its subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::TicketId;

/// Something that happened to a request, or to a shared component on its
/// behalf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub at: DateTime<Utc>,
    pub ticket: Option<TicketId>,
    pub id: String,
    pub namespace: String,
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    Enqueued,
    /// Served from the dedup cache or attached to an in-flight request.
    Deduplicated,
    Started {
        attempt: u32,
    },
    Succeeded {
        attempts: u32,
        elapsed_ms: u64,
    },
    RetryScheduled {
        attempt: u32,
        delay_ms: u64,
    },
    Failed {
        attempts: u32,
        error: String,
    },
    Cancelled,
    CircuitOpened {
        scope: String,
    },
    CircuitClosed {
        scope: String,
    },
    /// Rejected because the circuit was open.
    CircuitRejected,
    RateLimitPenalized {
        delay_ms: u64,
    },
}

impl Event {
    pub fn new(
        ticket: Option<TicketId>,
        id: impl Into<String>,
        namespace: impl Into<String>,
        kind: EventKind,
    ) -> Self {
        Self {
            at: Utc::now(),
            ticket,
            id: id.into(),
            namespace: namespace.into(),
            kind,
        }
    }
}
