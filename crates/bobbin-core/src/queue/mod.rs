//! Queue module: priority queue, retry policy, request records.

mod priority;
pub(crate) mod record;
mod retry;

pub use priority::{Prioritized, PriorityQueue};
pub use retry::{Decision, RetryPolicy};

use std::cmp::Ordering;

use tokio::time::Instant;

use crate::domain::{Priority, TicketId};

/// Entry of the ready queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct QueuedTicket {
    pub ticket: TicketId,
    pub priority: Priority,
}

impl Prioritized for QueuedTicket {
    fn priority(&self) -> Priority {
        self.priority
    }
}

/// Entry of the backoff heap.
///
/// Reverse ordering so `BinaryHeap` acts as a min-heap (earliest first).
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ScheduledRetry {
    pub next_run_at: Instant,
    pub ticket: TicketId,
}

impl PartialOrd for ScheduledRetry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledRetry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .next_run_at
            .cmp(&self.next_run_at)
            .then_with(|| other.ticket.cmp(&self.ticket))
    }
}
