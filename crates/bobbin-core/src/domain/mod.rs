//! Domain model (ids, request options, classification, events).

pub mod classify;
pub mod events;
pub mod ids;
pub mod request;

pub use classify::{DefaultClassifier, ErrorClassifier, FailureClass};
pub use events::{Event, EventKind};
pub use ids::{Id, IdMarker, TicketId};
pub use request::{Priority, RequestOptions, RequestSpec, RequestStatus};
