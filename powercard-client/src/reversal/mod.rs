//! Offline reversal handling
//!
//! A reversal that cannot reach the host is written to a durable FIFO and
//! retried by a background worker until the host gives a terminal answer.

pub mod queue;
pub mod service;
pub mod worker;

pub use queue::{QUEUE_KEY, ReversalQueue, ReversalRecord};
pub use service::{HOST_DOWN_REVERSAL_QUEUED, ReversalOutcome, ReversalService};
pub use worker::{
    PENDING_REVERSAL_APPROVED, ReversalWorker, TERMINAL_RESPONSE_CODES, TickReport, WorkerEvent,
    WorkerHandle, WorkerSettings, is_terminal_response,
};
