//! Foreground reversal with fallback to the durable queue

use powercard_core::PowerCardResult;
use std::sync::Arc;

use super::queue::{ReversalQueue, ReversalRecord};
use crate::host::HostApi;
use crate::store::KeyValueStore;

pub const HOST_DOWN_REVERSAL_QUEUED: &str = "Host down - reversal queued";

/// Result of a foreground reversal attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReversalOutcome {
    /// The host confirmed the reversal (`00`, or `94` when it already had it)
    Approved { response_code: String },
    /// The host answered and refused
    Declined { response_code: String, message: String },
    /// The link to the host failed; the worker will deliver it
    Queued,
}

impl ReversalOutcome {
    pub fn user_message(&self) -> String {
        match self {
            ReversalOutcome::Approved { .. } => "Reversal approved".to_string(),
            ReversalOutcome::Declined { response_code, message } => {
                format!("Reversal declined: {} ({})", message, response_code)
            }
            ReversalOutcome::Queued => HOST_DOWN_REVERSAL_QUEUED.to_string(),
        }
    }
}

/// Sends a reversal now and queues it if the host does not answer
pub struct ReversalService<H: HostApi, S: KeyValueStore> {
    host: Arc<H>,
    queue: Arc<ReversalQueue<S>>,
}

impl<H: HostApi, S: KeyValueStore> ReversalService<H, S> {
    pub fn new(host: Arc<H>, queue: Arc<ReversalQueue<S>>) -> Self {
        Self { host, queue }
    }

    /// Try the host once, queueing the record when the link fails
    ///
    /// Only transport failures ([`is_transport`]) queue the record. Any
    /// other error, such as a reply that violates the protocol, is returned
    /// to the caller and nothing is queued.
    ///
    /// [`is_transport`]: powercard_core::PowerCardError::is_transport
    pub async fn reverse_or_queue(&self, record: ReversalRecord) -> PowerCardResult<ReversalOutcome> {
        record.validate()?;
        match self.host.reverse_transaction(&record.to_request()).await {
            Ok(reply) if reply.approved || reply.response_code == "94" => {
                log::info!("Reversal {} approved ({})", record.describe(), reply.response_code);
                Ok(ReversalOutcome::Approved {
                    response_code: reply.response_code,
                })
            }
            Ok(reply) => {
                log::warn!(
                    "Reversal {} declined with {} ({})",
                    record.describe(),
                    reply.response_code,
                    reply.response_message
                );
                Ok(ReversalOutcome::Declined {
                    response_code: reply.response_code,
                    message: reply.response_message,
                })
            }
            Err(e) if e.is_transport() => {
                log::warn!("Reversal {} not delivered ({}); queueing", record.describe(), e);
                self.queue.add(record)?;
                Ok(ReversalOutcome::Queued)
            }
            Err(e) => {
                log::error!("Reversal {} failed: {}", record.describe(), e);
                Err(e)
            }
        }
    }
}
