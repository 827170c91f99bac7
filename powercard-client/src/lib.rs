//! PowerCARD terminal client
//!
//! Host API over ISO 8583, the offline reversal queue and its retry worker,
//! provisioning coordination and terminal configuration.
//!
//! # Usage Example
//!
//! ```rust,no_run
//! use powercard_client::{
//!     FileStore, IsoHostClient, ReversalQueue, ReversalRecord, ReversalService,
//!     ReversalWorker, TerminalConfig,
//! };
//! use std::sync::Arc;
//!
//! # async fn run() -> powercard_client::PowerCardResult<()> {
//! let config = TerminalConfig::from_file("terminal.json")?;
//! let host = Arc::new(IsoHostClient::from_config(&config)?);
//! let queue = Arc::new(ReversalQueue::new(FileStore::open(&config.reversal.storage_dir)?));
//!
//! let worker = Arc::new(ReversalWorker::new(
//!     host.clone(),
//!     queue.clone(),
//!     config.worker_settings(),
//!     config.retry_policy(),
//! ));
//! let handle = worker.spawn();
//!
//! let service = ReversalService::new(host, queue);
//! let outcome = service
//!     .reverse_or_queue(
//!         ReversalRecord::new("000000000042", 2500, "840").with_terminal(&config.terminal),
//!     )
//!     .await?;
//! println!("{}", outcome.user_message());
//!
//! handle.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod capability;
pub mod config;
pub mod host;
pub mod provisioning;
pub mod retry;
pub mod reversal;
pub mod store;

pub use capability::{CardData, IccTagSource, PaymentService, PinBlockSource};
pub use config::{HostSection, ReversalSection, TerminalConfig, TerminalSection};
pub use host::{ECHO_TEST, HostApi, HostReply, IsoHostClient, response_message};
pub use powercard_core::{PowerCardError, PowerCardResult};
pub use provisioning::{ProvisioningCoordinator, ProvisioningState, ProvisioningTicket};
pub use retry::RetryPolicy;
pub use reversal::{
    ReversalOutcome, ReversalQueue, ReversalRecord, ReversalService, ReversalWorker, TickReport,
    WorkerEvent, WorkerHandle, WorkerSettings,
};
pub use store::{FileStore, KeyValueStore, MemoryStore};
