//! Background delivery of queued reversals

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, mpsc, watch};
use tokio::task::JoinHandle;

use super::queue::{ReversalQueue, ReversalRecord};
use crate::host::{ECHO_TEST, HostApi};
use crate::retry::RetryPolicy;
use crate::store::KeyValueStore;

/// Response codes that settle a queued reversal
///
/// `00` approved, `94` already reversed, `12` permanently rejected.
pub const TERMINAL_RESPONSE_CODES: [&str; 3] = ["00", "94", "12"];

/// Text shown when a queued reversal goes through
pub const PENDING_REVERSAL_APPROVED: &str = "Pending reversal approved";

pub fn is_terminal_response(code: &str) -> bool {
    TERMINAL_RESPONSE_CODES.contains(&code)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    /// Records attempted per tick
    pub batch_size: usize,
    /// Delay between two sends within one tick
    pub pacing: Duration,
    /// Echo test every N ticks; 0 disables it
    pub echo_every_ticks: u32,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            batch_size: 10,
            pacing: Duration::from_secs(1),
            echo_every_ticks: 0,
        }
    }
}

/// What one tick did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub attempted: usize,
    /// Removed after a terminal response code
    pub resolved: usize,
    /// Answered with a retryable code
    pub declined: usize,
    /// No definitive answer
    pub failed: usize,
}

impl TickReport {
    pub fn retained(&self) -> usize {
        self.declined + self.failed
    }

    /// Something was sent and nothing came back
    pub fn host_unreachable(&self) -> bool {
        self.attempted > 0 && self.resolved + self.declined == 0
    }
}

/// Notifications for the terminal UI
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    PendingReversalApproved { rrn: String },
    /// Settled by a terminal code other than approval
    PendingReversalClosed { rrn: String, response_code: String },
}

impl WorkerEvent {
    pub fn user_message(&self) -> String {
        match self {
            WorkerEvent::PendingReversalApproved { .. } => PENDING_REVERSAL_APPROVED.to_string(),
            WorkerEvent::PendingReversalClosed { response_code, .. } => {
                format!("Pending reversal closed by host ({})", response_code)
            }
        }
    }
}

/// Retries queued reversals against the host
pub struct ReversalWorker<H: HostApi, S: KeyValueStore> {
    host: Arc<H>,
    queue: Arc<ReversalQueue<S>>,
    settings: WorkerSettings,
    policy: RetryPolicy,
    wake: Arc<Notify>,
    events: Option<mpsc::UnboundedSender<WorkerEvent>>,
}

impl<H: HostApi + 'static, S: KeyValueStore + 'static> ReversalWorker<H, S> {
    pub fn new(host: Arc<H>, queue: Arc<ReversalQueue<S>>, settings: WorkerSettings, policy: RetryPolicy) -> Self {
        Self {
            host,
            queue,
            settings,
            policy,
            wake: Arc::new(Notify::new()),
            events: None,
        }
    }

    /// Send [`WorkerEvent`]s to `events`
    pub fn with_events(mut self, events: mpsc::UnboundedSender<WorkerEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn queue(&self) -> &Arc<ReversalQueue<S>> {
        &self.queue
    }

    /// Cut the current sleep short, e.g. when connectivity comes back
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    fn emit(&self, event: WorkerEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    /// Attempt one batch from the head of the queue
    ///
    /// A record leaves the queue only after a terminal response code. A
    /// failure on one record never stops the rest of the batch.
    pub async fn tick(&self) -> TickReport {
        let mut report = TickReport::default();
        let batch = match self.queue.batch(self.settings.batch_size) {
            Ok(batch) => batch,
            Err(e) => {
                log::error!("Cannot read reversal queue: {}", e);
                return report;
            }
        };
        if batch.is_empty() {
            return report;
        }
        log::debug!("Retrying {} pending reversal(s)", batch.len());

        for (index, record) in batch.iter().enumerate() {
            if index > 0 && !self.settings.pacing.is_zero() {
                tokio::time::sleep(self.settings.pacing).await;
            }
            report.attempted += 1;
            self.attempt(record, &mut report).await;
        }

        log::info!(
            "Reversal tick: {} attempted, {} resolved, {} retained",
            report.attempted,
            report.resolved,
            report.retained()
        );
        report
    }

    async fn attempt(&self, record: &ReversalRecord, report: &mut TickReport) {
        match self.host.reverse_transaction(&record.to_request()).await {
            Ok(reply) if is_terminal_response(&reply.response_code) => {
                match self.queue.remove(record) {
                    Ok(true) => {}
                    Ok(false) => log::warn!("Reversal {} already left the queue", record.describe()),
                    Err(e) => {
                        // the host has it; a later tick resends and gets 94
                        log::error!("Failed to dequeue settled reversal {}: {}", record.describe(), e);
                    }
                }
                report.resolved += 1;
                if reply.approved {
                    log::info!("{}: {}", PENDING_REVERSAL_APPROVED, record.describe());
                    self.emit(WorkerEvent::PendingReversalApproved { rrn: record.rrn.clone() });
                } else {
                    log::warn!(
                        "Reversal {} closed with {} ({})",
                        record.describe(),
                        reply.response_code,
                        reply.response_message
                    );
                    self.emit(WorkerEvent::PendingReversalClosed {
                        rrn: record.rrn.clone(),
                        response_code: reply.response_code,
                    });
                }
            }
            Ok(reply) => {
                report.declined += 1;
                log::warn!(
                    "Reversal {} declined with {} ({}); will retry",
                    record.describe(),
                    reply.response_code,
                    reply.response_message
                );
            }
            Err(e) => {
                report.failed += 1;
                log::warn!("Reversal {} not delivered: {}", record.describe(), e);
            }
        }
    }

    async fn echo(&self) {
        match self.host.network_management(ECHO_TEST).await {
            Ok(response) if response.success => log::debug!(
                "Echo test ok, host time {}",
                response.transmission_time.as_deref().unwrap_or("unknown")
            ),
            Ok(response) => log::warn!("Echo test answered {:?}", response.action_code),
            Err(e) => log::warn!("Echo test failed: {}", e),
        }
    }

    /// Tick until `shutdown` turns true or its sender is dropped
    ///
    /// Shutdown is observed between ticks and during the sleep; a tick
    /// already running is allowed to finish.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        log::info!("Reversal worker started");
        let mut unreachable_ticks: u32 = 0;
        let mut ticks: u64 = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }
            let report = self.tick().await;
            ticks += 1;
            if self.settings.echo_every_ticks > 0 && ticks % u64::from(self.settings.echo_every_ticks) == 0 {
                self.echo().await;
            }

            if report.host_unreachable() {
                unreachable_ticks = unreachable_ticks.saturating_add(1);
            } else if report.attempted > 0 {
                unreachable_ticks = 0;
            }
            let delay = self.policy.delay_for(unreachable_ticks);

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.wake.notified() => {
                    log::debug!("Reversal worker woken early");
                    unreachable_ticks = 0;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        log::info!("Reversal worker stopped");
    }

    /// Run the loop on a tokio task
    pub fn spawn(self: Arc<Self>) -> WorkerHandle {
        let (shutdown, receiver) = watch::channel(false);
        let wake = self.wake.clone();
        let task = tokio::spawn(self.run(receiver));
        WorkerHandle { shutdown, wake, task }
    }
}

/// Handle to a spawned [`ReversalWorker`] loop
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: watch::Sender<bool>,
    wake: Arc<Notify>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    /// Stop scheduling ticks and wait for the loop to exit
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            log::error!("Reversal worker task failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostReply;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use powercard_core::{PowerCardError, PowerCardResult};
    use powercard_iso::{AuthorizationRequest, Mti, NetworkManagementResponse, ReversalRequest};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Host that answers reversals per RRN; RRNs without an entry time out
    #[derive(Default)]
    struct ScriptedHost {
        codes: Mutex<HashMap<String, String>>,
        sent: Mutex<Vec<String>>,
        echoes: AtomicUsize,
    }

    impl ScriptedHost {
        fn answer(&self, rrn: &str, code: &str) {
            self.codes.lock().unwrap().insert(rrn.to_string(), code.to_string());
        }

        fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HostApi for ScriptedHost {
        async fn authorize(&self, _request: &AuthorizationRequest) -> PowerCardResult<HostReply> {
            Err(PowerCardError::NotConnected)
        }

        async fn reverse_transaction(&self, request: &ReversalRequest) -> PowerCardResult<HostReply> {
            self.sent.lock().unwrap().push(request.rrn.clone());
            match self.codes.lock().unwrap().get(&request.rrn) {
                Some(code) => Ok(HostReply::from_code(code)),
                None => Err(PowerCardError::Timeout("no answer".to_string())),
            }
        }

        async fn network_management(&self, function_code: &str) -> PowerCardResult<NetworkManagementResponse> {
            self.echoes.fetch_add(1, Ordering::SeqCst);
            Ok(NetworkManagementResponse {
                mti: Mti::NetworkManagementResponse,
                function_code: Some(function_code.to_string()),
                action_code: Some("800".to_string()),
                rrn: None,
                transmission_time: None,
                success: true,
            })
        }
    }

    fn settings() -> WorkerSettings {
        WorkerSettings {
            batch_size: 10,
            pacing: Duration::ZERO,
            echo_every_ticks: 0,
        }
    }

    fn worker(host: Arc<ScriptedHost>, settings: WorkerSettings) -> ReversalWorker<ScriptedHost, MemoryStore> {
        let queue = Arc::new(ReversalQueue::new(MemoryStore::new()));
        ReversalWorker::new(host, queue, settings, RetryPolicy::default())
    }

    fn pending(worker: &ReversalWorker<ScriptedHost, MemoryStore>) -> Vec<String> {
        worker.queue().load().unwrap().into_iter().map(|r| r.rrn).collect()
    }

    #[tokio::test]
    async fn test_approved_reversal_is_removed() {
        let host = Arc::new(ScriptedHost::default());
        host.answer("RRN1", "00");
        let worker = worker(host.clone(), settings());
        worker.queue().add(ReversalRecord::new("RRN1", 100, "840")).unwrap();

        let report = worker.tick().await;
        assert_eq!(report.resolved, 1);
        assert!(pending(&worker).is_empty());
    }

    #[tokio::test]
    async fn test_generic_decline_is_retained() {
        let host = Arc::new(ScriptedHost::default());
        host.answer("RRN1", "05");
        let worker = worker(host, settings());
        worker.queue().add(ReversalRecord::new("RRN1", 100, "840")).unwrap();

        let report = worker.tick().await;
        assert_eq!(report.declined, 1);
        assert!(!report.host_unreachable());
        assert_eq!(pending(&worker), vec!["RRN1"]);
    }

    #[tokio::test]
    async fn test_transport_failure_is_retained() {
        let host = Arc::new(ScriptedHost::default());
        let worker = worker(host, settings());
        worker.queue().add(ReversalRecord::new("RRN1", 100, "840")).unwrap();

        let report = worker.tick().await;
        assert_eq!(report.failed, 1);
        assert!(report.host_unreachable());
        assert_eq!(pending(&worker), vec!["RRN1"]);
    }

    #[tokio::test]
    async fn test_permanent_codes_are_removed() {
        let host = Arc::new(ScriptedHost::default());
        host.answer("DUP", "94");
        host.answer("BAD", "12");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let worker = worker(host, settings()).with_events(tx);
        worker.queue().add(ReversalRecord::new("DUP", 100, "840")).unwrap();
        worker.queue().add(ReversalRecord::new("BAD", 100, "840")).unwrap();

        let report = worker.tick().await;
        assert_eq!(report.resolved, 2);
        assert!(pending(&worker).is_empty());
        assert!(matches!(rx.recv().await, Some(WorkerEvent::PendingReversalClosed { .. })));
    }

    #[tokio::test]
    async fn test_batch_continues_past_failures_in_order() {
        let host = Arc::new(ScriptedHost::default());
        host.answer("B", "00");
        host.answer("D", "05");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let worker = worker(host.clone(), settings()).with_events(tx);
        for rrn in ["A", "B", "C", "D"] {
            worker.queue().add(ReversalRecord::new(rrn, 100, "840")).unwrap();
        }

        let report = worker.tick().await;
        assert_eq!(host.sent(), vec!["A", "B", "C", "D"]);
        assert_eq!(report.attempted, 4);
        assert_eq!(report.resolved, 1);
        assert_eq!(report.retained(), 3);
        assert_eq!(pending(&worker), vec!["A", "C", "D"]);

        let event = rx.recv().await.unwrap();
        assert_eq!(event, WorkerEvent::PendingReversalApproved { rrn: "B".to_string() });
        assert_eq!(event.user_message(), PENDING_REVERSAL_APPROVED);
    }

    #[tokio::test]
    async fn test_batch_size_bounds_a_tick() {
        let host = Arc::new(ScriptedHost::default());
        let mut settings = settings();
        settings.batch_size = 2;
        let worker = worker(host.clone(), settings);
        for rrn in ["A", "B", "C"] {
            worker.queue().add(ReversalRecord::new(rrn, 100, "840")).unwrap();
        }

        assert_eq!(worker.tick().await.attempted, 2);
        assert_eq!(host.sent(), vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_empty_queue_tick() {
        let worker = worker(Arc::new(ScriptedHost::default()), settings());
        let report = worker.tick().await;
        assert_eq!(report, TickReport::default());
        assert!(!report.host_unreachable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacing_between_sends() {
        let host = Arc::new(ScriptedHost::default());
        let mut settings = settings();
        settings.pacing = Duration::from_secs(1);
        let worker = worker(host, settings);
        for rrn in ["A", "B", "C"] {
            worker.queue().add(ReversalRecord::new(rrn, 100, "840")).unwrap();
        }

        let started = tokio::time::Instant::now();
        worker.tick().await;
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(2) && elapsed < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_loop_delivers_after_wake_and_stops() {
        let host = Arc::new(ScriptedHost::default());
        let mut settings = settings();
        settings.echo_every_ticks = 1;
        let queue = Arc::new(ReversalQueue::new(MemoryStore::new()));
        let worker = Arc::new(ReversalWorker::new(
            host.clone(),
            queue.clone(),
            settings,
            RetryPolicy::new(Duration::from_secs(3600), Duration::from_secs(3600)),
        ));
        queue.add(ReversalRecord::new("LATE", 100, "840")).unwrap();

        let handle = worker.spawn();
        // first tick fails, the loop then sleeps for an hour
        tokio::time::timeout(Duration::from_secs(5), async {
            while host.sent().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(queue.len().unwrap(), 1);

        host.answer("LATE", "00");
        handle.wake();
        tokio::time::timeout(Duration::from_secs(5), async {
            while !queue.is_empty().unwrap() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert!(host.echoes.load(Ordering::SeqCst) >= 1);

        tokio::time::timeout(Duration::from_secs(5), handle.stop()).await.unwrap();
    }
}
