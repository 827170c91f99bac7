//! Durable FIFO of reversals waiting for the host

use chrono::{DateTime, Utc};
use powercard_core::encoding::{is_digits, mask_pan};
use powercard_core::{PowerCardError, PowerCardResult};
use powercard_iso::ReversalRequest;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};

use crate::config::TerminalSection;
use crate::store::KeyValueStore;

/// Store key holding the serialized queue
pub const QUEUE_KEY: &str = "pending_reversals";

/// A reversal the host has not acknowledged yet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReversalRecord {
    /// DE41 of the terminal that took the original transaction
    #[serde(default)]
    pub terminal_id: String,
    #[serde(default)]
    pub merchant_id: String,
    /// RRN of the transaction being reversed
    pub rrn: String,
    /// Amount in minor currency units
    pub amount: u64,
    pub currency_code: String,
    #[serde(default)]
    pub stan: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub pan: Option<String>,
    pub enqueue_timestamp: DateTime<Utc>,
}

impl ReversalRecord {
    pub fn new(rrn: impl Into<String>, amount: u64, currency_code: impl Into<String>) -> Self {
        Self {
            terminal_id: String::new(),
            merchant_id: String::new(),
            rrn: rrn.into(),
            amount,
            currency_code: currency_code.into(),
            stan: None,
            reason: None,
            pan: None,
            enqueue_timestamp: Utc::now(),
        }
    }

    /// Stamp the record with the terminal and merchant it belongs to
    pub fn with_terminal(mut self, terminal: &TerminalSection) -> Self {
        self.terminal_id = terminal.terminal_id.clone();
        self.merchant_id = terminal.merchant_id.clone();
        self
    }

    pub fn with_stan(mut self, stan: impl Into<String>) -> Self {
        self.stan = Some(stan.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_pan(mut self, pan: impl Into<String>) -> Self {
        self.pan = Some(pan.into());
        self
    }

    /// Reject records the 0400 builder could never encode
    pub fn validate(&self) -> PowerCardResult<()> {
        let rrn = self.rrn.trim();
        if rrn.is_empty() || rrn.len() > 12 || !rrn.is_ascii() {
            return Err(PowerCardError::InvalidData(format!(
                "RRN must be 1 to 12 ASCII characters, got {:?}",
                self.rrn
            )));
        }
        if self.currency_code.len() != 3 || !is_digits(&self.currency_code) {
            return Err(PowerCardError::InvalidData(format!(
                "Currency code must be 3 digits, got {:?}",
                self.currency_code
            )));
        }
        if self.amount > 999_999_999_999 {
            return Err(PowerCardError::InvalidData(format!(
                "Amount {} does not fit DE4",
                self.amount
            )));
        }
        Ok(())
    }

    pub fn to_request(&self) -> ReversalRequest {
        ReversalRequest {
            rrn: self.rrn.clone(),
            amount: self.amount,
            stan: self.stan.clone(),
            currency_code: self.currency_code.clone(),
            reason: self.reason.clone(),
            pan: self.pan.clone(),
        }
    }

    /// Short form for log lines; never shows the full PAN
    pub fn describe(&self) -> String {
        match &self.pan {
            Some(pan) => format!("RRN {} PAN {}", self.rrn, mask_pan(pan)),
            None => format!("RRN {}", self.rrn),
        }
    }
}

/// FIFO of [`ReversalRecord`]s persisted as one JSON list
///
/// Every mutation is a read-modify-write of the whole list under one lock,
/// so the foreground path and the background worker never lose or duplicate
/// a record between them. Order survives restarts because the list is
/// written back in order.
#[derive(Debug)]
pub struct ReversalQueue<S: KeyValueStore> {
    store: S,
    lock: Mutex<()>,
}

impl<S: KeyValueStore> ReversalQueue<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read(&self) -> PowerCardResult<Vec<ReversalRecord>> {
        match self.store.get(QUEUE_KEY)? {
            None => Ok(Vec::new()),
            Some(blob) if blob.trim().is_empty() => Ok(Vec::new()),
            Some(blob) => serde_json::from_str(&blob).map_err(|e| {
                PowerCardError::Storage(format!("Reversal queue is unreadable: {}", e))
            }),
        }
    }

    fn write(&self, records: &[ReversalRecord]) -> PowerCardResult<()> {
        if records.is_empty() {
            return self.store.remove(QUEUE_KEY);
        }
        let blob = serde_json::to_string(records)
            .map_err(|e| PowerCardError::Storage(format!("Failed to serialize reversal queue: {}", e)))?;
        self.store.put(QUEUE_KEY, &blob)
    }

    /// Append a record at the tail
    pub fn add(&self, record: ReversalRecord) -> PowerCardResult<()> {
        record.validate()?;
        let _guard = self.guard();
        let mut records = self.read()?;
        log::info!("Queueing reversal {} ({} already pending)", record.describe(), records.len());
        records.push(record);
        self.write(&records)
    }

    /// All pending records, oldest first
    pub fn load(&self) -> PowerCardResult<Vec<ReversalRecord>> {
        let _guard = self.guard();
        self.read()
    }

    /// Up to `n` records from the head
    pub fn batch(&self, n: usize) -> PowerCardResult<Vec<ReversalRecord>> {
        let mut records = self.load()?;
        records.truncate(n);
        Ok(records)
    }

    pub fn peek_first(&self) -> PowerCardResult<Option<ReversalRecord>> {
        Ok(self.load()?.into_iter().next())
    }

    /// Drop the head record; no-op when empty
    pub fn remove_first(&self) -> PowerCardResult<()> {
        let _guard = self.guard();
        let mut records = self.read()?;
        if records.is_empty() {
            return Ok(());
        }
        records.remove(0);
        self.write(&records)
    }

    /// Drop the first record equal to `record`; returns whether one was found
    pub fn remove(&self, record: &ReversalRecord) -> PowerCardResult<bool> {
        let _guard = self.guard();
        let mut records = self.read()?;
        match records.iter().position(|r| r == record) {
            Some(index) => {
                records.remove(index);
                self.write(&records)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn clear(&self) -> PowerCardResult<()> {
        let _guard = self.guard();
        self.store.remove(QUEUE_KEY)
    }

    pub fn len(&self) -> PowerCardResult<usize> {
        Ok(self.load()?.len())
    }

    pub fn is_empty(&self) -> PowerCardResult<bool> {
        Ok(self.len()? == 0)
    }
}
