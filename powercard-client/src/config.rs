//! Terminal configuration

use powercard_core::encoding::is_digits;
use powercard_core::{PowerCardError, PowerCardResult};
use powercard_session::{FramerSettings, PowerCardHeader};
use powercard_transport::TcpSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::RetryPolicy;
use crate::reversal::WorkerSettings;

/// Complete terminal configuration, stored as JSON
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TerminalConfig {
    pub terminal: TerminalSection,
    pub host: HostSection,
    pub reversal: ReversalSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalSection {
    /// 8-character terminal id (DE41)
    pub terminal_id: String,
    /// 15-character merchant id (DE42)
    pub merchant_id: String,
}

impl Default for TerminalSection {
    fn default() -> Self {
        Self {
            terminal_id: "00000001".to_string(),
            merchant_id: "000000000000001".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostSection {
    pub host: String,
    pub port: u16,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    /// Four BCD digits
    pub tpdu_destination: String,
    pub product_spec: char,
    pub verify_crc: bool,
}

impl Default for HostSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            connect_timeout_ms: 30_000,
            read_timeout_ms: 30_000,
            tpdu_destination: "0000".to_string(),
            product_spec: '6',
            verify_crc: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReversalSection {
    /// Directory of the file-backed queue store
    pub storage_dir: PathBuf,
    pub batch_size: usize,
    /// Delay between two sends within one tick
    pub pacing_ms: u64,
    pub tick_interval_secs: u64,
    pub max_backoff_secs: u64,
    /// Send an echo test every N ticks; 0 disables it
    pub echo_every_ticks: u32,
}

impl Default for ReversalSection {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("powercard-data"),
            batch_size: 10,
            pacing_ms: 1000,
            tick_interval_secs: 30,
            max_backoff_secs: 300,
            echo_every_ticks: 0,
        }
    }
}

impl TerminalConfig {
    /// Load configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> PowerCardResult<Self> {
        let path = path.as_ref();
        log::info!("Loading terminal configuration from: {}", path.display());

        if !path.exists() {
            return Err(PowerCardError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| PowerCardError::Config(format!("Failed to read config file: {}", e)))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| PowerCardError::Config(format!("JSON parse error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration as pretty-printed JSON
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> PowerCardResult<()> {
        let path = path.as_ref();
        log::info!("Saving terminal configuration to: {}", path.display());

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| PowerCardError::Config(format!("JSON serialize error: {}", e)))?;
        std::fs::write(path, content)
            .map_err(|e| PowerCardError::Config(format!("Failed to write config file: {}", e)))?;
        Ok(())
    }

    pub fn validate(&self) -> PowerCardResult<()> {
        if self.terminal.terminal_id.chars().count() != 8 {
            return Err(PowerCardError::Config(format!(
                "Terminal id must be 8 characters, got {:?}",
                self.terminal.terminal_id
            )));
        }
        if self.host.host.trim().is_empty() {
            return Err(PowerCardError::Config("Host must not be empty".to_string()));
        }
        if self.host.port == 0 {
            return Err(PowerCardError::Config("Port must be greater than 0".to_string()));
        }
        if self.host.tpdu_destination.len() != 4 || !is_digits(&self.host.tpdu_destination) {
            return Err(PowerCardError::Config(format!(
                "TPDU destination must be 4 digits, got {:?}",
                self.host.tpdu_destination
            )));
        }
        if !matches!(self.host.product_spec, '6' | '7' | '8') {
            return Err(PowerCardError::Config(format!(
                "Product spec must be 6, 7 or 8, got {:?}",
                self.host.product_spec
            )));
        }
        if self.reversal.batch_size == 0 {
            return Err(PowerCardError::Config("Batch size must be greater than 0".to_string()));
        }
        if self.reversal.tick_interval_secs == 0 {
            return Err(PowerCardError::Config("Tick interval must be greater than 0".to_string()));
        }
        Ok(())
    }

    pub fn tcp_settings(&self) -> TcpSettings {
        TcpSettings::with_timeouts(
            self.host.host.clone(),
            self.host.port,
            Duration::from_millis(self.host.connect_timeout_ms),
            Duration::from_millis(self.host.read_timeout_ms),
        )
    }

    pub fn framer_settings(&self) -> PowerCardResult<FramerSettings> {
        FramerSettings::new(&self.host.tpdu_destination, &self.terminal.terminal_id)
    }

    pub fn powercard_header(&self) -> PowerCardResult<PowerCardHeader> {
        PowerCardHeader::new(self.host.product_spec)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_secs(self.reversal.tick_interval_secs),
            Duration::from_secs(self.reversal.max_backoff_secs),
        )
    }

    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            batch_size: self.reversal.batch_size,
            pacing: Duration::from_millis(self.reversal.pacing_ms),
            echo_every_ticks: self.reversal.echo_every_ticks,
        }
    }
}
