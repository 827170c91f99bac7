//! Host session statistics

/// Counters for one host session
///
/// Updated by [`crate::HostSession`] on every exchange; query them at any
/// time to judge link health.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStatistics {
    /// Requests written to the transport
    pub messages_sent: u64,
    /// Responses that unwrapped to application data
    pub messages_received: u64,
    pub timeouts: u64,
    /// Connection failures other than timeouts
    pub connection_errors: u64,
    pub crc_errors: u64,
    /// Envelope or frame violations
    pub protocol_errors: u64,
}

impl SessionStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn increment_messages_sent(&mut self) {
        self.messages_sent += 1;
    }

    pub fn increment_messages_received(&mut self) {
        self.messages_received += 1;
    }

    pub fn increment_timeouts(&mut self) {
        self.timeouts += 1;
    }

    pub fn increment_connection_errors(&mut self) {
        self.connection_errors += 1;
    }

    pub fn increment_crc_errors(&mut self) {
        self.crc_errors += 1;
    }

    pub fn increment_protocol_errors(&mut self) {
        self.protocol_errors += 1;
    }

    /// Share of sent messages that did not produce a usable response, in percent
    pub fn failure_rate(&self) -> f64 {
        if self.messages_sent == 0 {
            return 0.0;
        }
        let failed = self.messages_sent.saturating_sub(self.messages_received);
        (failed as f64 / self.messages_sent as f64) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_rate() {
        let mut stats = SessionStatistics::new();
        assert_eq!(stats.failure_rate(), 0.0);

        for _ in 0..4 {
            stats.increment_messages_sent();
        }
        for _ in 0..3 {
            stats.increment_messages_received();
        }
        stats.increment_timeouts();
        assert_eq!(stats.failure_rate(), 25.0);

        stats.clear();
        assert_eq!(stats, SessionStatistics::default());
    }
}
