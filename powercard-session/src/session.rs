//! Request/response exchange with the host

use crate::envelope::{Envelope, PowerCardHeader};
use crate::frame::IsoFrame;
use crate::statistics::SessionStatistics;
use powercard_core::{PowerCardError, PowerCardResult};
use powercard_transport::TransportLayer;
use std::sync::Mutex;
use std::time::Duration;

/// Host session over a transport
///
/// Wraps outbound application data in an ISO frame and PowerCARD envelope,
/// sends it, and unwraps the reply back to application data. Exchanges are
/// strictly sequential; the transport serializes concurrent callers.
#[derive(Debug)]
pub struct HostSession<T: TransportLayer> {
    transport: T,
    framer: IsoFrame,
    header: PowerCardHeader,
    read_timeout: Duration,
    verify_crc: bool,
    statistics: Mutex<SessionStatistics>,
}

impl<T: TransportLayer> HostSession<T> {
    /// Create a session that verifies inbound CRCs
    pub fn new(transport: T, framer: IsoFrame, header: PowerCardHeader, read_timeout: Duration) -> Self {
        Self {
            transport,
            framer,
            header,
            read_timeout,
            verify_crc: true,
            statistics: Mutex::new(SessionStatistics::new()),
        }
    }

    pub fn with_crc_verification(mut self, verify_crc: bool) -> Self {
        self.verify_crc = verify_crc;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_connected()
    }

    /// Connect the transport if it is not connected yet
    pub async fn open(&self) -> PowerCardResult<()> {
        if !self.transport.is_connected() {
            self.transport.connect().await?;
        }
        Ok(())
    }

    pub async fn close(&self) -> PowerCardResult<()> {
        self.transport.disconnect().await
    }

    /// Snapshot of the counters
    pub fn statistics(&self) -> SessionStatistics {
        self.stats(|s| s.clone())
    }

    pub fn clear_statistics(&self) {
        self.stats(|s| s.clear());
    }

    fn stats<R>(&self, f: impl FnOnce(&mut SessionStatistics) -> R) -> R {
        let mut guard = self.statistics.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }

    /// Send one ISO 8583 message and return the host's ISO 8583 reply
    pub async fn exchange(&self, application_data: &[u8]) -> PowerCardResult<Vec<u8>> {
        if application_data.is_empty() {
            return Err(PowerCardError::InvalidData("Refusing to send an empty message".to_string()));
        }
        let frame = self.framer.wrap(application_data, None, None);
        let request = Envelope::new(self.header.clone(), frame).encode()?;

        self.stats(|s| s.increment_messages_sent());
        let wire = match self.transport.send_and_receive(&request, self.read_timeout).await {
            Ok(wire) => wire,
            Err(e) => {
                self.stats(|s| match &e {
                    PowerCardError::Timeout(_) => s.increment_timeouts(),
                    _ => s.increment_connection_errors(),
                });
                return Err(e);
            }
        };

        let response = Envelope::decode(&wire).inspect_err(|_| self.stats(|s| s.increment_protocol_errors()))?;
        if response.header().has_error() {
            log::warn!("Host reported PowerCARD error element {}", response.header().error_element());
        }

        let unwrapped = if self.verify_crc {
            IsoFrame::unwrap_verified(response.frame())
        } else {
            IsoFrame::unwrap(response.frame())
        };
        let data = match unwrapped {
            Ok(data) => data.to_vec(),
            Err(e) => {
                self.stats(|s| match &e {
                    PowerCardError::CorruptFrame { .. } => s.increment_crc_errors(),
                    _ => s.increment_protocol_errors(),
                });
                log::error!("Discarding host reply: {}", e);
                return Err(e);
            }
        };

        self.stats(|s| s.increment_messages_received());
        log::debug!("Host replied with {} bytes of application data", data.len());
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use powercard_transport::ConnectionState;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio_test::{assert_err, assert_ok};

    /// Transport that answers every request with a fixed reply
    struct CannedTransport {
        reply: PowerCardResult<Vec<u8>>,
        connected: AtomicBool,
        last_request: Mutex<Vec<u8>>,
    }

    impl CannedTransport {
        fn replying(reply: PowerCardResult<Vec<u8>>) -> Self {
            Self {
                reply,
                connected: AtomicBool::new(false),
                last_request: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TransportLayer for CannedTransport {
        async fn connect(&self) -> PowerCardResult<()> {
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn send_and_receive(&self, message: &[u8], _timeout: Duration) -> PowerCardResult<Vec<u8>> {
            *self.last_request.lock().unwrap() = message.to_vec();
            match &self.reply {
                Ok(reply) => Ok(reply.clone()),
                Err(PowerCardError::Timeout(m)) => Err(PowerCardError::Timeout(m.clone())),
                Err(_) => Err(PowerCardError::NotConnected),
            }
        }

        async fn disconnect(&self) -> PowerCardResult<()> {
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn state(&self) -> ConnectionState {
            if self.connected.load(Ordering::SeqCst) {
                ConnectionState::Connected
            } else {
                ConnectionState::Disconnected
            }
        }
    }

    fn host_reply(data: &[u8]) -> Vec<u8> {
        let frame = IsoFrame::default().wrap(data, None, None);
        Envelope::new(PowerCardHeader::new('6').unwrap(), frame).encode().unwrap()
    }

    fn session(transport: CannedTransport) -> HostSession<CannedTransport> {
        HostSession::new(
            transport,
            IsoFrame::default(),
            PowerCardHeader::new('6').unwrap(),
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn test_exchange_round_trip() {
        let session = session(CannedTransport::replying(Ok(host_reply(b"0110reply"))));
        assert_ok!(session.open().await);
        assert!(session.is_open());

        let data = assert_ok!(session.exchange(b"0100request").await);
        assert_eq!(data, b"0110reply".to_vec());

        let sent = session.transport().last_request.lock().unwrap().clone();
        let envelope = Envelope::decode(&sent).unwrap();
        assert_eq!(IsoFrame::unwrap_verified(envelope.frame()).unwrap(), b"0100request");

        let stats = session.statistics();
        assert_eq!(stats.messages_sent, 1);
        assert_eq!(stats.messages_received, 1);

        assert_ok!(session.close().await);
        assert!(!session.is_open());
    }

    #[tokio::test]
    async fn test_corrupt_reply() {
        let mut reply = host_reply(b"0110reply");
        let last = reply.len() - 1;
        reply[last] ^= 0xFF;

        let strict = session(CannedTransport::replying(Ok(reply.clone())));
        let err = assert_err!(strict.exchange(b"0100").await);
        assert!(matches!(err, PowerCardError::CorruptFrame { .. }));
        assert!(err.is_transport());
        assert_eq!(strict.statistics().crc_errors, 1);

        let lenient = session(CannedTransport::replying(Ok(reply))).with_crc_verification(false);
        assert_eq!(assert_ok!(lenient.exchange(b"0100").await), b"0110reply".to_vec());
    }

    #[tokio::test]
    async fn test_timeout_is_counted() {
        let session = session(CannedTransport::replying(Err(PowerCardError::Timeout("read".into()))));
        let err = assert_err!(session.exchange(b"0100").await);
        assert!(matches!(err, PowerCardError::Timeout(_)));
        assert_eq!(session.statistics().timeouts, 1);
        assert_eq!(session.statistics().failure_rate(), 100.0);
    }

    #[tokio::test]
    async fn test_bad_envelope_is_protocol_error() {
        let session = session(CannedTransport::replying(Ok(b"0011ISO90100000".to_vec())));
        let err = assert_err!(session.exchange(b"0100").await);
        assert!(matches!(err, PowerCardError::Protocol(_)));
        assert!(!err.is_transport());
        assert_eq!(session.statistics().protocol_errors, 1);
    }

    #[tokio::test]
    async fn test_empty_message_not_sent() {
        let session = session(CannedTransport::replying(Ok(host_reply(b"0110"))));
        assert_err!(session.exchange(&[]).await);
        assert_eq!(session.statistics().messages_sent, 0);
    }
}
