//! TCP transport implementation

use crate::stream::{ConnectionState, StreamAccessor, TransportLayer, exchange};
use async_trait::async_trait;
use powercard_core::{PowerCardError, PowerCardResult};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

/// Wrapper for TcpStream that implements Debug
struct DebugTcpStream(TcpStream);

impl fmt::Debug for DebugTcpStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpStream")
            .field("peer", &self.0.peer_addr().ok())
            .finish()
    }
}

/// TCP transport layer settings
#[derive(Debug, Clone)]
pub struct TcpSettings {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
    /// Default deadline for one request/response exchange
    pub read_timeout: Duration,
    /// How long `disconnect` waits for an in-flight exchange
    pub shutdown_grace: Duration,
}

impl TcpSettings {
    /// Create new TCP settings with 30s connect/read timeouts
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(5),
        }
    }

    /// Create TCP settings with explicit timeouts
    pub fn with_timeouts(
        host: impl Into<String>,
        port: u16,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Self {
        Self {
            connect_timeout,
            read_timeout,
            ..Self::new(host, port)
        }
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// TCP transport to the host
///
/// One exchange runs at a time; concurrent callers queue on the stream lock.
/// `connect` and `disconnect` are serialized against each other, and
/// `disconnect` lets an in-flight exchange finish for up to
/// `shutdown_grace` before aborting it.
#[derive(Debug)]
pub struct TcpTransport {
    settings: TcpSettings,
    stream: Mutex<Option<DebugTcpStream>>,
    lifecycle: Mutex<()>,
    connected: AtomicBool,
    abort: Notify,
}

impl TcpTransport {
    /// Create a new, disconnected TCP transport
    pub fn new(settings: TcpSettings) -> Self {
        Self {
            settings,
            stream: Mutex::new(None),
            lifecycle: Mutex::new(()),
            connected: AtomicBool::new(false),
            abort: Notify::new(),
        }
    }

    pub fn settings(&self) -> &TcpSettings {
        &self.settings
    }

    fn set_state(&self, state: ConnectionState) {
        self.connected
            .store(state == ConnectionState::Connected, Ordering::SeqCst);
    }
}

#[async_trait]
impl TransportLayer for TcpTransport {
    async fn connect(&self) -> PowerCardResult<()> {
        let _lifecycle = self.lifecycle.lock().await;
        let mut slot = self.stream.lock().await;
        if slot.is_some() {
            log::debug!("Already connected to {}", self.settings.endpoint());
            return Ok(());
        }

        let endpoint = self.settings.endpoint();
        let stream = tokio::time::timeout(self.settings.connect_timeout, TcpStream::connect(&endpoint))
            .await
            .map_err(|_| {
                PowerCardError::Timeout(format!(
                    "connecting to {} after {:?}",
                    endpoint, self.settings.connect_timeout
                ))
            })??;
        // requests are short and latency-sensitive
        stream.set_nodelay(true)?;

        *slot = Some(DebugTcpStream(stream));
        self.set_state(ConnectionState::Connected);
        log::info!("Connected to host {}", endpoint);
        Ok(())
    }

    async fn send_and_receive(&self, message: &[u8], timeout: Duration) -> PowerCardResult<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.stream.lock().await;
        let stream = slot.as_mut().ok_or(PowerCardError::NotConnected)?;

        let result = tokio::select! {
            result = exchange(&mut stream.0, message, deadline) => result,
            _ = self.abort.notified() => Err(PowerCardError::ConnectionClosed(
                "transport shut down during exchange".to_string(),
            )),
        };

        match &result {
            Ok(response) => log::debug!(
                "Exchanged {} bytes for {} bytes with {}",
                message.len(),
                response.len(),
                self.settings.endpoint()
            ),
            Err(e) => {
                // the stream position is unknown after a failed exchange
                log::warn!("Exchange with {} failed: {}", self.settings.endpoint(), e);
                if let Some(mut broken) = slot.take() {
                    let _ = StreamAccessor::shutdown(&mut broken.0).await;
                }
                self.set_state(ConnectionState::Disconnected);
            }
        }
        result
    }

    async fn disconnect(&self) -> PowerCardResult<()> {
        let _lifecycle = self.lifecycle.lock().await;
        let mut slot = match tokio::time::timeout(self.settings.shutdown_grace, self.stream.lock()).await {
            Ok(slot) => slot,
            Err(_) => {
                log::warn!(
                    "Exchange still running after {:?}; aborting it",
                    self.settings.shutdown_grace
                );
                self.abort.notify_waiters();
                self.stream.lock().await
            }
        };
        if let Some(mut stream) = slot.take() {
            let _ = StreamAccessor::shutdown(&mut stream.0).await;
            log::info!("Disconnected from host {}", self.settings.endpoint());
        }
        self.set_state(ConnectionState::Disconnected);
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

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio_test::{assert_err, assert_ok};

    async fn listener() -> (TcpListener, TcpSettings) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, TcpSettings::new("127.0.0.1", port))
    }

    #[test]
    fn test_tcp_settings() {
        let settings = TcpSettings::new("10.0.0.1", 5000);
        assert_eq!(settings.connect_timeout, Duration::from_secs(30));
        assert_eq!(settings.read_timeout, Duration::from_secs(30));
        assert_eq!(settings.endpoint(), "10.0.0.1:5000");
    }

    #[tokio::test]
    async fn test_send_and_receive() {
        let (listener, settings) = listener().await;
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 4];
            socket.read_exact(&mut request).await.unwrap();
            AsyncWriteExt::write_all(&mut socket, b"0003").await.unwrap();
            AsyncWriteExt::write_all(&mut socket, b"ACK").await.unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        let transport = TcpTransport::new(settings);
        assert_eq!(transport.state(), ConnectionState::Disconnected);
        assert_ok!(transport.connect().await);
        assert!(transport.is_connected());

        let response = assert_ok!(transport.send_and_receive(b"PING", Duration::from_secs(2)).await);
        assert_eq!(response, b"0003ACK".to_vec());

        assert_ok!(transport.disconnect().await);
        assert_ok!(transport.disconnect().await);
        assert_eq!(transport.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_partial_prefix_times_out() {
        let (listener, settings) = listener().await;
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            AsyncWriteExt::write_all(&mut socket, b"00").await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let transport = TcpTransport::new(settings);
        transport.connect().await.unwrap();
        let started = std::time::Instant::now();
        let err = assert_err!(transport.send_and_receive(b"PING", Duration::from_millis(300)).await);
        assert!(matches!(err, PowerCardError::Timeout(_)));
        assert!(started.elapsed() < Duration::from_secs(2));
        // a failed exchange drops the connection
        assert_eq!(transport.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_send_without_connect() {
        let transport = TcpTransport::new(TcpSettings::new("127.0.0.1", 9));
        let err = assert_err!(transport.send_and_receive(b"X", Duration::from_millis(100)).await);
        assert!(matches!(err, PowerCardError::NotConnected));
    }

    #[tokio::test]
    async fn test_disconnect_aborts_stuck_exchange() {
        let (listener, mut settings) = listener().await;
        settings.shutdown_grace = Duration::from_millis(100);
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let transport = std::sync::Arc::new(TcpTransport::new(settings));
        transport.connect().await.unwrap();
        let exchanging = transport.clone();
        let exchange = tokio::spawn(async move {
            exchanging.send_and_receive(b"PING", Duration::from_secs(10)).await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let started = std::time::Instant::now();
        transport.disconnect().await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
        let result = exchange.await.unwrap();
        assert!(matches!(result, Err(PowerCardError::ConnectionClosed(_))));
    }
}
