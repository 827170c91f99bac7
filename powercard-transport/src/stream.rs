//! Stream accessor and transport traits

use async_trait::async_trait;
use powercard_core::{PowerCardError, PowerCardResult};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;

/// Number of ASCII digits in the message length prefix
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Stream accessor interface to the physical link to the host
#[async_trait]
pub trait StreamAccessor: Send {
    /// Read available bytes from the stream
    ///
    /// # Arguments
    ///
    /// * `buf` - Buffer to read into
    ///
    /// # Returns
    ///
    /// Number of bytes read, or 0 at end of stream
    async fn read(&mut self, buf: &mut [u8]) -> PowerCardResult<usize>;

    /// Write the whole buffer
    ///
    /// # Arguments
    ///
    /// * `buf` - Data to write; nothing is returned until all of it is written
    async fn write_all(&mut self, buf: &[u8]) -> PowerCardResult<()>;

    /// Flush any buffered data
    async fn flush(&mut self) -> PowerCardResult<()>;

    /// Shut down the write half
    async fn shutdown(&mut self) -> PowerCardResult<()>;

    /// Fill `buf` completely before `deadline`
    ///
    /// Partial reads are accumulated. The deadline is re-checked around every
    /// read, so a peer trickling one byte at a time still times out.
    ///
    /// # Arguments
    ///
    /// * `buf` - Buffer to read into, will be filled completely
    /// * `deadline` - Instant by which the last byte must have arrived
    ///
    /// # Returns
    ///
    /// `Timeout` if the deadline passes first, `ConnectionClosed` if the peer
    /// ends the stream before `buf` is full
    async fn read_exact_until(&mut self, buf: &mut [u8], deadline: Instant) -> PowerCardResult<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = match tokio::time::timeout_at(deadline, StreamAccessor::read(self, &mut buf[filled..])).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(PowerCardError::Timeout(format!(
                        "received {} of {} bytes before deadline",
                        filled,
                        buf.len()
                    )));
                }
            };
            if n == 0 {
                return Err(PowerCardError::ConnectionClosed(format!(
                    "peer closed after {} of {} bytes",
                    filled,
                    buf.len()
                )));
            }
            filled += n;
        }
        Ok(())
    }
}

#[async_trait]
impl<S> StreamAccessor for S
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn read(&mut self, buf: &mut [u8]) -> PowerCardResult<usize> {
        Ok(AsyncReadExt::read(self, buf).await?)
    }

    async fn write_all(&mut self, buf: &[u8]) -> PowerCardResult<()> {
        Ok(AsyncWriteExt::write_all(self, buf).await?)
    }

    async fn flush(&mut self) -> PowerCardResult<()> {
        Ok(AsyncWriteExt::flush(self).await?)
    }

    async fn shutdown(&mut self) -> PowerCardResult<()> {
        Ok(AsyncWriteExt::shutdown(self).await?)
    }
}

/// Connection state of a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connected => "Connected",
        }
    }
}

/// Transport that performs one request/response exchange at a time
#[async_trait]
pub trait TransportLayer: Send + Sync {
    /// Open the connection; returns once it is established or has failed
    ///
    /// # Returns
    ///
    /// `Ok(())` when already connected, `Timeout` when the connect timeout
    /// elapses, `Connection` for any socket error
    async fn connect(&self) -> PowerCardResult<()>;

    /// Send a complete frame and read back length prefix plus payload
    ///
    /// # Arguments
    ///
    /// * `message` - Fully encoded request, length prefix included
    /// * `timeout` - Budget for the whole write and read
    ///
    /// # Returns
    ///
    /// The response bytes starting with their 4-digit length prefix
    async fn send_and_receive(&self, message: &[u8], timeout: Duration) -> PowerCardResult<Vec<u8>>;

    /// Close the connection; calling it again is a no-op
    async fn disconnect(&self) -> PowerCardResult<()>;

    fn state(&self) -> ConnectionState;

    /// Whether [`state`](Self::state) is `Connected`
    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }
}

/// Write `message`, then read a 4-digit length prefix and that many bytes
///
/// The whole exchange must finish before `deadline`. The returned buffer is
/// the prefix followed by the payload.
pub async fn exchange<S>(stream: &mut S, message: &[u8], deadline: Instant) -> PowerCardResult<Vec<u8>>
where
    S: StreamAccessor,
{
    match tokio::time::timeout_at(deadline, async {
        StreamAccessor::write_all(stream, message).await?;
        StreamAccessor::flush(stream).await
    })
    .await
    {
        Ok(result) => result?,
        Err(_) => return Err(PowerCardError::Timeout("writing request".to_string())),
    }

    let mut prefix = [0u8; LENGTH_PREFIX_LEN];
    StreamAccessor::read_exact_until(stream, &mut prefix, deadline).await?;
    let length = parse_length_prefix(&prefix)?;

    let mut response = Vec::with_capacity(LENGTH_PREFIX_LEN + length);
    response.extend_from_slice(&prefix);
    response.resize(LENGTH_PREFIX_LEN + length, 0);
    StreamAccessor::read_exact_until(stream, &mut response[LENGTH_PREFIX_LEN..], deadline).await?;
    Ok(response)
}

fn parse_length_prefix(prefix: &[u8; LENGTH_PREFIX_LEN]) -> PowerCardResult<usize> {
    if !prefix.iter().all(u8::is_ascii_digit) {
        return Err(PowerCardError::Protocol(format!(
            "Length prefix is not 4 ASCII digits: {:02X?}",
            prefix
        )));
    }
    Ok(prefix
        .iter()
        .fold(0usize, |acc, b| acc * 10 + (b - b'0') as usize))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, duplex};
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_exchange_accumulates_partial_reads() {
        let (mut client, mut server) = duplex(64);
        let peer = tokio::spawn(async move {
            let mut request = [0u8; 3];
            AsyncReadExt::read_exact(&mut server, &mut request).await.unwrap();
            assert_eq!(&request, b"REQ");
            for chunk in [&b"00"[..], b"05", b"HEL", b"LO"] {
                AsyncWriteExt::write_all(&mut server, chunk).await.unwrap();
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            server
        });

        let deadline = Instant::now() + Duration::from_secs(2);
        let response = assert_ok!(exchange(&mut client, b"REQ", deadline).await);
        assert_eq!(response, b"0005HELLO".to_vec());
        drop(peer.await.unwrap());
    }

    #[tokio::test]
    async fn test_stalled_prefix_times_out() {
        let (mut client, mut server) = duplex(64);
        let peer = tokio::spawn(async move {
            AsyncWriteExt::write_all(&mut server, b"00").await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            server
        });

        let started = std::time::Instant::now();
        let deadline = Instant::now() + Duration::from_millis(200);
        let err = assert_err!(exchange(&mut client, b"X", deadline).await);
        assert!(matches!(err, PowerCardError::Timeout(_)));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(180));
        assert!(elapsed < Duration::from_secs(2));
        peer.abort();
    }

    #[tokio::test]
    async fn test_peer_close_mid_payload() {
        let (mut client, mut server) = duplex(64);
        tokio::spawn(async move {
            let mut request = [0u8; 1];
            AsyncReadExt::read_exact(&mut server, &mut request).await.unwrap();
            AsyncWriteExt::write_all(&mut server, b"0010ABC").await.unwrap();
        });
        let deadline = Instant::now() + Duration::from_secs(2);
        let err = assert_err!(exchange(&mut client, b"X", deadline).await);
        assert!(matches!(err, PowerCardError::ConnectionClosed(_)));
    }

    #[tokio::test]
    async fn test_non_numeric_prefix() {
        let (mut client, mut server) = duplex(64);
        tokio::spawn(async move {
            AsyncWriteExt::write_all(&mut server, b"00A1").await.unwrap();
            tokio::time::sleep(Duration::from_millis(500)).await;
        });
        let deadline = Instant::now() + Duration::from_secs(2);
        let err = assert_err!(exchange(&mut client, b"X", deadline).await);
        assert!(matches!(err, PowerCardError::Protocol(_)));
    }
}
