use thiserror::Error;

/// Main error type for PowerCARD host operations
#[derive(Error, Debug)]
pub enum PowerCardError {
    #[error("Connection error: {0}")]
    Connection(#[from] std::io::Error),

    #[error("Not connected")]
    NotConnected,

    #[error("Connection closed by peer: {0}")]
    ConnectionClosed(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Frame invalid: {0}")]
    FrameInvalid(String),

    #[error("Corrupt frame: CRC 0x{actual:04X}, expected 0x{expected:04X}")]
    CorruptFrame { expected: u16, actual: u16 },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl PowerCardError {
    /// Whether the error came from the link to the host rather than from
    /// the content of a message.
    ///
    /// Transport failures are the ones a reversal flow answers with a durable
    /// enqueue; everything else is either a caller bug or a protocol
    /// violation that replaying the same frame will not fix.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            PowerCardError::Connection(_)
                | PowerCardError::NotConnected
                | PowerCardError::ConnectionClosed(_)
                | PowerCardError::Timeout(_)
                | PowerCardError::CorruptFrame { .. }
        )
    }
}

/// Result type alias for PowerCARD operations
pub type PowerCardResult<T> = Result<T, PowerCardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_classification() {
        assert!(PowerCardError::Timeout("read".into()).is_transport());
        assert!(PowerCardError::NotConnected.is_transport());
        assert!(PowerCardError::CorruptFrame { expected: 1, actual: 2 }.is_transport());
        assert!(!PowerCardError::Protocol("bad bitmap".into()).is_transport());
        assert!(!PowerCardError::InvalidData("pan".into()).is_transport());
        assert!(!PowerCardError::FrameInvalid("length".into()).is_transport());
        assert!(!PowerCardError::Storage("disk".into()).is_transport());
    }

    #[test]
    fn test_corrupt_frame_display() {
        let err = PowerCardError::CorruptFrame { expected: 0xAFA9, actual: 0x0001 };
        assert_eq!(err.to_string(), "Corrupt frame: CRC 0x0001, expected 0xAFA9");
    }
}
