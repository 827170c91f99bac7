//! PowerCARD envelope around the ISO frame

use bytes::{BufMut, BytesMut};
use powercard_core::encoding::{ascii, is_digits};
use powercard_core::{PowerCardError, PowerCardResult};
use powercard_transport::LENGTH_PREFIX_LEN;

/// Protocol id that precedes the PowerCARD header
pub const PROTOCOL_ID: &[u8; 3] = b"ISO";
/// Only protocol version this stack speaks
pub const PROTOCOL_VERSION: &str = "0100";
/// Product spec + version + error element
pub const POWERCARD_HEADER_LENGTH: usize = 8;
/// Error element carried when there is nothing to report
pub const NO_ERROR: &str = "000";

const MAX_LENGTH: usize = 9999;

/// PowerCARD header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PowerCardHeader {
    product_spec: char,
    version: String,
    error_element: String,
}

impl PowerCardHeader {
    /// Create a header for the given product spec with no error element
    pub fn new(product_spec: char) -> PowerCardResult<Self> {
        check_product_spec(product_spec)?;
        Ok(Self {
            product_spec,
            version: PROTOCOL_VERSION.to_string(),
            error_element: NO_ERROR.to_string(),
        })
    }

    pub fn with_error_element(mut self, error_element: &str) -> PowerCardResult<Self> {
        if error_element.len() != 3 || !error_element.is_ascii() {
            return Err(PowerCardError::InvalidData(format!(
                "Error element must be 3 characters, got {:?}",
                error_element
            )));
        }
        self.error_element = error_element.to_string();
        Ok(self)
    }

    pub fn encode(&self) -> [u8; POWERCARD_HEADER_LENGTH] {
        let mut out = [0u8; POWERCARD_HEADER_LENGTH];
        out[0] = self.product_spec as u8;
        out[1..5].copy_from_slice(self.version.as_bytes());
        out[5..8].copy_from_slice(self.error_element.as_bytes());
        out
    }

    pub fn decode(data: &[u8]) -> PowerCardResult<Self> {
        if data.len() < POWERCARD_HEADER_LENGTH {
            return Err(PowerCardError::Protocol(format!(
                "PowerCARD header too short: expected {}, got {}",
                POWERCARD_HEADER_LENGTH,
                data.len()
            )));
        }
        let product_spec = data[0] as char;
        check_product_spec(product_spec).map_err(|_| {
            PowerCardError::Protocol(format!("Unknown product spec 0x{:02X}", data[0]))
        })?;

        let version = ascii(&data[1..5])?;
        if version != PROTOCOL_VERSION {
            return Err(PowerCardError::Protocol(format!(
                "Protocol version was {:?}, this stack is only compatible with {}",
                version, PROTOCOL_VERSION
            )));
        }
        let error_element = ascii(&data[5..8])?;

        Ok(Self {
            product_spec,
            version: version.to_string(),
            error_element: error_element.to_string(),
        })
    }

    pub fn product_spec(&self) -> char {
        self.product_spec
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn error_element(&self) -> &str {
        &self.error_element
    }

    pub fn has_error(&self) -> bool {
        self.error_element != NO_ERROR
    }
}

fn check_product_spec(product_spec: char) -> PowerCardResult<()> {
    match product_spec {
        '6' | '7' | '8' => Ok(()),
        other => Err(PowerCardError::InvalidData(format!(
            "Product spec must be one of 6, 7, 8, got {:?}",
            other
        ))),
    }
}

/// Complete message as it travels on the socket
#[derive(Debug, Clone)]
pub struct Envelope {
    header: PowerCardHeader,
    frame: Vec<u8>,
}

impl Envelope {
    pub fn new(header: PowerCardHeader, frame: Vec<u8>) -> Self {
        Self { header, frame }
    }

    /// Encode as `length | "ISO" | header | frame`
    ///
    /// The length counts every byte that follows the prefix.
    pub fn encode(&self) -> PowerCardResult<Vec<u8>> {
        let length = PROTOCOL_ID.len() + POWERCARD_HEADER_LENGTH + self.frame.len();
        if length > MAX_LENGTH {
            return Err(PowerCardError::InvalidData(format!(
                "Message of {} bytes does not fit a 4-digit length prefix",
                length
            )));
        }
        let mut out = BytesMut::with_capacity(LENGTH_PREFIX_LEN + length);
        out.put_slice(format!("{:04}", length).as_bytes());
        out.put_slice(PROTOCOL_ID);
        out.put_slice(&self.header.encode());
        out.put_slice(&self.frame);
        Ok(out.to_vec())
    }

    /// Decode the prefix + payload returned by the transport
    pub fn decode(wire: &[u8]) -> PowerCardResult<Self> {
        if wire.len() < LENGTH_PREFIX_LEN + PROTOCOL_ID.len() + POWERCARD_HEADER_LENGTH {
            return Err(PowerCardError::Protocol(format!(
                "Envelope too short: {} bytes",
                wire.len()
            )));
        }
        let prefix = ascii(&wire[..LENGTH_PREFIX_LEN])?;
        if !is_digits(prefix) {
            return Err(PowerCardError::Protocol(format!("Invalid length prefix {:?}", prefix)));
        }
        let declared: usize = prefix
            .parse()
            .map_err(|_| PowerCardError::Protocol(format!("Invalid length prefix {:?}", prefix)))?;
        let body = &wire[LENGTH_PREFIX_LEN..];
        if declared != body.len() {
            return Err(PowerCardError::Protocol(format!(
                "Length prefix says {} bytes, received {}",
                declared,
                body.len()
            )));
        }

        let (protocol_id, rest) = body.split_at(PROTOCOL_ID.len());
        if protocol_id != PROTOCOL_ID {
            return Err(PowerCardError::Protocol(format!(
                "Unknown protocol id {:?}",
                String::from_utf8_lossy(protocol_id)
            )));
        }
        let header = PowerCardHeader::decode(rest)?;
        Ok(Self {
            header,
            frame: rest[POWERCARD_HEADER_LENGTH..].to_vec(),
        })
    }

    pub fn header(&self) -> &PowerCardHeader {
        &self.header
    }

    pub fn frame(&self) -> &[u8] {
        &self.frame
    }

    pub fn into_frame(self) -> Vec<u8> {
        self.frame
    }
}
