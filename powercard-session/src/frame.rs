//! ISO frame: poll address, control byte and TPDU around the application data

use crate::crc::Crc16;
use bytes::{BufMut, BytesMut};
use powercard_core::encoding::{bcd_pack, is_digits};
use powercard_core::{PowerCardError, PowerCardResult};

/// Poll address that opens every frame
pub const POLL_ADDRESS: u8 = 0x30;
/// Control byte following the poll address
pub const CONTROL_BYTE: u8 = 0x00;
/// TPDU id for transaction messages
pub const TPDU_ID: u8 = 0x60;
/// Poll + control + 5-byte TPDU
pub const ISO_HEADER_LENGTH: usize = 7;
pub const CRC_LENGTH: usize = 2;

/// Addressing used when wrapping outbound frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramerSettings {
    pub destination_address: [u8; 2],
    pub originator_address: [u8; 2],
}

impl FramerSettings {
    /// Build settings from a 4-digit destination and the terminal id
    ///
    /// The originator is the last four digits of the terminal id, BCD packed.
    pub fn new(destination: &str, terminal_id: &str) -> PowerCardResult<Self> {
        Ok(Self {
            destination_address: address(destination)?,
            originator_address: originator_from_terminal_id(terminal_id)?,
        })
    }
}

impl Default for FramerSettings {
    fn default() -> Self {
        Self {
            destination_address: [0x00, 0x00],
            originator_address: [0x00, 0x00],
        }
    }
}

fn address(digits: &str) -> PowerCardResult<[u8; 2]> {
    if digits.len() != 4 || !is_digits(digits) {
        return Err(PowerCardError::InvalidData(format!(
            "TPDU address must be 4 digits, got {:?}",
            digits
        )));
    }
    let packed = bcd_pack(digits)?;
    Ok([packed[0], packed[1]])
}

fn originator_from_terminal_id(terminal_id: &str) -> PowerCardResult<[u8; 2]> {
    let digits: String = terminal_id.chars().filter(|c| c.is_ascii_digit()).collect();
    let tail = if digits.len() >= 4 {
        digits[digits.len() - 4..].to_string()
    } else {
        format!("{:0>4}", digits)
    };
    address(&tail)
}

/// Wraps and unwraps ISO frames
#[derive(Debug, Clone, Default)]
pub struct IsoFrame {
    settings: FramerSettings,
}

impl IsoFrame {
    pub fn new(settings: FramerSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &FramerSettings {
        &self.settings
    }

    /// Build `header | application data | CRC`
    ///
    /// Addresses left as `None` fall back to the configured ones.
    pub fn wrap(
        &self,
        application_data: &[u8],
        destination: Option<[u8; 2]>,
        originator: Option<[u8; 2]>,
    ) -> Vec<u8> {
        let destination = destination.unwrap_or(self.settings.destination_address);
        let originator = originator.unwrap_or(self.settings.originator_address);

        let mut frame = BytesMut::with_capacity(ISO_HEADER_LENGTH + application_data.len() + CRC_LENGTH);
        frame.put_u8(POLL_ADDRESS);
        frame.put_u8(CONTROL_BYTE);
        frame.put_u8(TPDU_ID);
        frame.put_slice(&destination);
        frame.put_slice(&originator);
        frame.put_slice(application_data);

        let mut crc = Crc16::new();
        crc.update_bytes(&frame);
        frame.put_slice(&crc.value_bytes());
        frame.to_vec()
    }

    /// Strip the 7-byte header and 2-byte CRC without checking the CRC
    pub fn unwrap(frame: &[u8]) -> PowerCardResult<&[u8]> {
        if frame.len() < ISO_HEADER_LENGTH + CRC_LENGTH {
            return Err(PowerCardError::FrameInvalid(format!(
                "ISO frame too short: {} bytes, need at least {}",
                frame.len(),
                ISO_HEADER_LENGTH + CRC_LENGTH
            )));
        }
        Ok(&frame[ISO_HEADER_LENGTH..frame.len() - CRC_LENGTH])
    }

    /// Like [`IsoFrame::unwrap`], but recompute the CRC and reject a mismatch
    pub fn unwrap_verified(frame: &[u8]) -> PowerCardResult<&[u8]> {
        let data = Self::unwrap(frame)?;
        let body = &frame[..frame.len() - CRC_LENGTH];
        let carried = u16::from_le_bytes([frame[frame.len() - 2], frame[frame.len() - 1]]);

        let mut crc = Crc16::new();
        crc.update_bytes(body);
        if crc.value() != carried {
            return Err(PowerCardError::CorruptFrame {
                expected: crc.value(),
                actual: carried,
            });
        }
        Ok(data)
    }
}
