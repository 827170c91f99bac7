//! Data element encoders and the sequential field reader
//!
//! Encoders produce the exact wire bytes of one data element. The reader is a
//! forward-only cursor over application data; every read checks the declared
//! length against the bytes that remain.

use powercard_core::encoding::{bcd_pack, bcd_unpack, fixed_digits, hex_to_bytes, is_hex};
use powercard_core::{PowerCardError, PowerCardResult};

/// Maximum PAN length allowed by ISO/IEC 7812
pub const MAX_PAN_DIGITS: usize = 19;

/// Maximum payload of a field with a one-byte length prefix
pub const MAX_LL_BYTES: usize = 255;

/// Fixed-width numeric field: zero-padded ASCII digits
pub fn fixed_numeric(value: &str, width: usize) -> PowerCardResult<Vec<u8>> {
    Ok(fixed_digits(value, width)?.into_bytes())
}

/// Variable binary field: one length byte followed by the raw bytes
pub fn ll_hex(hex: &str) -> PowerCardResult<Vec<u8>> {
    if !is_hex(hex) {
        return Err(PowerCardError::InvalidData(
            "Variable field payload is not an even-length hex string".to_string(),
        ));
    }
    let payload = hex_to_bytes(hex)?;
    if payload.len() > MAX_LL_BYTES {
        return Err(PowerCardError::InvalidData(format!(
            "Variable field of {} bytes exceeds {} byte limit",
            payload.len(),
            MAX_LL_BYTES
        )));
    }
    let mut out = Vec::with_capacity(payload.len() + 1);
    out.push(payload.len() as u8);
    out.extend_from_slice(&payload);
    Ok(out)
}

/// PAN field (DE2): mask characters removed, digit count byte, then BCD digits
pub fn pan(masked_pan: &str) -> PowerCardResult<Vec<u8>> {
    let digits: String = masked_pan
        .chars()
        .filter(|c| *c != '*' && !c.is_whitespace())
        .collect();
    if digits.is_empty() || digits.len() > MAX_PAN_DIGITS {
        return Err(PowerCardError::InvalidData(format!(
            "PAN must have 1-{} digits, got {}",
            MAX_PAN_DIGITS,
            digits.len()
        )));
    }
    let mut out = vec![digits.len() as u8];
    out.extend(bcd_pack(&digits)?);
    Ok(out)
}

/// Fixed-length binary field given as hex
pub fn binary_fixed(hex: &str, byte_len: usize) -> PowerCardResult<Vec<u8>> {
    if hex.len() != byte_len * 2 || !is_hex(hex) {
        return Err(PowerCardError::InvalidData(format!(
            "Expected {} hex characters, got {}",
            byte_len * 2,
            hex.len()
        )));
    }
    hex_to_bytes(hex)
}

/// Wire format of a data element as seen by the response parsers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldFormat {
    /// Fixed number of ASCII characters
    Ascii(usize),
    /// Fixed number of raw bytes
    Binary(usize),
    /// Digit-count byte followed by BCD digits
    LlBcd,
    /// One length byte followed by raw bytes
    LlBinary,
    /// Two big-endian length bytes followed by raw bytes
    LllBinary,
    /// Three ASCII length digits followed by that many bytes
    LllAscii,
}

/// Forward-only reader over application data
#[derive(Debug)]
pub struct FieldReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Take exactly `len` bytes or fail without consuming anything
    pub fn take(&mut self, len: usize) -> PowerCardResult<&'a [u8]> {
        if len > self.remaining() {
            return Err(PowerCardError::Protocol(format!(
                "Field of {} bytes at offset {} overruns buffer of {} bytes",
                len,
                self.pos,
                self.data.len()
            )));
        }
        let data = self.data;
        let slice = &data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    /// Read one element of the given format, returning its value bytes
    pub fn read(&mut self, format: FieldFormat) -> PowerCardResult<&'a [u8]> {
        match format {
            FieldFormat::Ascii(len) | FieldFormat::Binary(len) => self.take(len),
            FieldFormat::LlBcd => {
                let digits = self.take(1)?[0] as usize;
                self.take(digits.div_ceil(2))
            }
            FieldFormat::LlBinary => {
                let len = self.take(1)?[0] as usize;
                self.take(len)
            }
            FieldFormat::LllBinary => {
                let prefix = self.take(2)?;
                let len = u16::from_be_bytes([prefix[0], prefix[1]]) as usize;
                self.take(len)
            }
            FieldFormat::LllAscii => {
                let prefix = self.take(3)?;
                let len = parse_ascii_len(prefix)?;
                self.take(len)
            }
        }
    }

    /// Read a PAN field and unpack its digits
    pub fn read_pan(&mut self) -> PowerCardResult<String> {
        let digits = self.take(1)?[0] as usize;
        let packed = self.take(digits.div_ceil(2))?;
        bcd_unpack(packed, digits)
    }
}

/// Parse a run of ASCII decimal digits used as a length prefix
pub fn parse_ascii_len(prefix: &[u8]) -> PowerCardResult<usize> {
    if prefix.is_empty() || !prefix.iter().all(u8::is_ascii_digit) {
        return Err(PowerCardError::Protocol(format!(
            "Length prefix is not decimal: {:02X?}",
            prefix
        )));
    }
    Ok(prefix
        .iter()
        .fold(0usize, |acc, b| acc * 10 + (b - b'0') as usize))
}
