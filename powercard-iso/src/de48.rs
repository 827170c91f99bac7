//! DE48 additional-data sub-elements
//!
//! Block layout: `LLL` (three ASCII digits, total length of what follows),
//! then each sub-element as `TTT` type code + `LLL` value length + value.

use crate::field::{FieldReader, parse_ascii_len};
use powercard_core::{PowerCardError, PowerCardResult};

/// Largest length a three-digit ASCII prefix can declare
pub const MAX_LLL: usize = 999;

/// Sub-element type codes used by the authorization DE48 block
pub mod tags {
    pub const CARD_BRAND: &str = "001";
    pub const ARQC_RESULT: &str = "002";
    pub const MESSAGE_REASON: &str = "003";
    pub const NETWORK_ID: &str = "004";
    pub const TRANSACTION_ID: &str = "005";
    pub const PAYMENT_FACILITATOR_ID: &str = "006";
    pub const SUB_MERCHANT_ID: &str = "007";
    pub const DCC_INDICATOR: &str = "008";
}

/// One DE48 sub-element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubElement {
    tag: String,
    value: String,
}

impl SubElement {
    /// Create a sub-element; the tag must be exactly three ASCII characters
    /// and the value ASCII of at most 999 bytes.
    pub fn new(tag: impl Into<String>, value: impl Into<String>) -> PowerCardResult<Self> {
        let tag = tag.into();
        let value = value.into();
        if tag.len() != 3 || !tag.is_ascii() {
            return Err(PowerCardError::InvalidData(format!(
                "DE48 type code must be 3 ASCII characters: {:?}",
                tag
            )));
        }
        if !value.is_ascii() || value.len() > MAX_LLL {
            return Err(PowerCardError::InvalidData(format!(
                "DE48 value for {} must be ASCII of at most {} bytes",
                tag, MAX_LLL
            )));
        }
        Ok(Self { tag, value })
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Length written in the sub-element header; always the value's byte length
    pub fn declared_length(&self) -> usize {
        self.value.len()
    }

    fn encoded_len(&self) -> usize {
        6 + self.value.len()
    }
}

/// Encode sub-elements into a complete DE48 block
pub fn build_de48(elements: &[SubElement]) -> PowerCardResult<Vec<u8>> {
    let total: usize = elements.iter().map(SubElement::encoded_len).sum();
    if total > MAX_LLL {
        return Err(PowerCardError::InvalidData(format!(
            "DE48 block of {} bytes exceeds {}",
            total, MAX_LLL
        )));
    }
    let mut out = Vec::with_capacity(total + 3);
    out.extend_from_slice(format!("{:03}", total).as_bytes());
    for element in elements {
        out.extend_from_slice(element.tag.as_bytes());
        out.extend_from_slice(format!("{:03}", element.declared_length()).as_bytes());
        out.extend_from_slice(element.value.as_bytes());
    }
    Ok(out)
}

/// Decode a DE48 block produced by [`build_de48`]
///
/// Rejects a declared total that exceeds the available bytes and any
/// sub-element whose value would run past the end of the block.
pub fn parse_de48(data: &[u8]) -> PowerCardResult<Vec<SubElement>> {
    let mut outer = FieldReader::new(data);
    let total = parse_ascii_len(outer.take(3)?)?;
    if total > outer.remaining() {
        return Err(PowerCardError::Protocol(format!(
            "DE48 declares {} bytes but only {} are available",
            total,
            outer.remaining()
        )));
    }
    let block = outer.take(total)?;

    let mut reader = FieldReader::new(block);
    let mut elements = Vec::new();
    while reader.remaining() > 0 {
        if reader.remaining() < 6 {
            return Err(PowerCardError::Protocol(format!(
                "Truncated DE48 sub-element header at offset {}",
                reader.position()
            )));
        }
        let tag = reader.take(3)?;
        let len = parse_ascii_len(reader.take(3)?)?;
        if len > reader.remaining() {
            return Err(PowerCardError::Protocol(format!(
                "DE48 sub-element of {} bytes overruns block",
                len
            )));
        }
        let value = reader.take(len)?;
        let tag = std::str::from_utf8(tag)
            .map_err(|e| PowerCardError::Protocol(format!("DE48 type code: {}", e)))?;
        let value = std::str::from_utf8(value)
            .map_err(|e| PowerCardError::Protocol(format!("DE48 value: {}", e)))?;
        elements.push(SubElement::new(tag, value)?);
    }
    Ok(elements)
}
