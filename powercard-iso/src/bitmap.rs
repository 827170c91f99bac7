//! ISO 8583 primary bitmap
//!
//! Field `n` (1..=64) maps to bit `64 - n` of a big-endian `u64`, so field 1
//! is the most significant bit of the first byte.

use powercard_core::{PowerCardError, PowerCardResult};

/// Primary bitmap covering data elements 1 to 64
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Bitmap(u64);

impl Bitmap {
    /// Create an empty bitmap
    pub fn new() -> Self {
        Self(0)
    }

    /// Mark a field as present
    pub fn set(&mut self, field: u8) -> PowerCardResult<()> {
        Self::check(field)?;
        self.0 |= 1u64 << (64 - field as u32);
        Ok(())
    }

    /// Check whether a field is present; out-of-range fields never are
    pub fn is_set(&self, field: u8) -> bool {
        Self::check(field).is_ok() && self.0 & (1u64 << (64 - field as u32)) != 0
    }

    /// Present field numbers in ascending order
    pub fn fields(&self) -> Vec<u8> {
        (1..=64u8).filter(|f| self.is_set(*f)).collect()
    }

    /// Bit 1 announces a secondary bitmap
    pub fn has_secondary(&self) -> bool {
        self.is_set(1)
    }

    pub fn to_bytes(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(u64::from_be_bytes(bytes))
    }

    /// Sixteen upper-case hex characters
    pub fn to_hex(&self) -> String {
        format!("{:016X}", self.0)
    }

    fn check(field: u8) -> PowerCardResult<()> {
        if (1..=64).contains(&field) {
            Ok(())
        } else {
            Err(PowerCardError::InvalidData(format!(
                "Field number {} outside primary bitmap range 1-64",
                field
            )))
        }
    }
}

/// Encode a set of field numbers as a 16-hex-character bitmap
pub fn encode(fields: &[u8]) -> PowerCardResult<String> {
    let mut bitmap = Bitmap::new();
    for &field in fields {
        bitmap.set(field)?;
    }
    Ok(bitmap.to_hex())
}

/// Decode 8 bitmap bytes; index `i` of the result is field `i + 1`
pub fn decode(bytes: &[u8; 8]) -> [bool; 64] {
    let mut present = [false; 64];
    for (i, byte) in bytes.iter().enumerate() {
        for j in 0..8 {
            present[i * 8 + j] = byte & (0x80 >> j) != 0;
        }
    }
    present
}

#[cfg(test)]
mod tests {
    use super::*;
    use powercard_core::encoding::hex_to_bytes;
    use proptest::prelude::*;

    #[test]
    fn test_authorization_bitmap() {
        assert_eq!(encode(&[2, 3, 4, 11, 22, 49, 55]).unwrap(), "7020040000008200");
        assert_eq!(encode(&[2, 3, 4, 11, 22, 49, 52, 55]).unwrap(), "7020040000009200");
    }

    #[test]
    fn test_field_range() {
        assert!(encode(&[0]).is_err());
        assert!(encode(&[65]).is_err());
        assert!(!Bitmap::new().is_set(0));
    }

    #[test]
    fn test_secondary_flag() {
        let bitmap = Bitmap::from_bytes([0x80, 0, 0, 0, 0, 0, 0, 0]);
        assert!(bitmap.has_secondary());
        assert_eq!(bitmap.fields(), vec![1]);
    }

    proptest! {
        #[test]
        fn bitmap_round_trip(fields in prop::collection::btree_set(1u8..=64, 0..64)) {
            let fields: Vec<u8> = fields.into_iter().collect();
            let hex = encode(&fields).unwrap();
            let bytes: [u8; 8] = hex_to_bytes(&hex).unwrap().try_into().unwrap();
            let present = decode(&bytes);
            for n in 1..=64u8 {
                prop_assert_eq!(present[(n - 1) as usize], fields.contains(&n));
            }
        }
    }
}
