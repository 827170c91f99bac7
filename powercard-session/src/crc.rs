//! CRC-16 over the ISO header and application data

/// Reflected CCITT polynomial (bit-reversed 0x1021)
const KEY: u16 = 0x8408;
const INITIAL_CRC: u16 = 0xFFFF;

static CRC_TABLE: once_cell::sync::Lazy<[u16; 256]> = once_cell::sync::Lazy::new(|| {
    let mut table = [0u16; 256];
    for (b, slot) in table.iter_mut().enumerate() {
        let mut v = b as u16;
        for _ in 0..8 {
            v = if v & 1 == 1 { (v >> 1) ^ KEY } else { v >> 1 };
        }
        *slot = v;
    }
    table
});

/// Running CRC-16 register
///
/// The register starts at 0xFFFF and is inverted when read out, so
/// [`Crc16::value`] is the checksum carried on the wire.
#[derive(Debug, Clone)]
pub struct Crc16 {
    register: u16,
}

impl Crc16 {
    pub fn new() -> Self {
        Self {
            register: INITIAL_CRC,
        }
    }

    pub fn reset(&mut self) {
        self.register = INITIAL_CRC;
    }

    pub fn update(&mut self, byte: u8) {
        self.register = (self.register >> 8) ^ CRC_TABLE[((self.register ^ byte as u16) & 0xFF) as usize];
    }

    pub fn update_bytes(&mut self, data: &[u8]) {
        for &byte in data {
            self.update(byte);
        }
    }

    /// Final checksum
    pub fn value(&self) -> u16 {
        self.register ^ 0xFFFF
    }

    /// Final checksum, least significant byte first
    pub fn value_bytes(&self) -> [u8; 2] {
        self.value().to_le_bytes()
    }
}

impl Default for Crc16 {
    fn default() -> Self {
        Self::new()
    }
}

/// Checksum of `data` in one call
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = Crc16::new();
    crc.update_bytes(data);
    crc.value()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_value() {
        assert_eq!(crc16(b"123456789"), 0x906E);
    }

    #[test]
    fn test_zero_buffer_reference() {
        let zeros = [0u8; 16];
        assert_eq!(crc16(&zeros), 0xAFA9);
        assert_eq!(crc16(&zeros), crc16(&zeros));

        let mut crc = Crc16::new();
        crc.update_bytes(&zeros);
        assert_eq!(crc.value_bytes(), [0xA9, 0xAF]);
    }

    #[test]
    fn test_incremental_matches_one_shot() {
        let mut crc = Crc16::new();
        crc.update_bytes(b"1234");
        crc.update_bytes(b"56789");
        assert_eq!(crc.value(), crc16(b"123456789"));

        crc.reset();
        assert_eq!(crc.value(), crc16(&[]));
    }
}
