//! Digit, hex and BCD helpers shared by the ISO 8583 codecs

use crate::error::{PowerCardError, PowerCardResult};
use once_cell::sync::Lazy;
use regex::Regex;

static DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]*$").unwrap());
static HEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?:[0-9A-Fa-f]{2})*$").unwrap());

/// Check that a string holds only ASCII decimal digits (empty is accepted)
pub fn is_digits(value: &str) -> bool {
    DIGITS.is_match(value)
}

/// Check that a string is an even-length run of hex digits
pub fn is_hex(value: &str) -> bool {
    HEX.is_match(value)
}

/// Right-justify a numeric value and zero-pad it to `width` ASCII digits
///
/// Surrounding whitespace is stripped first. Anything other than digits, or a
/// value longer than `width`, is rejected.
pub fn fixed_digits(value: &str, width: usize) -> PowerCardResult<String> {
    let trimmed = value.trim();
    if !is_digits(trimmed) {
        return Err(PowerCardError::InvalidData(format!(
            "Non-numeric value for {}-digit field",
            width
        )));
    }
    if trimmed.len() > width {
        return Err(PowerCardError::InvalidData(format!(
            "Value of {} digits exceeds field width {}",
            trimmed.len(),
            width
        )));
    }
    Ok(format!("{:0>width$}", trimmed, width = width))
}

/// Decode a hex string into bytes
pub fn hex_to_bytes(value: &str) -> PowerCardResult<Vec<u8>> {
    hex::decode(value)
        .map_err(|e| PowerCardError::InvalidData(format!("Invalid hex string: {}", e)))
}

/// Encode bytes as an upper-case hex string
pub fn bytes_to_hex(data: &[u8]) -> String {
    hex::encode_upper(data)
}

/// Pack a decimal digit string into BCD, two digits per byte
///
/// An odd digit count is completed with a trailing `F` nibble.
pub fn bcd_pack(digits: &str) -> PowerCardResult<Vec<u8>> {
    if !is_digits(digits) {
        return Err(PowerCardError::InvalidData(
            "BCD input must be decimal digits".to_string(),
        ));
    }
    let mut nibbles: Vec<u8> = digits.bytes().map(|b| b - b'0').collect();
    if nibbles.len() % 2 == 1 {
        nibbles.push(0x0F);
    }
    Ok(nibbles.chunks(2).map(|pair| (pair[0] << 4) | pair[1]).collect())
}

/// Unpack `digit_count` BCD digits, ignoring a trailing `F` pad nibble
pub fn bcd_unpack(data: &[u8], digit_count: usize) -> PowerCardResult<String> {
    if data.len() * 2 < digit_count {
        return Err(PowerCardError::InvalidData(format!(
            "BCD buffer of {} bytes cannot hold {} digits",
            data.len(),
            digit_count
        )));
    }
    let mut out = String::with_capacity(digit_count);
    for nibble in data.iter().flat_map(|b| [b >> 4, b & 0x0F]).take(digit_count) {
        if nibble > 9 {
            return Err(PowerCardError::InvalidData(format!(
                "Invalid BCD nibble 0x{:X}",
                nibble
            )));
        }
        out.push(char::from(b'0' + nibble));
    }
    Ok(out)
}

/// Interpret a byte slice as ASCII text
pub fn ascii(data: &[u8]) -> PowerCardResult<&str> {
    if !data.is_ascii() {
        return Err(PowerCardError::InvalidData(
            "Expected ASCII field content".to_string(),
        ));
    }
    std::str::from_utf8(data).map_err(|e| PowerCardError::InvalidData(e.to_string()))
}

/// Mask a PAN for logging, keeping the first six and last four digits
pub fn mask_pan(pan: &str) -> String {
    let digits: Vec<char> = pan.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() <= 10 {
        return "*".repeat(digits.len());
    }
    let head: String = digits[..6].iter().collect();
    let tail: String = digits[digits.len() - 4..].iter().collect();
    format!("{}{}{}", head, "*".repeat(digits.len() - 10), tail)
}
