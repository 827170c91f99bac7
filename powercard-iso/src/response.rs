//! Response parsers
//!
//! Parsing walks the bitmap in ascending field order and reads each present
//! field with its known format. A present field whose format this terminal
//! does not know stops the parse: its length cannot be inferred, and guessing
//! would misalign every field after it. Fields beyond the last one of
//! interest are never touched.

use crate::bitmap::Bitmap;
use crate::field::{FieldFormat, FieldReader};
use crate::mti::Mti;
use powercard_core::encoding::{ascii, bytes_to_hex};
use powercard_core::{PowerCardError, PowerCardResult};

/// Response code meaning approved
pub const APPROVED: &str = "00";

/// Network management action code meaning success
pub const NETWORK_SUCCESS: &str = "800";

/// Field formats of 0110/0410/1210 responses
fn response_format(field: u8) -> Option<FieldFormat> {
    match field {
        2 => Some(FieldFormat::LlBcd),
        3 => Some(FieldFormat::Ascii(6)),
        4 => Some(FieldFormat::Ascii(12)),
        7 => Some(FieldFormat::Ascii(10)),
        11 => Some(FieldFormat::Ascii(6)),
        12 => Some(FieldFormat::Ascii(6)),
        13 => Some(FieldFormat::Ascii(4)),
        22 => Some(FieldFormat::Ascii(3)),
        37 => Some(FieldFormat::Ascii(12)),
        38 => Some(FieldFormat::Ascii(6)),
        39 => Some(FieldFormat::Ascii(2)),
        41 => Some(FieldFormat::Ascii(8)),
        42 => Some(FieldFormat::Ascii(15)),
        48 => Some(FieldFormat::LllAscii),
        49 => Some(FieldFormat::Ascii(3)),
        55 => Some(FieldFormat::LllBinary),
        _ => None,
    }
}

/// Field formats of 1814 network management responses
fn network_format(field: u8) -> Option<FieldFormat> {
    match field {
        7 => Some(FieldFormat::Ascii(10)),
        11 => Some(FieldFormat::Ascii(6)),
        12 => Some(FieldFormat::Ascii(12)),
        24 => Some(FieldFormat::Ascii(3)),
        37 => Some(FieldFormat::Ascii(12)),
        39 => Some(FieldFormat::Ascii(3)),
        _ => None,
    }
}

/// Decoded authorization or reversal response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedResponse {
    pub mti: Mti,
    /// DE37
    pub rrn: Option<String>,
    /// DE38
    pub auth_code: Option<String>,
    /// DE39
    pub response_code: Option<String>,
    /// DE55 as hex
    pub icc_data: Option<String>,
    pub approved: bool,
}

/// Decoded network management response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkManagementResponse {
    pub mti: Mti,
    /// DE24
    pub function_code: Option<String>,
    /// DE39
    pub action_code: Option<String>,
    /// DE37
    pub rrn: Option<String>,
    /// DE12 (YYMMDDhhmmss), the host clock
    pub transmission_time: Option<String>,
    pub success: bool,
}

struct Header<'a> {
    mti: Mti,
    bitmap: Bitmap,
    reader: FieldReader<'a>,
}

fn read_header(data: &[u8]) -> PowerCardResult<Header<'_>> {
    if data.len() < 12 {
        return Err(PowerCardError::Protocol(format!(
            "Application data of {} bytes is shorter than MTI and bitmap",
            data.len()
        )));
    }
    let mut reader = FieldReader::new(data);
    let mti = Mti::from_bytes(reader.take(4)?)?;
    let mut bitmap_bytes = [0u8; 8];
    bitmap_bytes.copy_from_slice(reader.take(8)?);
    let bitmap = Bitmap::from_bytes(bitmap_bytes);
    // Bit 1 announces an 8-byte secondary bitmap ahead of DE2
    if bitmap.has_secondary() {
        reader.take(8)?;
    }
    Ok(Header { mti, bitmap, reader })
}

/// Walk present fields up to `last`, calling `visit` with each value
fn walk<'a>(
    bitmap: &Bitmap,
    reader: &mut FieldReader<'a>,
    last: u8,
    format_of: fn(u8) -> Option<FieldFormat>,
    mut visit: impl FnMut(u8, &'a [u8]) -> PowerCardResult<()>,
) -> PowerCardResult<()> {
    for field in bitmap.fields().into_iter().filter(|f| (2..=last).contains(f)) {
        let format = format_of(field).ok_or_else(|| {
            PowerCardError::Protocol(format!("DE{} present but its format is unknown", field))
        })?;
        let value = reader.read(format)?;
        visit(field, value)?;
    }
    Ok(())
}

fn text(value: &[u8]) -> PowerCardResult<String> {
    Ok(ascii(value)?.to_string())
}

/// Parse 0110/0410/1210 application data; `None` on any violation
///
/// `expected_mti` only labels diagnostics; a different MTI is logged but still
/// parsed.
pub fn parse_response(data: &[u8], expected_mti: &str) -> Option<ParsedResponse> {
    match try_parse_response(data) {
        Ok(response) => {
            if response.mti.as_str() != expected_mti {
                log::warn!("Expected {} response, received {}", expected_mti, response.mti);
            }
            Some(response)
        }
        Err(e) => {
            log::error!("Failed to parse {} response: {}", expected_mti, e);
            None
        }
    }
}

pub fn try_parse_response(data: &[u8]) -> PowerCardResult<ParsedResponse> {
    let Header { mti, bitmap, mut reader } = read_header(data)?;
    let mut response = ParsedResponse {
        mti,
        rrn: None,
        auth_code: None,
        response_code: None,
        icc_data: None,
        approved: false,
    };
    walk(&bitmap, &mut reader, 55, response_format, |field, value| {
        match field {
            37 => response.rrn = Some(text(value)?),
            38 => response.auth_code = Some(text(value)?),
            39 => response.response_code = Some(text(value)?),
            55 => response.icc_data = Some(bytes_to_hex(value)),
            _ => {}
        }
        Ok(())
    })?;
    response.approved = response.response_code.as_deref() == Some(APPROVED);
    log::debug!(
        "Parsed {} response code {:?}",
        response.mti,
        response.response_code
    );
    Ok(response)
}

/// Parse 1814 application data; `None` on any violation
pub fn parse_network_management_response(data: &[u8]) -> Option<NetworkManagementResponse> {
    match try_parse_network_management_response(data) {
        Ok(response) => Some(response),
        Err(e) => {
            log::error!("Failed to parse network management response: {}", e);
            None
        }
    }
}

pub fn try_parse_network_management_response(
    data: &[u8],
) -> PowerCardResult<NetworkManagementResponse> {
    let Header { mti, bitmap, mut reader } = read_header(data)?;
    let mut response = NetworkManagementResponse {
        mti,
        function_code: None,
        action_code: None,
        rrn: None,
        transmission_time: None,
        success: false,
    };
    walk(&bitmap, &mut reader, 39, network_format, |field, value| {
        match field {
            12 => response.transmission_time = Some(text(value)?),
            24 => response.function_code = Some(text(value)?),
            37 => response.rrn = Some(text(value)?),
            39 => response.action_code = Some(text(value)?),
            _ => {}
        }
        Ok(())
    })?;
    response.success = response.action_code.as_deref() == Some(NETWORK_SUCCESS);
    Ok(response)
}
