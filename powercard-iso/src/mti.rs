//! Message Type Indicators used by the terminal

use powercard_core::{PowerCardError, PowerCardResult};
use std::fmt;

/// Message Type Indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mti {
    AuthorizationRequest,
    AuthorizationResponse,
    ReversalRequest,
    ReversalResponse,
    FinancialResponse,
    NetworkManagementRequest,
    NetworkManagementResponse,
}

impl Mti {
    /// The four ASCII digits sent on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            Mti::AuthorizationRequest => "0100",
            Mti::AuthorizationResponse => "0110",
            Mti::ReversalRequest => "0400",
            Mti::ReversalResponse => "0410",
            Mti::FinancialResponse => "1210",
            Mti::NetworkManagementRequest => "1804",
            Mti::NetworkManagementResponse => "1814",
        }
    }

    /// Parse the four MTI bytes at the head of application data
    pub fn from_bytes(data: &[u8]) -> PowerCardResult<Self> {
        match data {
            b"0100" => Ok(Mti::AuthorizationRequest),
            b"0110" => Ok(Mti::AuthorizationResponse),
            b"0400" => Ok(Mti::ReversalRequest),
            b"0410" => Ok(Mti::ReversalResponse),
            b"1210" => Ok(Mti::FinancialResponse),
            b"1804" => Ok(Mti::NetworkManagementRequest),
            b"1814" => Ok(Mti::NetworkManagementResponse),
            other => Err(PowerCardError::Protocol(format!(
                "Unsupported MTI: {:02X?}",
                other
            ))),
        }
    }

    /// Whether this MTI uses the 1993 (version 1) field layout
    pub fn is_1993(&self) -> bool {
        self.as_str().starts_with('1')
    }
}

impl fmt::Display for Mti {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
