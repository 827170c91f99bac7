//! ISO 8583 message layer for the PowerCARD host
//!
//! This crate builds and parses the application data carried inside a
//! PowerCARD frame: MTI, primary bitmap and the data elements this terminal
//! exchanges with its host.
//!
//! Request builders never fail loudly. They return an empty buffer and log
//! the reason, and the caller must not send an empty message. Parsers return
//! `None` on any protocol violation.

pub mod bitmap;
pub mod builder;
pub mod de48;
pub mod field;
pub mod mti;
pub mod response;
pub mod stan;

pub use bitmap::Bitmap;
pub use builder::{
    AuthorizationRequest, DataElement, DataElementSet, De48Options, NetworkManagementRequest,
    ReversalRequest, build_authorization_request, build_de48_for_authorization,
    build_network_management_request, build_reversal_request,
};
pub use de48::{SubElement, build_de48, parse_de48};
pub use mti::Mti;
pub use response::{
    NetworkManagementResponse, ParsedResponse, parse_network_management_response, parse_response,
};
pub use stan::{StanGenerator, synthetic_stan};
