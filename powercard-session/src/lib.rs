//! Session layer for the PowerCARD host link
//!
//! A request travels as
//! `length prefix | "ISO" | PowerCARD header | poll | control | TPDU | ISO 8583 data | CRC`.
//! This crate owns everything between the transport's length prefix and the
//! ISO 8583 application data.

pub mod crc;
pub mod envelope;
pub mod frame;
pub mod session;
pub mod statistics;

pub use crc::{Crc16, crc16};
pub use envelope::{Envelope, POWERCARD_HEADER_LENGTH, PROTOCOL_ID, PowerCardHeader};
pub use frame::{FramerSettings, ISO_HEADER_LENGTH, IsoFrame};
pub use powercard_core::{PowerCardError, PowerCardResult};
pub use session::HostSession;
pub use statistics::SessionStatistics;
