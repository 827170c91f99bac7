//! Transport layer for the PowerCARD host link
//!
//! This crate provides the stream abstraction and the TCP transport that
//! carries 4-digit length-prefixed messages to and from the host.

pub mod stream;
pub mod tcp;

pub use powercard_core::{PowerCardError, PowerCardResult};
pub use stream::{ConnectionState, LENGTH_PREFIX_LEN, StreamAccessor, TransportLayer, exchange};
pub use tcp::{TcpSettings, TcpTransport};
