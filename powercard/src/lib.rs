//! PowerCARD host messaging for payment terminals
//!
//! This library builds ISO 8583 messages, carries them to the host inside
//! the PowerCARD envelope over a length-prefixed TCP link, and keeps
//! reversals that could not be delivered in a durable queue until the host
//! settles them.
//!
//! # Architecture
//!
//! - `powercard-core`: error type and hex/BCD helpers
//! - `powercard-iso`: bitmap, field codecs, DE48, request builders, response parser
//! - `powercard-transport`: stream traits and the TCP transport
//! - `powercard-session`: CRC-16, ISO frame, PowerCARD envelope, host session
//! - `powercard-client`: host API, reversal queue and worker, configuration
//!
//! # Usage
//!
//! ```no_run
//! use powercard::client::{IsoHostClient, TerminalConfig};
//! ```

pub use powercard_core::{PowerCardError, PowerCardResult};

pub mod encoding {
    pub use powercard_core::encoding::*;
}

pub mod iso {
    pub use powercard_iso::*;
}

pub mod transport {
    pub use powercard_transport::*;
}

pub mod session {
    pub use powercard_session::*;
}

pub mod client {
    pub use powercard_client::*;
}
