//! Core types and utilities for the PowerCARD host protocol stack
//!
//! This crate provides the error taxonomy shared by every layer and the
//! small digit/hex/BCD helpers the codecs are built from.

pub mod error;
pub mod encoding;

pub use error::{PowerCardError, PowerCardResult};
