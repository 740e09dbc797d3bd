//! Crate-wide error type.
//!
//! Codec, modem and wormhole code all return `Result<T, Error>`. The
//! application boundary (`main.rs`, config loading) keeps using `anyhow`
//! to attach ad-hoc context without forcing every caller through this enum.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("value {value} out of range for {field} ({min}..={max})")]
    OutOfRange {
        field: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("byte value {0} is not a valid byte (0..=255)")]
    NotAByte(i64),

    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),

    #[error("missing key: {0}")]
    MissingKey(&'static str),

    #[error("operation timed out")]
    Timeout,

    #[error("transport failed: {0}")]
    TransportFailed(String),

    #[error("remote error {code}: {message}")]
    RemoteError { code: i64, message: String },

    #[error("invalid MType: 0x{0:02x}")]
    InvalidMType(u8),
}

pub type Result<T> = std::result::Result<T, Error>;
