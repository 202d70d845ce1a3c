//! Protocol-level error taxonomy.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Failures that can occur while framing or parsing a wire message.
///
/// Every variant here corresponds to `MalformedFrame`: the
/// broker never propagates these out of its event loop, it replies with an
/// `Invalid` service type and keeps running.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("envelope header too short: expected {expected} bytes, got {got}")]
    HeaderTooShort { expected: usize, got: usize },

    #[error("unsupported protocol version: expected {expected}, got {got}")]
    VersionMismatch { expected: u8, got: u8 },

    #[error("unknown service type code: {0}")]
    InvalidServiceType(u8),

    #[error("expected {expected} zmq frames, got {got}")]
    InvalidFrameCount { expected: usize, got: usize },

    #[error("payload length mismatch: header declared {expected}, got {got}")]
    PayloadLengthMismatch { expected: usize, got: usize },

    #[error("malformed ASCII payload: {0}")]
    Malformed(String),
}
