//! Error types for the replay control plane.

use std::io;

use crate::Protocol::MessageType;

/// Crate result type
pub type Result<T> = std::result::Result<T, ReplayError>;

/// Framing and decoding failures. On a live channel every one of these means
/// the two sides are out of sync, and the receiving process aborts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// Declared frame size is smaller than the fixed header.
    #[error("message size {size} is smaller than the {header} byte header")]
    SizeTooSmall { size: u32, header: usize },

    /// Type tag outside the known catalog.
    #[error("unknown message type {0}")]
    UnknownType(u16),

    /// Fewer bytes than the header declared.
    #[error("message truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    /// Encoded size does not fit the 32-bit size field.
    #[error("message of {size} bytes exceeds the {max} byte frame limit")]
    TooLarge { size: usize, max: usize },

    /// Payload does not match the layout of its type.
    #[error("malformed {kind:?} payload: {reason}")]
    MalformedPayload {
        kind: MessageType,
        reason: &'static str,
    },
}

/// Crate-level error.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The mainline execution needs recording data that has not arrived and
    /// everything received has already been consumed.
    #[error("hit end of recording ({length} bytes)")]
    EndOfRecording { length: usize },

    #[error("missing launch argument {0}")]
    MissingArgument(&'static str),

    #[error("invalid value for {name}: {value:?}")]
    InvalidArgument { name: &'static str, value: String },

    #[error("offline recording directory is not configured (set WEBREPLAY_OFFLINE)")]
    OfflineDirectoryUnset,

    #[error("no recording name is configured")]
    RecordingNameUnset,

    #[error("{operation} is not available in this process role")]
    WrongRole { operation: &'static str },
}
