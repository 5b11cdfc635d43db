//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering every way a wire payload can be malformed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    // Primitive decoding errors
    /// The payload ended before a field could be read.
    #[error("payload truncated: need {needed} bytes, have {remaining}")]
    Truncated {
        /// Bytes required by the field being decoded.
        needed: usize,
        /// Bytes left in the payload.
        remaining: usize,
    },

    /// A string field did not contain valid UTF-8.
    #[error("string field is not valid UTF-8")]
    InvalidUtf8,

    /// A boolean field held a value other than 0 or 1.
    #[error("invalid boolean value: {0}")]
    InvalidBool(u8),

    /// Bytes remained after every field was decoded.
    #[error("junk at end of payload: {0} trailing bytes")]
    TrailingBytes(usize),

    // Field validation errors
    /// A port number does not fit in 16 bits.
    #[error("port out of range: {0}")]
    InvalidPort(u32),

    // SCP control-line errors
    /// The control line does not have the expected shape.
    #[error("invalid control message {line:?}: {reason}")]
    InvalidControlMessage {
        /// The offending line, trimmed.
        line: String,
        /// What was wrong with it.
        reason: String,
    },

    /// The permission field of a control line is not octal.
    #[error("invalid file mode {0:?}")]
    InvalidMode(String),

    /// The size field of a control line is not a decimal integer.
    #[error("invalid file size {0:?}")]
    InvalidSize(String),
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
