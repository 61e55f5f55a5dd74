//! Error types for Anchorline Core.

use thiserror::Error;

/// Core errors for value construction, encoding and sealing.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("label must not be empty")]
    EmptyLabel,

    #[error("invalid content address: {0}")]
    InvalidAddress(String),

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decoding error: {0}")]
    DecodingError(String),

    #[error("seal error: {0}")]
    SealError(String),

    #[error("sealed text could not be opened")]
    OpenFailed,
}

/// Errors decoding a multipart message into a data item.
///
/// An absent or empty label frame is not an error; it decodes to "no item".
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("expected 3 or 4 frames, got {0}")]
    FrameCount(usize),

    #[error("label is not valid UTF-8")]
    LabelNotUtf8,

    #[error("timestamp frame is empty")]
    EmptyTimestamp,

    #[error("timestamp does not fit in 64 bits ({0} significant bytes)")]
    TimestampOverflow(usize),

    #[error("invalid shape frame: {0}")]
    InvalidShape(String),

    #[error("shape {dims:?} does not describe a payload of {len} bytes")]
    ShapeMismatch { dims: Vec<u32>, len: usize },
}
