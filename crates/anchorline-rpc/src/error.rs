//! Error types for the RPC module.

use thiserror::Error;

use anchorline_store::StoreError;

use crate::messages::ErrorCode;

/// Errors that can occur on an RPC connection.
#[derive(Debug, Error)]
pub enum RpcError {
    /// Socket-level failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A message could not be encoded.
    #[error("encode error: {0}")]
    Encode(String),

    /// A frame could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// A frame header announced more than the allowed length.
    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),

    /// An outgoing message encodes to more than the allowed length. Nothing
    /// was written.
    #[error("message too large: {0} bytes (limit {})", crate::codec::MAX_FRAME_LEN)]
    MessageTooLarge(usize),

    /// The peer closed the connection.
    #[error("connection closed")]
    ConnectionClosed,

    /// The peer speaks a different protocol version.
    #[error("protocol version mismatch: local={local}, peer={peer}")]
    VersionMismatch { local: u8, peer: u8 },

    /// Every connection attempt failed.
    #[error("could not connect to {endpoint} after {attempts} attempt(s): {last}")]
    ConnectFailed {
        endpoint: String,
        attempts: u32,
        last: String,
    },

    /// The peer answered with an error.
    #[error("remote error ({code:?}): {message}")]
    Remote { code: ErrorCode, message: String },

    /// The peer answered with a response of the wrong kind.
    #[error("unexpected response to {0}")]
    UnexpectedResponse(&'static str),
}

impl RpcError {
    /// Whether this error leaves the connection unusable.
    ///
    /// Remote errors are well-formed answers and encode failures happen
    /// before anything is written; the connection stays healthy.
    pub fn is_transport(&self) -> bool {
        !matches!(
            self,
            RpcError::Remote { .. } | RpcError::Encode(_) | RpcError::MessageTooLarge(_)
        )
    }
}

impl From<RpcError> for StoreError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::Remote { code, message } => code.into_store_error(message),
            e @ RpcError::MessageTooLarge(_) => StoreError::InvalidInput(e.to_string()),
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

/// Result type for RPC operations.
pub type Result<T> = std::result::Result<T, RpcError>;
