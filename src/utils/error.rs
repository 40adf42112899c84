use std::io::Error as IoError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Handshake error: {0}")]
    HandshakeBad(String),

    #[error("Authentication rejected: {0}")]
    AuthError(String),

    #[error("Publish rejected: {0}")]
    PublishRejected(String),

    #[error("Protocol desync: {0}")]
    ProtocolDesync(String),

    #[error("AMF decode error: {0}")]
    AmfDecode(String),

    #[error("AMF encode error: {0}")]
    AmfEncode(String),

    #[error("Chunk error: {0}")]
    Chunk(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Encoder failed: {0}")]
    EncoderFailed(String),

    #[error("Timeout: {0}")]
    Timeout(String),
}

impl Error {
    /// Create an IO error from a message
    pub fn io(msg: impl Into<String>) -> Self {
        Error::Io(IoError::other(msg.into()))
    }

    /// Create an invalid-input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    /// Create a TLS error
    pub fn tls(msg: impl Into<String>) -> Self {
        Error::Tls(msg.into())
    }

    /// Create a handshake error
    pub fn handshake_bad(msg: impl Into<String>) -> Self {
        Error::HandshakeBad(msg.into())
    }

    /// Create an authentication error
    pub fn auth(msg: impl Into<String>) -> Self {
        Error::AuthError(msg.into())
    }

    /// Create a publish-rejected error
    pub fn publish_rejected(msg: impl Into<String>) -> Self {
        Error::PublishRejected(msg.into())
    }

    /// Create a protocol-desync error
    pub fn desync(msg: impl Into<String>) -> Self {
        Error::ProtocolDesync(msg.into())
    }

    /// Create an AMF decode error
    pub fn amf_decode(msg: impl Into<String>) -> Self {
        Error::AmfDecode(msg.into())
    }

    /// Create an AMF encode error
    pub fn amf_encode(msg: impl Into<String>) -> Self {
        Error::AmfEncode(msg.into())
    }

    /// Create a chunk error
    pub fn chunk(msg: impl Into<String>) -> Self {
        Error::Chunk(msg.into())
    }

    /// Create an invalid-state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Error::InvalidState(msg.into())
    }

    /// Create an encoder error
    pub fn encoder(msg: impl Into<String>) -> Self {
        Error::EncoderFailed(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Error::Timeout(msg.into())
    }

    /// True when reconnecting may clear the condition
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::Tls(_)
                | Error::HandshakeBad(_)
                | Error::AuthError(_)
                | Error::PublishRejected(_)
                | Error::ProtocolDesync(_)
                | Error::Timeout(_)
        )
    }
}

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;
