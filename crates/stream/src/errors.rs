//! Streaming error types
//!
//! Every failure the subsystem observes ends up, as one of these values, in
//! the caller's error handler. Variants are `Clone` so the same error can be
//! logged, counted and handed to the caller.

use std::time::Duration;
use thiserror::Error;

/// Result type for streaming operations
pub type Result<T> = std::result::Result<T, StreamError>;

/// Streaming errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StreamError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Connection closed by remote (code {code}): {reason}")]
    ConnectionClosed { code: u16, reason: String },

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Subscribe failed: {0}")]
    SubscribeFailed(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("No activity for {}ms, connection considered dead", idle.as_millis())]
    IdleTimeout { idle: Duration },

    #[error("Connection attempt {attempt} failed ({cause}); reconnecting in {}ms", delay.as_millis())]
    ReconnectPending {
        attempt: u32,
        delay: Duration,
        cause: String,
    },

    #[error("Giving up after {attempts} consecutive failed attempts: {last_error}")]
    MaxAttemptsExceeded { attempts: u32, last_error: String },

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Not connected")]
    NotConnected,
}

impl StreamError {
    /// Failures the supervisor recovers from by reconnecting
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NetworkError(_)
                | Self::HandshakeFailed(_)
                | Self::ProtocolError(_)
                | Self::ConnectionClosed { .. }
                | Self::Timeout(_)
                | Self::SubscribeFailed(_)
                | Self::IdleTimeout { .. }
                | Self::NotConnected
        )
    }

    /// Errors after which the supervisor has stopped for good
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::MaxAttemptsExceeded { .. })
    }
}

impl From<serde_json::Error> for StreamError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

impl From<url::ParseError> for StreamError {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for StreamError {
    fn from(err: std::io::Error) -> Self {
        Self::NetworkError(err.to_string())
    }
}
