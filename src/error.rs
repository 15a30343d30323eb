//! Error types for the ARQ engine

use thiserror::Error;

/// Result type for ARQ operations
pub type Result<T> = std::result::Result<T, ArqError>;

/// Error taxonomy for the ARQ protocol engine.
///
/// Only `LinkDead` and `InvalidHandle` are fatal for a connection; the
/// remaining variants leave the connection in a usable state.
#[derive(Error, Debug)]
pub enum ArqError {
    /// Corrupt or truncated segment in an inbound datagram. Dropped by
    /// `input`; surfaced only by the codec itself.
    #[error("malformed segment: {reason}")]
    MalformedSegment { reason: &'static str },

    /// Send window is at capacity. Backpressure signal; retry after
    /// acknowledgments free space.
    #[error("send window full: {in_flight} of {capacity} segments unacknowledged")]
    WindowFull { in_flight: usize, capacity: usize },

    /// A segment exhausted its retransmission budget. The connection is
    /// dead and should be released.
    #[error("link dead: segment {sn} exceeded {max_retries} retransmissions")]
    LinkDead { sn: u32, max_retries: u32 },

    /// Out-of-range MTU, window, or delay parameters. Prior configuration
    /// is retained.
    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    /// Stale or released connection handle.
    #[error("invalid connection handle")]
    InvalidHandle,
}

impl ArqError {
    /// Create a malformed-segment error
    pub fn malformed(reason: &'static str) -> Self {
        ArqError::MalformedSegment { reason }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        ArqError::InvalidConfiguration {
            message: message.into(),
        }
    }

    /// Check if this error is fatal for the connection
    pub fn is_fatal(&self) -> bool {
        matches!(self, ArqError::LinkDead { .. } | ArqError::InvalidHandle)
    }

    /// Check if this error is a retry-later backpressure signal
    pub fn is_backpressure(&self) -> bool {
        matches!(self, ArqError::WindowFull { .. })
    }
}
