use std::time::Duration;

use mesak_frame::Category;

/// Errors that can occur in driver operations.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// The operation is not valid in the session's current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A lifecycle lock could not be acquired within its bound.
    ///
    /// Unlike [`DriverError::Timeout`] this is never expected in normal
    /// operation and should be treated as fatal.
    #[error("deadlock: lock not acquired within {0:?}")]
    Deadlock(Duration),

    /// Capacity change attempted while the buffer holds packets.
    #[error("{0} buffer is not empty")]
    QueueBusy(Category),

    /// Buffer capacity must be at least one.
    #[error("invalid buffer capacity {0}")]
    InvalidCapacity(usize),

    /// Nothing buffered for the category.
    #[error("{0} buffer is empty")]
    BufferEmpty(Category),

    /// The buffer was closed or flushed while waiting on it.
    #[error("{0} buffer closed")]
    QueueClosed(Category),

    /// The radar could not be reached or did not answer the handshake.
    #[error("connect to {addr} failed: {reason}")]
    ConnectFailed { addr: String, reason: String },

    /// A blocking operation did not complete in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] mesak_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] mesak_frame::FrameError),

    /// JSON configuration error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Archive I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DriverError>;
