use std::time::Duration;

/// Errors that can occur in radar transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The address could not be resolved to any socket address.
    #[error("invalid address {addr}: {reason}")]
    InvalidAddress { addr: String, reason: String },

    /// Failed to connect to the specified address.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    /// No address answered within the connect timeout.
    #[error("connect to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The remote end closed the stream.
    #[error("connection closed by radar")]
    Closed,
}

impl TransportError {
    /// True when the error is a read/write timeout rather than a broken stream.
    pub fn is_timeout(&self) -> bool {
        match self {
            TransportError::ConnectTimeout { .. } => true,
            TransportError::Io(err) => is_timeout_kind(err.kind()),
            _ => false,
        }
    }
}

/// `WouldBlock` and `TimedOut` both signal an expired socket timeout,
/// depending on the platform.
pub fn is_timeout_kind(kind: std::io::ErrorKind) -> bool {
    matches!(
        kind,
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}

pub type Result<T> = std::result::Result<T, TransportError>;
