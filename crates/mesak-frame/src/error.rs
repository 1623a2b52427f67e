use crate::category::Category;

/// Errors that can occur while assembling or decoding packets.
///
/// Wire-data errors (`BadTag`, `InvalidPacketSize`, `Truncated`,
/// `SizeMismatch`, `CountOutOfBounds`) only ever cost the offending packet;
/// see [`FrameError::is_recoverable`].
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Appending would grow a frame past its declared size.
    #[error("frame overflow: {attempted} more bytes into {len}/{declared}")]
    Overflow {
        declared: usize,
        len: usize,
        attempted: usize,
    },

    /// A frame was taken before all declared bytes arrived.
    #[error("frame incomplete: {len}/{declared} bytes")]
    Incomplete { declared: usize, len: usize },

    /// The tag field does not carry the category marker.
    #[error("{category} packet has a foreign tag")]
    BadTag { category: Category },

    /// The declared packet size cannot describe a packet of this category.
    #[error("{category} packet size {size} outside {min}..={max}")]
    InvalidPacketSize {
        category: Category,
        size: usize,
        min: usize,
        max: usize,
    },

    /// Fewer bytes than a full header.
    #[error("{category} packet truncated ({len} bytes, header needs {need})")]
    Truncated {
        category: Category,
        len: usize,
        need: usize,
    },

    /// `packet_size` disagrees with the frame length or the record count.
    #[error("{category} packet_size {declared} does not match {expected}")]
    SizeMismatch {
        category: Category,
        declared: usize,
        expected: usize,
    },

    /// Record count field exceeds the category maximum.
    #[error("{category} record count {count} exceeds max {max}")]
    CountOutOfBounds {
        category: Category,
        count: usize,
        max: usize,
    },

    /// Typed access requested for a different category.
    #[error("packet is {actual}, not {expected}")]
    WrongCategory {
        expected: Category,
        actual: Category,
    },

    /// An I/O error occurred while reading packets.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream was closed before a complete packet was received.
    #[error("connection closed (incomplete packet)")]
    ConnectionClosed,
}

impl FrameError {
    /// True for malformed wire data: the packet is dropped and reading
    /// continues from the next tag.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FrameError::BadTag { .. }
                | FrameError::InvalidPacketSize { .. }
                | FrameError::Truncated { .. }
                | FrameError::SizeMismatch { .. }
                | FrameError::CountOutOfBounds { .. }
        )
    }

    /// True when a read timed out with no complete packet available.
    pub fn is_timeout(&self) -> bool {
        match self {
            FrameError::Io(err) => mesak_transport::is_timeout_kind(err.kind()),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
