use bytes::{Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// A packet being accumulated from the wire.
///
/// The target size is fixed at [`RawFrame::begin`]; appends may never grow
/// the frame past it.
#[derive(Debug)]
pub struct RawFrame {
    buf: BytesMut,
    declared: usize,
}

impl RawFrame {
    /// Start a frame that will hold exactly `declared` bytes.
    pub fn begin(declared: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(declared),
            declared,
        }
    }

    /// Append bytes at the cursor.
    ///
    /// Fails with [`FrameError::Overflow`] and leaves the frame unchanged if
    /// the bytes do not fit.
    pub fn append(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.remaining() {
            return Err(FrameError::Overflow {
                declared: self.declared,
                len: self.buf.len(),
                attempted: bytes.len(),
            });
        }
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.buf.len() == self.declared
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn declared_size(&self) -> usize {
        self.declared
    }

    /// Bytes still missing.
    pub fn remaining(&self) -> usize {
        self.declared - self.buf.len()
    }

    /// Hand the finished frame to the decoder.
    ///
    /// Taking a frame before it is complete is an error, not a truncation.
    pub fn take(self) -> Result<CompleteFrame> {
        if !self.is_complete() {
            return Err(FrameError::Incomplete {
                declared: self.declared,
                len: self.buf.len(),
            });
        }
        Ok(CompleteFrame(self.buf.freeze()))
    }
}

/// Bytes of exactly one packet, as declared by its own `packet_size`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompleteFrame(Bytes);

impl CompleteFrame {
    /// Wrap bytes already known to form one packet, e.g. read from an archive.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}
