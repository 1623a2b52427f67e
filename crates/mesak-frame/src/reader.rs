use std::io::{ErrorKind, Read};
use std::time::Duration;

use bytes::{Buf, BytesMut};
use mesak_transport::{Link, TransportError};

use crate::assembler::{CompleteFrame, RawFrame};
use crate::category::Category;
use crate::codec::decode;
use crate::error::{FrameError, Result};
use crate::layout::read_u32_at;
use crate::packet::TypedPacket;

const INITIAL_BUFFER_CAPACITY: usize = 64 * 1024;
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Reads packets of one category from any `Read` stream.
///
/// Handles partial reads internally. When the stream is not positioned on a
/// packet tag, bytes are skipped up to the next candidate tag. A timed-out
/// read keeps the partial packet, so the next call resumes where this one
/// stopped.
pub struct PacketReader<T> {
    inner: T,
    category: Category,
    scan: BytesMut,
    frame: Option<RawFrame>,
    skipped: u64,
}

impl<T: Read> PacketReader<T> {
    pub fn new(inner: T, category: Category) -> Self {
        Self {
            inner,
            category,
            scan: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            frame: None,
            skipped: 0,
        }
    }

    pub fn category(&self) -> Category {
        self.category
    }

    /// Read and decode the next packet (blocking).
    ///
    /// Malformed packets are consumed and reported with a recoverable
    /// error; calling again continues with the following bytes.
    pub fn read_packet(&mut self) -> Result<TypedPacket> {
        let frame = self.read_frame()?;
        decode(frame, self.category)
    }

    /// Read the next complete frame without decoding it.
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached.
    pub fn read_frame(&mut self) -> Result<CompleteFrame> {
        loop {
            if let Some(frame) = self.assemble()? {
                return Ok(frame);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                return Err(FrameError::ConnectionClosed);
            }

            self.scan.extend_from_slice(&chunk[..read]);
        }
    }

    /// Total bytes discarded while searching for packet tags.
    pub fn skipped_bytes(&self) -> u64 {
        self.skipped
    }

    /// True when no buffered bytes or partial packet are pending.
    pub fn is_idle(&self) -> bool {
        self.scan.is_empty() && self.frame.is_none()
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    fn assemble(&mut self) -> Result<Option<CompleteFrame>> {
        if self.frame.is_none() && !self.locate_start()? {
            return Ok(None);
        }
        let Some(frame) = self.frame.as_mut() else {
            return Ok(None);
        };

        let take = frame.remaining().min(self.scan.len());
        let bytes = self.scan.split_to(take);
        frame.append(&bytes)?;

        if !frame.is_complete() {
            return Ok(None);
        }
        match self.frame.take() {
            Some(frame) => frame.take().map(Some),
            None => Ok(None),
        }
    }

    /// Position the scan buffer on a tag and begin a frame.
    ///
    /// Returns `Ok(false)` when more bytes are needed.
    fn locate_start(&mut self) -> Result<bool> {
        let category = self.category;
        let marker = category.marker();

        loop {
            if self.scan.is_empty() {
                return Ok(false);
            }

            let prefix = self.scan.len().min(marker.len());
            if self.scan[..prefix] != marker[..prefix] {
                let skip = self.scan[1..]
                    .iter()
                    .position(|&b| b == marker[0])
                    .map_or(self.scan.len(), |pos| pos + 1);
                self.discard(skip);
                continue;
            }

            if self.scan.len() < category.start_size() {
                return Ok(false);
            }

            let size = read_u32_at(&self.scan, category.tag_width()) as usize;
            let (min, max) = (category.min_packet_size(), category.max_packet_size());
            if size < min || size > max {
                self.discard(1);
                return Err(FrameError::InvalidPacketSize {
                    category,
                    size,
                    min,
                    max,
                });
            }

            self.frame = Some(RawFrame::begin(size));
            return Ok(true);
        }
    }

    fn discard(&mut self, count: usize) {
        tracing::trace!(category = %self.category, count, "skipping bytes to next tag");
        self.scan.advance(count);
        self.skipped += count as u64;
    }
}

impl<T: Link> PacketReader<T> {
    /// Create a packet reader and apply `timeout` to every read.
    pub fn with_read_timeout(
        inner: T,
        category: Category,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        inner
            .set_read_timeout(timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::new(inner, category))
    }
}

fn transport_to_frame_error(err: TransportError) -> FrameError {
    match err {
        TransportError::Io(io) => FrameError::Io(io),
        TransportError::Connect { source, .. } => FrameError::Io(source),
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}
