//! Per-category wire layouts.
//!
//! Each category is a zero-sized marker type implementing [`Layout`]; its
//! tag, header size and record bounds are associated constants.

use std::fmt;

use bytes::{Buf, BufMut, BytesMut};
use serde::Serialize;

use crate::category::Category;
use crate::packet::{Header, OwnedPacket, Packet};

pub use crate::packet::detection::DetectionLayout as Detection;
pub use crate::packet::measurement::MeasurementLayout as Measurement;
pub use crate::packet::rvmap::RvmapLayout as Rvmap;
pub use crate::packet::status::StatusLayout as Status;
pub use crate::packet::track::TrackLayout as Track;

/// Fixed binary layout of one packet category.
///
/// `read_header` and `read_record` are only called on slices already
/// checked to hold `HEADER_SIZE` / `RECORD_SIZE` bytes.
pub trait Layout:
    Copy + Clone + fmt::Debug + PartialEq + Send + Sync + Sized + 'static
{
    const CATEGORY: Category;
    /// ASCII marker at the start of the tag field.
    const MARKER: &'static [u8];
    const TAG_WIDTH: usize;
    const HEADER_SIZE: usize;
    const RECORD_SIZE: usize;
    const MAX_RECORDS: usize;

    type Header: Clone + fmt::Debug + PartialEq + Serialize + Send + Sync + 'static;
    type Record: Clone + fmt::Debug + PartialEq + Serialize + Send + Sync + 'static;

    /// Number of records the header announces. May exceed `MAX_RECORDS`.
    fn declared_count(header: &[u8]) -> usize;

    fn read_header(src: &mut &[u8]) -> Self::Header;

    fn read_record(src: &mut &[u8]) -> Self::Record;

    /// Write a header for a packet of `packet_size` bytes holding `count` records.
    fn write_header(header: &Self::Header, packet_size: u32, count: usize, dst: &mut BytesMut);

    fn write_record(record: &Self::Record, dst: &mut BytesMut);

    fn wrap_header(header: Self::Header) -> Header;

    fn unwrap_header(header: &Header) -> Option<&Self::Header>;

    fn wrap_packet(packet: Packet<Self>) -> OwnedPacket;
}

/// Read a NUL-padded ASCII tag field.
pub(crate) fn read_tag(src: &mut &[u8], width: usize) -> String {
    let field = &src[..width];
    let end = field.iter().position(|&b| b == 0).unwrap_or(width);
    let tag = String::from_utf8_lossy(&field[..end]).into_owned();
    src.advance(width);
    tag
}

/// Write `marker` NUL-padded to `width`.
pub(crate) fn write_tag(marker: &[u8], width: usize, dst: &mut BytesMut) {
    let len = marker.len().min(width);
    dst.put_slice(&marker[..len]);
    dst.put_bytes(0, width - len);
}

/// Read a fixed-width NUL-terminated text field.
pub(crate) fn read_text(src: &mut &[u8], width: usize) -> String {
    read_tag(src, width)
}

/// Write text truncated or NUL-padded to `width`.
pub(crate) fn write_text(text: &str, width: usize, dst: &mut BytesMut) {
    write_tag(text.as_bytes(), width, dst);
}

pub(crate) fn read_f32s<const N: usize>(src: &mut &[u8]) -> [f32; N] {
    let mut out = [0f32; N];
    for value in out.iter_mut() {
        *value = src.get_f32_le();
    }
    out
}

pub(crate) fn write_f32s(values: &[f32], dst: &mut BytesMut) {
    for value in values {
        dst.put_f32_le(*value);
    }
}

pub(crate) fn read_u32_at(src: &[u8], offset: usize) -> u32 {
    let mut field = &src[offset..offset + 4];
    field.get_u32_le()
}

pub(crate) fn read_f32_at(src: &[u8], offset: usize) -> f32 {
    let mut field = &src[offset..offset + 4];
    field.get_f32_le()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_roundtrip_strips_padding() {
        let mut dst = BytesMut::new();
        write_tag(b"<track>", 12, &mut dst);
        assert_eq!(dst.len(), 12);

        let mut src = &dst[..];
        assert_eq!(read_tag(&mut src, 12), "<track>");
        assert!(src.is_empty());
    }

    #[test]
    fn oversized_text_is_truncated_to_width() {
        let mut dst = BytesMut::new();
        write_text("ECHOGUARD-0001", 8, &mut dst);
        assert_eq!(&dst[..], b"ECHOGUAR");
    }

    #[test]
    fn record_sizes_match_device_structs() {
        assert_eq!(Status::HEADER_SIZE, 36);
        assert_eq!(Status::RECORD_SIZE, 316);
        assert_eq!(Rvmap::HEADER_SIZE, 108);
        assert_eq!(Detection::HEADER_SIZE, 44);
        assert_eq!(Detection::RECORD_SIZE, 64);
        assert_eq!(Track::HEADER_SIZE, 40);
        assert_eq!(Track::RECORD_SIZE, 128);
        assert_eq!(Measurement::HEADER_SIZE, 64);
        assert_eq!(Measurement::RECORD_SIZE, 380);
    }
}
