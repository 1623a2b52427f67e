//! Decoded packet views and owned packets.

pub mod detection;
pub mod measurement;
pub mod rvmap;
pub mod status;
pub mod track;

use std::marker::PhantomData;

use bytes::Bytes;
use serde::Serialize;

use crate::category::Category;
use crate::error::{FrameError, Result};
use crate::layout::{self, Layout};

pub use detection::{Detection, DetectionHeader};
pub use measurement::{Measurement, MeasurementHeader};
pub use rvmap::RvmapHeader;
pub use status::{StatusData, StatusHeader};
pub use track::{Track, TrackHeader};

/// Parsed header of any category.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "category", rename_all = "lowercase")]
pub enum Header {
    Status(StatusHeader),
    Rvmap(RvmapHeader),
    Detection(DetectionHeader),
    Track(TrackHeader),
    Measurement(MeasurementHeader),
}

impl Header {
    pub fn category(&self) -> Category {
        match self {
            Header::Status(_) => Category::Status,
            Header::Rvmap(_) => Category::Rvmap,
            Header::Detection(_) => Category::Detection,
            Header::Track(_) => Category::Track,
            Header::Measurement(_) => Category::Measurement,
        }
    }

    pub fn tag(&self) -> &str {
        match self {
            Header::Status(h) => &h.tag,
            Header::Rvmap(h) => &h.tag,
            Header::Detection(h) => &h.tag,
            Header::Track(h) => &h.tag,
            Header::Measurement(h) => &h.tag,
        }
    }

    /// Declared size of the whole packet in bytes.
    pub fn packet_size(&self) -> u32 {
        match self {
            Header::Status(h) => h.packet_size,
            Header::Rvmap(h) => h.packet_size,
            Header::Detection(h) => h.packet_size,
            Header::Track(h) => h.packet_size,
            Header::Measurement(h) => h.packet_size,
        }
    }
}

/// A fully owned packet: header plus exactly its declared records.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(bound = "")]
pub struct Packet<L: Layout> {
    pub header: L::Header,
    pub records: Vec<L::Record>,
    #[serde(skip)]
    layout: PhantomData<L>,
}

impl<L: Layout> Packet<L> {
    pub fn new(header: L::Header, records: Vec<L::Record>) -> Self {
        Self {
            header,
            records,
            layout: PhantomData,
        }
    }

    pub fn category(&self) -> Category {
        L::CATEGORY
    }
}

pub type StatusPacket = Packet<layout::Status>;
pub type RvmapPacket = Packet<layout::Rvmap>;
pub type DetectionPacket = Packet<layout::Detection>;
pub type TrackPacket = Packet<layout::Track>;
pub type MeasurementPacket = Packet<layout::Measurement>;

impl StatusPacket {
    /// The single status record.
    pub fn data(&self) -> Option<&StatusData> {
        self.records.first()
    }
}

impl RvmapPacket {
    /// Range-velocity map cells, row-major by range bin.
    pub fn cells(&self) -> &[u32] {
        &self.records
    }
}

/// Owned packet of any category, safe to send across threads or serialize.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OwnedPacket {
    Status(StatusPacket),
    Rvmap(RvmapPacket),
    Detection(DetectionPacket),
    Track(TrackPacket),
    Measurement(MeasurementPacket),
}

impl OwnedPacket {
    pub fn category(&self) -> Category {
        match self {
            OwnedPacket::Status(_) => Category::Status,
            OwnedPacket::Rvmap(_) => Category::Rvmap,
            OwnedPacket::Detection(_) => Category::Detection,
            OwnedPacket::Track(_) => Category::Track,
            OwnedPacket::Measurement(_) => Category::Measurement,
        }
    }

    /// Number of records carried (map cells for rvmap).
    pub fn record_count(&self) -> usize {
        match self {
            OwnedPacket::Status(p) => p.records.len(),
            OwnedPacket::Rvmap(p) => p.records.len(),
            OwnedPacket::Detection(p) => p.records.len(),
            OwnedPacket::Track(p) => p.records.len(),
            OwnedPacket::Measurement(p) => p.records.len(),
        }
    }
}

/// Validated view over one complete packet.
///
/// Holds the packet's bytes without copying them; the header is parsed up
/// front and records are parsed on demand. For rvmap the records are the
/// cells of the single map.
#[derive(Debug, Clone)]
pub struct TypedPacket {
    pub(crate) frame: Bytes,
    pub(crate) header: Header,
    pub(crate) count: usize,
}

impl TypedPacket {
    pub fn category(&self) -> Category {
        self.header.category()
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Number of records following the header.
    pub fn count(&self) -> usize {
        self.count
    }

    /// The complete wire bytes of the packet.
    pub fn as_bytes(&self) -> &[u8] {
        &self.frame
    }

    pub fn into_bytes(self) -> Bytes {
        self.frame
    }

    /// Raw bytes of record `index`, if it exists.
    pub fn record_bytes(&self, index: usize) -> Option<&[u8]> {
        if index >= self.count {
            return None;
        }
        let category = self.category();
        let start = category.header_size() + index * category.record_size();
        self.frame.get(start..start + category.record_size())
    }

    /// Typed header access. Fails if the packet belongs to another category.
    pub fn header_as<L: Layout>(&self) -> Result<&L::Header> {
        L::unwrap_header(&self.header).ok_or(FrameError::WrongCategory {
            expected: L::CATEGORY,
            actual: self.category(),
        })
    }

    /// Iterate records as `L::Record`. Fails if the packet belongs to another category.
    pub fn records<L: Layout>(&self) -> Result<Records<'_, L>> {
        self.header_as::<L>()?;
        Ok(Records {
            src: &self.frame[L::HEADER_SIZE..L::HEADER_SIZE + self.count * L::RECORD_SIZE],
            layout: PhantomData,
        })
    }

    /// Copy into a typed owned packet. Fails if the packet belongs to another category.
    pub fn to_packet<L: Layout>(&self) -> Result<Packet<L>> {
        let header = self.header_as::<L>()?.clone();
        Ok(Packet::new(header, self.records::<L>()?.collect()))
    }

    /// Copy the header and exactly `count` records into an owned packet.
    pub fn materialize(&self) -> OwnedPacket {
        match &self.header {
            Header::Status(h) => self.materialize_as::<layout::Status>(h),
            Header::Rvmap(h) => self.materialize_as::<layout::Rvmap>(h),
            Header::Detection(h) => self.materialize_as::<layout::Detection>(h),
            Header::Track(h) => self.materialize_as::<layout::Track>(h),
            Header::Measurement(h) => self.materialize_as::<layout::Measurement>(h),
        }
    }

    fn materialize_as<L: Layout>(&self, header: &L::Header) -> OwnedPacket {
        let records = Records::<L> {
            src: &self.frame[L::HEADER_SIZE..L::HEADER_SIZE + self.count * L::RECORD_SIZE],
            layout: PhantomData,
        }
        .collect();
        L::wrap_packet(Packet::new(header.clone(), records))
    }
}

/// Iterator over the records of a [`TypedPacket`].
pub struct Records<'a, L: Layout> {
    src: &'a [u8],
    layout: PhantomData<L>,
}

impl<L: Layout> Iterator for Records<'_, L> {
    type Item = L::Record;

    fn next(&mut self) -> Option<Self::Item> {
        if self.src.len() < L::RECORD_SIZE {
            return None;
        }
        Some(L::read_record(&mut self.src))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.src.len() / L::RECORD_SIZE;
        (n, Some(n))
    }
}

impl<L: Layout> ExactSizeIterator for Records<'_, L> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode;
    use crate::CompleteFrame;

    #[test]
    fn owned_packet_serializes_with_category_tag() {
        let packet = TrackPacket::new(
            TrackHeader::default(),
            vec![Track {
                id: 12,
                ..Track::default()
            }],
        );
        let bytes = encode(&packet).unwrap();
        let typed = crate::decode(CompleteFrame::from_bytes(bytes), Category::Track).unwrap();

        let header = serde_json::to_value(typed.header()).unwrap();
        assert_eq!(header["category"], "track");
        assert_eq!(header["n_tracks"], 1);

        let owned = serde_json::to_value(typed.materialize()).unwrap();
        assert_eq!(owned["track"]["records"][0]["id"], 12);
    }

    #[test]
    fn records_iterator_reports_exact_len() {
        let packet = DetectionPacket::new(DetectionHeader::default(), vec![Detection::default(); 4]);
        let bytes = encode(&packet).unwrap();
        let typed = crate::decode(CompleteFrame::from_bytes(bytes), Category::Detection).unwrap();
        let records = typed.records::<layout::Detection>().unwrap();
        assert_eq!(records.len(), 4);
        assert_eq!(typed.materialize().record_count(), 4);
    }
}
