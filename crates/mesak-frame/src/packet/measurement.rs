use bytes::{Buf, BufMut, BytesMut};
use serde::Serialize;

use crate::category::Category;
use crate::layout::{read_tag, read_u32_at, write_tag, Layout};
use crate::packet::{Header, OwnedPacket, Packet};

const COUNT_OFFSET: usize = 20;

/// Detection id slots carried by every measurement record.
pub const MAX_DETECTIONS_PER_MEASUREMENT: usize = 64;

/// Measurement list layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeasurementLayout;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeasurementHeader {
    pub tag: String,
    pub packet_size: u32,
    pub n_measurements: u32,
    pub system_time_days: u32,
    pub system_time_ms: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Measurement {
    pub id: u32,
    pub az: f32,
    pub el: f32,
    pub range: f32,
    pub rcs_est: f32,
    pub vradial: f32,
    /// Count as sent by the device; may exceed the id slots.
    pub n_detections: u32,
    /// The first `min(n_detections, 64)` contributing detection ids.
    pub detection_ids: Vec<u32>,
}

impl Layout for MeasurementLayout {
    const CATEGORY: Category = Category::Measurement;
    const MARKER: &'static [u8] = b"<measurement>";
    const TAG_WIDTH: usize = 16;
    const HEADER_SIZE: usize = 64;
    const RECORD_SIZE: usize = 380;
    const MAX_RECORDS: usize = 256;

    type Header = MeasurementHeader;
    type Record = Measurement;

    fn declared_count(header: &[u8]) -> usize {
        read_u32_at(header, COUNT_OFFSET) as usize
    }

    fn read_header(src: &mut &[u8]) -> MeasurementHeader {
        let tag = read_tag(src, Self::TAG_WIDTH);
        let header = MeasurementHeader {
            tag,
            packet_size: src.get_u32_le(),
            n_measurements: src.get_u32_le(),
            system_time_days: src.get_u32_le(),
            system_time_ms: src.get_u32_le(),
        };
        src.advance(32);
        header
    }

    fn read_record(src: &mut &[u8]) -> Measurement {
        let id = src.get_u32_le();
        src.advance(8);
        let az = src.get_f32_le();
        let el = src.get_f32_le();
        let range = src.get_f32_le();
        let rcs_est = src.get_f32_le();
        let vradial = src.get_f32_le();
        let n_detections = src.get_u32_le();
        let used = (n_detections as usize).min(MAX_DETECTIONS_PER_MEASUREMENT);
        let mut slots = [0u32; MAX_DETECTIONS_PER_MEASUREMENT];
        for slot in slots.iter_mut() {
            *slot = src.get_u32_le();
        }
        src.advance(88);
        Measurement {
            id,
            az,
            el,
            range,
            rcs_est,
            vradial,
            n_detections,
            detection_ids: slots[..used].to_vec(),
        }
    }

    fn write_header(header: &MeasurementHeader, packet_size: u32, count: usize, dst: &mut BytesMut) {
        write_tag(Self::MARKER, Self::TAG_WIDTH, dst);
        dst.put_u32_le(packet_size);
        dst.put_u32_le(count as u32);
        dst.put_u32_le(header.system_time_days);
        dst.put_u32_le(header.system_time_ms);
        dst.put_bytes(0, 32);
    }

    fn write_record(record: &Measurement, dst: &mut BytesMut) {
        dst.put_u32_le(record.id);
        dst.put_bytes(0, 8);
        dst.put_f32_le(record.az);
        dst.put_f32_le(record.el);
        dst.put_f32_le(record.range);
        dst.put_f32_le(record.rcs_est);
        dst.put_f32_le(record.vradial);
        dst.put_u32_le(record.n_detections);
        let used = record.detection_ids.len().min(MAX_DETECTIONS_PER_MEASUREMENT);
        for id in &record.detection_ids[..used] {
            dst.put_u32_le(*id);
        }
        dst.put_bytes(0, (MAX_DETECTIONS_PER_MEASUREMENT - used) * 4 + 88);
    }

    fn wrap_header(header: MeasurementHeader) -> Header {
        Header::Measurement(header)
    }

    fn unwrap_header(header: &Header) -> Option<&MeasurementHeader> {
        match header {
            Header::Measurement(h) => Some(h),
            _ => None,
        }
    }

    fn wrap_packet(packet: Packet<Self>) -> OwnedPacket {
        OwnedPacket::Measurement(packet)
    }
}

impl Default for MeasurementHeader {
    fn default() -> Self {
        Self {
            tag: "<measurement>".to_string(),
            packet_size: 0,
            n_measurements: 0,
            system_time_days: 0,
            system_time_ms: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detection_ids_are_limited_to_declared_count() {
        let record = Measurement {
            id: 4,
            n_detections: 2,
            detection_ids: vec![10, 11],
            ..Measurement::default()
        };
        let mut dst = BytesMut::new();
        MeasurementLayout::write_record(&record, &mut dst);
        assert_eq!(dst.len(), MeasurementLayout::RECORD_SIZE);

        let mut src = &dst[..];
        let parsed = MeasurementLayout::read_record(&mut src);
        assert_eq!(parsed.detection_ids, vec![10, 11]);
        assert!(src.is_empty());
    }

    #[test]
    fn oversized_detection_count_keeps_all_slots() {
        let record = Measurement {
            n_detections: 500,
            detection_ids: (0..64).collect(),
            ..Measurement::default()
        };
        let mut dst = BytesMut::new();
        MeasurementLayout::write_record(&record, &mut dst);

        let mut src = &dst[..];
        let parsed = MeasurementLayout::read_record(&mut src);
        assert_eq!(parsed.n_detections, 500);
        assert_eq!(parsed.detection_ids.len(), MAX_DETECTIONS_PER_MEASUREMENT);
        assert_eq!(parsed.detection_ids[63], 63);
    }
}
