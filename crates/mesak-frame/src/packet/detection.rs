use bytes::{Buf, BufMut, BytesMut};
use serde::Serialize;

use crate::category::Category;
use crate::layout::{read_tag, read_u32_at, write_tag, Layout};
use crate::packet::{Header, OwnedPacket, Packet};

const COUNT_OFFSET: usize = 16;

/// Detection list layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectionLayout;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionHeader {
    pub tag: String,
    pub packet_size: u32,
    pub n_detections: u32,
    pub beam_purpose: u32,
    pub az: f32,
    pub el: f32,
    pub time_days: u32,
    pub time_sec: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Detection {
    pub time_days: u32,
    pub time_sec: u32,
    pub power: f32,
    pub snr: f32,
    pub range: f32,
    pub az: f32,
    pub el: f32,
    pub vradial: f32,
    pub range_interp: f32,
    pub detection_id: u32,
    pub rcs: f32,
}

impl Layout for DetectionLayout {
    const CATEGORY: Category = Category::Detection;
    const MARKER: &'static [u8] = b"<detection>";
    const TAG_WIDTH: usize = 12;
    const HEADER_SIZE: usize = 44;
    const RECORD_SIZE: usize = 64;
    const MAX_RECORDS: usize = 128;

    type Header = DetectionHeader;
    type Record = Detection;

    fn declared_count(header: &[u8]) -> usize {
        read_u32_at(header, COUNT_OFFSET) as usize
    }

    fn read_header(src: &mut &[u8]) -> DetectionHeader {
        let tag = read_tag(src, Self::TAG_WIDTH);
        let header = DetectionHeader {
            tag,
            packet_size: src.get_u32_le(),
            n_detections: src.get_u32_le(),
            beam_purpose: src.get_u32_le(),
            az: src.get_f32_le(),
            el: src.get_f32_le(),
            time_days: src.get_u32_le(),
            time_sec: src.get_u32_le(),
        };
        src.advance(4);
        header
    }

    fn read_record(src: &mut &[u8]) -> Detection {
        let time_days = src.get_u32_le();
        let time_sec = src.get_u32_le();
        let power = src.get_f32_le();
        let snr = src.get_f32_le();
        let range = src.get_f32_le();
        let az = src.get_f32_le();
        let el = src.get_f32_le();
        let vradial = src.get_f32_le();
        let range_interp = src.get_f32_le();
        let detection_id = src.get_u32_le();
        src.advance(4);
        let rcs = src.get_f32_le();
        src.advance(16);
        Detection {
            time_days,
            time_sec,
            power,
            snr,
            range,
            az,
            el,
            vradial,
            range_interp,
            detection_id,
            rcs,
        }
    }

    fn write_header(header: &DetectionHeader, packet_size: u32, count: usize, dst: &mut BytesMut) {
        write_tag(Self::MARKER, Self::TAG_WIDTH, dst);
        dst.put_u32_le(packet_size);
        dst.put_u32_le(count as u32);
        dst.put_u32_le(header.beam_purpose);
        dst.put_f32_le(header.az);
        dst.put_f32_le(header.el);
        dst.put_u32_le(header.time_days);
        dst.put_u32_le(header.time_sec);
        dst.put_bytes(0, 4);
    }

    fn write_record(record: &Detection, dst: &mut BytesMut) {
        dst.put_u32_le(record.time_days);
        dst.put_u32_le(record.time_sec);
        dst.put_f32_le(record.power);
        dst.put_f32_le(record.snr);
        dst.put_f32_le(record.range);
        dst.put_f32_le(record.az);
        dst.put_f32_le(record.el);
        dst.put_f32_le(record.vradial);
        dst.put_f32_le(record.range_interp);
        dst.put_u32_le(record.detection_id);
        dst.put_bytes(0, 4);
        dst.put_f32_le(record.rcs);
        dst.put_bytes(0, 16);
    }

    fn wrap_header(header: DetectionHeader) -> Header {
        Header::Detection(header)
    }

    fn unwrap_header(header: &Header) -> Option<&DetectionHeader> {
        match header {
            Header::Detection(h) => Some(h),
            _ => None,
        }
    }

    fn wrap_packet(packet: Packet<Self>) -> OwnedPacket {
        OwnedPacket::Detection(packet)
    }
}

impl Default for DetectionHeader {
    fn default() -> Self {
        Self {
            tag: "<detection>".to_string(),
            packet_size: 0,
            n_detections: 0,
            beam_purpose: 0,
            az: 0.0,
            el: 0.0,
            time_days: 0,
            time_sec: 0,
        }
    }
}
