use bytes::{Buf, BufMut, BytesMut};
use serde::Serialize;

use crate::category::Category;
use crate::layout::{read_f32s, read_tag, read_u32_at, write_f32s, write_tag, Layout};
use crate::packet::{Header, OwnedPacket, Packet};

const COUNT_OFFSET: usize = 16;
const ASSOCIATIONS: usize = 3;

/// Track list layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackLayout;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackHeader {
    pub tag: String,
    pub packet_size: u32,
    pub n_tracks: u32,
    pub sys_time_days: u32,
    pub sys_time_ms: u32,
    pub profile_atracker: u32,
    pub profile_atracker_main: u32,
    pub packet_type: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Track {
    pub id: u32,
    pub state: u32,
    pub az_est: f32,
    pub el_est: f32,
    pub range_est: f32,
    /// Estimated position `[x, y, z]`.
    pub position: [f32; 3],
    /// Estimated velocity `[x, y, z]`.
    pub velocity: [f32; 3],
    pub assoc_meas_ids: [u32; ASSOCIATIONS],
    pub assoc_meas_chi2: [f32; ASSOCIATIONS],
    /// Time of closest approach.
    pub toca_days: i32,
    pub toca_ms: i32,
    /// Distance of closest approach.
    pub doca: f32,
    pub lifetime: f32,
    pub last_update_days: u32,
    pub last_update_ms: u32,
    pub last_assoc_days: u32,
    pub last_assoc_ms: u32,
    pub acquired_days: u32,
    pub acquired_ms: u32,
    pub confidence: f32,
    pub n_assoc_measurements: u32,
    pub rcs_est: f32,
    pub probability_other: f32,
    pub probability_uav: f32,
}

impl Layout for TrackLayout {
    const CATEGORY: Category = Category::Track;
    const MARKER: &'static [u8] = b"<track>";
    const TAG_WIDTH: usize = 12;
    const HEADER_SIZE: usize = 40;
    const RECORD_SIZE: usize = 128;
    const MAX_RECORDS: usize = 128;

    type Header = TrackHeader;
    type Record = Track;

    fn declared_count(header: &[u8]) -> usize {
        read_u32_at(header, COUNT_OFFSET) as usize
    }

    fn read_header(src: &mut &[u8]) -> TrackHeader {
        let tag = read_tag(src, Self::TAG_WIDTH);
        TrackHeader {
            tag,
            packet_size: src.get_u32_le(),
            n_tracks: src.get_u32_le(),
            sys_time_days: src.get_u32_le(),
            sys_time_ms: src.get_u32_le(),
            profile_atracker: src.get_u32_le(),
            profile_atracker_main: src.get_u32_le(),
            packet_type: src.get_u32_le(),
        }
    }

    fn read_record(src: &mut &[u8]) -> Track {
        let id = src.get_u32_le();
        let state = src.get_u32_le();
        let az_est = src.get_f32_le();
        let el_est = src.get_f32_le();
        let range_est = src.get_f32_le();
        let position = read_f32s::<3>(src);
        let velocity = read_f32s::<3>(src);
        let mut assoc_meas_ids = [0u32; ASSOCIATIONS];
        for id in assoc_meas_ids.iter_mut() {
            *id = src.get_u32_le();
        }
        let assoc_meas_chi2 = read_f32s::<ASSOCIATIONS>(src);
        Track {
            id,
            state,
            az_est,
            el_est,
            range_est,
            position,
            velocity,
            assoc_meas_ids,
            assoc_meas_chi2,
            toca_days: src.get_i32_le(),
            toca_ms: src.get_i32_le(),
            doca: src.get_f32_le(),
            lifetime: src.get_f32_le(),
            last_update_days: src.get_u32_le(),
            last_update_ms: src.get_u32_le(),
            last_assoc_days: src.get_u32_le(),
            last_assoc_ms: src.get_u32_le(),
            acquired_days: src.get_u32_le(),
            acquired_ms: src.get_u32_le(),
            confidence: src.get_f32_le(),
            n_assoc_measurements: src.get_u32_le(),
            rcs_est: src.get_f32_le(),
            probability_other: src.get_f32_le(),
            probability_uav: src.get_f32_le(),
        }
    }

    fn write_header(header: &TrackHeader, packet_size: u32, count: usize, dst: &mut BytesMut) {
        write_tag(Self::MARKER, Self::TAG_WIDTH, dst);
        dst.put_u32_le(packet_size);
        dst.put_u32_le(count as u32);
        dst.put_u32_le(header.sys_time_days);
        dst.put_u32_le(header.sys_time_ms);
        dst.put_u32_le(header.profile_atracker);
        dst.put_u32_le(header.profile_atracker_main);
        dst.put_u32_le(header.packet_type);
    }

    fn write_record(record: &Track, dst: &mut BytesMut) {
        dst.put_u32_le(record.id);
        dst.put_u32_le(record.state);
        dst.put_f32_le(record.az_est);
        dst.put_f32_le(record.el_est);
        dst.put_f32_le(record.range_est);
        write_f32s(&record.position, dst);
        write_f32s(&record.velocity, dst);
        for id in &record.assoc_meas_ids {
            dst.put_u32_le(*id);
        }
        write_f32s(&record.assoc_meas_chi2, dst);
        dst.put_i32_le(record.toca_days);
        dst.put_i32_le(record.toca_ms);
        dst.put_f32_le(record.doca);
        dst.put_f32_le(record.lifetime);
        dst.put_u32_le(record.last_update_days);
        dst.put_u32_le(record.last_update_ms);
        dst.put_u32_le(record.last_assoc_days);
        dst.put_u32_le(record.last_assoc_ms);
        dst.put_u32_le(record.acquired_days);
        dst.put_u32_le(record.acquired_ms);
        dst.put_f32_le(record.confidence);
        dst.put_u32_le(record.n_assoc_measurements);
        dst.put_f32_le(record.rcs_est);
        dst.put_f32_le(record.probability_other);
        dst.put_f32_le(record.probability_uav);
    }

    fn wrap_header(header: TrackHeader) -> Header {
        Header::Track(header)
    }

    fn unwrap_header(header: &Header) -> Option<&TrackHeader> {
        match header {
            Header::Track(h) => Some(h),
            _ => None,
        }
    }

    fn wrap_packet(packet: Packet<Self>) -> OwnedPacket {
        OwnedPacket::Track(packet)
    }
}

impl Default for TrackHeader {
    fn default() -> Self {
        Self {
            tag: "<track>".to_string(),
            packet_size: 0,
            n_tracks: 0,
            sys_time_days: 0,
            sys_time_ms: 0,
            profile_atracker: 0,
            profile_atracker_main: 0,
            packet_type: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_fills_128_bytes() {
        let track = Track {
            id: 9,
            toca_days: -1,
            probability_uav: 0.75,
            ..Track::default()
        };
        let mut dst = BytesMut::new();
        TrackLayout::write_record(&track, &mut dst);
        assert_eq!(dst.len(), TrackLayout::RECORD_SIZE);
        assert_eq!(&dst[68..72], &(-1i32).to_le_bytes());
        assert_eq!(&dst[124..128], &0.75f32.to_le_bytes());

        let mut src = &dst[..];
        assert_eq!(TrackLayout::read_record(&mut src), track);
        assert!(src.is_empty());
    }
}
