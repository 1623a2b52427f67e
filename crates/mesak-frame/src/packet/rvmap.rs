use bytes::{Buf, BufMut, BytesMut};
use serde::Serialize;

use crate::category::Category;
use crate::layout::{read_f32_at, read_f32s, read_tag, write_f32s, write_tag, Layout};
use crate::packet::{Header, OwnedPacket, Packet};

const N_RANGES_OFFSET: usize = 40;
const N_VELOCITIES_OFFSET: usize = 48;

/// Range-velocity map layout. The records are the `u32` cells of a single
/// map, `n_ranges * n_velocities` of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RvmapLayout;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RvmapHeader {
    pub tag: String,
    pub packet_size: u32,
    pub beam_az: f32,
    pub beam_el: f32,
    pub trigger_day: u32,
    pub trigger_ms: u32,
    pub d_range: f32,
    /// Range bin count. The device sends it as a float.
    pub n_ranges: f32,
    pub d_velocity: f32,
    /// Doppler bin count. The device sends it as a float.
    pub n_velocities: f32,
    pub quaternion: [f32; 4],
    pub search_fps: f32,
    pub zero_range_bin: u32,
    pub zero_doppler_bin: u32,
    pub platform_height: f32,
    pub platform_velocity: [f32; 3],
    pub status: u8,
}

impl RvmapHeader {
    /// Cell count implied by the map dimensions.
    pub fn cell_count(&self) -> usize {
        cells(self.n_ranges, self.n_velocities)
    }
}

fn cells(n_ranges: f32, n_velocities: f32) -> usize {
    // `as` saturates: negative and NaN dimensions count as zero.
    (n_ranges as usize).saturating_mul(n_velocities as usize)
}

impl Layout for RvmapLayout {
    const CATEGORY: Category = Category::Rvmap;
    const MARKER: &'static [u8] = b"<rvmap>";
    const TAG_WIDTH: usize = 16;
    const HEADER_SIZE: usize = 108;
    const RECORD_SIZE: usize = 4;
    const MAX_RECORDS: usize = 0x20000;

    type Header = RvmapHeader;
    type Record = u32;

    fn declared_count(header: &[u8]) -> usize {
        cells(
            read_f32_at(header, N_RANGES_OFFSET),
            read_f32_at(header, N_VELOCITIES_OFFSET),
        )
    }

    fn read_header(src: &mut &[u8]) -> RvmapHeader {
        let tag = read_tag(src, Self::TAG_WIDTH);
        let packet_size = src.get_u32_le();
        let beam_az = src.get_f32_le();
        let beam_el = src.get_f32_le();
        let trigger_day = src.get_u32_le();
        let trigger_ms = src.get_u32_le();
        let d_range = src.get_f32_le();
        let n_ranges = src.get_f32_le();
        let d_velocity = src.get_f32_le();
        let n_velocities = src.get_f32_le();
        let quaternion = read_f32s::<4>(src);
        let search_fps = src.get_f32_le();
        let zero_range_bin = src.get_u32_le();
        let zero_doppler_bin = src.get_u32_le();
        let platform_height = src.get_f32_le();
        let platform_velocity = read_f32s::<3>(src);
        src.advance(11);
        let status = src.get_u8();
        RvmapHeader {
            tag,
            packet_size,
            beam_az,
            beam_el,
            trigger_day,
            trigger_ms,
            d_range,
            n_ranges,
            d_velocity,
            n_velocities,
            quaternion,
            search_fps,
            zero_range_bin,
            zero_doppler_bin,
            platform_height,
            platform_velocity,
            status,
        }
    }

    fn read_record(src: &mut &[u8]) -> u32 {
        src.get_u32_le()
    }

    fn write_header(header: &RvmapHeader, packet_size: u32, _count: usize, dst: &mut BytesMut) {
        write_tag(Self::MARKER, Self::TAG_WIDTH, dst);
        dst.put_u32_le(packet_size);
        dst.put_f32_le(header.beam_az);
        dst.put_f32_le(header.beam_el);
        dst.put_u32_le(header.trigger_day);
        dst.put_u32_le(header.trigger_ms);
        dst.put_f32_le(header.d_range);
        dst.put_f32_le(header.n_ranges);
        dst.put_f32_le(header.d_velocity);
        dst.put_f32_le(header.n_velocities);
        write_f32s(&header.quaternion, dst);
        dst.put_f32_le(header.search_fps);
        dst.put_u32_le(header.zero_range_bin);
        dst.put_u32_le(header.zero_doppler_bin);
        dst.put_f32_le(header.platform_height);
        write_f32s(&header.platform_velocity, dst);
        dst.put_bytes(0, 11);
        dst.put_u8(header.status);
    }

    fn write_record(record: &u32, dst: &mut BytesMut) {
        dst.put_u32_le(*record);
    }

    fn wrap_header(header: RvmapHeader) -> Header {
        Header::Rvmap(header)
    }

    fn unwrap_header(header: &Header) -> Option<&RvmapHeader> {
        match header {
            Header::Rvmap(h) => Some(h),
            _ => None,
        }
    }

    fn wrap_packet(packet: Packet<Self>) -> OwnedPacket {
        OwnedPacket::Rvmap(packet)
    }
}

impl Default for RvmapHeader {
    fn default() -> Self {
        Self {
            tag: "<rvmap>".to_string(),
            packet_size: 0,
            beam_az: 0.0,
            beam_el: 0.0,
            trigger_day: 0,
            trigger_ms: 0,
            d_range: 0.0,
            n_ranges: 0.0,
            d_velocity: 0.0,
            n_velocities: 0.0,
            quaternion: [0.0, 0.0, 0.0, 1.0],
            search_fps: 0.0,
            zero_range_bin: 0,
            zero_doppler_bin: 0,
            platform_height: 0.0,
            platform_velocity: [0.0; 3],
            status: 0,
        }
    }
}
