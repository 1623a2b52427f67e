use bytes::{Buf, BufMut, BytesMut};
use serde::Serialize;

use crate::category::Category;
use crate::layout::{read_f32s, read_tag, read_text, write_f32s, write_tag, write_text, Layout};
use crate::packet::{Header, OwnedPacket, Packet};

const SERIAL_WIDTH: usize = 8;
const HEALTH_MONITOR_WIDTH: usize = 36;
const NMEA_WIDTH: usize = 84;

/// Status packet layout: one system status record per packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusLayout;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusHeader {
    pub tag: String,
    pub packet_size: u32,
    pub schema_version: [u8; 4],
    pub serial_number: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusData {
    pub sys_state: u32,
    pub search_fps: f32,
    pub platform_height: f32,
    /// Orientation quaternion `[x, y, z, w]`.
    pub quaternion: [f32; 4],
    pub sys_time_days: u32,
    pub sys_time_ms: u32,
    pub platform_velocity: [f32; 3],
    pub time_channel_state: u32,
    pub eth_link_rate: u32,
    pub health_monitor: Vec<u8>,
    pub cbit_summary: u32,
    /// Supply rail currents and voltages, in device order.
    pub supply_monitors: [f32; 9],
    /// Board and antenna temperatures, in device order.
    pub temperatures: [i32; 7],
    pub nmea_gprmc: String,
}

impl Layout for StatusLayout {
    const CATEGORY: Category = Category::Status;
    const MARKER: &'static [u8] = b"<status>";
    const TAG_WIDTH: usize = 12;
    const HEADER_SIZE: usize = 36;
    const RECORD_SIZE: usize = 316;
    const MAX_RECORDS: usize = 1;

    type Header = StatusHeader;
    type Record = StatusData;

    fn declared_count(_header: &[u8]) -> usize {
        1
    }

    fn read_header(src: &mut &[u8]) -> StatusHeader {
        let tag = read_tag(src, Self::TAG_WIDTH);
        let packet_size = src.get_u32_le();
        src.advance(8);
        let mut schema_version = [0u8; 4];
        src.copy_to_slice(&mut schema_version);
        let serial_number = read_text(src, SERIAL_WIDTH);
        StatusHeader {
            tag,
            packet_size,
            schema_version,
            serial_number,
        }
    }

    fn read_record(src: &mut &[u8]) -> StatusData {
        let sys_state = src.get_u32_le();
        let search_fps = src.get_f32_le();
        let platform_height = src.get_f32_le();
        src.advance(4);
        let quaternion = read_f32s::<4>(src);
        let sys_time_days = src.get_u32_le();
        let sys_time_ms = src.get_u32_le();
        let platform_velocity = read_f32s::<3>(src);
        let time_channel_state = src.get_u32_le();
        src.advance(4);
        let eth_link_rate = src.get_u32_le();
        let health_monitor = src[..HEALTH_MONITOR_WIDTH].to_vec();
        src.advance(HEALTH_MONITOR_WIDTH);
        let cbit_summary = src.get_u32_le();
        src.advance(8);
        let supply_monitors = read_f32s::<9>(src);
        let mut temperatures = [0i32; 7];
        for value in temperatures.iter_mut() {
            *value = src.get_i32_le();
        }
        src.advance(56);
        let nmea_gprmc = read_text(src, NMEA_WIDTH);
        StatusData {
            sys_state,
            search_fps,
            platform_height,
            quaternion,
            sys_time_days,
            sys_time_ms,
            platform_velocity,
            time_channel_state,
            eth_link_rate,
            health_monitor,
            cbit_summary,
            supply_monitors,
            temperatures,
            nmea_gprmc,
        }
    }

    fn write_header(header: &StatusHeader, packet_size: u32, _count: usize, dst: &mut BytesMut) {
        write_tag(Self::MARKER, Self::TAG_WIDTH, dst);
        dst.put_u32_le(packet_size);
        dst.put_bytes(0, 8);
        dst.put_slice(&header.schema_version);
        write_text(&header.serial_number, SERIAL_WIDTH, dst);
    }

    fn write_record(record: &StatusData, dst: &mut BytesMut) {
        dst.put_u32_le(record.sys_state);
        dst.put_f32_le(record.search_fps);
        dst.put_f32_le(record.platform_height);
        dst.put_bytes(0, 4);
        write_f32s(&record.quaternion, dst);
        dst.put_u32_le(record.sys_time_days);
        dst.put_u32_le(record.sys_time_ms);
        write_f32s(&record.platform_velocity, dst);
        dst.put_u32_le(record.time_channel_state);
        dst.put_bytes(0, 4);
        dst.put_u32_le(record.eth_link_rate);
        let monitor_len = record.health_monitor.len().min(HEALTH_MONITOR_WIDTH);
        dst.put_slice(&record.health_monitor[..monitor_len]);
        dst.put_bytes(0, HEALTH_MONITOR_WIDTH - monitor_len);
        dst.put_u32_le(record.cbit_summary);
        dst.put_bytes(0, 8);
        write_f32s(&record.supply_monitors, dst);
        for value in &record.temperatures {
            dst.put_i32_le(*value);
        }
        dst.put_bytes(0, 56);
        write_text(&record.nmea_gprmc, NMEA_WIDTH, dst);
    }

    fn wrap_header(header: StatusHeader) -> Header {
        Header::Status(header)
    }

    fn unwrap_header(header: &Header) -> Option<&StatusHeader> {
        match header {
            Header::Status(h) => Some(h),
            _ => None,
        }
    }

    fn wrap_packet(packet: Packet<Self>) -> OwnedPacket {
        OwnedPacket::Status(packet)
    }
}

impl Default for StatusHeader {
    fn default() -> Self {
        Self {
            tag: "<status>".to_string(),
            packet_size: 0,
            schema_version: [0; 4],
            serial_number: String::new(),
        }
    }
}

impl Default for StatusData {
    fn default() -> Self {
        Self {
            sys_state: 0,
            search_fps: 0.0,
            platform_height: 0.0,
            quaternion: [0.0, 0.0, 0.0, 1.0],
            sys_time_days: 0,
            sys_time_ms: 0,
            platform_velocity: [0.0; 3],
            time_channel_state: 0,
            eth_link_rate: 0,
            health_monitor: vec![0; HEALTH_MONITOR_WIDTH],
            cbit_summary: 0,
            supply_monitors: [0.0; 9],
            temperatures: [0; 7],
            nmea_gprmc: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_and_record_fill_their_sizes() {
        let header = StatusHeader {
            tag: "<status>".to_string(),
            packet_size: 0,
            schema_version: [1, 2, 0, 0],
            serial_number: "EG000123".to_string(),
        };
        let mut dst = BytesMut::new();
        StatusLayout::write_header(&header, 352, 1, &mut dst);
        assert_eq!(dst.len(), StatusLayout::HEADER_SIZE);
        StatusLayout::write_record(&StatusData::default(), &mut dst);
        assert_eq!(dst.len(), StatusLayout::HEADER_SIZE + StatusLayout::RECORD_SIZE);
    }

    #[test]
    fn record_fields_land_at_device_offsets() {
        let record = StatusData {
            sys_state: 3,
            sys_time_days: 7,
            eth_link_rate: 1000,
            temperatures: [41, 0, 0, 0, 0, 0, -5],
            nmea_gprmc: "$GPRMC,123519,A".to_string(),
            ..StatusData::default()
        };
        let mut dst = BytesMut::new();
        StatusLayout::write_record(&record, &mut dst);

        assert_eq!(&dst[0..4], &3u32.to_le_bytes());
        assert_eq!(&dst[32..36], &7u32.to_le_bytes());
        assert_eq!(&dst[60..64], &1000u32.to_le_bytes());
        assert_eq!(&dst[148..152], &41i32.to_le_bytes());
        assert_eq!(&dst[172..176], &(-5i32).to_le_bytes());
        assert_eq!(&dst[232..247], b"$GPRMC,123519,A");

        let mut src = &dst[..];
        assert_eq!(StatusLayout::read_record(&mut src), record);
        assert!(src.is_empty());
    }
}
