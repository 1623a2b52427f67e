use bytes::{Bytes, BytesMut};

use crate::assembler::CompleteFrame;
use crate::category::Category;
use crate::error::{FrameError, Result};
use crate::layout::{self, read_u32_at, Layout};
use crate::packet::{OwnedPacket, Packet, TypedPacket};

/// Decode a complete frame as a packet of `category`.
///
/// Validation happens before any header field is parsed:
/// - The frame must hold at least a full header
/// - The tag must carry the category marker
/// - The record count must not exceed the category maximum
/// - `packet_size` must equal both the frame length and
///   `header_size + count * record_size`
///
/// The returned packet shares the frame's storage.
pub fn decode(frame: CompleteFrame, category: Category) -> Result<TypedPacket> {
    let bytes = frame.into_bytes();
    match category {
        Category::Status => decode_as::<layout::Status>(bytes),
        Category::Rvmap => decode_as::<layout::Rvmap>(bytes),
        Category::Detection => decode_as::<layout::Detection>(bytes),
        Category::Track => decode_as::<layout::Track>(bytes),
        Category::Measurement => decode_as::<layout::Measurement>(bytes),
    }
}

fn decode_as<L: Layout>(bytes: Bytes) -> Result<TypedPacket> {
    let category = L::CATEGORY;
    if bytes.len() < L::HEADER_SIZE {
        return Err(FrameError::Truncated {
            category,
            len: bytes.len(),
            need: L::HEADER_SIZE,
        });
    }
    if !category.tag_matches(&bytes[..L::TAG_WIDTH]) {
        return Err(FrameError::BadTag { category });
    }

    let count = L::declared_count(&bytes[..L::HEADER_SIZE]);
    if count > L::MAX_RECORDS {
        return Err(FrameError::CountOutOfBounds {
            category,
            count,
            max: L::MAX_RECORDS,
        });
    }

    let declared = read_u32_at(&bytes, L::TAG_WIDTH) as usize;
    if declared != bytes.len() {
        return Err(FrameError::SizeMismatch {
            category,
            declared,
            expected: bytes.len(),
        });
    }
    let expected = L::HEADER_SIZE + count * L::RECORD_SIZE;
    if declared != expected {
        return Err(FrameError::SizeMismatch {
            category,
            declared,
            expected,
        });
    }

    let header = L::read_header(&mut &bytes[..L::HEADER_SIZE]);
    Ok(TypedPacket {
        frame: bytes,
        header: L::wrap_header(header),
        count,
    })
}

/// Encode an owned packet to wire bytes.
///
/// `packet_size` and the record count field are computed from the records;
/// fixed-arity headers (status, rvmap dimensions) must agree with them.
pub fn encode<L: Layout>(packet: &Packet<L>) -> Result<Bytes> {
    let count = packet.records.len();
    if count > L::MAX_RECORDS {
        return Err(FrameError::CountOutOfBounds {
            category: L::CATEGORY,
            count,
            max: L::MAX_RECORDS,
        });
    }

    let size = L::HEADER_SIZE + count * L::RECORD_SIZE;
    let mut dst = BytesMut::with_capacity(size);
    L::write_header(&packet.header, size as u32, count, &mut dst);

    let declared_count = L::declared_count(&dst);
    if declared_count != count {
        return Err(FrameError::SizeMismatch {
            category: L::CATEGORY,
            declared: L::HEADER_SIZE.saturating_add(declared_count.saturating_mul(L::RECORD_SIZE)),
            expected: size,
        });
    }

    for record in &packet.records {
        L::write_record(record, &mut dst);
    }
    Ok(dst.freeze())
}

impl OwnedPacket {
    /// Encode back to wire bytes.
    pub fn encode(&self) -> Result<Bytes> {
        match self {
            OwnedPacket::Status(p) => encode(p),
            OwnedPacket::Rvmap(p) => encode(p),
            OwnedPacket::Detection(p) => encode(p),
            OwnedPacket::Track(p) => encode(p),
            OwnedPacket::Measurement(p) => encode(p),
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::BufMut;

    use super::*;
    use crate::packet::{
        Detection, DetectionHeader, DetectionPacket, Header, RvmapHeader, RvmapPacket, StatusData,
        StatusHeader, StatusPacket, Track, TrackHeader, TrackPacket,
    };

    fn status_frame() -> CompleteFrame {
        let packet = StatusPacket::new(
            StatusHeader {
                serial_number: "EG000042".to_string(),
                ..StatusHeader::default()
            },
            vec![StatusData {
                sys_state: 2,
                ..StatusData::default()
            }],
        );
        CompleteFrame::from_bytes(encode(&packet).unwrap())
    }

    fn detection_header_only(count: u32, packet_size: u32) -> CompleteFrame {
        let mut dst = BytesMut::new();
        dst.put_slice(b"<detection>\0");
        dst.put_u32_le(packet_size);
        dst.put_u32_le(count);
        dst.put_bytes(0, 44 - 20);
        CompleteFrame::from_bytes(dst.freeze())
    }

    #[test]
    fn status_packet_size_is_header_plus_one_record() {
        let packet = decode(status_frame(), Category::Status).unwrap();
        assert_eq!(packet.category(), Category::Status);
        assert_eq!(packet.count(), 1);
        assert_eq!(packet.header().packet_size(), 36 + 316);

        let header = packet.header_as::<layout::Status>().unwrap();
        assert_eq!(header.serial_number, "EG000042");
        let data = packet.records::<layout::Status>().unwrap().next().unwrap();
        assert_eq!(data.sys_state, 2);
    }

    #[test]
    fn count_above_max_fails_before_size_checks() {
        // Declares 129 detections but carries only a header.
        let frame = detection_header_only(129, 44);
        let err = decode(frame, Category::Detection).unwrap_err();
        assert!(matches!(
            err,
            FrameError::CountOutOfBounds {
                category: Category::Detection,
                count: 129,
                max: 128
            }
        ));
        assert!(err.is_recoverable());
    }

    #[test]
    fn packet_size_must_match_frame_length() {
        let frame = detection_header_only(0, 108);
        let err = decode(frame, Category::Detection).unwrap_err();
        assert!(matches!(
            err,
            FrameError::SizeMismatch {
                declared: 108,
                expected: 44,
                ..
            }
        ));
    }

    #[test]
    fn packet_size_must_account_for_records() {
        // Length and packet_size agree, but the count claims one record.
        let frame = detection_header_only(1, 44);
        let err = decode(frame, Category::Detection).unwrap_err();
        assert!(matches!(
            err,
            FrameError::SizeMismatch {
                declared: 44,
                expected: 108,
                ..
            }
        ));
    }

    #[test]
    fn foreign_tag_is_rejected() {
        let err = decode(status_frame(), Category::Track).unwrap_err();
        assert!(matches!(err, FrameError::BadTag { category: Category::Track }));
    }

    #[test]
    fn short_frame_is_truncated() {
        let frame = CompleteFrame::from_bytes(&b"<track>\0\0\0\0\0"[..]);
        let err = decode(frame, Category::Track).unwrap_err();
        assert!(matches!(err, FrameError::Truncated { len: 12, need: 40, .. }));
    }

    #[test]
    fn materialize_copies_exactly_count_records() {
        let records: Vec<Detection> = (0..3)
            .map(|i| Detection {
                detection_id: i,
                range: 100.0 * i as f32,
                ..Detection::default()
            })
            .collect();
        let packet = DetectionPacket::new(DetectionHeader::default(), records.clone());
        let bytes = encode(&packet).unwrap();
        assert_eq!(bytes.len(), 44 + 3 * 64);

        let typed = decode(CompleteFrame::from_bytes(bytes), Category::Detection).unwrap();
        assert_eq!(typed.count(), 3);
        assert_eq!(typed.record_bytes(2).map(<[u8]>::len), Some(64));
        assert!(typed.record_bytes(3).is_none());

        match typed.materialize() {
            OwnedPacket::Detection(owned) => {
                assert_eq!(owned.records, records);
                assert_eq!(owned.header.n_detections, 3);
                assert_eq!(owned.header.packet_size, 44 + 3 * 64);
            }
            other => panic!("unexpected packet {other:?}"),
        }
    }

    #[test]
    fn typed_access_checks_category() {
        let typed = decode(status_frame(), Category::Status).unwrap();
        let err = typed.header_as::<layout::Track>().unwrap_err();
        assert!(matches!(
            err,
            FrameError::WrongCategory {
                expected: Category::Track,
                actual: Category::Status
            }
        ));
        assert!(typed.records::<layout::Track>().is_err());
        assert!(matches!(typed.header(), Header::Status(_)));
    }

    #[test]
    fn rvmap_cells_follow_dimensions() {
        let header = RvmapHeader {
            n_ranges: 3.0,
            n_velocities: 2.0,
            ..RvmapHeader::default()
        };
        let packet = RvmapPacket::new(header, vec![1, 2, 3, 4, 5, 6]);
        let bytes = encode(&packet).unwrap();
        assert_eq!(bytes.len(), 108 + 24);

        let typed = decode(CompleteFrame::from_bytes(bytes), Category::Rvmap).unwrap();
        match typed.materialize() {
            OwnedPacket::Rvmap(map) => assert_eq!(map.cells(), &[1, 2, 3, 4, 5, 6]),
            other => panic!("unexpected packet {other:?}"),
        }
    }

    #[test]
    fn encode_rejects_inconsistent_fixed_arity() {
        let empty_status = StatusPacket::new(StatusHeader::default(), Vec::new());
        assert!(matches!(
            encode(&empty_status).unwrap_err(),
            FrameError::SizeMismatch { .. }
        ));

        let wrong_map = RvmapPacket::new(
            RvmapHeader {
                n_ranges: 2.0,
                n_velocities: 2.0,
                ..RvmapHeader::default()
            },
            vec![0; 3],
        );
        assert!(encode(&wrong_map).is_err());
    }

    #[test]
    fn encode_rejects_too_many_records() {
        let packet = TrackPacket::new(TrackHeader::default(), vec![Track::default(); 129]);
        assert!(matches!(
            OwnedPacket::Track(packet).encode().unwrap_err(),
            FrameError::CountOutOfBounds { count: 129, .. }
        ));
    }
}
