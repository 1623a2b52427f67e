//! Packet framing and typed decoding for MESA-K radar telemetry.
//!
//! Every data port carries one category of packet. A packet is:
//! - A fixed-width ASCII tag identifying the category (NUL padded)
//! - A 4-byte little-endian `packet_size` covering the whole packet
//! - The rest of a fixed-size header
//! - Zero or more fixed-size records
//!
//! [`PacketReader`] turns a byte stream into validated [`TypedPacket`]s,
//! resyncing on the next tag when a packet is malformed.

pub mod assembler;
pub mod category;
pub mod codec;
pub mod error;
pub mod layout;
pub mod packet;
pub mod reader;

pub use assembler::{CompleteFrame, RawFrame};
pub use category::Category;
pub use codec::{decode, encode};
pub use error::{FrameError, Result};
pub use layout::Layout;
pub use packet::{
    Detection, DetectionHeader, DetectionPacket, Header, Measurement, MeasurementHeader,
    MeasurementPacket, OwnedPacket, Packet, RvmapHeader, RvmapPacket, StatusData, StatusHeader,
    StatusPacket, Track, TrackHeader, TrackPacket, TypedPacket,
};
pub use reader::PacketReader;
