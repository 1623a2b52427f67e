//! Client driver for the MESA-K radar.
//!
//! # Crate Structure
//!
//! - [`transport`]: TCP connector and stream abstraction
//! - [`frame`]: Packet categories, wire layouts, framing and decoding
//! - [`driver`]: Command session, category buffers, receivers, archives

/// Re-export transport types.
pub mod transport {
    pub use mesak_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use mesak_frame::*;
}

/// Re-export driver types.
pub mod driver {
    pub use mesak_driver::*;
}

pub use mesak_driver::{Driver, DriverConfig, DriverError};
pub use mesak_frame::{Category, TypedPacket};
