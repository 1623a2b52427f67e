//! TCP transport for the MESA-K radar.
//!
//! The radar exposes one command port (text protocol) and one data port per
//! telemetry category (binary packets). This is the lowest layer of mesak:
//! everything else talks to the radar through a [`Connector`] and the
//! [`Link`] streams it returns.

pub mod error;
pub mod tcp;
pub mod traits;

pub use error::{is_timeout_kind, Result, TransportError};
pub use tcp::TcpConnector;
pub use traits::{Connector, Link, RadarStream};
