//! Client driver for the MESA-K radar.
//!
//! [`Driver`] is the entry point. It owns:
//! - A [`CommandSession`]: one background worker that connects, identifies
//!   the radar and runs commands one at a time, reporting through callbacks
//! - One bounded [`CategoryQueue`] per telemetry category
//! - Data receivers that read each category's port once connected
//!
//! Capture and replay go through the [`Archive`] and [`FrameSource`] traits.
//!
//! ```no_run
//! use mesak_driver::{Driver, DriverConfig};
//! use mesak_frame::Category;
//!
//! let driver = Driver::new(DriverConfig::default())?;
//! driver.connect("192.168.1.50")?;
//! let response = driver.send_command("SYS:STATE?")?;
//! println!("{}: {}", response.status, response.text);
//! let status = driver.wait_data(Category::Status, std::time::Duration::from_secs(1))?;
//! println!("{:?}", status.header());
//! driver.disconnect()?;
//! # Ok::<(), mesak_driver::DriverError>(())
//! ```

pub mod archive;
pub mod command;
pub mod config;
pub mod driver;
pub mod error;
pub mod event_log;
pub mod flag;
pub mod queue;
mod receiver;
pub mod session;

pub use archive::{Archive, DirArchive, DirSource, FrameSource, Replay};
pub use command::{CommandResponse, CommandStatus};
pub use config::{DriverConfig, PortMap, SessionConfig, DEFAULT_COMMAND_PORT};
pub use driver::{Driver, VERSION};
pub use error::{DriverError, Result};
pub use event_log::{EventLog, EventLogger, MemoryEventLog, TracingEventLog};
pub use flag::{DeadlockFlag, FlagGuard, WorkerThread, DEFAULT_DEADLOCK_TIMEOUT};
pub use queue::{CategoryQueue, DEFAULT_BUFFER_LENGTH};
pub use receiver::CategoryStats;
pub use session::{CommandCallback, CommandSession, ConnectCallback, SessionState};
