use std::path::Path;
use std::time::Duration;

use mesak_frame::Category;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::flag::DEFAULT_DEADLOCK_TIMEOUT;
use crate::queue::DEFAULT_BUFFER_LENGTH;

/// Default TCP port of the command channel.
pub const DEFAULT_COMMAND_PORT: u16 = 23;

/// Command session behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Upper bound for TCP connect plus the identity handshake.
    #[serde(with = "duration_ms", rename = "connect_timeout_ms")]
    pub connect_timeout: Duration,
    /// How long to wait for a command's status line.
    #[serde(with = "duration_ms", rename = "command_timeout_ms")]
    pub command_timeout: Duration,
    /// Bound on lifecycle lock acquisition before reporting a deadlock.
    #[serde(with = "duration_ms", rename = "deadlock_timeout_ms")]
    pub deadlock_timeout: Duration,
    /// How long `receive_async` collects unsolicited output.
    #[serde(with = "duration_ms", rename = "receive_window_ms")]
    pub receive_window: Duration,
    /// When set, the identity reply must contain this serial number.
    pub expected_serial: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(5000),
            command_timeout: Duration::from_millis(2000),
            deadlock_timeout: DEFAULT_DEADLOCK_TIMEOUT,
            receive_window: Duration::from_millis(100),
            expected_serial: None,
        }
    }
}

/// TCP ports of the command channel and the five data streams.
///
/// A data port set to `None` disables that category's receiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortMap {
    pub command: u16,
    pub status: Option<u16>,
    pub rvmap: Option<u16>,
    pub detection: Option<u16>,
    pub track: Option<u16>,
    pub measurement: Option<u16>,
}

impl PortMap {
    /// Only the command port; no data receivers.
    pub fn command_only(command: u16) -> Self {
        Self {
            command,
            status: None,
            rvmap: None,
            detection: None,
            track: None,
            measurement: None,
        }
    }

    pub fn data_port(&self, category: Category) -> Option<u16> {
        match category {
            Category::Status => self.status,
            Category::Rvmap => self.rvmap,
            Category::Detection => self.detection,
            Category::Track => self.track,
            Category::Measurement => self.measurement,
        }
    }

    pub fn set_data_port(&mut self, category: Category, port: Option<u16>) {
        let slot = match category {
            Category::Status => &mut self.status,
            Category::Rvmap => &mut self.rvmap,
            Category::Detection => &mut self.detection,
            Category::Track => &mut self.track,
            Category::Measurement => &mut self.measurement,
        };
        *slot = port;
    }

    /// Categories that have a data port.
    pub fn enabled(&self) -> impl Iterator<Item = (Category, u16)> + '_ {
        Category::ALL
            .into_iter()
            .filter_map(|category| self.data_port(category).map(|port| (category, port)))
    }
}

impl Default for PortMap {
    fn default() -> Self {
        Self {
            command: DEFAULT_COMMAND_PORT,
            status: Some(29979),
            rvmap: Some(29980),
            detection: Some(29981),
            track: Some(29982),
            measurement: Some(29983),
        }
    }
}

/// Complete driver configuration. Loadable from JSON; every field is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub session: SessionConfig,
    pub ports: PortMap,
    /// Initial capacity of every category buffer.
    pub buffer_length: usize,
    /// Initial collect flag for every category.
    pub collect: bool,
    /// Initial save flag for every category.
    pub save: bool,
    /// Read timeout used by data receivers so they notice a quit request.
    #[serde(with = "duration_ms", rename = "data_poll_ms")]
    pub data_poll: Duration,
    /// Pause before a receiver retries a lost data connection.
    #[serde(with = "duration_ms", rename = "reconnect_backoff_ms")]
    pub reconnect_backoff: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            ports: PortMap::default(),
            buffer_length: DEFAULT_BUFFER_LENGTH,
            collect: true,
            save: false,
            data_poll: Duration::from_millis(100),
            reconnect_backoff: Duration::from_millis(500),
        }
    }
}

impl DriverConfig {
    /// Load a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read(path)?;
        Ok(serde_json::from_slice(&raw)?)
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
