//! The radar driver: command session plus per-category data buffers.

use std::fmt;
use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use mesak_frame::layout::{self, Layout};
use mesak_frame::{
    Category, DetectionPacket, MeasurementPacket, Packet, RvmapPacket, StatusPacket, TrackPacket,
    TypedPacket,
};
use mesak_transport::{Connector, TcpConnector};

use crate::archive::Archive;
use crate::command::CommandResponse;
use crate::config::DriverConfig;
use crate::error::{DriverError, Result};
use crate::event_log::{EventLog, EventLogger, TracingEventLog};
use crate::receiver::{CategoryStats, DataPlane, Receiver, ReceiverTiming};
use crate::session::{CommandSession, SessionState};

/// Version of the driver library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Client for one MESA-K radar.
///
/// Owns the command session and one bounded buffer per data category.
/// After a successful connect, a receiver thread per configured data port
/// feeds those buffers (when collecting) and the archive (when saving).
pub struct Driver<C: Connector = TcpConnector> {
    session: CommandSession<C>,
    data: Arc<DataPlane>,
    receivers: Arc<Mutex<Vec<Receiver>>>,
    host: Mutex<Option<String>>,
    events: Arc<EventLogger>,
    config: DriverConfig,
}

impl Driver<TcpConnector> {
    pub fn new(config: DriverConfig) -> Result<Self> {
        Self::with_connector(TcpConnector::new(), config, Arc::new(TracingEventLog))
    }

    /// Library version and build platform.
    pub fn version() -> String {
        format!(
            "mesak-driver {VERSION} ({}-{})",
            std::env::consts::ARCH,
            std::env::consts::OS
        )
    }
}

impl<C: Connector> Driver<C> {
    /// Build a driver over a custom connector and event log.
    pub fn with_connector(
        connector: C,
        config: DriverConfig,
        event_log: Arc<dyn EventLog>,
    ) -> Result<Self> {
        let data = Arc::new(DataPlane::new(
            config.buffer_length,
            config.collect,
            config.save,
        )?);
        let events = Arc::new(EventLogger::new(event_log));
        let session = CommandSession::with_connector(connector, config.session.clone(), events.clone());
        Ok(Self {
            session,
            data,
            receivers: Arc::new(Mutex::new(Vec::new())),
            host: Mutex::new(None),
            events,
            config,
        })
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// `host:port` of the command connection.
    pub fn address(&self) -> Option<String> {
        self.session.address()
    }

    /// The radar's reply to the identity query.
    pub fn device_identity(&self) -> Option<String> {
        self.session.device_identity()
    }

    // -- connection ------------------------------------------------------

    /// Connect to the radar at `host` in the background.
    ///
    /// The command port and data ports come from the configured [`PortMap`].
    /// Data receivers are started before `callback(true)` runs.
    ///
    /// [`PortMap`]: crate::config::PortMap
    pub fn connect_async<F>(&self, host: &str, callback: F) -> Result<()>
    where
        F: FnOnce(bool) + Send + 'static,
    {
        let addr = host_port(host, self.config.ports.command);
        let start = ReceiverStart {
            host: host.to_string(),
            connector: self.session.connector().clone(),
            data: self.data.clone(),
            receivers: self.receivers.clone(),
            config: self.config.clone(),
        };
        self.session.connect_async(&addr, move |ok| {
            if ok {
                start.run();
            }
            callback(ok);
        })?;
        *self.host.lock().unwrap_or_else(PoisonError::into_inner) = Some(host.to_string());
        Ok(())
    }

    /// Blocking connect.
    pub fn connect(&self, host: &str) -> Result<()> {
        let (tx, rx) = mpsc::channel();
        self.connect_async(host, move |ok| {
            let _ = tx.send(ok);
        })?;
        if rx.recv().unwrap_or(false) {
            Ok(())
        } else {
            Err(DriverError::ConnectFailed {
                addr: host_port(host, self.config.ports.command),
                reason: self
                    .session
                    .last_connect_error()
                    .unwrap_or_else(|| "radar did not answer the identity query".to_string()),
            })
        }
    }

    /// Stop the command session and every data receiver.
    ///
    /// Buffered packets are kept. Valid in every state.
    pub fn disconnect(&self) -> Result<()> {
        let session = self.session.disconnect();
        let receivers = stop_receivers(&self.data, &self.receivers);
        session.and(receivers)
    }

    /// Disconnect and connect again to the last host.
    pub fn reconnect(&self) -> Result<()> {
        let host = self
            .host
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| DriverError::InvalidState("reconnect before any connect".to_string()))?;
        self.disconnect()?;
        self.connect(&host)
    }

    // -- commands --------------------------------------------------------

    pub fn send_command_async<F>(&self, command: &str, callback: F) -> Result<()>
    where
        F: FnOnce(CommandResponse) + Send + 'static,
    {
        self.session.send_command_async(command, callback)
    }

    pub fn send_command(&self, command: &str) -> Result<CommandResponse> {
        self.session.send_command(command)
    }

    pub fn send_blob(&self, blob: impl Into<Bytes>) -> Result<()> {
        self.session.send_blob(blob)
    }

    pub fn receive_async<F>(&self, callback: F) -> Result<()>
    where
        F: FnOnce(CommandResponse) + Send + 'static,
    {
        self.session.receive_async(callback)
    }

    // -- buffers ---------------------------------------------------------

    /// Change the capacity of a category buffer. Fails unless it is empty.
    pub fn set_buffer_length(&self, category: Category, length: usize) -> Result<()> {
        self.data.queue(category).set_capacity(length)
    }

    pub fn get_buffer_length(&self, category: Category) -> usize {
        self.data.queue(category).capacity()
    }

    pub fn get_n_buffered(&self, category: Category) -> usize {
        self.data.queue(category).occupied_count()
    }

    /// Discard every buffered packet of `category`. Returns how many were dropped.
    pub fn flush_buffer(&self, category: Category) -> usize {
        let dropped = self.data.queue(category).flush();
        tracing::debug!(category = %category, dropped, "buffer flushed");
        dropped
    }

    pub fn set_save(&self, category: Category, save: bool) {
        self.data.set_save(category, save);
    }

    pub fn get_save(&self, category: Category) -> bool {
        self.data.save(category)
    }

    pub fn set_collect(&self, category: Category, collect: bool) {
        self.data.set_collect(category, collect);
    }

    pub fn get_collect(&self, category: Category) -> bool {
        self.data.collect(category)
    }

    /// Where saved packets go. `None` makes saving a no-op.
    pub fn set_archive(&self, archive: Option<Arc<dyn Archive>>) {
        self.data.set_archive(archive);
    }

    pub fn stats(&self, category: Category) -> CategoryStats {
        self.data.stats(category)
    }

    // -- data ------------------------------------------------------------

    /// Oldest buffered packet of `category`, without blocking.
    pub fn get_data(&self, category: Category) -> Result<TypedPacket> {
        self.data
            .queue(category)
            .try_dequeue()
            .ok_or(DriverError::BufferEmpty(category))
    }

    /// Oldest buffered packet of `category`, waiting up to `timeout`.
    pub fn wait_data(&self, category: Category, timeout: Duration) -> Result<TypedPacket> {
        self.data.queue(category).dequeue_timeout(timeout)
    }

    pub fn get_status(&self) -> Result<StatusPacket> {
        self.get_typed::<layout::Status>()
    }

    pub fn get_rvmap(&self) -> Result<RvmapPacket> {
        self.get_typed::<layout::Rvmap>()
    }

    pub fn get_detection(&self) -> Result<DetectionPacket> {
        self.get_typed::<layout::Detection>()
    }

    pub fn get_track(&self) -> Result<TrackPacket> {
        self.get_typed::<layout::Track>()
    }

    pub fn get_meas(&self) -> Result<MeasurementPacket> {
        self.get_typed::<layout::Measurement>()
    }

    fn get_typed<L: Layout>(&self) -> Result<Packet<L>> {
        Ok(self.get_data(L::CATEGORY)?.to_packet::<L>()?)
    }

    // -- event log -------------------------------------------------------

    /// Record a caller supplied event in the event log.
    pub fn log_action(&self, action: &str) {
        self.events.log(action);
    }

    pub fn set_logging(&self, enabled: bool) {
        self.events.set_enabled(enabled);
    }

    pub fn is_logging(&self) -> bool {
        self.events.is_enabled()
    }
}

impl<C: Connector> Drop for Driver<C> {
    fn drop(&mut self) {
        if let Err(err) = self.disconnect() {
            tracing::error!(error = %err, "driver shutdown failed");
        }
    }
}

impl<C: Connector> fmt::Debug for Driver<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver")
            .field("session", &self.session)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Everything the connect callback needs to launch receivers.
struct ReceiverStart<C> {
    host: String,
    connector: Arc<C>,
    data: Arc<DataPlane>,
    receivers: Arc<Mutex<Vec<Receiver>>>,
    config: DriverConfig,
}

impl<C: Connector> ReceiverStart<C> {
    fn run(self) {
        // Receivers left over from a connection that dropped on its own.
        if let Err(err) = stop_receivers(&self.data, &self.receivers) {
            tracing::error!(error = %err, "stale receivers did not stop");
        }

        let timing = ReceiverTiming {
            connect_timeout: self.config.session.connect_timeout,
            poll: self.config.data_poll,
            backoff: self.config.reconnect_backoff,
            deadlock_timeout: self.config.session.deadlock_timeout,
        };
        let mut started = Vec::new();
        for (category, port) in self.config.ports.enabled() {
            let addr = host_port(&self.host, port);
            match Receiver::start(
                category,
                addr,
                self.connector.clone(),
                self.data.clone(),
                timing,
            ) {
                Ok(receiver) => started.push(receiver),
                Err(err) => {
                    tracing::error!(category = %category, error = %err, "could not start receiver")
                }
            }
        }
        tracing::debug!(count = started.len(), "data receivers started");
        self.receivers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(started);
    }
}

/// Quit and join every receiver. Queues are closed meanwhile so a
/// receiver blocked on a full buffer can exit.
fn stop_receivers(data: &DataPlane, receivers: &Mutex<Vec<Receiver>>) -> Result<()> {
    let running = std::mem::take(&mut *receivers.lock().unwrap_or_else(PoisonError::into_inner));
    if running.is_empty() {
        return Ok(());
    }

    let mut failure = None;
    let mut stopping = Vec::with_capacity(running.len());
    for receiver in running {
        match receiver.request_quit() {
            Ok(()) => stopping.push(receiver),
            Err(err) => {
                // Its thread cannot observe quit; leave it detached.
                tracing::error!(category = %receiver.category(), error = %err, "receiver quit failed");
                failure.get_or_insert(err);
            }
        }
    }

    data.queues().for_each(|queue| queue.close());
    for receiver in &mut stopping {
        receiver.join();
    }
    data.queues().for_each(|queue| queue.open());

    failure.map_or(Ok(()), Err)
}

/// Join a host and port, bracketing bare IPv6 literals.
fn host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

#[cfg(test)]
mod tests {
    use mesak_frame::{encode, CompleteFrame, Track, TrackHeader};

    use super::*;
    use crate::config::PortMap;
    use crate::event_log::MemoryEventLog;

    fn driver() -> (Driver, Arc<MemoryEventLog>) {
        let memory = Arc::new(MemoryEventLog::new());
        let config = DriverConfig {
            ports: PortMap::command_only(23),
            buffer_length: 4,
            ..DriverConfig::default()
        };
        let driver = Driver::with_connector(TcpConnector::new(), config, memory.clone()).unwrap();
        (driver, memory)
    }

    fn track_packet(id: u32) -> TypedPacket {
        let packet = TrackPacket::new(
            TrackHeader::default(),
            vec![Track {
                id,
                ..Track::default()
            }],
        );
        let bytes = encode(&packet).unwrap();
        mesak_frame::decode(CompleteFrame::from_bytes(bytes), Category::Track).unwrap()
    }

    #[test]
    fn buffers_start_from_config() {
        let (driver, _) = driver();
        for category in Category::ALL {
            assert_eq!(driver.get_buffer_length(category), 4);
            assert_eq!(driver.get_n_buffered(category), 0);
            assert!(driver.get_collect(category));
            assert!(!driver.get_save(category));
        }
        assert_eq!(driver.state(), SessionState::Disconnected);
    }

    #[test]
    fn zero_buffer_length_is_rejected() {
        let config = DriverConfig {
            buffer_length: 0,
            ..DriverConfig::default()
        };
        assert!(matches!(
            Driver::new(config),
            Err(DriverError::InvalidCapacity(0))
        ));
    }

    #[test]
    fn flags_are_per_category() {
        let (driver, _) = driver();
        driver.set_save(Category::Track, true);
        driver.set_collect(Category::Rvmap, false);
        assert!(driver.get_save(Category::Track));
        assert!(!driver.get_save(Category::Status));
        assert!(!driver.get_collect(Category::Rvmap));
        assert!(driver.get_collect(Category::Detection));
    }

    #[test]
    fn get_data_on_empty_buffer() {
        let (driver, _) = driver();
        assert!(matches!(
            driver.get_data(Category::Status),
            Err(DriverError::BufferEmpty(Category::Status))
        ));
        assert!(matches!(
            driver.get_track(),
            Err(DriverError::BufferEmpty(Category::Track))
        ));
        assert!(matches!(
            driver.wait_data(Category::Detection, Duration::from_millis(20)),
            Err(DriverError::Timeout(_))
        ));
    }

    #[test]
    fn buffered_packets_come_back_typed_and_in_order() {
        let (driver, _) = driver();
        driver.data.accept(track_packet(5));
        driver.data.accept(track_packet(6));
        assert_eq!(driver.get_n_buffered(Category::Track), 2);

        assert!(matches!(
            driver.set_buffer_length(Category::Track, 8),
            Err(DriverError::QueueBusy(Category::Track))
        ));

        let first = driver.get_track().unwrap();
        assert_eq!(first.records[0].id, 5);
        let second = driver.get_data(Category::Track).unwrap();
        assert_eq!(second.category(), Category::Track);
        assert_eq!(driver.stats(Category::Track).buffered, 2);

        driver.set_buffer_length(Category::Track, 8).unwrap();
        assert_eq!(driver.get_buffer_length(Category::Track), 8);
    }

    #[test]
    fn flush_reports_dropped_count() {
        let (driver, _) = driver();
        driver.data.accept(track_packet(1));
        driver.data.accept(track_packet(2));
        assert_eq!(driver.flush_buffer(Category::Track), 2);
        assert_eq!(driver.get_n_buffered(Category::Track), 0);
    }

    #[test]
    fn log_action_respects_logging_switch() {
        let (driver, memory) = driver();
        driver.log_action("operator note");
        driver.set_logging(false);
        assert!(!driver.is_logging());
        driver.log_action("hidden");
        assert_eq!(memory.events(), vec!["operator note".to_string()]);
    }

    #[test]
    fn reconnect_requires_previous_connect() {
        let (driver, _) = driver();
        assert!(matches!(
            driver.reconnect(),
            Err(DriverError::InvalidState(_))
        ));
        driver.disconnect().unwrap();
        driver.disconnect().unwrap();
    }

    #[test]
    fn refused_connect_names_the_cause() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let config = DriverConfig {
            ports: PortMap::command_only(port),
            ..DriverConfig::default()
        };
        let driver =
            Driver::with_connector(TcpConnector::new(), config, Arc::new(MemoryEventLog::new()))
                .unwrap();

        match driver.connect("127.0.0.1") {
            Err(DriverError::ConnectFailed { addr, reason }) => {
                assert_eq!(addr, format!("127.0.0.1:{port}"));
                assert!(reason.contains(&addr), "reason: {reason}");
            }
            other => panic!("expected connect failure, got {other:?}"),
        }
        assert_eq!(driver.state(), SessionState::Disconnected);
    }

    #[test]
    fn version_names_the_library() {
        let version = Driver::version();
        assert!(version.starts_with("mesak-driver "));
        assert!(version.contains(VERSION));
    }

    #[test]
    fn ipv6_hosts_are_bracketed() {
        assert_eq!(host_port("10.0.0.5", 23), "10.0.0.5:23");
        assert_eq!(host_port("::1", 29979), "[::1]:29979");
        assert_eq!(host_port("[::1]", 23), "[::1]:23");
    }
}
