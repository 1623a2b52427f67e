//! Command/connection state machine for the radar's command port.
//!
//! One background worker per connection performs the TCP connect, the
//! identity handshake and every command exchange. Callers hand work to it
//! without blocking and learn the outcome through a callback.

use std::fmt;
use std::io::{ErrorKind, Read, Write};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use mesak_transport::{is_timeout_kind, Connector, Link, TcpConnector, TransportError};
use serde::Serialize;

use crate::command::{
    encode_command, CommandResponse, CommandStatus, ResponseParser, IDENTITY_QUERY,
};
use crate::config::SessionConfig;
use crate::error::{DriverError, Result};
use crate::event_log::EventLogger;
use crate::flag::DeadlockFlag;

const READ_CHUNK_SIZE: usize = 4096;
const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

/// Connect completion callback: `true` once connected and identified.
pub type ConnectCallback = Box<dyn FnOnce(bool) + Send + 'static>;

/// Command completion callback.
pub type CommandCallback = Box<dyn FnOnce(CommandResponse) + Send + 'static>;

/// Connection state of a [`CommandSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    Connecting,
    ConnectedIdle,
    ConnectedBusy,
}

impl SessionState {
    pub fn is_connected(self) -> bool {
        matches!(
            self,
            SessionState::ConnectedIdle | SessionState::ConnectedBusy
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::ConnectedIdle => "connected (idle)",
            SessionState::ConnectedBusy => "connected (busy)",
        };
        f.write_str(name)
    }
}

enum JobKind {
    Command(String),
    Blob(Bytes),
    Receive,
}

impl JobKind {
    fn describe(&self) -> String {
        match self {
            JobKind::Command(command) => command.clone(),
            JobKind::Blob(blob) => format!("<blob {} bytes>", blob.len()),
            JobKind::Receive => "<receive>".to_string(),
        }
    }
}

struct Job {
    kind: JobKind,
    callback: CommandCallback,
}

struct Control {
    state: SessionState,
    job_ready: bool,
    exiting: bool,
    /// Incremented per connect; a worker from an older connect exits.
    epoch: u64,
}

struct Shared {
    control: Mutex<Control>,
    wake: Condvar,
    /// Pending job, guarded separately from `control`.
    pending: Mutex<Option<Job>>,
    identity: Mutex<Option<String>>,
    address: Mutex<Option<String>>,
    /// Why the most recent connect failed.
    connect_error: Mutex<Option<String>>,
    /// Worker liveness, used for start/stop signalling only.
    alive: DeadlockFlag,
    events: Arc<EventLogger>,
    config: SessionConfig,
}

impl Shared {
    fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_pending(&self) -> Option<Job> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn set_identity(&self, identity: Option<String>) {
        *self.identity.lock().unwrap_or_else(PoisonError::into_inner) = identity;
    }

    fn set_connect_error(&self, reason: Option<String>) {
        *self
            .connect_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = reason;
    }

    /// True when the worker for `epoch` should stop.
    fn should_exit(control: &Control, epoch: u64) -> bool {
        control.exiting || control.epoch != epoch
    }
}

/// Asynchronous command channel to one radar.
///
/// At most one command is in flight. Every accepted call invokes its
/// callback exactly once; rejected calls return an error and never invoke it.
pub struct CommandSession<C: Connector = TcpConnector> {
    connector: Arc<C>,
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CommandSession<TcpConnector> {
    pub fn new(config: SessionConfig) -> Self {
        Self::with_connector(TcpConnector::new(), config, Arc::new(EventLogger::default()))
    }
}

impl<C: Connector> CommandSession<C> {
    pub fn with_connector(connector: C, config: SessionConfig, events: Arc<EventLogger>) -> Self {
        let alive = DeadlockFlag::with_timeout(false, config.deadlock_timeout);
        Self {
            connector: Arc::new(connector),
            shared: Arc::new(Shared {
                control: Mutex::new(Control {
                    state: SessionState::Disconnected,
                    job_ready: false,
                    exiting: false,
                    epoch: 0,
                }),
                wake: Condvar::new(),
                pending: Mutex::new(None),
                identity: Mutex::new(None),
                address: Mutex::new(None),
                connect_error: Mutex::new(None),
                alive,
                events,
                config,
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SessionState {
        self.shared.control().state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    pub(crate) fn connector(&self) -> &Arc<C> {
        &self.connector
    }

    /// `host:port` of the current or last connection.
    pub fn address(&self) -> Option<String> {
        self.shared
            .address
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Identity string returned by the radar during the handshake.
    pub fn device_identity(&self) -> Option<String> {
        self.shared
            .identity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Reason the most recent connect attempt failed, if it did.
    pub fn last_connect_error(&self) -> Option<String> {
        self.shared
            .connect_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether a worker thread is currently running.
    pub fn worker_alive(&self) -> Result<bool> {
        self.shared.alive.get()
    }

    /// Start connecting to `addr` in the background.
    ///
    /// Only valid while disconnected. `callback` receives `true` once the
    /// radar answered the identity query within the connect timeout.
    pub fn connect_async<F>(&self, addr: &str, callback: F) -> Result<()>
    where
        F: FnOnce(bool) + Send + 'static,
    {
        let epoch = {
            let mut control = self.shared.control();
            if control.state != SessionState::Disconnected {
                return Err(DriverError::InvalidState(format!(
                    "connect requires disconnected session, state is {}",
                    control.state
                )));
            }
            control.state = SessionState::Connecting;
            control.exiting = false;
            control.job_ready = false;
            control.epoch = control.epoch.wrapping_add(1);
            control.epoch
        };

        self.reap_worker();
        *self
            .shared
            .address
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(addr.to_string());
        self.shared.set_identity(None);
        self.shared.set_connect_error(None);

        let spawned = self.spawn_worker(addr.to_string(), epoch, Box::new(callback));
        if let Err(err) = spawned {
            let mut control = self.shared.control();
            if control.epoch == epoch {
                control.state = SessionState::Disconnected;
            }
            return Err(err);
        }
        Ok(())
    }

    /// Blocking connect. Fails with [`DriverError::ConnectFailed`] when the
    /// radar cannot be reached or identified.
    pub fn connect(&self, addr: &str) -> Result<()> {
        let (tx, rx) = mpsc::channel();
        self.connect_async(addr, move |ok| {
            let _ = tx.send(ok);
        })?;
        let ok = rx.recv().unwrap_or(false);
        if ok {
            Ok(())
        } else {
            Err(DriverError::ConnectFailed {
                addr: addr.to_string(),
                reason: self
                    .last_connect_error()
                    .unwrap_or_else(|| "no identity reply".to_string()),
            })
        }
    }

    /// Queue `command` for the worker. Only valid while connected and idle.
    pub fn send_command_async<F>(&self, command: &str, callback: F) -> Result<()>
    where
        F: FnOnce(CommandResponse) + Send + 'static,
    {
        self.submit(JobKind::Command(command.to_string()), Box::new(callback))
    }

    /// Send `command` and wait for its response.
    pub fn send_command(&self, command: &str) -> Result<CommandResponse> {
        self.submit_blocking(JobKind::Command(command.to_string()))
    }

    /// Queue raw bytes for the command port. Only valid while idle.
    pub fn send_blob_async<F>(&self, blob: impl Into<Bytes>, callback: F) -> Result<()>
    where
        F: FnOnce(CommandResponse) + Send + 'static,
    {
        self.submit(JobKind::Blob(blob.into()), Box::new(callback))
    }

    /// Write raw bytes to the command port and wait until they are sent.
    pub fn send_blob(&self, blob: impl Into<Bytes>) -> Result<()> {
        let response = self.submit_blocking(JobKind::Blob(blob.into()))?;
        if response.ok {
            Ok(())
        } else {
            Err(DriverError::Io(std::io::Error::other(response.text)))
        }
    }

    /// Collect unsolicited output from the command port for a short window.
    pub fn receive_async<F>(&self, callback: F) -> Result<()>
    where
        F: FnOnce(CommandResponse) + Send + 'static,
    {
        self.submit(JobKind::Receive, Box::new(callback))
    }

    /// Stop the worker and close the connection. Valid in every state.
    ///
    /// Called from a callback (on the worker thread) this only signals the
    /// worker, which exits once the callback returns.
    pub fn disconnect(&self) -> Result<()> {
        {
            let mut control = self.shared.control();
            control.exiting = true;
            if control.state != SessionState::Disconnected {
                self.shared.events.log("disconnect");
            }
            control.state = SessionState::Disconnected;
        }
        self.shared.wake.notify_all();

        let on_worker = self.reap_worker();
        if !on_worker && self.shared.alive.get()? {
            tracing::warn!("command worker exited without clearing its liveness flag");
            self.shared.alive.set(false)?;
        }

        if let Some(job) = self.shared.take_pending() {
            (job.callback)(CommandResponse::failed("disconnected"));
        }
        self.shared.set_identity(None);
        Ok(())
    }

    fn submit(&self, kind: JobKind, callback: CommandCallback) -> Result<()> {
        {
            let mut control = self.shared.control();
            if control.state != SessionState::ConnectedIdle {
                return Err(DriverError::InvalidState(format!(
                    "command requires idle connection, state is {}",
                    control.state
                )));
            }
            control.state = SessionState::ConnectedBusy;
        }

        *self
            .shared
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Job { kind, callback });

        let exiting = {
            let mut control = self.shared.control();
            control.job_ready = true;
            control.exiting
        };
        self.shared.wake.notify_all();

        // A disconnect that raced with this call may already have drained
        // the pending slot; whoever takes the job runs its callback.
        if exiting {
            if let Some(job) = self.shared.take_pending() {
                (job.callback)(CommandResponse::failed("disconnected"));
            }
        }
        Ok(())
    }

    fn submit_blocking(&self, kind: JobKind) -> Result<CommandResponse> {
        let (tx, rx) = mpsc::channel();
        self.submit(
            kind,
            Box::new(move |response| {
                let _ = tx.send(response);
            }),
        )?;
        rx.recv()
            .map_err(|_| DriverError::InvalidState("command worker vanished".to_string()))
    }

    /// Join a finished or exiting worker. Returns true if called on it.
    ///
    /// On the worker itself the handle stays in place so the owner can
    /// join it later.
    fn reap_worker(&self) -> bool {
        let handle = {
            let mut slot = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
            let on_worker = slot
                .as_ref()
                .map(|handle| handle.thread().id() == thread::current().id());
            match on_worker {
                None => return false,
                Some(true) => return true,
                Some(false) => slot.take(),
            }
        };
        let Some(handle) = handle else {
            return false;
        };
        if handle.join().is_err() {
            tracing::error!("command worker panicked");
        }
        false
    }

    fn spawn_worker(&self, addr: String, epoch: u64, callback: ConnectCallback) -> Result<()> {
        // Hold the liveness flag until the handle is stored so the worker
        // cannot run ahead of its own registration.
        let mut alive = self.shared.alive.acquire()?;
        let shared = self.shared.clone();
        let connector = self.connector.clone();
        let handle = thread::Builder::new()
            .name("mesak-command".to_string())
            .spawn(move || run_worker(shared, connector, addr, epoch, callback))?;
        *self.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        alive.set(true);
        Ok(())
    }
}

impl<C: Connector> Drop for CommandSession<C> {
    fn drop(&mut self) {
        if let Err(err) = self.disconnect() {
            tracing::error!(error = %err, "disconnect on drop failed");
        }
    }
}

impl<C: Connector> fmt::Debug for CommandSession<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSession")
            .field("state", &self.state())
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

fn run_worker<C: Connector>(
    shared: Arc<Shared>,
    connector: Arc<C>,
    addr: String,
    epoch: u64,
    callback: ConnectCallback,
) {
    // Wait for the owner to finish registering this thread.
    if let Err(err) = shared.alive.acquire() {
        tracing::error!(addr = %addr, error = %err, "command worker could not register");
        shared.set_connect_error(Some(err.to_string()));
        finish_worker(&shared, epoch);
        callback(false);
        return;
    }

    shared.events.log(&format!("connect {addr}"));
    let connected = connect_and_identify(&*connector, &addr, &shared.config);

    let mut stream = match connected {
        Ok((stream, identity)) => {
            let mut control = shared.control();
            if Shared::should_exit(&control, epoch) {
                drop(control);
                shared.set_connect_error(Some("connect cancelled".to_string()));
                let _ = stream.shutdown();
                finish_worker(&shared, epoch);
                callback(false);
                return;
            }
            control.state = SessionState::ConnectedIdle;
            drop(control);
            shared.events.log(&format!("connected {addr}: {identity}"));
            tracing::info!(addr = %addr, identity = %identity, "radar connected");
            shared.set_identity(Some(identity));
            callback(true);
            stream
        }
        Err(err) => {
            shared.events.log(&format!("connect {addr} failed: {err}"));
            tracing::warn!(addr = %addr, error = %err, "radar connect failed");
            shared.set_connect_error(Some(err.to_string()));
            finish_worker(&shared, epoch);
            callback(false);
            return;
        }
    };

    loop {
        {
            let mut control = shared.control();
            while !control.job_ready && !Shared::should_exit(&control, epoch) {
                control = shared
                    .wake
                    .wait(control)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            if Shared::should_exit(&control, epoch) {
                break;
            }
            control.job_ready = false;
        }

        let Some(job) = shared.take_pending() else {
            continue;
        };

        let description = job.kind.describe();
        shared.events.log(&format!("> {description}"));
        let outcome = execute(&mut stream, &job.kind, &shared.config);
        let lost = outcome.is_err();
        let response = outcome.unwrap_or_else(|err| {
            tracing::warn!(addr = %addr, error = %err, "command port failed");
            CommandResponse::failed(err.to_string())
        });
        shared
            .events
            .log(&format!("< [{}] {}", response.status, response.text));

        {
            let mut control = shared.control();
            if control.epoch == epoch && control.state == SessionState::ConnectedBusy {
                control.state = if lost {
                    SessionState::Disconnected
                } else {
                    SessionState::ConnectedIdle
                };
            }
        }
        (job.callback)(response);

        if lost {
            break;
        }
    }

    let _ = stream.shutdown();
    if finish_worker(&shared, epoch) {
        if let Some(job) = shared.take_pending() {
            (job.callback)(CommandResponse::failed("disconnected"));
        }
    }
    tracing::debug!(addr = %addr, "command worker exiting");
}

/// Mark this worker gone and drop to `Disconnected`, unless a newer
/// connect has taken over. Returns false in that case.
fn finish_worker(shared: &Shared, epoch: u64) -> bool {
    {
        let mut control = shared.control();
        if control.epoch != epoch {
            return false;
        }
        control.state = SessionState::Disconnected;
    }
    if let Err(err) = shared.alive.set(false) {
        tracing::error!(error = %err, "command worker could not clear liveness flag");
    }
    true
}

fn connect_and_identify<C: Connector>(
    connector: &C,
    addr: &str,
    config: &SessionConfig,
) -> Result<(C::Stream, String)> {
    let deadline = Instant::now() + config.connect_timeout;
    let mut stream = connector.connect(addr, config.connect_timeout)?;
    stream.set_write_timeout(Some(config.connect_timeout))?;
    stream.write_all(&encode_command(IDENTITY_QUERY))?;

    let response = read_response(&mut stream, deadline)?
        .ok_or(DriverError::Timeout(config.connect_timeout))?;
    if !response.ok {
        return Err(DriverError::ConnectFailed {
            addr: addr.to_string(),
            reason: format!("identity query answered {}", response.status),
        });
    }
    if let Some(serial) = &config.expected_serial {
        if !response.text.contains(serial.as_str()) {
            return Err(DriverError::ConnectFailed {
                addr: addr.to_string(),
                reason: format!("expected serial {serial}, radar reported '{}'", response.text),
            });
        }
    }
    Ok((stream, response.text))
}

/// Run one job. An `Err` means the connection is no longer usable.
fn execute<S: Link>(
    stream: &mut S,
    kind: &JobKind,
    config: &SessionConfig,
) -> Result<CommandResponse> {
    match kind {
        JobKind::Command(command) => {
            stream.set_write_timeout(Some(config.command_timeout))?;
            stream.write_all(&encode_command(command))?;
            let deadline = Instant::now() + config.command_timeout;
            Ok(read_response(stream, deadline)?
                .unwrap_or_else(|| CommandResponse::failed("no response before timeout")))
        }
        JobKind::Blob(blob) => {
            stream.set_write_timeout(Some(config.command_timeout))?;
            stream.write_all(blob)?;
            stream.flush()?;
            Ok(CommandResponse::new(CommandStatus::Ok, String::new()))
        }
        JobKind::Receive => {
            let text = drain_text(stream, Instant::now() + config.receive_window)?;
            Ok(CommandResponse::new(CommandStatus::Ok, text))
        }
    }
}

/// Read until a status line arrives or `deadline` passes (`Ok(None)`).
fn read_response<S: Link>(stream: &mut S, deadline: Instant) -> Result<Option<CommandResponse>> {
    let mut parser = ResponseParser::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];
    loop {
        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        stream.set_read_timeout(Some((deadline - now).max(MIN_READ_TIMEOUT)))?;
        match stream.read(&mut chunk) {
            Ok(0) => return Err(TransportError::Closed.into()),
            Ok(n) => {
                if let Some(response) = parser.push(&chunk[..n]) {
                    return Ok(Some(response));
                }
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) if is_timeout_kind(err.kind()) => return Ok(None),
            Err(err) => return Err(err.into()),
        }
    }
}

/// Collect whatever text arrives before `deadline`.
fn drain_text<S: Link>(stream: &mut S, deadline: Instant) -> Result<String> {
    let mut received = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];
    loop {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        stream.set_read_timeout(Some((deadline - now).max(MIN_READ_TIMEOUT)))?;
        match stream.read(&mut chunk) {
            Ok(0) => return Err(TransportError::Closed.into()),
            Ok(n) => received.extend_from_slice(&chunk[..n]),
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) if is_timeout_kind(err.kind()) => break,
            Err(err) => return Err(err.into()),
        }
    }
    Ok(String::from_utf8_lossy(&received)
        .trim_end_matches(['\r', '\n'])
        .to_string())
}
