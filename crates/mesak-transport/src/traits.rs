use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

use crate::error::Result;

/// A connected byte stream to one radar port.
///
/// Blocking `Read + Write` with adjustable timeouts. A timed-out read
/// surfaces as an `io::Error` of kind `WouldBlock` or `TimedOut`.
pub trait Link: Read + Write + Send + 'static {
    /// Set read timeout on the underlying stream.
    fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()>;

    /// Set write timeout on the underlying stream.
    fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()>;

    /// Shut down both directions. Pending reads on clones return EOF.
    fn shutdown(&self) -> Result<()>;
}

/// Opens links to radar ports.
///
/// `addr` is a `host:port` string. Implementations must give up after
/// `timeout` instead of blocking indefinitely.
pub trait Connector: Send + Sync + 'static {
    type Stream: Link;

    fn connect(&self, addr: &str, timeout: Duration) -> Result<Self::Stream>;
}

/// A connected TCP stream to the radar.
pub struct RadarStream {
    inner: TcpStream,
    peer: Option<SocketAddr>,
}

impl RadarStream {
    pub(crate) fn from_tcp(stream: TcpStream) -> Self {
        let peer = stream.peer_addr().ok();
        Self {
            inner: stream,
            peer,
        }
    }

    /// Remote address of the radar port, if known.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Try to clone this stream (creates a new file descriptor).
    pub fn try_clone(&self) -> Result<Self> {
        let cloned = self.inner.try_clone()?;
        Ok(Self {
            inner: cloned,
            peer: self.peer,
        })
    }
}

impl Read for RadarStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Write for RadarStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

impl Link for RadarStream {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.inner.set_read_timeout(timeout).map_err(Into::into)
    }

    fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.inner.set_write_timeout(timeout).map_err(Into::into)
    }

    fn shutdown(&self) -> Result<()> {
        match self.inner.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            // Already torn down by the remote end.
            Err(err) if err.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

impl std::fmt::Debug for RadarStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RadarStream")
            .field("peer", &self.peer)
            .finish()
    }
}
