use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::{Result, TransportError};
use crate::traits::{Connector, RadarStream};

/// Plain TCP connector for radar command and data ports.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    nodelay: bool,
}

impl TcpConnector {
    pub fn new() -> Self {
        Self { nodelay: true }
    }

    /// Toggle `TCP_NODELAY` on connected streams. Default: enabled.
    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for TcpConnector {
    type Stream = RadarStream;

    /// Resolve `addr` and try each candidate until one connects.
    ///
    /// The timeout budget is shared across all candidates.
    fn connect(&self, addr: &str, timeout: Duration) -> Result<RadarStream> {
        let candidates: Vec<_> = addr
            .to_socket_addrs()
            .map_err(|err| TransportError::InvalidAddress {
                addr: addr.to_string(),
                reason: err.to_string(),
            })?
            .collect();
        if candidates.is_empty() {
            return Err(TransportError::InvalidAddress {
                addr: addr.to_string(),
                reason: "no socket addresses resolved".to_string(),
            });
        }

        let deadline = Instant::now() + timeout;
        let mut last_err = None;
        for candidate in candidates {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match TcpStream::connect_timeout(&candidate, remaining) {
                Ok(stream) => {
                    stream.set_nodelay(self.nodelay)?;
                    debug!(%candidate, "connected to radar port");
                    return Ok(RadarStream::from_tcp(stream));
                }
                Err(err) => {
                    debug!(%candidate, error = %err, "radar port connect attempt failed");
                    last_err = Some(err);
                }
            }
        }

        match last_err {
            Some(err) if !crate::error::is_timeout_kind(err.kind()) => {
                Err(TransportError::Connect {
                    addr: addr.to_string(),
                    source: err,
                })
            }
            _ => Err(TransportError::ConnectTimeout {
                addr: addr.to_string(),
                timeout,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    use super::*;
    use crate::traits::Link;

    #[test]
    fn connect_and_exchange_bytes() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 5];
            stream.read_exact(&mut buf).unwrap();
            stream.write_all(&buf).unwrap();
        });

        let mut stream = TcpConnector::new()
            .connect(&addr, Duration::from_secs(1))
            .unwrap();
        stream.write_all(b"*IDN?").unwrap();
        let mut buf = [0u8; 5];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"*IDN?");
        assert!(stream.peer_addr().is_some());

        server.join().unwrap();
    }

    #[test]
    fn refused_connection_reports_connect_error() {
        // Bind then drop to obtain a port with nothing listening.
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().to_string()
        };

        let result = TcpConnector::new().connect(&addr, Duration::from_millis(200));
        assert!(matches!(
            result,
            Err(TransportError::Connect { .. }) | Err(TransportError::ConnectTimeout { .. })
        ));
    }

    #[test]
    fn unresolvable_address_is_rejected() {
        let result = TcpConnector::new().connect("not-an-address", Duration::from_millis(50));
        assert!(matches!(result, Err(TransportError::InvalidAddress { .. })));
    }

    #[test]
    fn read_timeout_surfaces_as_timeout_kind() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = thread::spawn(move || listener.accept().unwrap());

        let mut stream = TcpConnector::new()
            .connect(&addr, Duration::from_secs(1))
            .unwrap();
        stream
            .set_read_timeout(Some(Duration::from_millis(20)))
            .unwrap();

        let _held = server.join().unwrap();
        let mut buf = [0u8; 8];
        let err = stream.read(&mut buf).unwrap_err();
        assert!(crate::error::is_timeout_kind(err.kind()));
        assert!(TransportError::Io(err).is_timeout());
    }

    #[test]
    fn shutdown_unblocks_clone() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = thread::spawn(move || listener.accept().unwrap());

        let stream = TcpConnector::new()
            .connect(&addr, Duration::from_secs(1))
            .unwrap();
        let mut reader = stream.try_clone().unwrap();
        let _held = server.join().unwrap();

        stream.shutdown().unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }
}
