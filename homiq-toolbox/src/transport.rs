//! Link transports: TCP (serial-over-IP gateways) and local serial ports.
//! Both satisfy [`Transport`]; [`Link`] picks one from an [`Endpoint`].

use std::fmt;
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use crate::config::Config;

/// Largest read the session loops request at once.
pub const READ_CHUNK: usize = 4096;

/// Capability set shared by every link.
pub trait Transport {
    /// Write the whole buffer or fail.
    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError>;
    /// Read up to `max` bytes. Empty on timeout.
    fn read(&mut self, max: usize) -> Result<Vec<u8>, TransportError>;
    /// Release the connection. Safe to call more than once.
    fn close(&mut self);
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connect to {endpoint} failed: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },
    #[error("open {endpoint} failed: {source}")]
    Open {
        endpoint: String,
        #[source]
        source: serialport::Error,
    },
    #[error("write failed: {0}")]
    Write(#[source] std::io::Error),
    #[error("read failed: {0}")]
    Read(#[source] std::io::Error),
    #[error("peer closed the connection")]
    Disconnected,
    #[error("transport already closed")]
    Closed,
}

/// Where to reach the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Endpoint {
    Tcp {
        host: String,
        port: u16,
    },
    Serial {
        #[serde(rename = "port")]
        path: String,
        baud: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EndpointError {
    #[error("expected HOST:PORT, got {0:?}")]
    MissingPort(String),
    #[error("invalid port in {0:?}")]
    BadPort(String),
}

impl FromStr for Endpoint {
    type Err = EndpointError;

    /// Parse `HOST:PORT`, splitting on the last colon.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| EndpointError::MissingPort(s.to_string()))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| EndpointError::BadPort(s.to_string()))?;
        Ok(Endpoint::Tcp {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp { host, port } => write!(f, "{}:{}", host, port),
            Endpoint::Serial { path, baud } => write!(f, "{}@{}", path, baud),
        }
    }
}

/// Zero read timeouts mean "block forever" to the OS; clamp them.
fn nonzero(d: Duration) -> Duration {
    d.max(Duration::from_millis(1))
}

fn is_timeout(kind: ErrorKind) -> bool {
    matches!(kind, ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted)
}

/// Stream-socket link, connected on construction.
pub struct TcpTransport {
    stream: Option<TcpStream>,
    peer: String,
}

impl TcpTransport {
    pub fn connect(
        host: &str,
        port: u16,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let peer = format!("{}:{}", host, port);
        let connect_err = |source| TransportError::Connect {
            endpoint: peer.clone(),
            source,
        };
        let addrs = (host, port).to_socket_addrs().map_err(connect_err)?;
        let mut last = std::io::Error::new(ErrorKind::NotFound, "no addresses resolved");
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, nonzero(connect_timeout)) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(nonzero(read_timeout))).map_err(connect_err)?;
                    let _ = stream.set_nodelay(true);
                    info!(%addr, "connected");
                    return Ok(Self {
                        stream: Some(stream),
                        peer: peer.clone(),
                    });
                }
                Err(e) => {
                    debug!(%addr, error = %e, "connect attempt failed");
                    last = e;
                }
            }
        }
        Err(connect_err(last))
    }
}

impl Transport for TcpTransport {
    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;
        stream.write_all(bytes).map_err(TransportError::Write)?;
        stream.flush().map_err(TransportError::Write)
    }

    fn read(&mut self, max: usize) -> Result<Vec<u8>, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;
        if max == 0 {
            return Ok(Vec::new());
        }
        let mut buf = vec![0u8; max];
        match stream.read(&mut buf) {
            Ok(0) => Err(TransportError::Disconnected),
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(e) if is_timeout(e.kind()) => Ok(Vec::new()),
            Err(e) => Err(TransportError::Read(e)),
        }
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
            debug!(peer = %self.peer, "tcp link closed");
        }
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Serial-port link, opened on construction.
pub struct SerialTransport {
    port: Option<Box<dyn serialport::SerialPort>>,
    path: String,
}

impl SerialTransport {
    pub fn open(path: &str, baud: u32, read_timeout: Duration) -> Result<Self, TransportError> {
        let port = serialport::new(path, baud)
            .timeout(nonzero(read_timeout))
            .open()
            .map_err(|source| TransportError::Open {
                endpoint: path.to_string(),
                source,
            })?;
        info!(path, baud, "serial port opened");
        Ok(Self {
            port: Some(port),
            path: path.to_string(),
        })
    }
}

impl Transport for SerialTransport {
    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let port = self.port.as_mut().ok_or(TransportError::Closed)?;
        port.write_all(bytes).map_err(TransportError::Write)?;
        port.flush().map_err(TransportError::Write)
    }

    fn read(&mut self, max: usize) -> Result<Vec<u8>, TransportError> {
        let port = self.port.as_mut().ok_or(TransportError::Closed)?;
        let mut buf = vec![0u8; max];
        match port.read(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(e) if is_timeout(e.kind()) => Ok(Vec::new()),
            Err(e) => Err(TransportError::Read(e)),
        }
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!(path = %self.path, "serial port closed");
        }
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// The link variant chosen for a session.
pub enum Link {
    Tcp(TcpTransport),
    Serial(SerialTransport),
}

impl Link {
    /// Connect or open according to `endpoint`, with timeouts from `cfg`.
    pub fn open(endpoint: &Endpoint, cfg: &Config) -> Result<Self, TransportError> {
        match endpoint {
            Endpoint::Tcp { host, port } => {
                TcpTransport::connect(host, *port, cfg.connect_timeout(), cfg.tcp_read_timeout())
                    .map(Link::Tcp)
            }
            Endpoint::Serial { path, baud } => {
                SerialTransport::open(path, *baud, cfg.serial_read_timeout()).map(Link::Serial)
            }
        }
    }
}

impl Transport for Link {
    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        match self {
            Link::Tcp(t) => t.write(bytes),
            Link::Serial(s) => s.write(bytes),
        }
    }

    fn read(&mut self, max: usize) -> Result<Vec<u8>, TransportError> {
        match self {
            Link::Tcp(t) => t.read(max),
            Link::Serial(s) => s.read(max),
        }
    }

    fn close(&mut self) {
        match self {
            Link::Tcp(t) => t.close(),
            Link::Serial(s) => s.close(),
        }
    }
}
