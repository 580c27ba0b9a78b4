//! TCP client link, for controllers behind a serial-to-Ethernet bridge or a
//! simulator listening on a socket.

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use motive_protocol::transport::{Transport, TransportStatus};
use motive_types::MotiveError;
use tracing::{debug, info, warn};

pub const DEFAULT_PORT: u16 = 8101;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

pub struct TcpTransport {
    addr: String,
    stream: Option<TcpStream>,
    read_timeout: Option<Duration>,
    status: TransportStatus,
}

impl TcpTransport {
    /// `addr` is `host:port`; a bare host gets [`DEFAULT_PORT`].
    pub fn new(addr: impl Into<String>) -> Self {
        let addr = addr.into();
        let addr = if addr.contains(':') {
            addr
        } else {
            format!("{addr}:{DEFAULT_PORT}")
        };
        Self {
            addr,
            stream: None,
            read_timeout: None,
            status: TransportStatus::NotOpened,
        }
    }

    fn resolve(&self) -> Result<Vec<SocketAddr>, MotiveError> {
        let addrs: Vec<SocketAddr> = self
            .addr
            .to_socket_addrs()
            .map_err(|e| MotiveError::Resolve {
                endpoint: self.addr.clone(),
                details: e.to_string(),
            })?
            .collect();
        if addrs.is_empty() {
            return Err(MotiveError::Resolve {
                endpoint: self.addr.clone(),
                details: "no addresses".into(),
            });
        }
        Ok(addrs)
    }

    fn connect(&self) -> Result<TcpStream, MotiveError> {
        let mut last = None;
        for addr in self.resolve()? {
            match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
                Ok(stream) => return Ok(stream),
                Err(e) => last = Some(e),
            }
        }
        Err(match last {
            Some(e) if e.kind() == ErrorKind::ConnectionRefused => MotiveError::Refused {
                endpoint: self.addr.clone(),
            },
            Some(e) => MotiveError::Connect {
                endpoint: self.addr.clone(),
                details: e.to_string(),
            },
            None => MotiveError::Connect {
                endpoint: self.addr.clone(),
                details: "no address tried".into(),
            },
        })
    }

    fn lost(&mut self) {
        self.stream = None;
        self.status = TransportStatus::Lost;
    }
}

impl Transport for TcpTransport {
    fn endpoint(&self) -> &str {
        &self.addr
    }

    fn open(&mut self) -> Result<(), MotiveError> {
        if self.stream.is_some() {
            return Ok(());
        }
        let stream = match self.connect() {
            Ok(stream) => stream,
            Err(e) => {
                self.status = TransportStatus::OpenFailed;
                return Err(e);
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!(addr = %self.addr, error = %e, "could not disable Nagle");
        }
        info!(addr = %self.addr, "tcp link connected");
        self.stream = Some(stream);
        self.read_timeout = None;
        self.status = TransportStatus::Open;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], wait: Duration) -> Result<usize, MotiveError> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(MotiveError::NotOpen {
                endpoint: self.addr.clone(),
            });
        };
        // `set_read_timeout` rejects a zero duration.
        let wait = Some(wait.max(Duration::from_millis(1)));
        if wait != self.read_timeout {
            stream.set_read_timeout(wait).map_err(|e| MotiveError::Read {
                endpoint: self.addr.clone(),
                details: e.to_string(),
            })?;
            self.read_timeout = wait;
        }
        match stream.read(buf) {
            Ok(0) if !buf.is_empty() => {
                warn!(addr = %self.addr, "peer closed the connection");
                self.lost();
                Err(MotiveError::Read {
                    endpoint: self.addr.clone(),
                    details: "connection closed by peer".into(),
                })
            }
            Ok(n) => Ok(n),
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) =>
            {
                Ok(0)
            }
            Err(e) => {
                warn!(addr = %self.addr, error = %e, "tcp read failed");
                self.lost();
                Err(MotiveError::Read {
                    endpoint: self.addr.clone(),
                    details: e.to_string(),
                })
            }
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, MotiveError> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(MotiveError::NotOpen {
                endpoint: self.addr.clone(),
            });
        };
        match stream.write(data) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::Interrupted => Ok(0),
            Err(e) => {
                warn!(addr = %self.addr, error = %e, "tcp write failed");
                self.lost();
                Err(MotiveError::Write {
                    endpoint: self.addr.clone(),
                    details: e.to_string(),
                })
            }
        }
    }

    fn status(&self) -> TransportStatus {
        self.status
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
            debug!(addr = %self.addr, "tcp link closed");
        }
        self.status = TransportStatus::Closed;
    }
}
