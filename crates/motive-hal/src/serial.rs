//! Serial-line link to the motor controller (8N1, no flow control).

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use motive_protocol::transport::{Transport, TransportStatus};
use motive_types::MotiveError;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::{debug, info, warn};

pub const DEFAULT_BAUD: u32 = 9600;

/// A serial port opened on demand.
pub struct SerialTransport {
    path: String,
    baud: u32,
    port: Option<Box<dyn SerialPort>>,
    timeout: Duration,
    status: TransportStatus,
}

impl SerialTransport {
    /// Describe a port; nothing is opened until [`Transport::open`].
    pub fn new(path: impl Into<String>, baud: u32) -> Self {
        Self {
            path: path.into(),
            baud,
            port: None,
            timeout: Duration::from_millis(1),
            status: TransportStatus::NotOpened,
        }
    }

    pub fn baud(&self) -> u32 {
        self.baud
    }

    fn lost(&mut self) {
        self.port = None;
        self.status = TransportStatus::Lost;
    }
}

impl Transport for SerialTransport {
    fn endpoint(&self) -> &str {
        &self.path
    }

    fn open(&mut self) -> Result<(), MotiveError> {
        if self.port.is_some() {
            return Ok(());
        }
        let opened = serialport::new(self.path.as_str(), self.baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(self.timeout)
            .open();
        let port = match opened {
            Ok(port) => port,
            Err(e) => {
                self.status = TransportStatus::OpenFailed;
                return Err(MotiveError::Connect {
                    endpoint: self.path.clone(),
                    details: e.to_string(),
                });
            }
        };
        info!(port = %self.path, baud = self.baud, "serial port opened");
        self.port = Some(port);
        self.status = TransportStatus::Open;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], wait: Duration) -> Result<usize, MotiveError> {
        let Some(port) = self.port.as_mut() else {
            return Err(MotiveError::NotOpen {
                endpoint: self.path.clone(),
            });
        };
        // A zero timeout would turn the port non-blocking on some platforms.
        let wait = wait.max(Duration::from_millis(1));
        if wait != self.timeout {
            port.set_timeout(wait).map_err(|e| MotiveError::Read {
                endpoint: self.path.clone(),
                details: e.to_string(),
            })?;
            self.timeout = wait;
        }
        match port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => Ok(0),
            Err(e) if e.kind() == ErrorKind::Interrupted => Ok(0),
            Err(e) => {
                warn!(port = %self.path, error = %e, "serial read failed");
                self.lost();
                Err(MotiveError::Read {
                    endpoint: self.path.clone(),
                    details: e.to_string(),
                })
            }
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, MotiveError> {
        let Some(port) = self.port.as_mut() else {
            return Err(MotiveError::NotOpen {
                endpoint: self.path.clone(),
            });
        };
        match port.write(data) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::Interrupted => Ok(0),
            Err(e) => {
                warn!(port = %self.path, error = %e, "serial write failed");
                self.lost();
                Err(MotiveError::Write {
                    endpoint: self.path.clone(),
                    details: e.to_string(),
                })
            }
        }
    }

    fn status(&self) -> TransportStatus {
        self.status
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!(port = %self.path, "serial port closed");
        }
        self.status = TransportStatus::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unopened_port_refuses_io() {
        let mut port = SerialTransport::new("/dev/motive-test-none", DEFAULT_BAUD);
        assert_eq!(port.status(), TransportStatus::NotOpened);
        let mut buf = [0u8; 4];
        assert!(matches!(
            port.read(&mut buf, Duration::ZERO),
            Err(MotiveError::NotOpen { .. })
        ));
        assert!(matches!(port.write(&[1]), Err(MotiveError::NotOpen { .. })));
    }

    #[test]
    fn missing_device_fails_to_open() {
        let mut port = SerialTransport::new("/dev/motive-test-none", DEFAULT_BAUD);
        let err = port.open().unwrap_err();
        assert!(matches!(err, MotiveError::Connect { .. }));
        assert_eq!(port.status(), TransportStatus::OpenFailed);
    }
}
