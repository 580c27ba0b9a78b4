//! [`PacketSender`] – writes frames to a [`Transport`].

use std::time::Instant;

use motive_types::MotiveError;
use tracing::trace;

use crate::codec::Frame;
use crate::commands::Command;
use crate::transport::Transport;

/// Writes whole frames, looping over partial writes.
#[derive(Debug, Default)]
pub struct PacketSender {
    frames_sent: u64,
    bytes_sent: u64,
    last_write_at: Option<Instant>,
}

impl PacketSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode and write `frame`.  A transport that accepts zero bytes is
    /// treated as a write failure.
    pub fn send<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        frame: &Frame,
    ) -> Result<(), MotiveError> {
        let wire = frame.encode();
        let mut offset = 0;
        while offset < wire.len() {
            let n = transport.write(&wire[offset..])?;
            if n == 0 {
                return Err(MotiveError::Write {
                    endpoint: transport.endpoint().to_string(),
                    details: format!("link accepted 0 of {} bytes", wire.len() - offset),
                });
            }
            offset += n;
        }
        trace!(
            endpoint = transport.endpoint(),
            packet_type = frame.packet_type(),
            len = wire.len(),
            "frame sent"
        );
        self.frames_sent += 1;
        self.bytes_sent += wire.len() as u64;
        self.last_write_at = Some(Instant::now());
        Ok(())
    }

    pub fn send_command<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        command: Command,
    ) -> Result<(), MotiveError> {
        let frame = command.to_frame()?;
        self.send(transport, &frame)
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// When the last frame finished writing.
    pub fn last_write_at(&self) -> Option<Instant> {
        self.last_write_at
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::transport::{MockTransport, TransportStatus};

    /// Accepts at most `chunk` bytes per write.
    struct Trickle {
        chunk: usize,
        out: Vec<u8>,
        writes: usize,
    }

    impl Transport for Trickle {
        fn endpoint(&self) -> &str {
            "trickle"
        }
        fn open(&mut self) -> Result<(), MotiveError> {
            Ok(())
        }
        fn read(&mut self, _buf: &mut [u8], _wait: Duration) -> Result<usize, MotiveError> {
            Ok(0)
        }
        fn write(&mut self, data: &[u8]) -> Result<usize, MotiveError> {
            let n = data.len().min(self.chunk);
            self.out.extend_from_slice(&data[..n]);
            self.writes += 1;
            Ok(n)
        }
        fn status(&self) -> TransportStatus {
            TransportStatus::Open
        }
        fn close(&mut self) {}
    }

    #[test]
    fn worked_vector_goes_out_verbatim() {
        let mock = MockTransport::new();
        let mut link = mock.clone();
        let mut tx = PacketSender::new();
        tx.send(&mut link, &Frame::new(vec![0x00, 0x02]).unwrap())
            .unwrap();
        assert_eq!(mock.written(), vec![0xFA, 0xFB, 0x04, 0x00, 0x02, 0x00, 0x02]);
        assert_eq!(tx.frames_sent(), 1);
        assert_eq!(tx.bytes_sent(), 7);
        assert!(tx.last_write_at().is_some());
    }

    #[test]
    fn partial_writes_are_completed() {
        let mut link = Trickle {
            chunk: 2,
            out: Vec::new(),
            writes: 0,
        };
        let mut tx = PacketSender::new();
        tx.send(&mut link, &Frame::new(vec![0x00, 0x02]).unwrap())
            .unwrap();
        assert_eq!(link.out, vec![0xFA, 0xFB, 0x04, 0x00, 0x02, 0x00, 0x02]);
        assert_eq!(link.writes, 4);
    }

    #[test]
    fn zero_byte_write_is_an_error() {
        let mut link = Trickle {
            chunk: 0,
            out: Vec::new(),
            writes: 0,
        };
        let mut tx = PacketSender::new();
        let err = tx
            .send(&mut link, &Frame::new(vec![0x00]).unwrap())
            .unwrap_err();
        assert!(matches!(err, MotiveError::Write { .. }));
        assert_eq!(tx.frames_sent(), 0);
    }

    #[test]
    fn write_failures_propagate() {
        let mut link = MockTransport::new();
        link.fail_writes(true);
        let mut tx = PacketSender::new();
        assert!(tx.send_command(&mut link, Command::Pulse).is_err());
    }
}
