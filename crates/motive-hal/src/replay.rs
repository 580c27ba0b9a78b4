//! Replays a recorded controller log as if it were a live link.
//!
//! The log is plain text, one hex-encoded record per line.  Blank lines and
//! lines starting with `#` are skipped; whitespace inside a record is
//! ignored:
//!
//! ```text
//! # status packets captured at 10 Hz
//! FA FB 04 00 02 00 02
//! FAFB0400020002
//! ```
//!
//! Each read returns one record.  Writes are accepted and dropped.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Duration;

use motive_protocol::transport::{Transport, TransportStatus};
use motive_types::MotiveError;
use tracing::{debug, info};

pub struct ReplayTransport {
    path: PathBuf,
    endpoint: String,
    records: Vec<Vec<u8>>,
    queue: VecDeque<Vec<u8>>,
    looping: bool,
    written: u64,
    status: TransportStatus,
}

impl ReplayTransport {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            endpoint: path.display().to_string(),
            path,
            records: Vec::new(),
            queue: VecDeque::new(),
            looping: false,
            written: 0,
            status: TransportStatus::NotOpened,
        }
    }

    /// Start over from the first record once the log is exhausted.
    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    /// Records not yet read.
    pub fn remaining(&self) -> usize {
        self.queue.len()
    }

    /// Bytes written (and discarded) so far.
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    fn parse(&self, text: &str) -> Result<Vec<Vec<u8>>, MotiveError> {
        let mut records = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let compact: String = line.split_whitespace().collect();
            let record = hex::decode(&compact).map_err(|e| MotiveError::Connect {
                endpoint: self.endpoint.clone(),
                details: format!("line {}: {e}", lineno + 1),
            })?;
            records.push(record);
        }
        Ok(records)
    }
}

impl Transport for ReplayTransport {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn open(&mut self) -> Result<(), MotiveError> {
        if self.status == TransportStatus::Open {
            return Ok(());
        }
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) => {
                self.status = TransportStatus::OpenFailed;
                return Err(MotiveError::Connect {
                    endpoint: self.endpoint.clone(),
                    details: e.to_string(),
                });
            }
        };
        let records = match self.parse(&text) {
            Ok(records) => records,
            Err(e) => {
                self.status = TransportStatus::OpenFailed;
                return Err(e);
            }
        };
        info!(log = %self.endpoint, records = records.len(), "replay log loaded");
        self.queue = records.iter().cloned().collect();
        self.records = records;
        self.status = TransportStatus::Open;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], wait: Duration) -> Result<usize, MotiveError> {
        if self.status != TransportStatus::Open {
            return Err(MotiveError::NotOpen {
                endpoint: self.endpoint.clone(),
            });
        }
        if self.queue.is_empty() && self.looping && !self.records.is_empty() {
            debug!(log = %self.endpoint, "replay log rewound");
            self.queue = self.records.iter().cloned().collect();
        }
        let Some(record) = self.queue.front_mut() else {
            std::thread::sleep(wait);
            return Ok(0);
        };
        let n = record.len().min(buf.len());
        buf[..n].copy_from_slice(&record[..n]);
        record.drain(..n);
        if record.is_empty() {
            self.queue.pop_front();
        }
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, MotiveError> {
        if self.status != TransportStatus::Open {
            return Err(MotiveError::NotOpen {
                endpoint: self.endpoint.clone(),
            });
        }
        self.written += data.len() as u64;
        Ok(data.len())
    }

    fn status(&self) -> TransportStatus {
        self.status
    }

    fn close(&mut self) {
        self.queue.clear();
        self.status = TransportStatus::Closed;
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use motive_protocol::receiver::{PacketReceiver, ReceiveOutcome};

    use super::*;

    fn log(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn one_record_per_read() {
        let file = log("# header\nFA FB 04 00 02 00 02\n\nfafb0400020002\n");
        let mut link = ReplayTransport::new(file.path());
        link.open().unwrap();
        assert_eq!(link.remaining(), 2);

        let mut buf = [0u8; 64];
        assert_eq!(link.read(&mut buf, Duration::ZERO).unwrap(), 7);
        assert_eq!(&buf[..7], &[0xFA, 0xFB, 0x04, 0x00, 0x02, 0x00, 0x02]);
        assert_eq!(link.read(&mut buf, Duration::ZERO).unwrap(), 7);
        assert_eq!(link.read(&mut buf, Duration::ZERO).unwrap(), 0);
    }

    #[test]
    fn receiver_reads_recorded_frames() {
        let file = log("0011\nFAFB0400020002\n");
        let mut link = ReplayTransport::new(file.path());
        link.open().unwrap();
        let mut rx = PacketReceiver::new(Duration::from_millis(20));
        match rx.receive(&mut link, Duration::from_millis(10)).unwrap() {
            ReceiveOutcome::Delivered(frame) => assert_eq!(frame.payload(), &[0x00, 0x02]),
            other => panic!("expected a frame, got {other:?}"),
        }
    }

    #[test]
    fn looping_rewinds() {
        let file = log("0102\n");
        let mut link = ReplayTransport::new(file.path()).looping(true);
        link.open().unwrap();
        let mut buf = [0u8; 4];
        for _ in 0..3 {
            assert_eq!(link.read(&mut buf, Duration::ZERO).unwrap(), 2);
        }
    }

    #[test]
    fn bad_hex_fails_to_open() {
        let file = log("FA FB zz\n");
        let mut link = ReplayTransport::new(file.path());
        let err = link.open().unwrap_err();
        assert!(err.to_string().contains("line 1"), "{err}");
        assert_eq!(link.status(), TransportStatus::OpenFailed);
    }

    #[test]
    fn missing_file_fails_to_open() {
        let mut link = ReplayTransport::new("/nonexistent/motive/replay.log");
        assert!(matches!(link.open(), Err(MotiveError::Connect { .. })));
    }

    #[test]
    fn writes_are_counted_and_dropped() {
        let file = log("");
        let mut link = ReplayTransport::new(file.path());
        link.open().unwrap();
        assert_eq!(link.write(&[1, 2, 3]).unwrap(), 3);
        assert_eq!(link.bytes_written(), 3);
    }
}
