//! The byte-stream contract the framing layer needs from a link.
//!
//! Concrete links (serial line, TCP client, log replay, simulator) live in
//! `motive-hal`.  [`MockTransport`] is a scripted in-memory link for tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use motive_types::MotiveError;
use parking_lot::Mutex;

/// Lifecycle state of a [`Transport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportStatus {
    NotOpened,
    Open,
    OpenFailed,
    Closed,
    /// The link was open and then failed.
    Lost,
}

/// A bidirectional byte stream to the motor controller.
///
/// Implementations never retry on their own: every failure is returned to
/// the caller, which owns the reconnection policy.
pub trait Transport: Send {
    /// Human-readable endpoint used in logs and errors, e.g. `"/dev/ttyS0"`.
    fn endpoint(&self) -> &str;

    /// Open (or connect) the link.  Opening an open link is a no-op.
    fn open(&mut self) -> Result<(), MotiveError>;

    /// Read up to `buf.len()` bytes, blocking at most `wait`.
    ///
    /// Returns `Ok(0)` when nothing arrived in time.  Record-oriented links
    /// may return one whole frame per call.
    fn read(&mut self, buf: &mut [u8], wait: Duration) -> Result<usize, MotiveError>;

    /// Write bytes, returning how many were accepted.
    fn write(&mut self, data: &[u8]) -> Result<usize, MotiveError>;

    fn status(&self) -> TransportStatus;

    fn close(&mut self);
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn endpoint(&self) -> &str {
        (**self).endpoint()
    }

    fn open(&mut self) -> Result<(), MotiveError> {
        (**self).open()
    }

    fn read(&mut self, buf: &mut [u8], wait: Duration) -> Result<usize, MotiveError> {
        (**self).read(buf, wait)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, MotiveError> {
        (**self).write(data)
    }

    fn status(&self) -> TransportStatus {
        (**self).status()
    }

    fn close(&mut self) {
        (**self).close()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// MockTransport
// ─────────────────────────────────────────────────────────────────────────────

/// Scripted transport for tests.
///
/// Reads are served from injected chunks: a read never crosses a chunk
/// boundary, so injecting one chunk per frame emulates a record-oriented
/// link and injecting single bytes emulates a slow serial line.  Clones share
/// the same state, so a test can keep a handle after moving the transport
/// into a cycle.
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockInner>>,
}

#[derive(Default)]
struct MockInner {
    chunks: VecDeque<Vec<u8>>,
    written: Vec<u8>,
    open: bool,
    fail_reads: bool,
    fail_writes: bool,
    reads: usize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `data` as one read chunk.
    pub fn inject(&self, data: &[u8]) {
        self.inner.lock().chunks.push_back(data.to_vec());
    }

    /// Queue `data` one byte per read.
    pub fn inject_bytewise(&self, data: &[u8]) {
        let mut inner = self.inner.lock();
        inner.chunks.extend(data.iter().map(|b| vec![*b]));
    }

    /// Everything written so far.
    pub fn written(&self) -> Vec<u8> {
        self.inner.lock().written.clone()
    }

    pub fn clear_written(&self) {
        self.inner.lock().written.clear();
    }

    /// Number of `read` calls served.
    pub fn reads(&self) -> usize {
        self.inner.lock().reads
    }

    /// `true` once every injected chunk has been read.
    pub fn is_drained(&self) -> bool {
        self.inner.lock().chunks.is_empty()
    }

    pub fn fail_reads(&self, fail: bool) {
        self.inner.lock().fail_reads = fail;
    }

    pub fn fail_writes(&self, fail: bool) {
        self.inner.lock().fail_writes = fail;
    }
}

impl Transport for MockTransport {
    fn endpoint(&self) -> &str {
        "mock"
    }

    fn open(&mut self) -> Result<(), MotiveError> {
        self.inner.lock().open = true;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], wait: Duration) -> Result<usize, MotiveError> {
        let mut inner = self.inner.lock();
        inner.reads += 1;
        if inner.fail_reads {
            return Err(MotiveError::Read {
                endpoint: "mock".into(),
                details: "scripted read failure".into(),
            });
        }
        let Some(chunk) = inner.chunks.front_mut() else {
            drop(inner);
            // Behave like a real link: an idle line blocks for the full wait.
            std::thread::sleep(wait);
            return Ok(0);
        };
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        chunk.drain(..n);
        if chunk.is_empty() {
            inner.chunks.pop_front();
        }
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, MotiveError> {
        let mut inner = self.inner.lock();
        if inner.fail_writes {
            return Err(MotiveError::Write {
                endpoint: "mock".into(),
                details: "scripted write failure".into(),
            });
        }
        inner.written.extend_from_slice(data);
        Ok(data.len())
    }

    fn status(&self) -> TransportStatus {
        if self.inner.lock().open {
            TransportStatus::Open
        } else {
            TransportStatus::NotOpened
        }
    }

    fn close(&mut self) {
        self.inner.lock().open = false;
    }
}
