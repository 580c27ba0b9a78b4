//! [`PacketReceiver`] – turns an unreliable byte stream into verified frames.
//!
//! # State machine
//!
//! | State | On byte | Next |
//! |-------|---------|------|
//! | `AwaitSync1` | `0xFA` → start a candidate frame, anything else is discarded | `AwaitSync2` |
//! | `AwaitSync2` | `0xFB` → keep, anything else abandons the candidate | `AwaitLength` / `AwaitSync1` |
//! | `AwaitLength` | `LEN` (must be `>= 2`) | `Accumulate` |
//! | `Accumulate` | collect `LEN` bytes, then verify the checksum | `AwaitSync1` |
//!
//! Every receive call runs against an overall deadline.  Once a candidate
//! frame has started, each further byte must also arrive within the stall
//! timeout of the previous one, which bounds the cost of a corrupted length
//! byte.  A frame that is still arriving when the deadline expires is kept
//! and resumed by the next call.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use motive_protocol::receiver::{PacketReceiver, ReceiveOutcome};
//! use motive_protocol::transport::MockTransport;
//!
//! let mut link = MockTransport::new();
//! link.inject(&[0x00, 0x11, 0xFA, 0xFB, 0x04, 0x00, 0x02, 0x00, 0x02]);
//!
//! let mut rx = PacketReceiver::new(Duration::from_millis(50));
//! match rx.receive(&mut link, Duration::from_millis(10)).unwrap() {
//!     ReceiveOutcome::Delivered(frame) => assert_eq!(frame.payload(), &[0x00, 0x02]),
//!     other => panic!("expected a frame, got {other:?}"),
//! }
//! ```

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use motive_types::MotiveError;
use tracing::{debug, trace};

use crate::codec::{self, CHECKSUM_LEN, Frame, HEADER_LEN, SYNC1, SYNC2};
use crate::transport::Transport;

const READ_CHUNK: usize = 512;

/// Result of one [`PacketReceiver::receive`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// A frame passed checksum verification.
    Delivered(Frame),
    /// Nothing arrived before the deadline.
    Idle,
    /// Part of a frame arrived and the call ran out of time; the partial
    /// frame is kept and resumed on the next call.
    Incomplete,
    /// A partial frame was abandoned because the line went quiet.
    Stalled,
    /// A complete frame failed verification (or carried an impossible
    /// length) and was discarded.
    ChecksumMismatch,
}

impl ReceiveOutcome {
    pub fn into_frame(self) -> Option<Frame> {
        match self {
            ReceiveOutcome::Delivered(frame) => Some(frame),
            _ => None,
        }
    }
}

/// Running diagnostic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiverStats {
    pub delivered: u64,
    pub checksum_failures: u64,
    pub stalls: u64,
    /// Bytes thrown away while hunting for sync.
    pub discarded_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RxState {
    AwaitSync1,
    AwaitSync2,
    AwaitLength,
    Accumulate { remaining: usize },
}

/// Incremental frame parser over a [`Transport`].
pub struct PacketReceiver {
    state: RxState,
    frame: Vec<u8>,
    frame_started: Instant,
    last_byte_at: Instant,
    pending: VecDeque<u8>,
    scratch: Vec<u8>,
    stall_timeout: Duration,
    polled: bool,
    stats: ReceiverStats,
}

impl PacketReceiver {
    /// Create a receiver that abandons a partial frame after
    /// `stall_timeout` without a byte.
    pub fn new(stall_timeout: Duration) -> Self {
        let now = Instant::now();
        Self {
            state: RxState::AwaitSync1,
            frame: Vec::with_capacity(HEADER_LEN + u8::MAX as usize),
            frame_started: now,
            last_byte_at: now,
            pending: VecDeque::new(),
            scratch: vec![0u8; READ_CHUNK],
            stall_timeout,
            polled: false,
            stats: ReceiverStats::default(),
        }
    }

    pub fn stats(&self) -> ReceiverStats {
        self.stats
    }

    pub fn stall_timeout(&self) -> Duration {
        self.stall_timeout
    }

    /// `true` while a candidate frame is partially received.
    pub fn in_frame(&self) -> bool {
        self.state != RxState::AwaitSync1
    }

    /// Drop any partial frame and buffered bytes.
    pub fn reset(&mut self) {
        self.abandon();
        self.pending.clear();
    }

    /// Try to receive one verified frame within `wait`.
    ///
    /// Framing problems are reported through the [`ReceiveOutcome`] and are
    /// never errors; only transport failures are.
    pub fn receive<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        wait: Duration,
    ) -> Result<ReceiveOutcome, MotiveError> {
        let deadline = Instant::now() + wait;
        self.polled = false;
        let mut miss = ReceiveOutcome::Idle;

        loop {
            let until = if self.in_frame() {
                deadline.min(self.last_byte_at + self.stall_timeout)
            } else {
                deadline
            };

            let Some(byte) = self.next_byte(transport, until)? else {
                let now = Instant::now();
                if self.in_frame() && now >= self.last_byte_at + self.stall_timeout {
                    debug!(
                        endpoint = transport.endpoint(),
                        collected = self.frame.len(),
                        "partial frame stalled; abandoning"
                    );
                    self.stats.stalls += 1;
                    self.abandon();
                    miss = ReceiveOutcome::Stalled;
                    if now < deadline {
                        continue;
                    }
                    return Ok(miss);
                }
                if self.in_frame() && miss == ReceiveOutcome::Idle {
                    return Ok(ReceiveOutcome::Incomplete);
                }
                return Ok(miss);
            };

            match self.state {
                RxState::AwaitSync1 => {
                    if byte == SYNC1 {
                        self.frame.clear();
                        self.frame.push(byte);
                        self.frame_started = self.last_byte_at;
                        self.state = RxState::AwaitSync2;
                    } else {
                        self.stats.discarded_bytes += 1;
                    }
                }
                RxState::AwaitSync2 => {
                    if byte == SYNC2 {
                        self.frame.push(byte);
                        self.state = RxState::AwaitLength;
                    } else {
                        trace!(byte, "second sync byte missing; hunting again");
                        self.stats.discarded_bytes += 2;
                        self.abandon();
                    }
                }
                RxState::AwaitLength => {
                    let len = usize::from(byte);
                    if len < CHECKSUM_LEN {
                        debug!(len, "impossible length byte; discarding candidate");
                        self.stats.checksum_failures += 1;
                        self.abandon();
                        miss = ReceiveOutcome::ChecksumMismatch;
                    } else {
                        self.frame.push(byte);
                        self.state = RxState::Accumulate { remaining: len };
                    }
                }
                RxState::Accumulate { remaining } => {
                    self.frame.push(byte);
                    if remaining > 1 {
                        self.state = RxState::Accumulate {
                            remaining: remaining - 1,
                        };
                        continue;
                    }
                    if codec::verify(&self.frame) {
                        let payload =
                            self.frame[HEADER_LEN..self.frame.len() - CHECKSUM_LEN].to_vec();
                        let frame = Frame::received(payload, self.frame_started);
                        self.stats.delivered += 1;
                        self.abandon();
                        return Ok(ReceiveOutcome::Delivered(frame));
                    }
                    debug!(
                        endpoint = transport.endpoint(),
                        len = self.frame.len(),
                        "checksum mismatch; discarding frame"
                    );
                    self.stats.checksum_failures += 1;
                    self.abandon();
                    miss = ReceiveOutcome::ChecksumMismatch;
                }
            }
        }
    }

    /// Next byte from the pending buffer or the transport, waiting until
    /// `until`.  At least one read is attempted per receive call even when
    /// `until` is already in the past.
    fn next_byte<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        until: Instant,
    ) -> Result<Option<u8>, MotiveError> {
        if let Some(b) = self.pending.pop_front() {
            return Ok(Some(b));
        }
        loop {
            let now = Instant::now();
            if self.polled && now >= until {
                return Ok(None);
            }
            self.polled = true;
            let n = transport.read(&mut self.scratch, until.saturating_duration_since(now))?;
            if n > 0 {
                self.last_byte_at = Instant::now();
                self.pending.extend(&self.scratch[..n]);
                return Ok(self.pending.pop_front());
            }
            if Instant::now() < until {
                std::thread::yield_now();
            }
        }
    }

    fn abandon(&mut self) {
        self.frame.clear();
        self.state = RxState::AwaitSync1;
    }
}
