//! Frame layout and checksum.
//!
//! ```text
//! SYNC1 SYNC2 LEN payload[LEN-2] CHK_HI CHK_LO
//!  0xFA  0xFB
//! ```
//!
//! `LEN` counts every byte after itself: the payload plus the two checksum
//! bytes.  The checksum sums the payload as big-endian 16-bit words modulo
//! 65536; a trailing odd byte is XOR-ed into the sum.

use std::time::Instant;

use motive_types::MotiveError;

pub const SYNC1: u8 = 0xFA;
pub const SYNC2: u8 = 0xFB;
/// Sync bytes plus the length byte.
pub const HEADER_LEN: usize = 3;
pub const CHECKSUM_LEN: usize = 2;
/// Largest payload a one-byte `LEN` field can describe.
pub const MAX_PAYLOAD_LEN: usize = u8::MAX as usize - CHECKSUM_LEN;

/// Compute the frame checksum over `payload`.
pub fn checksum(payload: &[u8]) -> u16 {
    let mut words = payload.chunks_exact(2);
    let mut sum = words
        .by_ref()
        .fold(0u16, |acc, w| acc.wrapping_add(u16::from_be_bytes([w[0], w[1]])));
    if let [odd] = words.remainder() {
        sum ^= u16::from(*odd);
    }
    sum
}

/// One checksummed protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    payload: Vec<u8>,
    received_at: Option<Instant>,
}

impl Frame {
    /// Build an outgoing frame around `payload`.
    pub fn new(payload: impl Into<Vec<u8>>) -> Result<Self, MotiveError> {
        let payload = payload.into();
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(MotiveError::PayloadTooLong {
                len: payload.len(),
                max: MAX_PAYLOAD_LEN,
            });
        }
        Ok(Self {
            payload,
            received_at: None,
        })
    }

    /// Parse one complete wire frame, verifying sync bytes, length and
    /// checksum.
    pub fn decode(bytes: &[u8]) -> Result<Self, MotiveError> {
        if bytes.len() < HEADER_LEN + CHECKSUM_LEN {
            return Err(MotiveError::Malformed(format!(
                "frame of {} bytes is shorter than the minimum {}",
                bytes.len(),
                HEADER_LEN + CHECKSUM_LEN
            )));
        }
        if bytes[0] != SYNC1 || bytes[1] != SYNC2 {
            return Err(MotiveError::Malformed(format!(
                "bad sync bytes {:02X} {:02X}",
                bytes[0], bytes[1]
            )));
        }
        let len = usize::from(bytes[2]);
        if len < CHECKSUM_LEN || HEADER_LEN + len != bytes.len() {
            return Err(MotiveError::Malformed(format!(
                "length byte {len} does not match frame size {}",
                bytes.len()
            )));
        }
        if !verify(bytes) {
            return Err(MotiveError::Malformed("checksum mismatch".into()));
        }
        Ok(Self {
            payload: bytes[HEADER_LEN..bytes.len() - CHECKSUM_LEN].to_vec(),
            received_at: None,
        })
    }

    pub(crate) fn received(payload: Vec<u8>, at: Instant) -> Self {
        Self {
            payload,
            received_at: Some(at),
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// First payload byte: the packet type of status packets, the command
    /// number of commands.
    pub fn packet_type(&self) -> Option<u8> {
        self.payload.first().copied()
    }

    pub fn checksum(&self) -> u16 {
        checksum(&self.payload)
    }

    /// When the first sync byte of this frame arrived, for received frames.
    pub fn received_at(&self) -> Option<Instant> {
        self.received_at
    }

    /// The `LEN` byte for this frame.
    pub fn length_byte(&self) -> u8 {
        // Bounded by MAX_PAYLOAD_LEN at construction.
        (self.payload.len() + CHECKSUM_LEN) as u8
    }

    /// Serialize into wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len() + CHECKSUM_LEN);
        out.extend_from_slice(&[SYNC1, SYNC2, self.length_byte()]);
        out.extend_from_slice(&self.payload);
        out.extend_from_slice(&self.checksum().to_be_bytes());
        out
    }
}

/// `true` when the trailing checksum of a complete wire frame matches its
/// payload.
pub fn verify(bytes: &[u8]) -> bool {
    if bytes.len() < HEADER_LEN + CHECKSUM_LEN {
        return false;
    }
    let split = bytes.len() - CHECKSUM_LEN;
    let sent = u16::from_be_bytes([bytes[split], bytes[split + 1]]);
    checksum(&bytes[HEADER_LEN..split]) == sent
}
