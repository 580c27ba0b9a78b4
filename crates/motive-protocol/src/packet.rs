//! Little-endian payload field helpers.
//!
//! Multi-byte payload fields are little-endian (the checksum is the only
//! big-endian quantity on the wire).  Strings are NUL-terminated.

use motive_types::MotiveError;

use crate::codec::Frame;

/// Largest payload the controller firmware accepts.
pub const MAX_CONTROLLER_PAYLOAD: usize = 200;

/// Incrementally builds a payload and seals it into a [`Frame`].
///
/// ```
/// use motive_protocol::packet::PacketBuilder;
///
/// let frame = PacketBuilder::new(11).i16(300).finish().unwrap();
/// assert_eq!(frame.payload(), &[11, 0x2C, 0x01]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct PacketBuilder {
    buf: Vec<u8>,
}

impl PacketBuilder {
    /// Start a payload whose first byte is `packet_type`.
    pub fn new(packet_type: u8) -> Self {
        Self {
            buf: vec![packet_type],
        }
    }

    pub fn u8(mut self, v: u8) -> Self {
        self.buf.push(v);
        self
    }

    pub fn u16(mut self, v: u16) -> Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn i16(mut self, v: i16) -> Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn i32(mut self, v: i32) -> Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    /// Append `s` followed by a NUL terminator.
    pub fn cstr(mut self, s: &str) -> Self {
        self.buf.extend(s.bytes().filter(|b| *b != 0));
        self.buf.push(0);
        self
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn finish(self) -> Result<Frame, MotiveError> {
        if self.buf.len() > MAX_CONTROLLER_PAYLOAD {
            return Err(MotiveError::PayloadTooLong {
                len: self.buf.len(),
                max: MAX_CONTROLLER_PAYLOAD,
            });
        }
        Frame::new(self.buf)
    }
}

/// Cursor over a received payload.
#[derive(Debug, Clone)]
pub struct PacketReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take<const N: usize>(&mut self, field: &str) -> Result<[u8; N], MotiveError> {
        let end = self.pos + N;
        let bytes = self.data.get(self.pos..end).ok_or_else(|| {
            MotiveError::Malformed(format!(
                "payload ended at byte {} while reading {field}",
                self.data.len()
            ))
        })?;
        self.pos = end;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8, MotiveError> {
        self.take::<1>("u8").map(|b| b[0])
    }

    pub fn u16(&mut self) -> Result<u16, MotiveError> {
        self.take::<2>("u16").map(u16::from_le_bytes)
    }

    pub fn i16(&mut self) -> Result<i16, MotiveError> {
        self.take::<2>("i16").map(i16::from_le_bytes)
    }

    pub fn i32(&mut self) -> Result<i32, MotiveError> {
        self.take::<4>("i32").map(i32::from_le_bytes)
    }

    /// Read a NUL-terminated string.  A missing terminator consumes the rest
    /// of the payload.
    pub fn cstr(&mut self) -> Result<String, MotiveError> {
        let rest = &self.data[self.pos.min(self.data.len())..];
        if rest.is_empty() {
            return Err(MotiveError::Malformed(
                "payload ended while reading a string".into(),
            ));
        }
        let end = rest.iter().position(|b| *b == 0).unwrap_or(rest.len());
        let s = String::from_utf8_lossy(&rest[..end]).into_owned();
        self.pos += (end + 1).min(rest.len());
        Ok(s)
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }
}
