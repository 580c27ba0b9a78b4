//! Motor status packets and their translation into [`Telemetry`].
//!
//! The controller streams a status packet every few tens of milliseconds.
//! Payload layout (little-endian):
//!
//! | Field | Type | Notes |
//! |-------|------|-------|
//! | type | u8 | `0x32` stopped, `0x33` moving |
//! | x, y | u16 | 15-bit wrapping encoder position |
//! | th | i16 | heading, robot angle units |
//! | left_vel, right_vel | i16 | wheel velocities |
//! | battery | u8 | tenths of a volt |
//! | stall_bumpers | u16 | bit 0 left stall, bits 1-7 front bumpers, bit 8 right stall, bits 9-15 rear bumpers |
//! | control | i16 | heading setpoint |
//! | flags | u16 | bit 0 motors enabled |
//! | compass | u8 | |
//! | sonar count | u8 | followed by `(index: u8, range: u16)` pairs |

use chrono::Utc;
use motive_types::MotiveError;
use motive_types::motion::normalize_degrees;
use motive_types::telemetry::{SonarReading, Telemetry};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::codec::Frame;
use crate::packet::{PacketBuilder, PacketReader};

pub const STATUS_STOPPED: u8 = 0x32;
pub const STATUS_MOVING: u8 = 0x33;

const POSITION_MASK: u16 = 0x7FFF;
const POSITION_MODULUS: i32 = 0x8000;
const POSITION_HALF: i32 = 0x4000;

pub fn is_status_packet(packet_type: u8) -> bool {
    matches!(packet_type, STATUS_STOPPED | STATUS_MOVING)
}

/// Unit conversion between robot-native integers and SI-ish telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionFactors {
    /// Millimetres per encoder position unit.
    pub dist: f64,
    /// mm/s per wheel velocity unit.
    pub vel: f64,
    /// Degrees per heading unit.
    pub angle: f64,
    /// Millimetres per sonar range unit.
    pub range: f64,
    /// Radians/s of rotation per mm/s of wheel velocity difference.
    pub diff: f64,
}

impl Default for ConversionFactors {
    fn default() -> Self {
        Self {
            dist: 1.0,
            vel: 1.0,
            angle: 360.0 / 4096.0,
            range: 1.0,
            diff: 0.0056,
        }
    }
}

impl ConversionFactors {
    /// mm/s to a VEL / LATVEL argument, saturating at the i16 range.
    pub fn vel_units(&self, mm_per_sec: f64) -> i16 {
        saturate(mm_per_sec / self.vel)
    }

    /// Degrees (or deg/s) to a HEAD / DHEAD / RVEL argument.
    pub fn degree_units(&self, degrees: f64) -> i16 {
        saturate(degrees)
    }

    /// Heading in robot angle units for a status packet.
    pub fn heading_units(&self, degrees: f64) -> i16 {
        saturate(normalize_degrees(degrees) / self.angle)
    }
}

fn saturate(v: f64) -> i16 {
    if v.is_nan() {
        0
    } else {
        v.round().clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16
    }
}

/// Raw, unconverted status packet fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusPacket {
    pub moving: bool,
    pub raw_x: u16,
    pub raw_y: u16,
    pub th: i16,
    pub left_vel: i16,
    pub right_vel: i16,
    /// Tenths of a volt.
    pub battery: u8,
    pub stall_bumpers: u16,
    pub control: i16,
    pub flags: u16,
    pub compass: u8,
    /// `(index, range)` pairs.
    pub sonar: Vec<(u8, u16)>,
}

impl StatusPacket {
    pub fn decode(frame: &Frame) -> Result<Self, MotiveError> {
        let mut r = PacketReader::new(frame.payload());
        let moving = match r.u8()? {
            STATUS_STOPPED => false,
            STATUS_MOVING => true,
            other => {
                return Err(MotiveError::Malformed(format!(
                    "packet type {other:#04X} is not a status packet"
                )));
            }
        };
        let mut packet = Self {
            moving,
            raw_x: r.u16()? & POSITION_MASK,
            raw_y: r.u16()? & POSITION_MASK,
            th: r.i16()?,
            left_vel: r.i16()?,
            right_vel: r.i16()?,
            battery: r.u8()?,
            stall_bumpers: r.u16()?,
            control: r.i16()?,
            flags: r.u16()?,
            compass: r.u8()?,
            sonar: Vec::new(),
        };
        let count = r.u8()?;
        packet.sonar.reserve(usize::from(count));
        for _ in 0..count {
            let index = r.u8()?;
            let range = r.u16()?;
            packet.sonar.push((index, range));
        }
        Ok(packet)
    }

    pub fn encode(&self) -> Result<Frame, MotiveError> {
        let sonar_count = u8::try_from(self.sonar.len()).map_err(|_| {
            MotiveError::Malformed(format!("{} sonar readings do not fit", self.sonar.len()))
        })?;
        let mut b = PacketBuilder::new(if self.moving {
            STATUS_MOVING
        } else {
            STATUS_STOPPED
        })
        .u16(self.raw_x & POSITION_MASK)
        .u16(self.raw_y & POSITION_MASK)
        .i16(self.th)
        .i16(self.left_vel)
        .i16(self.right_vel)
        .u8(self.battery)
        .u16(self.stall_bumpers)
        .i16(self.control)
        .u16(self.flags)
        .u8(self.compass)
        .u8(sonar_count);
        for (index, range) in &self.sonar {
            b = b.u8(*index).u16(*range);
        }
        b.finish()
    }

    pub fn left_stalled(&self) -> bool {
        self.stall_bumpers & 0x0001 != 0
    }

    pub fn right_stalled(&self) -> bool {
        self.stall_bumpers & 0x0100 != 0
    }

    /// Front bumpers in the low byte, rear bumpers in the high byte.
    pub fn bumpers(&self) -> u16 {
        let sb = self.stall_bumpers;
        ((sb >> 1) & 0x7F) | (((sb >> 9) & 0x7F) << 8)
    }

    pub fn motors_enabled(&self) -> bool {
        self.flags & 0x0001 != 0
    }
}

/// Signed change between two 15-bit wrapping positions.
fn wrapped_delta(new: u16, old: u16) -> i32 {
    let mut d = i32::from(new) - i32::from(old);
    if d > POSITION_HALF {
        d -= POSITION_MODULUS;
    } else if d < -POSITION_HALF {
        d += POSITION_MODULUS;
    }
    d
}

/// Folds status packets into a [`Telemetry`] snapshot.
#[derive(Debug, Clone, Default)]
pub struct TelemetryDecoder {
    conv: ConversionFactors,
    last_raw: Option<(u16, u16)>,
    ignored: u64,
}

impl TelemetryDecoder {
    pub fn new(conv: ConversionFactors) -> Self {
        Self {
            conv,
            last_raw: None,
            ignored: 0,
        }
    }

    pub fn conversion(&self) -> &ConversionFactors {
        &self.conv
    }

    /// Frames of other packet types seen so far.
    pub fn ignored(&self) -> u64 {
        self.ignored
    }

    /// Apply `frame` to `telemetry`.  Returns `Ok(false)` when the frame is
    /// not a status packet; it is counted and otherwise ignored.
    pub fn apply(&mut self, frame: &Frame, telemetry: &mut Telemetry) -> Result<bool, MotiveError> {
        if !frame.packet_type().is_some_and(is_status_packet) {
            self.ignored += 1;
            trace!(packet_type = frame.packet_type(), "ignoring non-status packet");
            return Ok(false);
        }
        let p = StatusPacket::decode(frame)?;
        let c = &self.conv;

        match self.last_raw {
            None => {
                telemetry.pose.x = f64::from(p.raw_x) * c.dist;
                telemetry.pose.y = f64::from(p.raw_y) * c.dist;
            }
            Some((ox, oy)) => {
                telemetry.pose.x += f64::from(wrapped_delta(p.raw_x, ox)) * c.dist;
                telemetry.pose.y += f64::from(wrapped_delta(p.raw_y, oy)) * c.dist;
            }
        }
        self.last_raw = Some((p.raw_x, p.raw_y));

        telemetry.pose.th = normalize_degrees(f64::from(p.th) * c.angle);
        telemetry.left_vel = f64::from(p.left_vel) * c.vel;
        telemetry.right_vel = f64::from(p.right_vel) * c.vel;
        telemetry.trans_vel = (telemetry.left_vel + telemetry.right_vel) / 2.0;
        telemetry.rot_vel =
            ((telemetry.right_vel - telemetry.left_vel) / 2.0 * c.diff).to_degrees();
        telemetry.battery_volts = f64::from(p.battery) / 10.0;
        telemetry.left_stalled = p.left_stalled();
        telemetry.right_stalled = p.right_stalled();
        telemetry.bumpers = p.bumpers();
        telemetry.motors_enabled = p.motors_enabled();
        telemetry.moving = p.moving;

        for (index, range) in &p.sonar {
            let range = f64::from(*range) * c.range;
            match telemetry.sonar.iter_mut().find(|s| s.index == *index) {
                Some(existing) => existing.range = range,
                None => telemetry.sonar.push(SonarReading {
                    index: *index,
                    range,
                }),
            }
        }
        telemetry.sonar.sort_by_key(|s| s.index);

        telemetry.packet_count += 1;
        telemetry.received_at = Some(Utc::now());
        Ok(true)
    }
}
