//! Motor-controller command set.
//!
//! Every command frame starts with the command number.  Integer arguments
//! follow as an argument-type byte and the little-endian magnitude:
//!
//! ```text
//! cmd  0x3B  lo hi     positive (or zero) argument
//! cmd  0x1B  lo hi     negative argument, magnitude encoded
//! ```

use motive_types::MotiveError;

use crate::codec::Frame;
use crate::packet::{PacketBuilder, PacketReader};

/// Argument-type byte for a non-negative integer.
pub const ARG_INT: u8 = 0x3B;
/// Argument-type byte for a negative integer (magnitude follows).
pub const ARG_NINT: u8 = 0x1B;
/// Argument-type byte for a string.
pub const ARG_STR: u8 = 0x2B;

/// Command numbers understood by the controller.
pub mod id {
    pub const PULSE: u8 = 0;
    pub const OPEN: u8 = 1;
    pub const CLOSE: u8 = 2;
    pub const ENABLE: u8 = 4;
    pub const SETV: u8 = 6;
    pub const SETRV: u8 = 10;
    pub const VEL: u8 = 11;
    pub const HEAD: u8 = 12;
    pub const DHEAD: u8 = 13;
    pub const RVEL: u8 = 21;
    pub const SONAR: u8 = 28;
    pub const STOP: u8 = 29;
    pub const E_STOP: u8 = 55;
    pub const LATVEL: u8 = 110;

    /// Handshake steps reuse the low command numbers.
    pub const SYNC0: u8 = 0;
    pub const SYNC1: u8 = 1;
    pub const SYNC2: u8 = 2;
}

/// A single controller command.
///
/// Velocities are in robot units (mm/s, deg/s after conversion), headings
/// in robot angle units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Keep-alive.
    Pulse,
    Open,
    Close,
    Enable(bool),
    SetMaxVel(u16),
    SetMaxRotVel(u16),
    Vel(i16),
    RotVel(i16),
    Heading(i16),
    DeltaHeading(i16),
    Sonar(bool),
    Stop,
    EStop,
    LatVel(i16),
    /// Handshake step 0, 1 or 2.
    Sync(u8),
}

impl Command {
    pub fn id(&self) -> u8 {
        match self {
            Command::Pulse => id::PULSE,
            Command::Open => id::OPEN,
            Command::Close => id::CLOSE,
            Command::Enable(_) => id::ENABLE,
            Command::SetMaxVel(_) => id::SETV,
            Command::SetMaxRotVel(_) => id::SETRV,
            Command::Vel(_) => id::VEL,
            Command::RotVel(_) => id::RVEL,
            Command::Heading(_) => id::HEAD,
            Command::DeltaHeading(_) => id::DHEAD,
            Command::Sonar(_) => id::SONAR,
            Command::Stop => id::STOP,
            Command::EStop => id::E_STOP,
            Command::LatVel(_) => id::LATVEL,
            Command::Sync(step) => *step,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Pulse => "PULSE",
            Command::Open => "OPEN",
            Command::Close => "CLOSE",
            Command::Enable(_) => "ENABLE",
            Command::SetMaxVel(_) => "SETV",
            Command::SetMaxRotVel(_) => "SETRV",
            Command::Vel(_) => "VEL",
            Command::RotVel(_) => "RVEL",
            Command::Heading(_) => "HEAD",
            Command::DeltaHeading(_) => "DHEAD",
            Command::Sonar(_) => "SONAR",
            Command::Stop => "STOP",
            Command::EStop => "E_STOP",
            Command::LatVel(_) => "LATVEL",
            Command::Sync(0) => "SYNC0",
            Command::Sync(1) => "SYNC1",
            Command::Sync(_) => "SYNC2",
        }
    }

    fn argument(&self) -> Option<i32> {
        match *self {
            Command::Enable(on) | Command::Sonar(on) => Some(i32::from(on)),
            Command::SetMaxVel(v) | Command::SetMaxRotVel(v) => Some(i32::from(v)),
            Command::Vel(v)
            | Command::RotVel(v)
            | Command::Heading(v)
            | Command::DeltaHeading(v)
            | Command::LatVel(v) => Some(i32::from(v)),
            _ => None,
        }
    }

    /// Encode into an outgoing frame.
    pub fn to_frame(&self) -> Result<Frame, MotiveError> {
        let builder = PacketBuilder::new(self.id());
        let builder = match self.argument() {
            None => builder,
            Some(v) => {
                let argtype = if v < 0 { ARG_NINT } else { ARG_INT };
                // |i16::MIN| fits in u16.
                builder.u8(argtype).u16(v.unsigned_abs() as u16)
            }
        };
        builder.finish()
    }

    /// Decode a command frame, as a controller would.
    pub fn parse(frame: &Frame) -> Result<Self, MotiveError> {
        let mut r = PacketReader::new(frame.payload());
        let cmd = r.u8()?;
        let arg = if r.remaining() == 0 {
            None
        } else {
            let argtype = r.u8()?;
            let magnitude = i32::from(r.u16()?);
            match argtype {
                ARG_INT => Some(magnitude),
                ARG_NINT => Some(-magnitude),
                other => {
                    return Err(MotiveError::Malformed(format!(
                        "command {cmd}: unsupported argument type {other:#04X}"
                    )));
                }
            }
        };

        let signed = |name: &str| -> Result<i16, MotiveError> {
            let v = arg.ok_or_else(|| {
                MotiveError::Malformed(format!("{name} is missing its argument"))
            })?;
            i16::try_from(v)
                .map_err(|_| MotiveError::Malformed(format!("{name} argument {v} out of range")))
        };
        let unsigned = |name: &str| -> Result<u16, MotiveError> {
            let v = arg.ok_or_else(|| {
                MotiveError::Malformed(format!("{name} is missing its argument"))
            })?;
            u16::try_from(v)
                .map_err(|_| MotiveError::Malformed(format!("{name} argument {v} out of range")))
        };

        Ok(match cmd {
            id::PULSE if arg.is_none() => Command::Pulse,
            id::OPEN if arg.is_none() => Command::Open,
            id::CLOSE if arg.is_none() => Command::Close,
            id::PULSE | id::OPEN | id::CLOSE => {
                return Err(MotiveError::Malformed(format!(
                    "command {cmd} takes no argument"
                )));
            }
            id::ENABLE => Command::Enable(unsigned("ENABLE")? != 0),
            id::SETV => Command::SetMaxVel(unsigned("SETV")?),
            id::SETRV => Command::SetMaxRotVel(unsigned("SETRV")?),
            id::VEL => Command::Vel(signed("VEL")?),
            id::HEAD => Command::Heading(signed("HEAD")?),
            id::DHEAD => Command::DeltaHeading(signed("DHEAD")?),
            id::RVEL => Command::RotVel(signed("RVEL")?),
            id::SONAR => Command::Sonar(unsigned("SONAR")? != 0),
            id::STOP => Command::Stop,
            id::E_STOP => Command::EStop,
            id::LATVEL => Command::LatVel(signed("LATVEL")?),
            other => {
                return Err(MotiveError::Malformed(format!(
                    "unknown command number {other}"
                )));
            }
        })
    }
}
