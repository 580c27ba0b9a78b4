//! `motive-protocol` – The Wire
//!
//! Everything needed to talk to the motor controller over an unreliable
//! byte stream, independent of what carries the bytes.
//!
//! # Modules
//!
//! - [`transport`] – the [`Transport`][transport::Transport] trait every
//!   link implements, plus [`MockTransport`][transport::MockTransport] for
//!   tests.
//! - [`codec`] – [`Frame`][codec::Frame] layout and the 16-bit checksum.
//! - [`packet`] – little-endian payload builder and reader.
//! - [`receiver`] – [`PacketReceiver`][receiver::PacketReceiver]: the
//!   sync-hunting state machine that yields verified frames.
//! - [`sender`] – [`PacketSender`][sender::PacketSender]: frames and writes
//!   outgoing commands.
//! - [`commands`] – the controller command set.
//! - [`sip`] – status packet decoding into
//!   [`Telemetry`][motive_types::Telemetry].
//! - [`handshake`] – SYNC0/1/2 exchange and controller start-up.

pub mod codec;
pub mod commands;
pub mod handshake;
pub mod packet;
pub mod receiver;
pub mod sender;
pub mod sip;
pub mod transport;

pub use codec::Frame;
pub use commands::Command;
pub use handshake::HandshakeConfig;
pub use receiver::{PacketReceiver, ReceiveOutcome, ReceiverStats};
pub use sender::PacketSender;
pub use sip::{ConversionFactors, StatusPacket, TelemetryDecoder};
pub use transport::{MockTransport, Transport, TransportStatus};
