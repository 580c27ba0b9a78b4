//! Connection handshake.
//!
//! ```text
//! host: SYNC0 ─▶  ◀─ echo 0
//! host: SYNC1 ─▶  ◀─ echo 1
//! host: SYNC2 ─▶  ◀─ 2 "kind\0" "subtype\0" "name\0"
//! host: OPEN, ENABLE 1
//! ```
//!
//! Each step is retried up to `attempts` times.  Status packets seen while
//! waiting for the first echo mean the controller is still streaming from
//! an earlier session; a CLOSE is sent so it drops back into sync mode.

use std::time::{Duration, Instant};

use motive_types::MotiveError;
use motive_types::telemetry::RobotIdentity;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::codec::Frame;
use crate::commands::Command;
use crate::packet::PacketReader;
use crate::receiver::{PacketReceiver, ReceiveOutcome};
use crate::sender::PacketSender;
use crate::sip::is_status_packet;
use crate::transport::Transport;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HandshakeConfig {
    /// Tries per sync step.
    pub attempts: u32,
    pub reply_timeout_ms: u64,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            attempts: 5,
            reply_timeout_ms: 500,
        }
    }
}

/// Run the sync exchange, then open the controller and enable the motors.
pub fn connect<T: Transport + ?Sized>(
    transport: &mut T,
    receiver: &mut PacketReceiver,
    sender: &mut PacketSender,
    config: &HandshakeConfig,
) -> Result<RobotIdentity, MotiveError> {
    transport.open()?;
    let timeout = Duration::from_millis(config.reply_timeout_ms);
    let mut identity = RobotIdentity::default();

    for step in 0u8..3 {
        let reply = sync_step(transport, receiver, sender, step, config.attempts, timeout)?;
        debug!(step, "sync step acknowledged");
        if step == 2 {
            identity = parse_identity(&reply);
        }
    }

    sender.send_command(transport, Command::Open)?;
    sender.send_command(transport, Command::Enable(true))?;
    info!(
        endpoint = transport.endpoint(),
        kind = %identity.kind,
        subtype = %identity.subtype,
        name = %identity.name,
        "controller connected"
    );
    Ok(identity)
}

fn sync_step<T: Transport + ?Sized>(
    transport: &mut T,
    receiver: &mut PacketReceiver,
    sender: &mut PacketSender,
    step: u8,
    attempts: u32,
    timeout: Duration,
) -> Result<Frame, MotiveError> {
    for attempt in 1..=attempts.max(1) {
        sender.send_command(transport, Command::Sync(step))?;
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match receiver.receive(transport, remaining)? {
                ReceiveOutcome::Delivered(frame) if frame.packet_type() == Some(step) => {
                    return Ok(frame);
                }
                ReceiveOutcome::Delivered(frame) => {
                    if step == 0 && frame.packet_type().is_some_and(is_status_packet) {
                        debug!("controller still streaming; closing previous session");
                        sender.send_command(transport, Command::Close)?;
                    }
                }
                _ => {}
            }
            if Instant::now() >= deadline {
                break;
            }
        }
        warn!(step, attempt, attempts, "no sync reply");
    }
    Err(MotiveError::Handshake(format!(
        "no reply to SYNC{step} from {} after {attempts} attempts",
        transport.endpoint()
    )))
}

fn parse_identity(reply: &Frame) -> RobotIdentity {
    let mut r = PacketReader::new(reply.payload());
    // The step byte was already matched.
    let _ = r.u8();
    RobotIdentity {
        kind: r.cstr().unwrap_or_default(),
        subtype: r.cstr().unwrap_or_default(),
        name: r.cstr().unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PacketBuilder;
    use crate::transport::MockTransport;

    fn fast() -> HandshakeConfig {
        HandshakeConfig {
            attempts: 2,
            reply_timeout_ms: 20,
        }
    }

    fn wire(cmd: Command) -> Vec<u8> {
        cmd.to_frame().unwrap().encode()
    }

    fn identity_reply() -> Vec<u8> {
        PacketBuilder::new(2)
            .cstr("Pioneer")
            .cstr("p3dx")
            .cstr("sim")
            .finish()
            .unwrap()
            .encode()
    }

    #[test]
    fn full_exchange_parses_identity() {
        let mock = MockTransport::new();
        mock.inject(&wire(Command::Sync(0)));
        mock.inject(&wire(Command::Sync(1)));
        mock.inject(&identity_reply());

        let mut link = mock.clone();
        let mut rx = PacketReceiver::new(Duration::from_millis(20));
        let mut tx = PacketSender::new();
        let identity = connect(&mut link, &mut rx, &mut tx, &fast()).unwrap();
        assert_eq!(identity.kind, "Pioneer");
        assert_eq!(identity.subtype, "p3dx");
        assert_eq!(identity.name, "sim");

        let mut expected = Vec::new();
        for cmd in [
            Command::Sync(0),
            Command::Sync(1),
            Command::Sync(2),
            Command::Open,
            Command::Enable(true),
        ] {
            expected.extend(wire(cmd));
        }
        assert_eq!(mock.written(), expected);
    }

    #[test]
    fn silent_controller_fails_after_attempts() {
        let mock = MockTransport::new();
        let mut link = mock.clone();
        let mut rx = PacketReceiver::new(Duration::from_millis(20));
        let mut tx = PacketSender::new();
        let err = connect(&mut link, &mut rx, &mut tx, &fast()).unwrap_err();
        assert!(matches!(err, MotiveError::Handshake(_)));
        assert_eq!(tx.frames_sent(), 2);
    }

    #[test]
    fn streaming_controller_is_closed_first() {
        let status = crate::sip::StatusPacket::default().encode().unwrap().encode();
        let mock = MockTransport::new();
        mock.inject(&status);
        mock.inject(&wire(Command::Sync(0)));
        mock.inject(&wire(Command::Sync(1)));
        mock.inject(&identity_reply());

        let mut link = mock.clone();
        let mut rx = PacketReceiver::new(Duration::from_millis(20));
        let mut tx = PacketSender::new();
        connect(&mut link, &mut rx, &mut tx, &fast()).unwrap();

        let written = mock.written();
        let close = wire(Command::Close);
        assert!(
            written.windows(close.len()).any(|w| w == close.as_slice()),
            "CLOSE was not sent"
        );
    }
}
