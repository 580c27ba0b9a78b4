//! In-process simulated motor controller for CI/CD testing without physical
//! hardware.
//!
//! [`SimRobot`] implements [`Transport`]: bytes written to it are parsed as
//! command frames, and reads return whatever the simulated controller has to
//! say.  It answers the SYNC handshake, integrates motion commands into a
//! pose, and once opened emits a status packet every `status_interval`.
//!
//! Clones share state, so a test can keep a handle for inspection after the
//! transport has been moved into a control cycle.
//!
//! # Example
//!
//! ```rust
//! use motive_hal::sim::SimRobot;
//! use motive_protocol::handshake::{self, HandshakeConfig};
//! use motive_protocol::{PacketReceiver, PacketSender};
//! use std::time::Duration;
//!
//! let robot = SimRobot::new();
//! let mut link = robot.clone();
//! let identity = handshake::connect(
//!     &mut link,
//!     &mut PacketReceiver::new(Duration::from_millis(50)),
//!     &mut PacketSender::new(),
//!     &HandshakeConfig::default(),
//! )
//! .expect("sim handshake must succeed");
//! assert_eq!(identity.name, "sim");
//! assert!(robot.motors_enabled());
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use motive_protocol::codec::{self, Frame, HEADER_LEN, SYNC1, SYNC2};
use motive_protocol::commands::Command;
use motive_protocol::packet::PacketBuilder;
use motive_protocol::sip::{ConversionFactors, StatusPacket};
use motive_protocol::transport::{Transport, TransportStatus};
use motive_types::MotiveError;
use motive_types::motion::{angle_diff, normalize_degrees};
use motive_types::telemetry::{Pose, RobotIdentity};
use parking_lot::Mutex;
use tracing::{debug, trace};

const DEFAULT_MAX_VEL: f64 = 2200.0;
const DEFAULT_MAX_ROT_VEL: f64 = 360.0;

#[derive(Debug, Clone, Copy, PartialEq)]
enum RotationTarget {
    Velocity(f64),
    Heading(f64),
}

struct SimState {
    identity: RobotIdentity,
    conv: ConversionFactors,
    status_interval: Duration,

    inbound: Vec<u8>,
    outbound: VecDeque<Vec<u8>>,
    commands: Vec<Command>,

    link_open: bool,
    sync_step: u8,
    controller_open: bool,
    motors_enabled: bool,
    next_status_at: Instant,
    last_step: Instant,

    pose: Pose,
    trans_vel: f64,
    lat_vel: f64,
    rotation: RotationTarget,
    rot_vel: f64,
    max_vel: f64,
    max_rot_vel: f64,
    stall_bumpers: u16,
    sonar: Vec<(u8, u16)>,
}

/// Simulated motor controller.
#[derive(Clone)]
pub struct SimRobot {
    state: Arc<Mutex<SimState>>,
}

impl Default for SimRobot {
    fn default() -> Self {
        Self::new()
    }
}

impl SimRobot {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            state: Arc::new(Mutex::new(SimState {
                identity: RobotIdentity {
                    kind: "Pioneer".into(),
                    subtype: "p3dx-sim".into(),
                    name: "sim".into(),
                },
                conv: ConversionFactors::default(),
                status_interval: Duration::from_millis(100),
                inbound: Vec::new(),
                outbound: VecDeque::new(),
                commands: Vec::new(),
                link_open: false,
                sync_step: 0,
                controller_open: false,
                motors_enabled: false,
                next_status_at: now,
                last_step: now,
                pose: Pose::default(),
                trans_vel: 0.0,
                lat_vel: 0.0,
                rotation: RotationTarget::Velocity(0.0),
                rot_vel: 0.0,
                max_vel: DEFAULT_MAX_VEL,
                max_rot_vel: DEFAULT_MAX_ROT_VEL,
                stall_bumpers: 0,
                sonar: Vec::new(),
            })),
        }
    }

    pub fn with_status_interval(self, interval: Duration) -> Self {
        self.state.lock().status_interval = interval;
        self
    }

    pub fn with_identity(self, identity: RobotIdentity) -> Self {
        self.state.lock().identity = identity;
        self
    }

    /// Current simulated pose (mm, degrees).
    pub fn pose(&self) -> Pose {
        self.state.lock().pose
    }

    /// Commanded translational velocity after SETV clamping.
    pub fn trans_vel(&self) -> f64 {
        self.state.lock().trans_vel
    }

    pub fn lat_vel(&self) -> f64 {
        self.state.lock().lat_vel
    }

    /// Rotational velocity applied at the last integration step.
    pub fn rot_vel(&self) -> f64 {
        self.state.lock().rot_vel
    }

    pub fn motors_enabled(&self) -> bool {
        self.state.lock().motors_enabled
    }

    /// `true` between OPEN and CLOSE.
    pub fn is_streaming(&self) -> bool {
        self.state.lock().controller_open
    }

    /// Every command received so far, in arrival order.
    pub fn commands(&self) -> Vec<Command> {
        self.state.lock().commands.clone()
    }

    pub fn clear_commands(&self) {
        self.state.lock().commands.clear();
    }

    /// Raw stall/bumper word reported in status packets.
    pub fn set_stall_bumpers(&self, bits: u16) {
        self.state.lock().stall_bumpers = bits;
    }

    pub fn set_sonar(&self, readings: Vec<(u8, u16)>) {
        self.state.lock().sonar = readings;
    }
}

impl SimState {
    fn handle_inbound(&mut self) {
        loop {
            let Some(start) = self
                .inbound
                .windows(2)
                .position(|w| w == [SYNC1, SYNC2])
            else {
                // Keep a trailing SYNC1 that may pair with the next write.
                let keep = usize::from(self.inbound.last() == Some(&SYNC1));
                let drop = self.inbound.len() - keep;
                self.inbound.drain(..drop);
                return;
            };
            self.inbound.drain(..start);
            if self.inbound.len() < HEADER_LEN {
                return;
            }
            let total = HEADER_LEN + usize::from(self.inbound[2]);
            if self.inbound.len() < total {
                return;
            }
            let bytes: Vec<u8> = self.inbound.drain(..total).collect();
            if !codec::verify(&bytes) {
                debug!("sim controller dropped a corrupted frame");
                continue;
            }
            match Frame::decode(&bytes).and_then(|f| Command::parse(&f)) {
                Ok(cmd) => self.execute(cmd),
                Err(e) => debug!(error = %e, "sim controller ignored a frame"),
            }
        }
    }

    fn execute(&mut self, cmd: Command) {
        trace!(command = cmd.name(), "sim controller command");
        self.commands.push(cmd);
        if !self.controller_open {
            // SYNC0/1/2 share command numbers with PULSE/OPEN/CLOSE; which
            // one is meant depends on how far the sync sequence got.
            match (cmd, self.sync_step) {
                (Command::Pulse | Command::Sync(0), _) => {
                    self.reply(vec![0]);
                    self.sync_step = 1;
                }
                (Command::Open | Command::Sync(1), 1) => {
                    self.reply(vec![1]);
                    self.sync_step = 2;
                }
                (Command::Close | Command::Sync(2), 2) => {
                    self.reply_identity();
                    self.sync_step = 3;
                }
                (Command::Open, 3) => self.open_controller(),
                _ => {}
            }
            return;
        }
        match cmd {
            Command::Close => {
                self.controller_open = false;
                self.sync_step = 0;
                self.motors_enabled = false;
                self.stop_motion();
            }
            Command::Enable(on) => self.motors_enabled = on,
            Command::SetMaxVel(v) => self.max_vel = f64::from(v),
            Command::SetMaxRotVel(v) => self.max_rot_vel = f64::from(v),
            Command::Vel(v) => self.trans_vel = self.clamp_vel(f64::from(v) * self.conv.vel),
            Command::LatVel(v) => self.lat_vel = self.clamp_vel(f64::from(v) * self.conv.vel),
            Command::RotVel(v) => self.rotation = RotationTarget::Velocity(f64::from(v)),
            Command::Heading(h) => {
                self.rotation = RotationTarget::Heading(normalize_degrees(f64::from(h)))
            }
            Command::DeltaHeading(d) => {
                self.rotation =
                    RotationTarget::Heading(normalize_degrees(self.pose.th + f64::from(d)))
            }
            Command::Stop | Command::EStop => self.stop_motion(),
            Command::Pulse | Command::Sonar(_) | Command::Open | Command::Sync(_) => {}
        }
    }

    fn open_controller(&mut self) {
        debug!("sim controller opened");
        self.controller_open = true;
        let now = Instant::now();
        self.last_step = now;
        self.next_status_at = now;
    }

    fn stop_motion(&mut self) {
        self.trans_vel = 0.0;
        self.lat_vel = 0.0;
        self.rotation = RotationTarget::Velocity(0.0);
        self.rot_vel = 0.0;
    }

    fn clamp_vel(&self, v: f64) -> f64 {
        v.clamp(-self.max_vel, self.max_vel)
    }

    fn reply(&mut self, payload: Vec<u8>) {
        if let Ok(frame) = Frame::new(payload) {
            self.outbound.push_back(frame.encode());
        }
    }

    fn reply_identity(&mut self) {
        let built = PacketBuilder::new(2)
            .cstr(&self.identity.kind)
            .cstr(&self.identity.subtype)
            .cstr(&self.identity.name)
            .finish();
        if let Ok(frame) = built {
            self.outbound.push_back(frame.encode());
        }
    }

    /// Advance the kinematics to `now`.
    fn step(&mut self, now: Instant) {
        let dt = now.saturating_duration_since(self.last_step).as_secs_f64();
        self.last_step = now;
        if !self.motors_enabled {
            self.rot_vel = 0.0;
            return;
        }
        self.rot_vel = match self.rotation {
            RotationTarget::Velocity(w) => w.clamp(-self.max_rot_vel, self.max_rot_vel),
            RotationTarget::Heading(target) => {
                let err = angle_diff(target, self.pose.th);
                if dt > 0.0 {
                    (err / dt).clamp(-self.max_rot_vel, self.max_rot_vel)
                } else {
                    0.0
                }
            }
        };
        let th = self.pose.th.to_radians();
        self.pose.x += (self.trans_vel * th.cos() - self.lat_vel * th.sin()) * dt;
        self.pose.y += (self.trans_vel * th.sin() + self.lat_vel * th.cos()) * dt;
        self.pose.th = normalize_degrees(self.pose.th + self.rot_vel * dt);
    }

    fn status_packet(&self) -> StatusPacket {
        let c = &self.conv;
        let to_raw = |mm: f64| ((mm / c.dist).round() as i64).rem_euclid(0x8000) as u16;
        let wheel_offset = if c.diff > 0.0 {
            self.rot_vel.to_radians() / c.diff
        } else {
            0.0
        };
        let moving = self.trans_vel != 0.0 || self.lat_vel != 0.0 || self.rot_vel != 0.0;
        StatusPacket {
            moving,
            raw_x: to_raw(self.pose.x),
            raw_y: to_raw(self.pose.y),
            th: c.heading_units(self.pose.th),
            left_vel: c.vel_units(self.trans_vel - wheel_offset),
            right_vel: c.vel_units(self.trans_vel + wheel_offset),
            battery: 125,
            stall_bumpers: self.stall_bumpers,
            control: c.heading_units(self.pose.th),
            flags: u16::from(self.motors_enabled),
            compass: 0,
            sonar: self.sonar.clone(),
        }
    }
}

impl Transport for SimRobot {
    fn endpoint(&self) -> &str {
        "sim"
    }

    fn open(&mut self) -> Result<(), MotiveError> {
        self.state.lock().link_open = true;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], wait: Duration) -> Result<usize, MotiveError> {
        let deadline = Instant::now() + wait;
        loop {
            let mut s = self.state.lock();
            if !s.link_open {
                return Err(MotiveError::NotOpen {
                    endpoint: "sim".into(),
                });
            }
            if s.outbound.is_empty() && s.controller_open {
                let now = Instant::now();
                if now >= s.next_status_at {
                    s.step(now);
                    let interval = s.status_interval;
                    s.next_status_at = now + interval;
                    let packet = s.status_packet();
                    if let Ok(frame) = packet.encode() {
                        s.outbound.push_back(frame.encode());
                    }
                }
            }
            if let Some(record) = s.outbound.front_mut() {
                let n = record.len().min(buf.len());
                buf[..n].copy_from_slice(&record[..n]);
                record.drain(..n);
                if record.is_empty() {
                    s.outbound.pop_front();
                }
                return Ok(n);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(0);
            }
            let wake = if s.controller_open {
                deadline.min(s.next_status_at)
            } else {
                deadline
            };
            drop(s);
            std::thread::sleep(wake.saturating_duration_since(now));
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, MotiveError> {
        let mut s = self.state.lock();
        if !s.link_open {
            return Err(MotiveError::NotOpen {
                endpoint: "sim".into(),
            });
        }
        s.inbound.extend_from_slice(data);
        s.handle_inbound();
        Ok(data.len())
    }

    fn status(&self) -> TransportStatus {
        if self.state.lock().link_open {
            TransportStatus::Open
        } else {
            TransportStatus::NotOpened
        }
    }

    fn close(&mut self) {
        let mut s = self.state.lock();
        s.link_open = false;
        s.sync_step = 0;
        s.controller_open = false;
        s.motors_enabled = false;
        s.outbound.clear();
        s.inbound.clear();
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
