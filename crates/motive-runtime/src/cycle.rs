//! [`ControlCycle`] – the fixed-period receive/arbitrate/send loop.
//!
//! Each iteration runs with the [`Robot`] lock held from the first byte read
//! to the last frame written:
//!
//! 1. **Receive** – drain verified frames from the transport (bounded per
//!    iteration), fold status packets into telemetry and run the telemetry
//!    refiners.
//! 2. **Watch** – feed the [`ConnectionWatchdog`]; report loss and recovery.
//! 3. **Arbitrate** – let the [`PriorityArbiter`] merge every active
//!    behavior's request.
//! 4. **Override** – direct motion set by foreground callers wins.
//! 5. **Send** – changed (or stale) outputs, then queued raw commands, or a
//!    PULSE when the line has been quiet.
//! 6. **Publish** – telemetry, the resolved command and alerts go out on the
//!    [`EventBus`].
//!
//! The lock is released before sleeping out the rest of the period.  An
//! overrun is counted and reported; iterations never overlap.
//!
//! Unless `stop_on_disconnect` is set, a link that failed is reopened at the
//! start of a later iteration (repeating the handshake if [`connect`]
//! was used), with the wait between attempts doubling up to
//! `reconnect_max_interval_ms`.
//!
//! [`connect`]: ControlCycle::connect

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use motive_kernel::arbiter::panic_message;
use motive_kernel::{
    BlendMode, ChannelRanges, ConnectionWatchdog, LinkHealth, LinkTransition, PriorityArbiter,
};
use motive_middleware::EventBus;
use motive_protocol::handshake::{self, HandshakeConfig};
use motive_protocol::{
    Command, ConversionFactors, PacketReceiver, PacketSender, ReceiveOutcome, TelemetryDecoder,
    Transport, TransportStatus,
};
use motive_types::motion::Directive;
use motive_types::{Alert, Event, EventPayload, MotiveError, ResolvedCommand, RobotIdentity};
use serde::{Deserialize, Serialize};
use tracing::{debug, debug_span, error, info, trace, warn};

use crate::reflector::StateReflector;
use crate::robot::{DirectMotion, Robot, RobotCore};

const SOURCE: &str = "motive-runtime::cycle";

/// Control cycle settings.  Every field has a default, so a partial TOML or
/// JSON table deserializes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleConfig {
    /// Target iteration period.
    pub period_ms: u64,
    /// How long the first receive of an iteration may wait for data.
    pub receive_wait_ms: u64,
    /// A partial frame is abandoned after this long without a byte.
    pub stall_timeout_ms: u64,
    pub max_frames_per_cycle: usize,
    /// Silence after which the connection counts as lost.
    pub connection_timeout_ms: u64,
    /// End the cycle on transport failure or connection loss.
    pub stop_on_disconnect: bool,
    /// Unchanged outputs are re-sent after this long.
    pub state_reflection_refresh_ms: u64,
    /// A PULSE goes out when nothing was written for this long.
    pub pulse_interval_ms: u64,
    /// First wait before reopening a failed link.
    pub reconnect_interval_ms: u64,
    /// Longest wait between reopen attempts.
    pub reconnect_max_interval_ms: u64,
    /// Whether newly attached behaviors start active.
    pub default_active: bool,
    pub blend_mode: BlendMode,
    pub ranges: ChannelRanges,
    pub conversion: ConversionFactors,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            period_ms: 100,
            receive_wait_ms: 0,
            stall_timeout_ms: 50,
            max_frames_per_cycle: 64,
            connection_timeout_ms: 2000,
            stop_on_disconnect: false,
            state_reflection_refresh_ms: 500,
            pulse_interval_ms: 1000,
            reconnect_interval_ms: 250,
            reconnect_max_interval_ms: 8000,
            default_active: true,
            blend_mode: BlendMode::default(),
            ranges: ChannelRanges::default(),
            conversion: ConversionFactors::default(),
        }
    }
}

impl CycleConfig {
    pub fn validate(&self) -> Result<(), MotiveError> {
        if self.period_ms == 0 {
            return Err(MotiveError::Config("period_ms must be at least 1".into()));
        }
        if self.max_frames_per_cycle == 0 {
            return Err(MotiveError::Config(
                "max_frames_per_cycle must be at least 1".into(),
            ));
        }
        self.ranges.validate()
    }

    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

/// Why a cycle stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleExit {
    /// [`CycleHandle::stop`] (or the running flag) ended it.
    Stopped,
    /// A transport failure or connection loss ended it
    /// (`stop_on_disconnect`).
    Disconnected(MotiveError),
    /// The cycle thread panicked.
    Panicked(String),
}

/// Pending reopen of a failed link.
#[derive(Debug, Clone, Copy)]
struct Relink {
    due: Instant,
    backoff: Duration,
}

/// Owns the transport and drives the robot.
pub struct ControlCycle {
    robot: Robot,
    transport: Box<dyn Transport>,
    config: CycleConfig,
    receiver: PacketReceiver,
    sender: PacketSender,
    decoder: TelemetryDecoder,
    arbiter: PriorityArbiter,
    watchdog: ConnectionWatchdog,
    reflector: StateReflector,
    bus: EventBus,
    running: Arc<AtomicBool>,
    /// A transport failure streak is being reported.
    failing: bool,
    /// Repeated after a reopen when set.
    handshake: Option<HandshakeConfig>,
    relink: Option<Relink>,
}

impl ControlCycle {
    pub fn new(transport: Box<dyn Transport>, config: CycleConfig) -> Result<Self, MotiveError> {
        config.validate()?;
        Ok(Self {
            robot: Robot::with_ranges(config.default_active, config.ranges),
            transport,
            receiver: PacketReceiver::new(Duration::from_millis(config.stall_timeout_ms)),
            sender: PacketSender::new(),
            decoder: TelemetryDecoder::new(config.conversion),
            arbiter: PriorityArbiter::new(config.blend_mode, config.ranges),
            watchdog: ConnectionWatchdog::new(
                Duration::from_millis(config.connection_timeout_ms),
                Instant::now(),
            ),
            reflector: StateReflector::new(
                Duration::from_millis(config.state_reflection_refresh_ms),
                config.ranges.rot_vel,
            ),
            bus: EventBus::default(),
            running: Arc::new(AtomicBool::new(true)),
            failing: false,
            handshake: None,
            relink: None,
            config,
        })
    }

    /// Publish on `bus` instead of a private one.
    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = bus;
        self
    }

    pub fn robot(&self) -> Robot {
        self.robot.clone()
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn config(&self) -> &CycleConfig {
        &self.config
    }

    /// Clearing this flag ends [`run`][Self::run] at the next iteration
    /// boundary.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Open the transport and run the controller handshake.  The identity
    /// is recorded in the robot's telemetry.
    pub fn connect(&mut self, config: &HandshakeConfig) -> Result<RobotIdentity, MotiveError> {
        let identity = handshake::connect(
            self.transport.as_mut(),
            &mut self.receiver,
            &mut self.sender,
            config,
        )?;
        let mut guard = self.robot.lock();
        guard.telemetry.identity = Some(identity.clone());
        guard.link = LinkHealth::Healthy;
        self.watchdog.reset(Instant::now());
        self.handshake = Some(config.clone());
        Ok(identity)
    }

    /// Run a single iteration on the caller's thread.
    ///
    /// Returns the first transport failure of the iteration.  With
    /// `stop_on_disconnect` the iteration ends at that failure (or at
    /// connection loss); otherwise it completes with stale telemetry.
    pub fn run_once(&mut self) -> Result<(), MotiveError> {
        let robot = self.robot.clone();
        let mut guard = robot.lock();
        let core: &mut RobotCore = &mut guard;
        let started = Instant::now();
        let n = core.stats.iterations + 1;
        let span = debug_span!("cycle", n);
        let _entered = span.enter();

        let mut failure = None;

        // Reopen a failed link.
        if !self.config.stop_on_disconnect {
            if let Err(e) = self.relink(core, started) {
                failure = Some(e);
            }
        }
        let link_down = self.relink.is_some();

        // Receive.
        let received = if link_down {
            Ok(0)
        } else {
            self.receive_frames(core)
        };
        match received {
            Ok(0) => {}
            Ok(delivered) => {
                core.stats.frames_delivered += delivered;
                self.refine(core);
                self.publish(EventPayload::Telemetry(core.telemetry.clone()));
            }
            Err(e) => {
                core.stats.read_failures += 1;
                self.transport_fault(&e);
                if self.config.stop_on_disconnect {
                    return Err(e);
                }
                failure.get_or_insert(e);
            }
        }

        // Watch.
        if let Some(LinkTransition::Lost { silent_for }) = self.watchdog.check(Instant::now()) {
            let silent_ms = silent_for.as_millis() as u64;
            warn!(endpoint = self.transport.endpoint(), silent_ms, "connection lost");
            core.link = LinkHealth::TimedOut;
            self.publish(EventPayload::Alert(Alert::ConnectionLost { silent_ms }));
            if self.config.stop_on_disconnect {
                return Err(MotiveError::ConnectionLost {
                    endpoint: self.transport.endpoint().to_string(),
                    silent_ms,
                });
            }
        }

        // Arbitrate.
        let arbitration = self.arbiter.resolve(&mut core.registry, &core.telemetry);
        for fault in arbitration.faults.iter().filter(|f| f.new_streak) {
            self.publish(EventPayload::Alert(Alert::BehaviorFault {
                behavior: fault.name.clone(),
                details: fault.details.clone(),
            }));
        }
        let mut command = arbitration.command;
        apply_direct(&mut command, &core.direct);
        trace!(contributors = arbitration.contributors, ?command, "resolved");

        // Send.
        let link_down = link_down || self.transport.status() == TransportStatus::Lost;
        if link_down {
            trace!("link down, outputs held");
        } else if let Err(e) = self.send_outputs(core, &command, started) {
            core.stats.send_failures += 1;
            self.reflector.invalidate();
            self.transport_fault(&e);
            if self.config.stop_on_disconnect {
                return Err(e);
            }
            failure.get_or_insert(e);
        }
        if failure.is_none() && !link_down && self.failing {
            info!(endpoint = self.transport.endpoint(), "transport recovered");
            self.failing = false;
        }

        self.publish(EventPayload::Command {
            cycle: n,
            command: command.clone(),
        });
        core.last_command = command;
        core.stats.iterations = n;

        let elapsed = started.elapsed();
        if elapsed > self.config.period() {
            core.stats.overruns += 1;
            let elapsed_ms = elapsed.as_millis() as u64;
            warn!(cycle = n, elapsed_ms, period_ms = self.config.period_ms, "cycle overrun");
            self.publish(EventPayload::Alert(Alert::CycleOverrun {
                cycle: n,
                elapsed_ms,
            }));
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Run on the caller's thread until the running flag is cleared or,
    /// with `stop_on_disconnect`, the link fails.
    pub fn run(mut self) -> CycleExit {
        let period = self.config.period();
        info!(
            endpoint = self.transport.endpoint(),
            period_ms = self.config.period_ms,
            "control cycle started"
        );
        let exit = loop {
            if !self.running.load(Ordering::Acquire) {
                break CycleExit::Stopped;
            }
            let started = Instant::now();
            if let Err(e) = self.run_once() {
                if self.config.stop_on_disconnect {
                    error!(error = %e, "control cycle stopping on disconnect");
                    break CycleExit::Disconnected(e);
                }
            }
            let remaining = period.saturating_sub(started.elapsed());
            if !remaining.is_zero() {
                thread::sleep(remaining);
            }
        };
        self.running.store(false, Ordering::Release);
        self.shutdown();
        info!(?exit, "control cycle exited");
        exit
    }

    /// Run on a dedicated background thread.
    pub fn spawn(self) -> Result<CycleHandle, MotiveError> {
        let running = self.running_flag();
        let robot = self.robot();
        let thread = thread::Builder::new()
            .name("motive-cycle".into())
            .spawn(move || self.run())
            .map_err(|e| MotiveError::Thread(format!("cannot spawn control cycle: {e}")))?;
        Ok(CycleHandle {
            running,
            robot,
            thread,
        })
    }

    /// Run the telemetry refiners.  One that panics is dropped and
    /// reported; the others still run.
    fn refine(&self, core: &mut RobotCore) {
        let telemetry = &mut core.telemetry;
        let mut index = 0;
        let mut faults = Vec::new();
        core.refiners.retain_mut(|refine| {
            index += 1;
            match catch_unwind(AssertUnwindSafe(|| refine(telemetry))) {
                Ok(()) => true,
                Err(payload) => {
                    faults.push((index, panic_message(payload.as_ref())));
                    false
                }
            }
        });
        for (index, details) in faults {
            warn!(refiner = index, %details, "telemetry refiner panicked and was removed");
            self.publish(EventPayload::Alert(Alert::BehaviorFault {
                behavior: format!("telemetry refiner #{index}"),
                details,
            }));
        }
    }

    /// Reopen the link once it is lost and the backoff has run out.
    fn relink(&mut self, core: &mut RobotCore, now: Instant) -> Result<(), MotiveError> {
        let relink = match self.relink {
            Some(relink) => relink,
            None if self.transport.status() == TransportStatus::Lost => {
                let relink = Relink {
                    due: now,
                    backoff: Duration::from_millis(self.config.reconnect_interval_ms),
                };
                self.relink = Some(relink);
                relink
            }
            None => return Ok(()),
        };
        if now < relink.due {
            return Ok(());
        }

        let endpoint = self.transport.endpoint().to_string();
        debug!(%endpoint, "reopening link");
        self.receiver.reset();
        let reopened = match &self.handshake {
            Some(handshake) => handshake::connect(
                self.transport.as_mut(),
                &mut self.receiver,
                &mut self.sender,
                handshake,
            )
            .map(|identity| core.telemetry.identity = Some(identity)),
            None => self.transport.open(),
        };
        match reopened {
            Ok(()) => {
                info!(%endpoint, "link reopened");
                self.relink = None;
                self.reflector.invalidate();
                Ok(())
            }
            Err(e) => {
                self.transport.close();
                let max = Duration::from_millis(self.config.reconnect_max_interval_ms);
                self.relink = Some(Relink {
                    due: now + relink.backoff,
                    backoff: (relink.backoff * 2).min(max),
                });
                debug!(%endpoint, error = %e, retry_in = ?relink.backoff, "reopen failed");
                self.transport_fault(&e);
                Err(e)
            }
        }
    }

    fn receive_frames(&mut self, core: &mut RobotCore) -> Result<u64, MotiveError> {
        let mut delivered = 0;
        let mut wait = Duration::from_millis(self.config.receive_wait_ms);
        for _ in 0..self.config.max_frames_per_cycle {
            match self.receiver.receive(self.transport.as_mut(), wait)? {
                ReceiveOutcome::Delivered(frame) => {
                    delivered += 1;
                    let transition = self.watchdog.heartbeat(Instant::now());
                    if let Some(LinkTransition::Restored) = transition {
                        info!(endpoint = self.transport.endpoint(), "connection restored");
                        core.link = LinkHealth::Healthy;
                        self.publish(EventPayload::Alert(Alert::ConnectionRestored));
                    }
                    if let Err(e) = self.decoder.apply(&frame, &mut core.telemetry) {
                        debug!(error = %e, "status packet not decoded");
                    }
                }
                ReceiveOutcome::ChecksumMismatch => core.stats.checksum_failures += 1,
                ReceiveOutcome::Idle | ReceiveOutcome::Incomplete | ReceiveOutcome::Stalled => {
                    break;
                }
            }
            wait = Duration::ZERO;
        }
        Ok(delivered)
    }

    fn send_outputs(
        &mut self,
        core: &mut RobotCore,
        command: &ResolvedCommand,
        now: Instant,
    ) -> Result<(), MotiveError> {
        let outputs = self
            .reflector
            .plan(command, &core.telemetry, self.decoder.conversion(), now);
        for cmd in outputs {
            self.sender.send_command(self.transport.as_mut(), cmd)?;
            core.stats.commands_sent += 1;
        }
        while let Some(cmd) = core.queued.front().copied() {
            self.sender.send_command(self.transport.as_mut(), cmd)?;
            core.queued.pop_front();
            core.stats.commands_sent += 1;
            debug!(command = cmd.name(), "queued command sent");
        }

        let pulse_interval = Duration::from_millis(self.config.pulse_interval_ms);
        let pulse_due = self
            .sender
            .last_write_at()
            .is_none_or(|at| now.saturating_duration_since(at) >= pulse_interval);
        if pulse_due {
            self.sender.send_command(self.transport.as_mut(), Command::Pulse)?;
            core.stats.commands_sent += 1;
        }
        Ok(())
    }

    /// Flush queued commands, stop the motors and close the controller.
    fn shutdown(&mut self) {
        let robot = self.robot.clone();
        let mut guard = robot.lock();
        let pending: Vec<Command> = guard.queued.drain(..).collect();
        for cmd in pending.into_iter().chain([Command::Stop, Command::Close]) {
            if let Err(e) = self.sender.send_command(self.transport.as_mut(), cmd) {
                debug!(command = cmd.name(), error = %e, "shutdown command not sent");
                break;
            }
        }
        self.transport.close();
    }

    fn transport_fault(&mut self, e: &MotiveError) {
        if self.failing {
            debug!(error = %e, "transport still failing");
        } else {
            warn!(error = %e, "transport failure");
            self.failing = true;
            self.publish(EventPayload::Alert(Alert::TransportFault {
                details: e.to_string(),
            }));
        }
    }

    fn publish(&self, payload: EventPayload) {
        if let Err(e) = self.bus.publish(Event::new(SOURCE, payload)) {
            debug!(error = %e, "event not published");
        }
    }
}

/// Direct motion replaces whatever the behaviors resolved on the channels
/// it sets; a direct rotation replaces the resolved rotation regime.
fn apply_direct(command: &mut ResolvedCommand, direct: &DirectMotion) {
    if direct.is_empty() {
        return;
    }
    let rotations = [Directive::RotVel, Directive::Heading, Directive::DeltaHeading];
    if rotations.iter().any(|d| direct.get(*d).is_some()) {
        for d in rotations {
            command.clear_directive(d);
        }
    }
    for d in Directive::ALL {
        if let Some(value) = direct.get(d) {
            command.set_directive(d, value, 1.0);
        }
    }
    command.finalize();
}

/// Handle to a cycle running on its own thread.
pub struct CycleHandle {
    running: Arc<AtomicBool>,
    robot: Robot,
    thread: JoinHandle<CycleExit>,
}

impl CycleHandle {
    pub fn robot(&self) -> &Robot {
        &self.robot
    }

    /// Ask the cycle to finish after its current iteration.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire) && !self.thread.is_finished()
    }

    /// Block until the cycle thread ends.
    pub fn wait_for_exit(self) -> CycleExit {
        match self.thread.join() {
            Ok(exit) => exit,
            Err(payload) => {
                let details = panic_message(payload.as_ref());
                error!(%details, "control cycle thread panicked");
                CycleExit::Panicked(details)
            }
        }
    }
}
