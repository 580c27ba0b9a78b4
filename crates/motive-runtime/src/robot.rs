//! [`Robot`] – the state shared between the control cycle and everyone else.
//!
//! All mutable robot state lives behind a single [`parking_lot::Mutex`].
//! The only way in is [`Robot::lock`], which returns a [`RobotGuard`]; the
//! lock is released when the guard drops, on every exit path.  The control
//! cycle holds the guard for a whole receive/arbitrate/send pass, so anything
//! read through a guard is a cycle-boundary snapshot.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use motive_kernel::{Behavior, BehaviorId, BehaviorRegistry, ChannelRanges, LinkHealth};
use motive_protocol::Command;
use motive_types::motion::{Directive, normalize_degrees};
use motive_types::{ResolvedCommand, RobotIdentity, Telemetry};
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use tracing::debug;

/// Hook that may adjust freshly decoded telemetry before behaviors see it.
pub type Refiner = Box<dyn FnMut(&mut Telemetry) + Send>;

/// Running counters for the control cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleStats {
    pub iterations: u64,
    pub overruns: u64,
    pub frames_delivered: u64,
    pub checksum_failures: u64,
    pub read_failures: u64,
    pub send_failures: u64,
    pub commands_sent: u64,
}

/// Motion commands set from outside the arbiter.  Each set channel wins
/// over whatever the behaviors resolved until it is cleared.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct DirectMotion {
    pub(crate) channels: [Option<f64>; 5],
}

impl DirectMotion {
    fn slot(directive: Directive) -> usize {
        Directive::ALL
            .iter()
            .position(|d| *d == directive)
            .unwrap_or_default()
    }

    pub(crate) fn get(&self, directive: Directive) -> Option<f64> {
        self.channels[Self::slot(directive)]
    }

    fn set(&mut self, directive: Directive, value: Option<f64>) {
        self.channels[Self::slot(directive)] = value;
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.channels.iter().all(Option::is_none)
    }
}

/// Everything the cycle and foreground threads share.  Reachable only
/// through a [`RobotGuard`].
pub struct RobotCore {
    pub(crate) telemetry: Telemetry,
    pub(crate) registry: BehaviorRegistry,
    pub(crate) last_command: ResolvedCommand,
    pub(crate) queued: VecDeque<Command>,
    pub(crate) direct: DirectMotion,
    pub(crate) refiners: Vec<Refiner>,
    pub(crate) ranges: ChannelRanges,
    pub(crate) link: LinkHealth,
    pub(crate) stats: CycleStats,
}

impl RobotCore {
    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    pub fn identity(&self) -> Option<&RobotIdentity> {
        self.telemetry.identity.as_ref()
    }

    pub fn registry(&self) -> &BehaviorRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut BehaviorRegistry {
        &mut self.registry
    }

    /// Shorthand for [`BehaviorRegistry::attach`].
    pub fn attach(&mut self, behavior: Box<dyn Behavior>, priority: i32) -> BehaviorId {
        self.registry.attach(behavior, priority)
    }

    /// The command resolved (and acted on) by the most recent iteration.
    pub fn last_command(&self) -> &ResolvedCommand {
        &self.last_command
    }

    /// Number of completed iterations.
    pub fn cycle(&self) -> u64 {
        self.stats.iterations
    }

    pub fn link_health(&self) -> LinkHealth {
        self.link
    }

    pub fn stats(&self) -> CycleStats {
        self.stats
    }

    /// Queue a raw controller command for the next iteration.
    pub fn queue_command(&mut self, command: Command) {
        debug!(command = command.name(), "command queued");
        self.queued.push_back(command);
    }

    pub fn queued_commands(&self) -> usize {
        self.queued.len()
    }

    /// Drive `directive` directly, bypassing the behaviors.  The value is
    /// clamped to the configured channel ranges.
    ///
    /// A heading delta is turned into an absolute heading against the
    /// current pose right away, so holding it does not keep the robot
    /// spinning.
    pub fn set_direct(&mut self, directive: Directive, value: f64) {
        let value = self.ranges.clamp_directive(directive, value).value;
        let (directive, value) = match directive {
            Directive::DeltaHeading => (
                Directive::Heading,
                normalize_degrees(self.telemetry.pose.th + value),
            ),
            other => (other, value),
        };
        if directive.regime().is_some() {
            for rot in [Directive::RotVel, Directive::Heading, Directive::DeltaHeading] {
                self.direct.set(rot, None);
            }
        }
        self.direct.set(directive, Some(value));
    }

    /// Hand `directive` back to the behaviors.  Clearing any rotation
    /// channel clears direct rotation altogether.
    pub fn clear_direct(&mut self, directive: Directive) {
        if directive.regime().is_some() {
            for rot in [Directive::RotVel, Directive::Heading, Directive::DeltaHeading] {
                self.direct.set(rot, None);
            }
        } else {
            self.direct.set(directive, None);
        }
    }

    pub fn clear_direct_motion(&mut self) {
        self.direct = DirectMotion::default();
    }

    pub fn direct(&self, directive: Directive) -> Option<f64> {
        self.direct.get(directive)
    }

    /// Run `refiner` on telemetry after every decoded packet batch.
    pub fn add_refiner(&mut self, refiner: impl FnMut(&mut Telemetry) + Send + 'static) {
        self.refiners.push(Box::new(refiner));
    }
}

/// Exclusive access to the shared robot state.
pub struct RobotGuard<'a>(MutexGuard<'a, RobotCore>);

impl Deref for RobotGuard<'_> {
    type Target = RobotCore;

    fn deref(&self) -> &RobotCore {
        &self.0
    }
}

impl DerefMut for RobotGuard<'_> {
    fn deref_mut(&mut self) -> &mut RobotCore {
        &mut self.0
    }
}

/// Cloneable handle to the shared robot state.
///
/// ```
/// use motive_kernel::stock::ConstantVelocity;
/// use motive_runtime::Robot;
///
/// let robot = Robot::new(true);
/// let mut guard = robot.lock();
/// let id = guard.attach(Box::new(ConstantVelocity::new(200.0)), 10);
/// assert_eq!(guard.registry().is_active(id), Some(true));
/// ```
#[derive(Clone)]
pub struct Robot {
    inner: Arc<Mutex<RobotCore>>,
}

impl Robot {
    /// New robot state whose registry activates behaviors on attach when
    /// `default_active` is set.
    pub fn new(default_active: bool) -> Self {
        Self::with_ranges(default_active, ChannelRanges::default())
    }

    pub(crate) fn with_ranges(default_active: bool, ranges: ChannelRanges) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RobotCore {
                telemetry: Telemetry::default(),
                registry: BehaviorRegistry::new(default_active),
                last_command: ResolvedCommand::idle(),
                queued: VecDeque::new(),
                direct: DirectMotion::default(),
                refiners: Vec::new(),
                ranges,
                link: LinkHealth::Healthy,
                stats: CycleStats::default(),
            })),
        }
    }

    /// Block until the state is free.
    pub fn lock(&self) -> RobotGuard<'_> {
        RobotGuard(self.inner.lock())
    }

    /// Like [`lock`][Self::lock], giving up after `timeout`.
    pub fn try_lock_for(&self, timeout: Duration) -> Option<RobotGuard<'_>> {
        self.inner.try_lock_for(timeout).map(RobotGuard)
    }
}
