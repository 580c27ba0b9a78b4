//! [`PriorityArbiter`] – folds the active behaviors' requests into one
//! [`ResolvedCommand`] per cycle.
//!
//! # Merge rules
//!
//! Directive channels blend by strength `s`:
//!
//! - [`BlendMode::WeightedOverride`]: `acc = acc * (1 - s) + p * s`.  `s = 1`
//!   overrides everything merged so far.
//! - [`BlendMode::StrengthFill`]: each channel has one unit of strength to
//!   hand out.  A request takes `min(s, 1 - committed)` of what is left and
//!   is averaged in by that share, so once higher priorities have used it
//!   up, lower priorities cannot move the channel at all.
//!
//! In both modes an unset channel adopts the first proposal outright, and
//! `s = 0` (or an absent proposal) leaves the accumulator untouched.
//! Absolute headings blend along the shortest arc.
//!
//! Limit channels only ever tighten: `acc = min(acc, bound)` whatever the
//! strength.
//!
//! After every behavior has been heard, the rotation regime is settled
//! (heading over heading delta over rotational velocity) and the losing
//! rotation channels are cleared.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};

use motive_types::motion::{Directive, Limit, angle_diff, normalize_degrees};
use motive_types::{MotionRequest, ResolvedCommand, Telemetry};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::behavior::{BehaviorId, BehaviorRegistry};
use crate::ranges::ChannelRanges;

/// How directive proposals with `s < 1` combine with what is already merged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendMode {
    #[default]
    WeightedOverride,
    StrengthFill,
}

/// A behavior that panicked while producing its request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BehaviorFault {
    pub id: BehaviorId,
    pub name: String,
    pub details: String,
    /// `true` for the first fault after a clean cycle.
    pub new_streak: bool,
}

/// Result of one arbitration pass.
#[derive(Debug, Clone, Default)]
pub struct Arbitration {
    pub command: ResolvedCommand,
    /// Behaviors that returned a request.
    pub contributors: usize,
    pub faults: Vec<BehaviorFault>,
}

/// Stateless apart from its configuration; never blocks.
///
/// # Example
///
/// ```
/// use motive_kernel::arbiter::PriorityArbiter;
/// use motive_kernel::behavior::BehaviorRegistry;
/// use motive_kernel::stock::{ConstantVelocity, Stop};
/// use motive_types::Telemetry;
///
/// let mut registry = BehaviorRegistry::new(true);
/// registry.attach(Box::new(ConstantVelocity::new(400.0)), 10);
/// registry.attach(Box::new(Stop::new()), 100);
///
/// let arbiter = PriorityArbiter::default();
/// let out = arbiter.resolve(&mut registry, &Telemetry::default());
/// // Stop outranks the cruise and claims the channel at full strength.
/// assert_eq!(out.command.trans_vel(), Some(0.0));
/// ```
#[derive(Debug, Clone, Default)]
pub struct PriorityArbiter {
    mode: BlendMode,
    ranges: ChannelRanges,
}

impl PriorityArbiter {
    pub fn new(mode: BlendMode, ranges: ChannelRanges) -> Self {
        Self { mode, ranges }
    }

    pub fn mode(&self) -> BlendMode {
        self.mode
    }

    pub fn ranges(&self) -> &ChannelRanges {
        &self.ranges
    }

    /// Evaluate every active behavior in descending priority and merge.
    /// Inactive behaviors are skipped without being called.
    pub fn resolve(&self, registry: &mut BehaviorRegistry, telemetry: &Telemetry) -> Arbitration {
        let mut out = Arbitration::default();

        for entry in registry.entries_mut().iter_mut().filter(|e| e.active) {
            let acc = &out.command;
            let produced = catch_unwind(AssertUnwindSafe(|| {
                entry.behavior.produce_request(acc, telemetry)
            }));
            match produced {
                Ok(request) => {
                    entry.faulting = false;
                    if let Some(request) = request {
                        trace!(
                            behavior = entry.behavior.name(),
                            priority = entry.priority,
                            "merging request"
                        );
                        self.merge(&mut out.command, &request);
                        out.contributors += 1;
                    }
                }
                Err(payload) => {
                    let details = panic_message(payload.as_ref());
                    let name = entry.behavior.name().to_string();
                    let new_streak = !entry.faulting;
                    if new_streak {
                        warn!(
                            behavior = %name,
                            id = %entry.id,
                            %details,
                            "behavior panicked; skipping"
                        );
                    } else {
                        debug!(
                            behavior = %name,
                            id = %entry.id,
                            %details,
                            "behavior still panicking"
                        );
                    }
                    entry.faulting = true;
                    out.faults.push(BehaviorFault {
                        id: entry.id,
                        name,
                        details,
                        new_streak,
                    });
                }
            }
        }

        out.command.finalize();
        out
    }

    /// Merge one request into `acc`.
    pub fn merge(&self, acc: &mut ResolvedCommand, request: &MotionRequest) {
        for directive in Directive::ALL {
            let Some(p) = request.directive(directive) else {
                continue;
            };
            if p.strength <= 0.0 {
                continue;
            }
            let c = self.ranges.clamp_directive(directive, p.value);
            if c.clamped {
                debug!(
                    channel = directive.name(),
                    requested = p.value,
                    clamped = c.value,
                    "directive out of range"
                );
            }
            self.blend(acc, directive, c.value, p.strength);
        }

        for limit in Limit::ALL {
            let Some(bound) = request.limit(limit) else {
                continue;
            };
            let c = self.ranges.clamp_limit(limit, bound);
            if c.clamped {
                debug!(
                    channel = limit.name(),
                    requested = bound,
                    clamped = c.value,
                    "limit out of range"
                );
            }
            acc.tighten_limit(limit, c.value);
        }
    }

    fn blend(&self, acc: &mut ResolvedCommand, directive: Directive, value: f64, s: f64) {
        let Some(old) = acc.resolved(directive) else {
            acc.set_directive(directive, value, s);
            return;
        };
        let (weight, commitment) = match self.mode {
            BlendMode::WeightedOverride => (s, 1.0 - (1.0 - old.commitment) * (1.0 - s)),
            BlendMode::StrengthFill => {
                let take = s.min(1.0 - old.commitment);
                if take <= 0.0 {
                    return;
                }
                let total = old.commitment + take;
                (take / total, total)
            }
        };
        let blended = if directive == Directive::Heading {
            normalize_degrees(old.value + angle_diff(value, old.value) * weight)
        } else {
            old.value * (1.0 - weight) + value * weight
        };
        acc.set_directive(directive, blended, commitment);
    }
}

/// Text carried by a caught panic.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use motive_types::motion::RotationRegime;

    use super::*;
    use crate::behavior::Behavior;

    /// Returns a fixed request every cycle.
    struct Fixed(MotionRequest);

    impl Behavior for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }
        fn produce_request(&mut self, _: &ResolvedCommand, _: &Telemetry) -> Option<MotionRequest> {
            Some(self.0.clone())
        }
    }

    fn fixed(f: impl FnOnce(&mut MotionRequest) -> &mut MotionRequest) -> Box<Fixed> {
        let mut req = MotionRequest::new();
        f(&mut req);
        Box::new(Fixed(req))
    }

    /// Counts calls; must never be called while inactive.
    struct Sentinel(Arc<AtomicUsize>);

    impl Behavior for Sentinel {
        fn name(&self) -> &str {
            "sentinel"
        }
        fn produce_request(&mut self, _: &ResolvedCommand, _: &Telemetry) -> Option<MotionRequest> {
            self.0.fetch_add(1, Ordering::SeqCst);
            let mut req = MotionRequest::new();
            req.set_trans_vel(999.0, 1.0);
            Some(req)
        }
    }

    struct Panicky;

    impl Behavior for Panicky {
        fn name(&self) -> &str {
            "panicky"
        }
        fn produce_request(&mut self, _: &ResolvedCommand, _: &Telemetry) -> Option<MotionRequest> {
            panic!("sensor index out of range");
        }
    }

    type Seen = Arc<Mutex<Option<(Option<f64>, f64)>>>;

    /// Records the trans_vel value and commitment it observes.
    struct Observer(Seen);

    impl Behavior for Observer {
        fn name(&self) -> &str {
            "observer"
        }
        fn produce_request(
            &mut self,
            acc: &ResolvedCommand,
            _: &Telemetry,
        ) -> Option<MotionRequest> {
            *self.0.lock().unwrap() = Some((
                acc.trans_vel(),
                acc.commitment(Directive::TransVel),
            ));
            None
        }
    }

    fn resolve(reg: &mut BehaviorRegistry) -> Arbitration {
        PriorityArbiter::default().resolve(reg, &Telemetry::default())
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn no_behaviors_yield_idle_command() {
        let mut reg = BehaviorRegistry::new(true);
        let out = resolve(&mut reg);
        assert!(out.command.is_idle());
        assert_eq!(out.contributors, 0);
    }

    #[test]
    fn full_strength_overrides_lower_priority() {
        let mut reg = BehaviorRegistry::new(true);
        reg.attach(fixed(|r| r.set_trans_vel(100.0, 1.0)), 10);
        reg.attach(fixed(|r| r.set_trans_vel(500.0, 1.0)), 5);
        // Lower priority merges last and overrides at s = 1.
        assert_eq!(resolve(&mut reg).command.trans_vel(), Some(500.0));
    }

    #[test]
    fn zero_strength_and_unset_channels_change_nothing() {
        let mut reg = BehaviorRegistry::new(true);
        reg.attach(fixed(|r| r.set_trans_vel(300.0, 1.0).set_rot_vel(10.0, 1.0)), 10);
        reg.attach(fixed(|r| r.set_trans_vel(-800.0, 0.0)), 5);
        reg.attach(fixed(|r| r.set_lat_vel(50.0, 1.0)), 1);
        let cmd = resolve(&mut reg).command;
        assert_eq!(cmd.trans_vel(), Some(300.0));
        assert_eq!(cmd.directive(Directive::RotVel), Some(10.0));
        assert_eq!(cmd.lat_vel(), Some(50.0));
    }

    #[test]
    fn partial_strength_blends_and_accumulates_commitment() {
        let arbiter = PriorityArbiter::default();
        let mut acc = ResolvedCommand::idle();
        let mut req = MotionRequest::new();
        req.set_trans_vel(100.0, 0.5);
        arbiter.merge(&mut acc, &req);
        // Unset channel adopts the first proposal.
        assert_eq!(acc.trans_vel(), Some(100.0));
        assert!(approx(acc.commitment(Directive::TransVel), 0.5));

        req.set_trans_vel(300.0, 0.5);
        arbiter.merge(&mut acc, &req);
        assert!(approx(acc.trans_vel().unwrap(), 200.0));
        assert!(approx(acc.commitment(Directive::TransVel), 0.75));
    }

    #[test]
    fn strength_fill_stops_once_channel_is_committed() {
        let arbiter = PriorityArbiter::new(BlendMode::StrengthFill, ChannelRanges::default());
        let mut acc = ResolvedCommand::idle();
        let mut req = MotionRequest::new();

        req.set_trans_vel(100.0, 0.25);
        arbiter.merge(&mut acc, &req);
        req.set_trans_vel(500.0, 0.5);
        arbiter.merge(&mut acc, &req);
        // (0.25 * 100 + 0.5 * 500) / 0.75
        assert!(approx(acc.trans_vel().unwrap(), 275.0 / 0.75));
        assert!(approx(acc.commitment(Directive::TransVel), 0.75));

        req.set_trans_vel(1000.0, 1.0);
        arbiter.merge(&mut acc, &req);
        assert!(approx(acc.commitment(Directive::TransVel), 1.0));
        let settled = acc.trans_vel().unwrap();

        req.set_trans_vel(-1000.0, 1.0);
        arbiter.merge(&mut acc, &req);
        assert_eq!(acc.trans_vel(), Some(settled));
    }

    #[test]
    fn headings_blend_along_the_short_arc() {
        let arbiter = PriorityArbiter::default();
        let mut acc = ResolvedCommand::idle();
        let mut req = MotionRequest::new();
        req.set_heading(170.0, 1.0);
        arbiter.merge(&mut acc, &req);
        req.set_heading(-170.0, 0.5);
        arbiter.merge(&mut acc, &req);
        assert!(approx(acc.directive(Directive::Heading).unwrap(), 180.0));
    }

    #[test]
    fn limits_only_tighten() {
        let mut reg = BehaviorRegistry::new(true);
        reg.attach(fixed(|r| r.set_limit(Limit::MaxForwardVel, 500.0)), 30);
        reg.attach(fixed(|r| r.set_limit(Limit::MaxForwardVel, 200.0)), 20);
        reg.attach(fixed(|r| r.set_limit(Limit::MaxForwardVel, 800.0)), 10);
        let cmd = resolve(&mut reg).command;
        assert_eq!(cmd.limit(Limit::MaxForwardVel), Some(200.0));
        assert_eq!(cmd.limit(Limit::MaxBackwardVel), None);
    }

    #[test]
    fn limit_tightening_is_monotonic_for_any_order() {
        let bounds = [700.0, 150.0, 900.0, 400.0, 150.0, 2000.0];
        let arbiter = PriorityArbiter::default();
        let mut acc = ResolvedCommand::idle();
        let mut last = f64::INFINITY;
        for b in bounds {
            let mut req = MotionRequest::new();
            req.set_limit(Limit::MaxRotVel, b);
            arbiter.merge(&mut acc, &req);
            let now = acc.limit(Limit::MaxRotVel).unwrap();
            assert!(now <= last);
            last = now;
        }
        // 2000 was clamped to the 360 deg/s range before tightening.
        assert_eq!(last, 150.0);
    }

    #[test]
    fn inactive_behavior_is_never_invoked() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut reg = BehaviorRegistry::new(true);
        let id = reg.attach_with(Box::new(Sentinel(calls.clone())), 100, false);
        reg.attach(fixed(|r| r.set_trans_vel(100.0, 1.0)), 1);

        for _ in 0..5 {
            assert_eq!(resolve(&mut reg).command.trans_vel(), Some(100.0));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        reg.activate(id);
        resolve(&mut reg);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_behavior_is_contained() {
        let mut reg = BehaviorRegistry::new(true);
        reg.attach(Box::new(Panicky), 50);
        reg.attach(fixed(|r| r.set_trans_vel(250.0, 1.0)), 10);

        let first = resolve(&mut reg);
        assert_eq!(first.command.trans_vel(), Some(250.0));
        assert_eq!(first.faults.len(), 1);
        assert!(first.faults[0].new_streak);
        assert!(first.faults[0].details.contains("out of range"));

        let second = resolve(&mut reg);
        assert_eq!(second.faults.len(), 1);
        assert!(!second.faults[0].new_streak);
    }

    #[test]
    fn lower_priority_sees_higher_priority_accumulator() {
        let seen: Seen = Arc::default();
        let mut reg = BehaviorRegistry::new(true);
        reg.attach(fixed(|r| r.set_trans_vel(300.0, 0.4)), 10);
        reg.attach(Box::new(Observer(seen.clone())), 1);
        resolve(&mut reg);
        let (value, commitment) = seen.lock().unwrap().expect("observer ran");
        assert_eq!(value, Some(300.0));
        assert!(approx(commitment, 0.4));
    }

    #[test]
    fn rotation_regime_prefers_heading() {
        let mut reg = BehaviorRegistry::new(true);
        reg.attach(fixed(|r| r.set_rot_vel(30.0, 1.0)), 30);
        reg.attach(fixed(|r| r.set_delta_heading(15.0, 1.0)), 20);
        reg.attach(fixed(|r| r.set_heading(90.0, 0.3)), 10);
        let cmd = resolve(&mut reg).command;
        assert_eq!(cmd.regime(), Some(RotationRegime::Heading));
        assert_eq!(cmd.directive(Directive::RotVel), None);
        assert_eq!(cmd.directive(Directive::DeltaHeading), None);
        assert_eq!(cmd.directive(Directive::Heading), Some(90.0));
    }

    #[test]
    fn out_of_range_proposals_are_clamped() {
        let mut reg = BehaviorRegistry::new(true);
        reg.attach(fixed(|r| r.set_trans_vel(10_000.0, 1.0).set_rot_vel(-720.0, 1.0)), 0);
        let cmd = resolve(&mut reg).command;
        assert_eq!(cmd.trans_vel(), Some(2200.0));
        assert_eq!(cmd.directive(Directive::RotVel), Some(-360.0));
    }
}
