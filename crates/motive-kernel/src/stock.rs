//! Small reusable behaviors for demos, tests and safety layers.

use motive_types::motion::{Directive, Limit, angle_diff, normalize_degrees};
use motive_types::{MotionRequest, ResolvedCommand, Telemetry};

use crate::behavior::Behavior;

/// Commands zero translation and rotation at full strength.
#[derive(Debug, Default)]
pub struct Stop;

impl Stop {
    pub fn new() -> Self {
        Self
    }
}

impl Behavior for Stop {
    fn name(&self) -> &str {
        "stop"
    }

    fn description(&self) -> &str {
        "hold the robot still"
    }

    fn produce_request(&mut self, _: &ResolvedCommand, _: &Telemetry) -> Option<MotionRequest> {
        let mut req = MotionRequest::new();
        req.set_trans_vel(0.0, 1.0).set_rot_vel(0.0, 1.0);
        Some(req)
    }
}

/// Drives at a fixed velocity.
#[derive(Debug)]
pub struct ConstantVelocity {
    trans_vel: f64,
    rot_vel: Option<f64>,
    strength: f64,
}

impl ConstantVelocity {
    pub fn new(trans_vel: f64) -> Self {
        Self {
            trans_vel,
            rot_vel: None,
            strength: 1.0,
        }
    }

    pub fn with_rot_vel(mut self, deg_per_sec: f64) -> Self {
        self.rot_vel = Some(deg_per_sec);
        self
    }

    pub fn with_strength(mut self, strength: f64) -> Self {
        self.strength = strength;
        self
    }
}

impl Behavior for ConstantVelocity {
    fn name(&self) -> &str {
        "constant_velocity"
    }

    fn produce_request(&mut self, _: &ResolvedCommand, _: &Telemetry) -> Option<MotionRequest> {
        let mut req = MotionRequest::new();
        req.set_trans_vel(self.trans_vel, self.strength);
        if let Some(w) = self.rot_vel {
            req.set_rot_vel(w, self.strength);
        }
        Some(req)
    }
}

/// Turns by a fixed angle from wherever the robot pointed when the behavior
/// was activated, then keeps holding that heading.
#[derive(Debug)]
pub struct TurnBy {
    degrees: f64,
    strength: f64,
    target: Option<f64>,
}

impl TurnBy {
    pub fn new(degrees: f64) -> Self {
        Self {
            degrees,
            strength: 1.0,
            target: None,
        }
    }

    /// The heading being held, once the turn has started.
    pub fn target(&self) -> Option<f64> {
        self.target
    }

    /// `true` once the robot points within `tolerance` degrees of the target.
    pub fn done(&self, telemetry: &Telemetry, tolerance: f64) -> bool {
        self.target
            .is_some_and(|t| angle_diff(t, telemetry.pose.th).abs() <= tolerance)
    }
}

impl Behavior for TurnBy {
    fn name(&self) -> &str {
        "turn_by"
    }

    fn on_activate(&mut self) {
        self.target = None;
    }

    fn produce_request(&mut self, _: &ResolvedCommand, t: &Telemetry) -> Option<MotionRequest> {
        let degrees = self.degrees;
        let target = *self
            .target
            .get_or_insert_with(|| normalize_degrees(t.pose.th + degrees));
        let mut req = MotionRequest::new();
        req.set_heading(target, self.strength);
        Some(req)
    }
}

/// Keeps the heading the robot had when it was activated, unless something
/// more important already controls rotation.
#[derive(Debug, Default)]
pub struct HoldHeading {
    heading: Option<f64>,
}

impl HoldHeading {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold an explicit heading instead of the one found on activation.
    pub fn at(degrees: f64) -> Self {
        Self {
            heading: Some(normalize_degrees(degrees)),
        }
    }
}

impl Behavior for HoldHeading {
    fn name(&self) -> &str {
        "hold_heading"
    }

    fn produce_request(&mut self, acc: &ResolvedCommand, t: &Telemetry) -> Option<MotionRequest> {
        let heading = *self.heading.get_or_insert(t.pose.th);
        let committed = [Directive::Heading, Directive::DeltaHeading, Directive::RotVel]
            .into_iter()
            .any(|d| acc.commitment(d) >= 1.0);
        if committed {
            return None;
        }
        let mut req = MotionRequest::new();
        req.set_heading(heading, 0.5);
        Some(req)
    }
}

/// Imposes velocity limits, optionally tightening the forward limit as the
/// closest sonar reading gets shorter.
#[derive(Debug)]
pub struct SpeedLimiter {
    max_forward: f64,
    max_backward: f64,
    max_rot: Option<f64>,
    /// `(stop_mm, slow_mm)`: forward limit is 0 at `stop_mm` and reaches
    /// `max_forward` at `slow_mm`.
    slowdown: Option<(f64, f64)>,
}

impl SpeedLimiter {
    pub fn new(max_forward: f64, max_backward: f64) -> Self {
        Self {
            max_forward,
            max_backward,
            max_rot: None,
            slowdown: None,
        }
    }

    pub fn with_max_rot(mut self, deg_per_sec: f64) -> Self {
        self.max_rot = Some(deg_per_sec);
        self
    }

    pub fn with_obstacle_slowdown(mut self, stop_mm: f64, slow_mm: f64) -> Self {
        self.slowdown = Some((stop_mm, slow_mm.max(stop_mm)));
        self
    }

    fn forward_limit(&self, t: &Telemetry) -> f64 {
        let (Some((stop, slow)), Some(range)) = (self.slowdown, t.closest_sonar()) else {
            return self.max_forward;
        };
        if range <= stop {
            0.0
        } else if range >= slow || slow <= stop {
            self.max_forward
        } else {
            self.max_forward * (range - stop) / (slow - stop)
        }
    }
}

impl Behavior for SpeedLimiter {
    fn name(&self) -> &str {
        "speed_limiter"
    }

    fn description(&self) -> &str {
        "cap velocities, slowing down near obstacles"
    }

    fn produce_request(&mut self, _: &ResolvedCommand, t: &Telemetry) -> Option<MotionRequest> {
        let mut req = MotionRequest::new();
        req.set_limit(Limit::MaxForwardVel, self.forward_limit(t))
            .set_limit(Limit::MaxBackwardVel, self.max_backward);
        if let Some(w) = self.max_rot {
            req.set_limit(Limit::MaxRotVel, w);
        }
        Some(req)
    }
}

/// Stops forward motion while a wheel is stalled or a bumper is pressed.
/// A pressed front bumper backs off slowly instead.
#[derive(Debug)]
pub struct BumperStop {
    backoff: f64,
}

impl BumperStop {
    /// `backoff` is the reverse speed (mm/s, magnitude) used after a front
    /// bump.
    pub fn new(backoff: f64) -> Self {
        Self {
            backoff: backoff.abs(),
        }
    }
}

impl Default for BumperStop {
    fn default() -> Self {
        Self::new(100.0)
    }
}

impl Behavior for BumperStop {
    fn name(&self) -> &str {
        "bumper_stop"
    }

    fn description(&self) -> &str {
        "stop on stall or bump"
    }

    fn produce_request(&mut self, _: &ResolvedCommand, t: &Telemetry) -> Option<MotionRequest> {
        if !t.is_obstructed() {
            return None;
        }
        let front = t.bumpers & 0x00FF != 0;
        let rear = t.bumpers & 0xFF00 != 0;
        let mut req = MotionRequest::new();
        let vel = if front && !rear { -self.backoff } else { 0.0 };
        req.set_trans_vel(vel, 1.0).set_rot_vel(0.0, 1.0);
        req.set_limit(Limit::MaxForwardVel, 0.0);
        if rear {
            req.set_limit(Limit::MaxBackwardVel, 0.0);
        }
        Some(req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idle() -> ResolvedCommand {
        ResolvedCommand::idle()
    }

    #[test]
    fn stop_claims_both_channels() {
        let req = Stop::new()
            .produce_request(&idle(), &Telemetry::default())
            .unwrap();
        assert_eq!(req.directive(Directive::TransVel).unwrap().value, 0.0);
        assert_eq!(req.directive(Directive::RotVel).unwrap().strength, 1.0);
    }

    #[test]
    fn turn_by_fixes_target_on_first_cycle() {
        let mut t = Telemetry::default();
        t.pose.th = 170.0;
        let mut turn = TurnBy::new(30.0);
        turn.on_activate();
        let req = turn.produce_request(&idle(), &t).unwrap();
        assert_eq!(req.directive(Directive::Heading).unwrap().value, -160.0);

        // The target does not drift as the robot turns.
        t.pose.th = -170.0;
        turn.produce_request(&idle(), &t);
        assert_eq!(turn.target(), Some(-160.0));
        assert!(!turn.done(&t, 5.0));
        t.pose.th = -162.0;
        assert!(turn.done(&t, 5.0));

        turn.on_activate();
        assert_eq!(turn.target(), None);
    }

    #[test]
    fn hold_heading_defers_to_committed_rotation() {
        let mut hold = HoldHeading::at(45.0);
        let t = Telemetry::default();
        assert!(hold.produce_request(&idle(), &t).is_some());

        let mut acc = idle();
        acc.set_directive(Directive::RotVel, 20.0, 1.0);
        assert!(hold.produce_request(&acc, &t).is_none());
    }

    #[test]
    fn speed_limiter_slows_near_obstacles() {
        use motive_types::telemetry::SonarReading;

        let mut limiter = SpeedLimiter::new(1000.0, 300.0).with_obstacle_slowdown(200.0, 1200.0);
        let mut t = Telemetry::default();
        let limit = |l: &mut SpeedLimiter, t: &Telemetry| {
            l.produce_request(&idle(), t)
                .unwrap()
                .limit(Limit::MaxForwardVel)
                .unwrap()
        };
        assert_eq!(limit(&mut limiter, &t), 1000.0);

        t.sonar = vec![SonarReading {
            index: 0,
            range: 700.0,
        }];
        assert_eq!(limit(&mut limiter, &t), 500.0);

        t.sonar[0].range = 100.0;
        assert_eq!(limit(&mut limiter, &t), 0.0);
    }

    #[test]
    fn bumper_stop_only_reacts_when_obstructed() {
        let mut bump = BumperStop::default();
        let mut t = Telemetry::default();
        assert!(bump.produce_request(&idle(), &t).is_none());

        t.bumpers = 0x0001;
        let req = bump.produce_request(&idle(), &t).unwrap();
        assert_eq!(req.directive(Directive::TransVel).unwrap().value, -100.0);
        assert_eq!(req.limit(Limit::MaxForwardVel), Some(0.0));
        assert_eq!(req.limit(Limit::MaxBackwardVel), None);

        t.bumpers = 0x0100;
        let req = bump.produce_request(&idle(), &t).unwrap();
        assert_eq!(req.directive(Directive::TransVel).unwrap().value, 0.0);
        assert_eq!(req.limit(Limit::MaxBackwardVel), Some(0.0));
    }
}
