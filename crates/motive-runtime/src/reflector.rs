//! [`StateReflector`] – turns a resolved command into controller frames.
//!
//! The controller keeps executing the last velocity or heading it was sent,
//! so resending an unchanged value every cycle is wasted bandwidth.  Each
//! output channel remembers what it last put on the wire and only emits a
//! command when the value changes or the refresh interval has elapsed.
//!
//! Limits are applied here, at send time: they clamp the chosen directive,
//! or the last value sent on that channel when no behavior set one.  A
//! heading turn has no velocity to clamp, so the rotational bound goes out
//! as the controller's own turn-rate cap (SETRV) instead, and the cap is
//! put back to the full rotational range once the bound is lifted.

use std::time::{Duration, Instant};

use motive_protocol::{Command, ConversionFactors};
use motive_types::motion::{Directive, Limit, RotationRegime, normalize_degrees};
use motive_types::{ResolvedCommand, Telemetry};

/// Last command written on one output channel.
#[derive(Debug, Default)]
struct Channel {
    sent: Option<(Command, Instant)>,
    /// Physical value (mm/s or deg/s) behind `sent`, for re-limiting.
    value: Option<f64>,
}

impl Channel {
    fn offer(
        &mut self,
        command: Command,
        value: f64,
        now: Instant,
        refresh: Duration,
    ) -> Option<Command> {
        self.value = Some(value);
        match self.sent {
            Some((last, at))
                if last == command && now.saturating_duration_since(at) < refresh =>
            {
                None
            }
            _ => {
                self.sent = Some((command, now));
                Some(command)
            }
        }
    }

    fn forget(&mut self) {
        self.sent = None;
    }
}

/// Per-channel memory of what the controller was last told.
#[derive(Debug)]
pub struct StateReflector {
    refresh: Duration,
    /// Turn-rate cap restored when no rotational bound applies, deg/s.
    full_rot: f64,
    trans: Channel,
    lat: Channel,
    rot: Channel,
    rot_cap: Channel,
}

impl StateReflector {
    /// `refresh` of zero resends every channel on every call.  `full_rot`
    /// (deg/s) is the turn-rate cap the controller gets back when a
    /// rotational bound is lifted.
    pub fn new(refresh: Duration, full_rot: f64) -> Self {
        Self {
            refresh,
            full_rot,
            trans: Channel::default(),
            lat: Channel::default(),
            rot: Channel::default(),
            rot_cap: Channel::default(),
        }
    }

    /// Commands needed to bring the controller in line with `command`.
    pub fn plan(
        &mut self,
        command: &ResolvedCommand,
        telemetry: &Telemetry,
        conv: &ConversionFactors,
        now: Instant,
    ) -> Vec<Command> {
        let mut out = Vec::with_capacity(4);

        let forward = command.limit(Limit::MaxForwardVel);
        let backward = command.limit(Limit::MaxBackwardVel);
        if let Some(v) = limited(command.trans_vel(), self.trans.value, forward, backward) {
            out.extend(self.trans.offer(Command::Vel(conv.vel_units(v)), v, now, self.refresh));
        }

        let left = command.limit(Limit::MaxLeftLatVel);
        let right = command.limit(Limit::MaxRightLatVel);
        if let Some(v) = limited(command.lat_vel(), self.lat.value, left, right) {
            out.extend(self.lat.offer(Command::LatVel(conv.vel_units(v)), v, now, self.refresh));
        }

        let max_rot = command.limit(Limit::MaxRotVel);
        match command.rotation() {
            Some((RotationRegime::RotVel, w)) => {
                let w = limited(Some(w), None, max_rot, max_rot).unwrap_or(w);
                let cmd = Command::RotVel(conv.degree_units(w));
                out.extend(self.rot.offer(cmd, w, now, self.refresh));
            }
            Some((RotationRegime::Heading, h)) => {
                out.extend(self.cap_turn_rate(max_rot, conv, now));
                out.extend(self.rot_heading(normalize_degrees(h), conv, now));
            }
            Some((RotationRegime::DeltaHeading, d)) => {
                out.extend(self.cap_turn_rate(max_rot, conv, now));
                // Relative to where the robot points now, so a resend does
                // not turn it further.
                let h = normalize_degrees(telemetry.pose.th + d);
                out.extend(self.rot_heading(h, conv, now));
            }
            None => {
                if let Some((Command::RotVel(_), _)) = self.rot.sent {
                    if let Some(w) = limited(None, self.rot.value, max_rot, max_rot) {
                        let cmd = Command::RotVel(conv.degree_units(w));
                        out.extend(self.rot.offer(cmd, w, now, self.refresh));
                    }
                }
            }
        }
        if max_rot.is_none() {
            out.extend(self.lift_rot_cap(conv));
        }
        out
    }

    /// Forget what was sent so the next plan emits every channel again,
    /// e.g. after a failed write.
    pub fn invalidate(&mut self) {
        self.trans.forget();
        self.lat.forget();
        self.rot.forget();
        self.rot_cap.forget();
    }

    /// Physical value last planned for a directive channel.
    pub fn last_value(&self, directive: Directive) -> Option<f64> {
        match directive {
            Directive::TransVel => self.trans.value,
            Directive::LatVel => self.lat.value,
            _ => self.rot.value,
        }
    }

    /// Cap the controller's turn rate while it steers to a heading.
    fn cap_turn_rate(
        &mut self,
        max_rot: Option<f64>,
        conv: &ConversionFactors,
        now: Instant,
    ) -> Option<Command> {
        let cap = max_rot?.clamp(0.0, self.full_rot);
        let units = conv.degree_units(cap).unsigned_abs();
        self.rot_cap.offer(Command::SetMaxRotVel(units), cap, now, self.refresh)
    }

    /// Hand the full turn rate back once no bound applies.
    fn lift_rot_cap(&mut self, conv: &ConversionFactors) -> Option<Command> {
        self.rot_cap.value?;
        self.rot_cap = Channel::default();
        Some(Command::SetMaxRotVel(
            conv.degree_units(self.full_rot).unsigned_abs(),
        ))
    }

    fn rot_heading(
        &mut self,
        heading: f64,
        conv: &ConversionFactors,
        now: Instant,
    ) -> Option<Command> {
        self.rot
            .offer(Command::Heading(conv.degree_units(heading)), heading, now, self.refresh)
    }
}

/// Apply a positive-side and negative-side magnitude bound.
///
/// With a directive the bounded directive is returned.  Without one, the
/// last value is returned only if a bound actually changes it; otherwise
/// there is nothing to send.
fn limited(
    desired: Option<f64>,
    last: Option<f64>,
    positive: Option<f64>,
    negative: Option<f64>,
) -> Option<f64> {
    let bound = |v: f64| {
        let v = positive.map_or(v, |p| v.min(p));
        negative.map_or(v, |n| v.max(-n))
    };
    match (desired, last) {
        (Some(v), _) => Some(bound(v)),
        (None, Some(v)) if bound(v) != v => Some(bound(v)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REFRESH: Duration = Duration::from_millis(500);
    const FULL_ROT: f64 = 360.0;

    fn reflector(refresh: Duration) -> StateReflector {
        StateReflector::new(refresh, FULL_ROT)
    }

    fn cmd(f: impl FnOnce(&mut ResolvedCommand)) -> ResolvedCommand {
        let mut c = ResolvedCommand::idle();
        f(&mut c);
        c.finalize();
        c
    }

    fn plan(r: &mut StateReflector, c: &ResolvedCommand, now: Instant) -> Vec<Command> {
        r.plan(c, &Telemetry::default(), &ConversionFactors::default(), now)
    }

    #[test]
    fn unchanged_values_are_not_resent_until_refresh() {
        let mut r = reflector(REFRESH);
        let c = cmd(|c| c.set_directive(Directive::TransVel, 300.0, 1.0));
        let t0 = Instant::now();
        assert_eq!(plan(&mut r, &c, t0), vec![Command::Vel(300)]);
        assert!(plan(&mut r, &c, t0 + Duration::from_millis(100)).is_empty());
        assert_eq!(plan(&mut r, &c, t0 + REFRESH), vec![Command::Vel(300)]);
    }

    #[test]
    fn changed_values_go_out_immediately() {
        let mut r = reflector(REFRESH);
        let t0 = Instant::now();
        plan(&mut r, &cmd(|c| c.set_directive(Directive::TransVel, 300.0, 1.0)), t0);
        let out = plan(&mut r, &cmd(|c| c.set_directive(Directive::TransVel, 250.0, 1.0)), t0);
        assert_eq!(out, vec![Command::Vel(250)]);
    }

    #[test]
    fn zero_refresh_sends_every_time() {
        let mut r = reflector(Duration::ZERO);
        let c = cmd(|c| c.set_directive(Directive::RotVel, 15.0, 1.0));
        let t0 = Instant::now();
        assert_eq!(plan(&mut r, &c, t0), vec![Command::RotVel(15)]);
        assert_eq!(plan(&mut r, &c, t0), vec![Command::RotVel(15)]);
    }

    #[test]
    fn limits_clamp_the_directive() {
        let mut r = reflector(REFRESH);
        let c = cmd(|c| {
            c.set_directive(Directive::TransVel, -500.0, 1.0);
            c.tighten_limit(Limit::MaxBackwardVel, 200.0);
            c.set_directive(Directive::RotVel, 90.0, 1.0);
            c.tighten_limit(Limit::MaxRotVel, 30.0);
        });
        let out = plan(&mut r, &c, Instant::now());
        assert_eq!(out, vec![Command::Vel(-200), Command::RotVel(30)]);
    }

    #[test]
    fn limits_clamp_the_last_value_without_a_directive() {
        let mut r = reflector(REFRESH);
        let t0 = Instant::now();
        plan(&mut r, &cmd(|c| c.set_directive(Directive::TransVel, 800.0, 1.0)), t0);

        // Nothing directs translation now, and no limit bites: stay quiet.
        assert!(plan(&mut r, &ResolvedCommand::idle(), t0).is_empty());

        let slow = cmd(|c| {
            c.tighten_limit(Limit::MaxForwardVel, 100.0);
        });
        assert_eq!(plan(&mut r, &slow, t0), vec![Command::Vel(100)]);
        assert_eq!(r.last_value(Directive::TransVel), Some(100.0));
    }

    #[test]
    fn delta_heading_is_sent_as_absolute_heading() {
        let mut r = reflector(REFRESH);
        let mut t = Telemetry::default();
        t.pose.th = 170.0;
        let c = cmd(|c| c.set_directive(Directive::DeltaHeading, 30.0, 1.0));
        let out = r.plan(&c, &t, &ConversionFactors::default(), Instant::now());
        assert_eq!(out, vec![Command::Heading(-160)]);
    }

    #[test]
    fn invalidate_forces_a_resend() {
        let mut r = reflector(REFRESH);
        let c = cmd(|c| c.set_directive(Directive::LatVel, -120.0, 1.0));
        let t0 = Instant::now();
        assert_eq!(plan(&mut r, &c, t0), vec![Command::LatVel(-120)]);
        r.invalidate();
        assert_eq!(plan(&mut r, &c, t0), vec![Command::LatVel(-120)]);
    }

    #[test]
    fn rotation_bound_caps_the_turn_rate_of_a_heading() {
        let mut r = reflector(REFRESH);
        let t0 = Instant::now();
        let c = cmd(|c| {
            c.set_directive(Directive::Heading, 90.0, 1.0);
            c.tighten_limit(Limit::MaxRotVel, 10.0);
        });
        assert_eq!(
            plan(&mut r, &c, t0),
            vec![Command::SetMaxRotVel(10), Command::Heading(90)]
        );
        assert!(plan(&mut r, &c, t0 + Duration::from_millis(100)).is_empty());

        let tighter = cmd(|c| {
            c.set_directive(Directive::Heading, 90.0, 1.0);
            c.tighten_limit(Limit::MaxRotVel, 5.0);
        });
        assert_eq!(plan(&mut r, &tighter, t0), vec![Command::SetMaxRotVel(5)]);
    }

    #[test]
    fn delta_heading_is_capped_too() {
        let mut r = reflector(REFRESH);
        let c = cmd(|c| {
            c.set_directive(Directive::DeltaHeading, -45.0, 1.0);
            c.tighten_limit(Limit::MaxRotVel, 20.0);
        });
        assert_eq!(
            plan(&mut r, &c, Instant::now()),
            vec![Command::SetMaxRotVel(20), Command::Heading(-45)]
        );
    }

    #[test]
    fn lifted_rotation_bound_restores_the_full_turn_rate() {
        let mut r = reflector(REFRESH);
        let t0 = Instant::now();
        plan(
            &mut r,
            &cmd(|c| {
                c.set_directive(Directive::Heading, 30.0, 1.0);
                c.tighten_limit(Limit::MaxRotVel, 15.0);
            }),
            t0,
        );

        let free = cmd(|c| c.set_directive(Directive::Heading, 30.0, 1.0));
        assert_eq!(plan(&mut r, &free, t0), vec![Command::SetMaxRotVel(360)]);
        // Restored once, not on every cycle.
        assert!(plan(&mut r, &free, t0).is_empty());
    }

    #[test]
    fn unbounded_heading_sends_no_cap() {
        let mut r = reflector(REFRESH);
        let c = cmd(|c| c.set_directive(Directive::Heading, 45.0, 1.0));
        assert_eq!(plan(&mut r, &c, Instant::now()), vec![Command::Heading(45)]);
    }
}
