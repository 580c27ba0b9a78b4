//! Motion request model shared by behaviors, the arbiter, and the cycle.
//!
//! A [`MotionRequest`] is what a single behavior proposes for one control
//! cycle.  A [`ResolvedCommand`] is what the arbiter folds those proposals
//! into.  Both use the same channel vocabulary:
//!
//! | Kind | Channels |
//! |------|----------|
//! | [`Directive`] | translational velocity, rotational velocity, heading, heading delta, lateral velocity |
//! | [`Limit`] | max forward / backward velocity, max rotational velocity, max left / right lateral velocity |
//!
//! Units: velocities in mm/s, rotational velocity in deg/s, angles in degrees
//! normalized to `(-180, 180]`.

use serde::{Deserialize, Serialize};

/// Full commitment to a directive channel.
pub const MAX_STRENGTH: f64 = 1.0;
/// No commitment at all.
pub const MIN_STRENGTH: f64 = 0.0;

// ─────────────────────────────────────────────────────────────────────────────
// Channels
// ─────────────────────────────────────────────────────────────────────────────

/// A channel carrying an intended value, blended by strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Directive {
    /// Forward (positive) / backward (negative) velocity.
    TransVel,
    /// Rotational velocity, counter-clockwise positive.
    RotVel,
    /// Absolute heading.
    Heading,
    /// Heading change relative to the current heading.
    DeltaHeading,
    /// Lateral velocity, left positive.
    LatVel,
}

impl Directive {
    /// Every directive channel, in storage order.
    pub const ALL: [Directive; 5] = [
        Directive::TransVel,
        Directive::RotVel,
        Directive::Heading,
        Directive::DeltaHeading,
        Directive::LatVel,
    ];

    pub(crate) fn index(self) -> usize {
        match self {
            Directive::TransVel => 0,
            Directive::RotVel => 1,
            Directive::Heading => 2,
            Directive::DeltaHeading => 3,
            Directive::LatVel => 4,
        }
    }

    /// Short label used in logs.
    pub fn name(self) -> &'static str {
        match self {
            Directive::TransVel => "trans_vel",
            Directive::RotVel => "rot_vel",
            Directive::Heading => "heading",
            Directive::DeltaHeading => "delta_heading",
            Directive::LatVel => "lat_vel",
        }
    }

    /// The rotation regime this channel expresses, if it is a rotation channel.
    pub fn regime(self) -> Option<RotationRegime> {
        match self {
            Directive::RotVel => Some(RotationRegime::RotVel),
            Directive::Heading => Some(RotationRegime::Heading),
            Directive::DeltaHeading => Some(RotationRegime::DeltaHeading),
            _ => None,
        }
    }

    /// `true` for channels measured in degrees.
    pub fn is_angle(self) -> bool {
        matches!(self, Directive::Heading | Directive::DeltaHeading)
    }
}

/// A safety bound that only ever tightens while requests are merged.
///
/// Bounds are magnitudes (always `>= 0`); direction is encoded by the
/// channel itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Limit {
    MaxForwardVel,
    MaxBackwardVel,
    MaxRotVel,
    MaxLeftLatVel,
    MaxRightLatVel,
}

impl Limit {
    /// Every limit channel, in storage order.
    pub const ALL: [Limit; 5] = [
        Limit::MaxForwardVel,
        Limit::MaxBackwardVel,
        Limit::MaxRotVel,
        Limit::MaxLeftLatVel,
        Limit::MaxRightLatVel,
    ];

    pub(crate) fn index(self) -> usize {
        match self {
            Limit::MaxForwardVel => 0,
            Limit::MaxBackwardVel => 1,
            Limit::MaxRotVel => 2,
            Limit::MaxLeftLatVel => 3,
            Limit::MaxRightLatVel => 4,
        }
    }

    /// Short label used in logs.
    pub fn name(self) -> &'static str {
        match self {
            Limit::MaxForwardVel => "max_forward_vel",
            Limit::MaxBackwardVel => "max_backward_vel",
            Limit::MaxRotVel => "max_rot_vel",
            Limit::MaxLeftLatVel => "max_left_lat_vel",
            Limit::MaxRightLatVel => "max_right_lat_vel",
        }
    }
}

/// How a behavior (or the resolved command) intends to control rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RotationRegime {
    RotVel,
    Heading,
    DeltaHeading,
}

impl RotationRegime {
    /// The directive channel that carries this regime's value.
    pub fn directive(self) -> Directive {
        match self {
            RotationRegime::RotVel => Directive::RotVel,
            RotationRegime::Heading => Directive::Heading,
            RotationRegime::DeltaHeading => Directive::DeltaHeading,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Angle helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Normalize `degrees` into `(-180, 180]`.
pub fn normalize_degrees(degrees: f64) -> f64 {
    if !degrees.is_finite() {
        return 0.0;
    }
    let mut d = degrees % 360.0;
    if d <= -180.0 {
        d += 360.0;
    } else if d > 180.0 {
        d -= 360.0;
    }
    d
}

/// Signed shortest rotation from `from` to `to`, in `(-180, 180]`.
pub fn angle_diff(to: f64, from: f64) -> f64 {
    normalize_degrees(to - from)
}

fn clamp_strength(strength: f64) -> f64 {
    if strength.is_nan() {
        MIN_STRENGTH
    } else {
        strength.clamp(MIN_STRENGTH, MAX_STRENGTH)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// MotionRequest
// ─────────────────────────────────────────────────────────────────────────────

/// One proposed value on a directive channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub value: f64,
    /// Confidence in `[0.0, 1.0]`; `0.0` means "not proposing".
    pub strength: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct RotationProposal {
    regime: RotationRegime,
    proposal: Proposal,
}

/// A behavior's proposal for a single control cycle.
///
/// Only one rotation regime can be set at a time: calling
/// [`set_rot_vel`][Self::set_rot_vel], [`set_heading`][Self::set_heading] or
/// [`set_delta_heading`][Self::set_delta_heading] replaces whichever rotation
/// channel was set before.
///
/// ```
/// use motive_types::motion::{Directive, Limit, MotionRequest};
///
/// let mut req = MotionRequest::new();
/// req.set_trans_vel(300.0, 1.0).set_rot_vel(20.0, 0.5);
/// req.set_heading(90.0, 1.0); // replaces the rotational velocity
/// req.set_limit(Limit::MaxForwardVel, 400.0);
///
/// assert!(req.directive(Directive::RotVel).is_none());
/// assert_eq!(req.directive(Directive::Heading).unwrap().value, 90.0);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MotionRequest {
    trans_vel: Option<Proposal>,
    lat_vel: Option<Proposal>,
    rotation: Option<RotationProposal>,
    limits: [Option<f64>; 5],
}

impl MotionRequest {
    /// An empty request that proposes nothing.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_trans_vel(&mut self, mm_per_sec: f64, strength: f64) -> &mut Self {
        self.trans_vel = Some(Proposal {
            value: mm_per_sec,
            strength: clamp_strength(strength),
        });
        self
    }

    pub fn set_lat_vel(&mut self, mm_per_sec: f64, strength: f64) -> &mut Self {
        self.lat_vel = Some(Proposal {
            value: mm_per_sec,
            strength: clamp_strength(strength),
        });
        self
    }

    pub fn set_rot_vel(&mut self, deg_per_sec: f64, strength: f64) -> &mut Self {
        self.set_rotation(RotationRegime::RotVel, deg_per_sec, strength)
    }

    /// Request an absolute heading.  The value is normalized to `(-180, 180]`.
    pub fn set_heading(&mut self, degrees: f64, strength: f64) -> &mut Self {
        self.set_rotation(RotationRegime::Heading, normalize_degrees(degrees), strength)
    }

    pub fn set_delta_heading(&mut self, degrees: f64, strength: f64) -> &mut Self {
        self.set_rotation(RotationRegime::DeltaHeading, degrees, strength)
    }

    fn set_rotation(&mut self, regime: RotationRegime, value: f64, strength: f64) -> &mut Self {
        self.rotation = Some(RotationProposal {
            regime,
            proposal: Proposal {
                value,
                strength: clamp_strength(strength),
            },
        });
        self
    }

    /// Impose a bound on `limit`.  Negative bounds are stored as their
    /// magnitude.
    pub fn set_limit(&mut self, limit: Limit, bound: f64) -> &mut Self {
        self.limits[limit.index()] = Some(bound.abs());
        self
    }

    /// Convenience for [`Limit::MaxForwardVel`] and [`Limit::MaxBackwardVel`]
    /// at once.
    pub fn set_max_vel(&mut self, bound: f64) -> &mut Self {
        self.set_limit(Limit::MaxForwardVel, bound)
            .set_limit(Limit::MaxBackwardVel, bound)
    }

    /// Stop proposing anything on `directive`.
    pub fn clear_directive(&mut self, directive: Directive) -> &mut Self {
        match directive {
            Directive::TransVel => self.trans_vel = None,
            Directive::LatVel => self.lat_vel = None,
            other => {
                if self.rotation_regime().map(RotationRegime::directive) == Some(other) {
                    self.rotation = None;
                }
            }
        }
        self
    }

    /// Reset the request to "propose nothing".
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// The proposal on `directive`, if any.
    pub fn directive(&self, directive: Directive) -> Option<Proposal> {
        match directive {
            Directive::TransVel => self.trans_vel,
            Directive::LatVel => self.lat_vel,
            other => self
                .rotation
                .filter(|r| r.regime.directive() == other)
                .map(|r| r.proposal),
        }
    }

    /// The bound imposed on `limit`, if any.
    pub fn limit(&self, limit: Limit) -> Option<f64> {
        self.limits[limit.index()]
    }

    /// The rotation regime this request expresses, if any.
    pub fn rotation_regime(&self) -> Option<RotationRegime> {
        self.rotation.map(|r| r.regime)
    }

    /// `true` when no directive and no limit is set.
    pub fn is_empty(&self) -> bool {
        self.trans_vel.is_none()
            && self.lat_vel.is_none()
            && self.rotation.is_none()
            && self.limits.iter().all(Option::is_none)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ResolvedCommand
// ─────────────────────────────────────────────────────────────────────────────

/// A merged directive value plus how much of the channel is already claimed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Resolved {
    pub value: f64,
    /// Share of the channel claimed by the behaviors merged so far, in
    /// `[0.0, 1.0]`.
    pub commitment: f64,
}

/// The arbiter's running accumulator and final per-cycle output.
///
/// While a cycle is being arbitrated every rotation channel may be present
/// at once.  [`finalize`][Self::finalize] keeps only the chosen one: heading
/// over heading delta over rotational velocity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolvedCommand {
    directives: [Option<Resolved>; 5],
    limits: [Option<f64>; 5],
}

impl ResolvedCommand {
    /// The "do nothing" command: no directive, no limit.
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn directive(&self, directive: Directive) -> Option<f64> {
        self.directives[directive.index()].map(|r| r.value)
    }

    pub fn resolved(&self, directive: Directive) -> Option<Resolved> {
        self.directives[directive.index()]
    }

    /// How strongly `directive` is already committed (`0.0` when unset).
    pub fn commitment(&self, directive: Directive) -> f64 {
        self.directives[directive.index()].map_or(MIN_STRENGTH, |r| r.commitment)
    }

    pub fn limit(&self, limit: Limit) -> Option<f64> {
        self.limits[limit.index()]
    }

    pub fn trans_vel(&self) -> Option<f64> {
        self.directive(Directive::TransVel)
    }

    pub fn lat_vel(&self) -> Option<f64> {
        self.directive(Directive::LatVel)
    }

    /// Overwrite `directive` with `value` at the given commitment.
    pub fn set_directive(&mut self, directive: Directive, value: f64, commitment: f64) {
        let value = if directive == Directive::Heading {
            normalize_degrees(value)
        } else {
            value
        };
        self.directives[directive.index()] = Some(Resolved {
            value,
            commitment: clamp_strength(commitment),
        });
    }

    pub fn clear_directive(&mut self, directive: Directive) {
        self.directives[directive.index()] = None;
    }

    /// Tighten `limit` to `bound` if it is more restrictive than the current
    /// bound.  Returns `true` when the bound changed.
    pub fn tighten_limit(&mut self, limit: Limit, bound: f64) -> bool {
        let bound = bound.abs();
        let slot = &mut self.limits[limit.index()];
        match *slot {
            Some(current) if current <= bound => false,
            _ => {
                *slot = Some(bound);
                true
            }
        }
    }

    /// The rotation regime that wins: heading, then heading delta, then
    /// rotational velocity.
    pub fn regime(&self) -> Option<RotationRegime> {
        [
            RotationRegime::Heading,
            RotationRegime::DeltaHeading,
            RotationRegime::RotVel,
        ]
        .into_iter()
        .find(|r| self.directives[r.directive().index()].is_some())
    }

    /// The winning rotation regime and its value.
    pub fn rotation(&self) -> Option<(RotationRegime, f64)> {
        let regime = self.regime()?;
        self.directive(regime.directive()).map(|v| (regime, v))
    }

    /// Drop every rotation channel except the winning one.
    pub fn finalize(&mut self) {
        let winner = self.regime();
        for regime in [
            RotationRegime::Heading,
            RotationRegime::DeltaHeading,
            RotationRegime::RotVel,
        ] {
            if Some(regime) != winner {
                self.clear_directive(regime.directive());
            }
        }
    }

    /// `true` when neither a directive nor a limit is set.
    pub fn is_idle(&self) -> bool {
        self.directives.iter().all(Option::is_none) && self.limits.iter().all(Option::is_none)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_degrees_wraps_into_half_open_range() {
        assert_eq!(normalize_degrees(180.0), 180.0);
        assert_eq!(normalize_degrees(-180.0), 180.0);
        assert_eq!(normalize_degrees(190.0), -170.0);
        assert_eq!(normalize_degrees(-190.0), 170.0);
        assert_eq!(normalize_degrees(720.0), 0.0);
        assert_eq!(normalize_degrees(f64::NAN), 0.0);
    }

    #[test]
    fn angle_diff_takes_shortest_arc() {
        assert_eq!(angle_diff(-170.0, 170.0), 20.0);
        assert_eq!(angle_diff(170.0, -170.0), -20.0);
        assert_eq!(angle_diff(90.0, 0.0), 90.0);
    }

    #[test]
    fn setting_a_rotation_channel_replaces_the_previous_one() {
        let mut req = MotionRequest::new();
        req.set_rot_vel(15.0, 1.0);
        assert_eq!(req.rotation_regime(), Some(RotationRegime::RotVel));

        req.set_delta_heading(30.0, 0.5);
        assert_eq!(req.rotation_regime(), Some(RotationRegime::DeltaHeading));
        assert!(req.directive(Directive::RotVel).is_none());
        assert_eq!(req.directive(Directive::DeltaHeading).unwrap().value, 30.0);
    }

    #[test]
    fn strength_is_clamped_into_unit_range() {
        let mut req = MotionRequest::new();
        req.set_trans_vel(100.0, 7.0).set_lat_vel(50.0, -1.0);
        assert_eq!(req.directive(Directive::TransVel).unwrap().strength, 1.0);
        assert_eq!(req.directive(Directive::LatVel).unwrap().strength, 0.0);
    }

    #[test]
    fn limits_are_stored_as_magnitudes() {
        let mut req = MotionRequest::new();
        req.set_limit(Limit::MaxBackwardVel, -250.0);
        assert_eq!(req.limit(Limit::MaxBackwardVel), Some(250.0));
        req.set_max_vel(100.0);
        assert_eq!(req.limit(Limit::MaxForwardVel), Some(100.0));
        assert_eq!(req.limit(Limit::MaxBackwardVel), Some(100.0));
    }

    #[test]
    fn clear_directive_only_clears_matching_rotation() {
        let mut req = MotionRequest::new();
        req.set_heading(45.0, 1.0);
        req.clear_directive(Directive::RotVel);
        assert!(req.directive(Directive::Heading).is_some());
        req.clear_directive(Directive::Heading);
        assert!(req.is_empty());
    }

    #[test]
    fn tighten_limit_never_loosens() {
        let mut cmd = ResolvedCommand::idle();
        assert!(cmd.tighten_limit(Limit::MaxRotVel, 90.0));
        assert!(!cmd.tighten_limit(Limit::MaxRotVel, 120.0));
        assert!(cmd.tighten_limit(Limit::MaxRotVel, 30.0));
        assert_eq!(cmd.limit(Limit::MaxRotVel), Some(30.0));
    }

    #[test]
    fn finalize_keeps_heading_over_other_rotation_channels() {
        let mut cmd = ResolvedCommand::idle();
        cmd.set_directive(Directive::RotVel, 10.0, 1.0);
        cmd.set_directive(Directive::DeltaHeading, 5.0, 1.0);
        cmd.set_directive(Directive::Heading, 270.0, 1.0);
        cmd.finalize();

        assert_eq!(cmd.rotation(), Some((RotationRegime::Heading, -90.0)));
        assert!(cmd.directive(Directive::RotVel).is_none());
        assert!(cmd.directive(Directive::DeltaHeading).is_none());
    }

    #[test]
    fn delta_heading_beats_rot_vel() {
        let mut cmd = ResolvedCommand::idle();
        cmd.set_directive(Directive::RotVel, 10.0, 1.0);
        cmd.set_directive(Directive::DeltaHeading, -15.0, 0.4);
        assert_eq!(cmd.regime(), Some(RotationRegime::DeltaHeading));
        assert!((cmd.commitment(Directive::DeltaHeading) - 0.4).abs() < 1e-12);
    }

    #[test]
    fn idle_command_reports_idle() {
        let cmd = ResolvedCommand::idle();
        assert!(cmd.is_idle());
        assert_eq!(cmd.commitment(Directive::TransVel), 0.0);
        assert!(cmd.rotation().is_none());
    }
}
