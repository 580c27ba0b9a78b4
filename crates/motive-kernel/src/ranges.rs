//! [`ChannelRanges`] – physical bounds for every motion channel.
//!
//! Proposals outside the robot's physical envelope are not rejected: they
//! are clamped to the nearest representable value before they are merged,
//! and each clamp is reported to the caller so it can be logged.

use motive_types::MotiveError;
use motive_types::motion::{Directive, Limit, normalize_degrees};
use serde::{Deserialize, Serialize};

/// Magnitude bounds per channel family.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelRanges {
    /// Translational velocity, mm/s.
    pub trans_vel: f64,
    /// Rotational velocity, deg/s.
    pub rot_vel: f64,
    /// Lateral velocity, mm/s.
    pub lat_vel: f64,
}

impl Default for ChannelRanges {
    fn default() -> Self {
        Self {
            trans_vel: 2200.0,
            rot_vel: 360.0,
            lat_vel: 1000.0,
        }
    }
}

/// A value after range enforcement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Clamped {
    pub value: f64,
    /// `true` when the input had to be changed.
    pub clamped: bool,
}

impl Clamped {
    fn check(input: f64, value: f64) -> Self {
        Self {
            value,
            clamped: input != value,
        }
    }
}

impl ChannelRanges {
    /// Reject ranges that are not strictly positive and finite.
    pub fn validate(&self) -> Result<(), MotiveError> {
        for (name, v) in [
            ("trans_vel", self.trans_vel),
            ("rot_vel", self.rot_vel),
            ("lat_vel", self.lat_vel),
        ] {
            if !(v.is_finite() && v > 0.0) {
                return Err(MotiveError::Config(format!(
                    "channel range {name} must be positive, got {v}"
                )));
            }
        }
        Ok(())
    }

    /// Bring a directive value into range.  Headings wrap into
    /// `(-180, 180]`; heading deltas saturate at half a turn.  Non-finite
    /// input becomes `0.0`.
    pub fn clamp_directive(&self, directive: Directive, value: f64) -> Clamped {
        if !value.is_finite() {
            return Clamped {
                value: 0.0,
                clamped: true,
            };
        }
        let bounded = match directive {
            Directive::TransVel => value.clamp(-self.trans_vel, self.trans_vel),
            Directive::RotVel => value.clamp(-self.rot_vel, self.rot_vel),
            Directive::LatVel => value.clamp(-self.lat_vel, self.lat_vel),
            Directive::Heading => normalize_degrees(value),
            Directive::DeltaHeading => value.clamp(-180.0, 180.0),
        };
        Clamped::check(value, bounded)
    }

    /// Bring a limit bound into `[0, range]`.
    pub fn clamp_limit(&self, limit: Limit, bound: f64) -> Clamped {
        if bound.is_nan() {
            return Clamped {
                value: 0.0,
                clamped: true,
            };
        }
        let bounded = bound.clamp(0.0, self.limit_max(limit));
        Clamped::check(bound, bounded)
    }

    pub fn limit_max(&self, limit: Limit) -> f64 {
        match limit {
            Limit::MaxForwardVel | Limit::MaxBackwardVel => self.trans_vel,
            Limit::MaxRotVel => self.rot_vel,
            Limit::MaxLeftLatVel | Limit::MaxRightLatVel => self.lat_vel,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn velocities_saturate_at_physical_range() {
        let r = ChannelRanges::default();
        assert_eq!(
            r.clamp_directive(Directive::TransVel, 5000.0),
            Clamped {
                value: 2200.0,
                clamped: true
            }
        );
        assert_eq!(r.clamp_directive(Directive::RotVel, -400.0).value, -360.0);
        assert_eq!(r.clamp_directive(Directive::LatVel, 999.0).clamped, false);
    }

    #[test]
    fn headings_wrap_and_deltas_saturate() {
        let r = ChannelRanges::default();
        let h = r.clamp_directive(Directive::Heading, 270.0);
        assert_eq!(h.value, -90.0);
        assert!(h.clamped);
        assert_eq!(r.clamp_directive(Directive::Heading, 45.0).clamped, false);
        assert_eq!(r.clamp_directive(Directive::DeltaHeading, 500.0).value, 180.0);
    }

    #[test]
    fn non_finite_values_become_zero() {
        let r = ChannelRanges::default();
        assert_eq!(r.clamp_directive(Directive::TransVel, f64::NAN).value, 0.0);
        assert_eq!(r.clamp_limit(Limit::MaxRotVel, f64::NAN).value, 0.0);
    }

    #[test]
    fn limits_are_bounded_by_their_family() {
        let r = ChannelRanges::default();
        assert_eq!(r.clamp_limit(Limit::MaxForwardVel, 9999.0).value, 2200.0);
        assert_eq!(r.clamp_limit(Limit::MaxRightLatVel, 9999.0).value, 1000.0);
        assert_eq!(r.clamp_limit(Limit::MaxRotVel, -5.0).value, 0.0);
        assert_eq!(r.clamp_limit(Limit::MaxRotVel, f64::INFINITY).value, 360.0);
    }

    #[test]
    fn validate_rejects_non_positive_ranges() {
        assert!(ChannelRanges::default().validate().is_ok());
        let bad = ChannelRanges {
            rot_vel: 0.0,
            ..ChannelRanges::default()
        };
        assert!(matches!(bad.validate(), Err(MotiveError::Config(_))));
    }
}
