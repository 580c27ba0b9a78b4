//! Robot telemetry snapshot, refreshed by the control cycle from motor
//! controller status packets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Planar pose: millimetres and degrees.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    /// Heading in degrees, `(-180, 180]`.
    pub th: f64,
}

/// Identity strings reported by the controller during the handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RobotIdentity {
    pub kind: String,
    pub subtype: String,
    pub name: String,
}

/// One sonar transducer reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SonarReading {
    pub index: u8,
    /// Range in millimetres.
    pub range: f64,
}

/// Latest known robot state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    pub pose: Pose,
    /// Translational velocity in mm/s.
    pub trans_vel: f64,
    /// Rotational velocity in deg/s.
    pub rot_vel: f64,
    pub left_vel: f64,
    pub right_vel: f64,
    pub battery_volts: f64,
    pub left_stalled: bool,
    pub right_stalled: bool,
    /// Raw bumper bits: front bumpers in the low byte, rear in the high byte.
    pub bumpers: u16,
    pub motors_enabled: bool,
    /// `true` while the controller reports the motors as moving.
    pub moving: bool,
    pub sonar: Vec<SonarReading>,
    /// Number of status packets folded into this snapshot.
    pub packet_count: u64,
    /// Wall-clock arrival time of the last status packet.
    pub received_at: Option<DateTime<Utc>>,
    pub identity: Option<RobotIdentity>,
}

impl Telemetry {
    /// `true` if either wheel is stalled or any bumper is pressed.
    pub fn is_obstructed(&self) -> bool {
        self.left_stalled || self.right_stalled || self.bumpers != 0
    }

    /// Shortest sonar range, if any sonar data has been received.
    pub fn closest_sonar(&self) -> Option<f64> {
        self.sonar
            .iter()
            .map(|s| s.range)
            .min_by(|a, b| a.total_cmp(b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn obstruction_combines_stall_and_bumpers() {
        let mut t = Telemetry::default();
        assert!(!t.is_obstructed());
        t.bumpers = 0x0100;
        assert!(t.is_obstructed());
        t.bumpers = 0;
        t.right_stalled = true;
        assert!(t.is_obstructed());
    }

    #[test]
    fn closest_sonar_picks_minimum() {
        let mut t = Telemetry::default();
        assert_eq!(t.closest_sonar(), None);
        t.sonar = vec![
            SonarReading { index: 0, range: 900.0 },
            SonarReading { index: 1, range: 350.0 },
            SonarReading { index: 2, range: 5000.0 },
        ];
        assert_eq!(t.closest_sonar(), Some(350.0));
    }
}
