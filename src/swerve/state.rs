// Value types shared across the drivetrain layer
//
// Units: meters, meters/second, degrees, radians/second.

use serde::{Deserialize, Serialize};

/// Velocity state of one module: signed wheel speed plus steering angle.
///
/// Used both as a target (what the module should do) and as a measurement.
/// The angle is meaningful modulo 360; targets coming out of the steering
/// optimizer may carry extra windings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleState {
    /// Wheel speed in m/s, signed.
    pub speed: f64,
    /// Steering angle in degrees.
    pub angle: f64,
}

impl ModuleState {
    pub fn new(speed: f64, angle: f64) -> Self {
        Self { speed, angle }
    }
}

/// Position state of one module: accumulated drive distance plus steering angle.
///
/// `distance` is cumulative and signed, never wrapped, so a pose estimator
/// can difference consecutive samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ModulePosition {
    /// Distance the wheel has rolled in meters, signed.
    pub distance: f64,
    /// Steering angle in degrees.
    pub angle: f64,
}

/// Robot-frame chassis velocity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ChassisSpeeds {
    /// Forward velocity in m/s (positive = robot forward).
    pub vx: f64,
    /// Lateral velocity in m/s (positive = robot left).
    pub vy: f64,
    /// Rotational velocity in rad/s (positive = counter-clockwise).
    pub omega: f64,
}

impl ChassisSpeeds {
    pub fn new(vx: f64, vy: f64, omega: f64) -> Self {
        Self { vx, vy, omega }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    /// True when all three components are negligible.
    pub fn is_still(&self, epsilon: f64) -> bool {
        self.vx.abs() < epsilon && self.vy.abs() < epsilon && self.omega.abs() < epsilon
    }
}
