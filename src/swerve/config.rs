// Drivetrain configuration
//
// Immutable after construction. Validation runs once at startup and is
// fatal on failure; nothing here is checked again in the control path.

use std::f64::consts::PI;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::{DriveError, Result};

/// Proportional-integral-derivative gains for an onboard control loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PidGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

impl PidGains {
    /// Proportional-only gains.
    pub fn p(kp: f64) -> Self {
        Self { kp, ki: 0.0, kd: 0.0 }
    }
}

/// Feedforward model for the drive wheel: ks * sign(v) + kv * v + ka * a.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedforwardGains {
    /// Static friction term, output units.
    pub ks: f64,
    /// Velocity term, output units per m/s.
    pub kv: f64,
    /// Acceleration term, output units per m/s^2.
    pub ka: f64,
}

/// Contact-patch position of one module relative to the rotation center.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModuleGeometry {
    /// Meters forward of center.
    pub offset_x: f64,
    /// Meters left of center.
    pub offset_y: f64,
}

/// What the absolute steering encoder reads when the module points to zero.
///
/// Measured once per mechanical assembly and kept fixed afterwards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationOffset {
    /// Degrees.
    pub absolute_at_zero: f64,
}

/// Per-module mechanical and tuning parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleConfig {
    /// Human-readable position label ("FL", "FR", "BL", "BR").
    pub label: String,
    pub steer_gains: PidGains,
    pub drive_gains: PidGains,
    pub drive_feedforward: FeedforwardGains,
    /// Steering motor turns per azimuth turn.
    pub steer_ratio: f64,
    /// Drive motor turns per wheel turn.
    pub drive_ratio: f64,
    /// Meters.
    pub wheel_diameter: f64,
    /// Amps.
    pub steer_current_limit: f64,
    /// Amps.
    pub drive_current_limit: f64,
    pub invert_steer: bool,
    pub invert_drive: bool,
    /// Treat the steering axis as continuous (shortest-path wrapping).
    pub continuous_wrap: bool,
    pub offset: CalibrationOffset,
}

impl ModuleConfig {
    pub fn wheel_circumference(&self) -> f64 {
        self.wheel_diameter * PI
    }

    pub fn validate(&self) -> Result<()> {
        if self.label.is_empty() {
            return Err(DriveError::ConfigurationInvalid(
                "module label must not be empty".to_string(),
            ));
        }
        require_positive(self.steer_ratio, &self.label, "steer_ratio")?;
        require_positive(self.drive_ratio, &self.label, "drive_ratio")?;
        require_positive(self.wheel_diameter, &self.label, "wheel_diameter")?;
        require_positive(self.steer_current_limit, &self.label, "steer_current_limit")?;
        require_positive(self.drive_current_limit, &self.label, "drive_current_limit")?;
        for (value, name) in [
            (self.steer_gains.kp, "steer_gains.kp"),
            (self.steer_gains.ki, "steer_gains.ki"),
            (self.steer_gains.kd, "steer_gains.kd"),
            (self.drive_gains.kp, "drive_gains.kp"),
            (self.drive_gains.ki, "drive_gains.ki"),
            (self.drive_gains.kd, "drive_gains.kd"),
            (self.drive_feedforward.ks, "drive_feedforward.ks"),
            (self.drive_feedforward.kv, "drive_feedforward.kv"),
            (self.drive_feedforward.ka, "drive_feedforward.ka"),
        ] {
            require_gain(value, &self.label, name)?;
        }
        if !self.offset.absolute_at_zero.is_finite() {
            return Err(DriveError::ConfigurationInvalid(format!(
                "module {}: calibration offset must be finite",
                self.label
            )));
        }
        Ok(())
    }
}

/// Whole-drivetrain configuration. Module arrays are in FL, FR, BL, BR order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriveConfig {
    pub geometry: [ModuleGeometry; 4],
    pub modules: [ModuleConfig; 4],
    /// Attainable wheel speed in m/s; desaturation bound and open-loop scale.
    pub max_speed: f64,
    /// Rad/s, used by command shaping upstream.
    pub max_angular_velocity: f64,
    /// Steering commands smaller than this are skipped, in degrees.
    pub steer_deadband: f64,
    /// Control loop period in seconds.
    pub control_period: f64,
    /// How long to wait after seeding steering positions before driving.
    pub calibration_settle: Duration,
}

impl DriveConfig {
    pub fn validate(&self) -> Result<()> {
        for geometry in &self.geometry {
            if !geometry.offset_x.is_finite() || !geometry.offset_y.is_finite() {
                return Err(DriveError::ConfigurationInvalid(format!(
                    "module geometry must be finite, got ({}, {})",
                    geometry.offset_x, geometry.offset_y
                )));
            }
        }
        for module in &self.modules {
            module.validate()?;
        }
        if !(self.max_speed.is_finite() && self.max_speed > 0.0) {
            return Err(DriveError::ConfigurationInvalid(format!(
                "max_speed must be positive, got {}",
                self.max_speed
            )));
        }
        if !(self.max_angular_velocity.is_finite() && self.max_angular_velocity > 0.0) {
            return Err(DriveError::ConfigurationInvalid(format!(
                "max_angular_velocity must be positive, got {}",
                self.max_angular_velocity
            )));
        }
        if !(self.steer_deadband.is_finite() && (0.0..90.0).contains(&self.steer_deadband)) {
            return Err(DriveError::ConfigurationInvalid(format!(
                "steer_deadband must be in [0, 90) degrees, got {}",
                self.steer_deadband
            )));
        }
        if !(self.control_period.is_finite() && self.control_period > 0.0) {
            return Err(DriveError::ConfigurationInvalid(format!(
                "control_period must be positive, got {}",
                self.control_period
            )));
        }
        Ok(())
    }
}

fn require_positive(value: f64, label: &str, name: &str) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(DriveError::ConfigurationInvalid(format!(
            "module {label}: {name} must be positive, got {value}"
        )))
    }
}

fn require_gain(value: f64, label: &str, name: &str) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(DriveError::ConfigurationInvalid(format!(
            "module {label}: {name} must be non-negative, got {value}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_module(label: &str) -> ModuleConfig {
        ModuleConfig {
            label: label.to_string(),
            steer_gains: PidGains::p(20.0),
            drive_gains: PidGains::p(0.1),
            drive_feedforward: FeedforwardGains { ks: 0.667, kv: 2.44, ka: 0.27 },
            steer_ratio: 21.4,
            drive_ratio: 6.75,
            wheel_diameter: 0.1016,
            steer_current_limit: 25.0,
            drive_current_limit: 40.0,
            invert_steer: false,
            invert_drive: false,
            continuous_wrap: true,
            offset: CalibrationOffset { absolute_at_zero: 150.0 },
        }
    }

    fn sample_config() -> DriveConfig {
        let half_x = 0.4572;
        let half_y = 0.3048;
        DriveConfig {
            geometry: [
                ModuleGeometry { offset_x: half_x, offset_y: half_y },
                ModuleGeometry { offset_x: half_x, offset_y: -half_y },
                ModuleGeometry { offset_x: -half_x, offset_y: half_y },
                ModuleGeometry { offset_x: -half_x, offset_y: -half_y },
            ],
            modules: [
                sample_module("FL"),
                sample_module("FR"),
                sample_module("BL"),
                sample_module("BR"),
            ],
            max_speed: 2.0,
            max_angular_velocity: 4.0,
            steer_deadband: 7.2,
            control_period: 0.02,
            calibration_settle: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(sample_config().validate().is_ok());
    }

    #[test]
    fn test_rejects_nonpositive_ratio() {
        let mut config = sample_config();
        config.modules[1].drive_ratio = 0.0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("drive_ratio"), "got: {err}");
        assert!(err.to_string().contains("FR"), "got: {err}");
    }

    #[test]
    fn test_rejects_negative_gain() {
        let mut config = sample_config();
        config.modules[0].steer_gains.kp = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_nan_geometry() {
        let mut config = sample_config();
        config.geometry[2].offset_y = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_max_speed() {
        let mut config = sample_config();
        config.max_speed = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_wide_deadband() {
        let mut config = sample_config();
        config.steer_deadband = 90.0;
        assert!(config.validate().is_err());
    }
}
