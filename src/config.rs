// Timeouts, topics, drivetrain configuration

use std::time::Duration;

use crate::hardware::ServoIds;
use crate::swerve::config::{
    CalibrationOffset, DriveConfig, FeedforwardGains, ModuleConfig, ModuleGeometry, PidGains,
};

// Runtime loop frequency
pub const LOOP_HZ: u64 = 50;

// Command timeout for watchdog
pub const CMD_TIMEOUT: Duration = Duration::from_millis(250);

// Zenoh topics
pub const TOPIC_CMD_CHASSIS: &str = "swerve/cmd/chassis"; // commands
pub const TOPIC_RT_DRIVE: &str = "swerve/rt/drive"; // telemetry
pub const TOPIC_HEALTH: &str = "swerve/state/health"; // health status

// Serial port for the servo bus
pub const SERVO_PORT: &str = "/dev/ttyACM0";

// Enable hardware drive control (set to false for the simulated backend)
pub const DRIVE_ENABLED: bool = true;

// Teleop drives the wheels open loop; closed loop is for trajectory work
pub const OPEN_LOOP_TELEOP: bool = true;

// Bus device ids in FL, FR, BL, BR order
pub const SERVO_IDS: [ServoIds; 4] = [
    ServoIds { steer: 1, drive: 2, encoder: 3 },
    ServoIds { steer: 4, drive: 5, encoder: 6 },
    ServoIds { steer: 7, drive: 8, encoder: 9 },
    ServoIds { steer: 10, drive: 11, encoder: 12 },
];

// Contact patch positions, meters from the chassis center
const HALF_LENGTH: f64 = 0.4572;
const HALF_WIDTH: f64 = 0.3048;

// Absolute encoder reading with the wheel pointing straight ahead,
// measured once per mechanical assembly
const ABSOLUTE_AT_ZERO: [f64; 4] = [196.2, 147.9, 148.3, 151.2];

fn module(label: &str, absolute_at_zero: f64) -> ModuleConfig {
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
        offset: CalibrationOffset { absolute_at_zero },
    }
}

/// Drivetrain configuration for this robot.
pub fn drive_config() -> DriveConfig {
    DriveConfig {
        geometry: [
            ModuleGeometry { offset_x: HALF_LENGTH, offset_y: HALF_WIDTH },
            ModuleGeometry { offset_x: HALF_LENGTH, offset_y: -HALF_WIDTH },
            ModuleGeometry { offset_x: -HALF_LENGTH, offset_y: HALF_WIDTH },
            ModuleGeometry { offset_x: -HALF_LENGTH, offset_y: -HALF_WIDTH },
        ],
        modules: [
            module("FL", ABSOLUTE_AT_ZERO[0]),
            module("FR", ABSOLUTE_AT_ZERO[1]),
            module("BL", ABSOLUTE_AT_ZERO[2]),
            module("BR", ABSOLUTE_AT_ZERO[3]),
        ],
        max_speed: 2.0,
        max_angular_velocity: 4.0,
        steer_deadband: 7.2,
        control_period: 1.0 / LOOP_HZ as f64,
        calibration_settle: Duration::from_secs(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_robot_config_is_valid() {
        assert!(drive_config().validate().is_ok());
    }

    #[test]
    fn test_servo_ids_unique() {
        let mut seen = HashSet::new();
        for ids in SERVO_IDS {
            for id in [ids.steer, ids.drive, ids.encoder] {
                assert!(seen.insert(id), "duplicate bus id {id}");
            }
        }
    }
}
