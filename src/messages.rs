// Message types for the runtime

use serde::{Deserialize, Serialize};

use crate::swerve::{ChassisSpeeds, ModulePosition, ModuleState};

// Command from teleop/scripts -> runtime. Body-frame velocities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChassisCommand {
    pub vx: f64,
    pub vy: f64,
    pub omega: f64,
}

impl From<&ChassisCommand> for ChassisSpeeds {
    fn from(cmd: &ChassisCommand) -> Self {
        Self { vx: cmd.vx, vy: cmd.vy, omega: cmd.omega }
    }
}

// Telemetry from runtime -> operator tooling, published every cycle.
// Module arrays are in FL, FR, BL, BR order.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DriveTelemetry {
    pub states: [ModuleState; 4],
    pub positions: [ModulePosition; 4],
    pub estimated_speeds: ChassisSpeeds,
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    CmdStale,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_json_shape() {
        let cmd: ChassisCommand =
            serde_json::from_str(r#"{"vx":1.0,"vy":-0.5,"omega":0.25}"#).unwrap();
        assert_eq!(cmd.vx, 1.0);
        assert_eq!(cmd.vy, -0.5);
        assert_eq!(cmd.omega, 0.25);

        let speeds = ChassisSpeeds::from(&cmd);
        assert_eq!(speeds.omega, 0.25);
    }

    #[test]
    fn test_health_wire_names() {
        assert_eq!(serde_json::to_string(&RuntimeHealth::Ok).unwrap(), r#""ok""#);
        assert_eq!(
            serde_json::to_string(&RuntimeHealth::CmdStale).unwrap(),
            r#""cmd_stale""#
        );
    }
}
