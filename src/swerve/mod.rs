// Swerve drivetrain control
//
// Provides:
// - Angle arithmetic on the continuous steering axis
// - Chassis <-> module kinematics (velocity fan-out, odometry estimate)
// - Per-module state machine (calibration, steering, drive loops)
// - Four-module drivetrain facade

pub mod angle;
pub mod config;
mod drive;
pub mod error;
pub mod kinematics;
mod module;
pub mod state;

pub use drive::SwerveDrive;
pub use error::{DriveError, Result};
pub use kinematics::{SwerveKinematics, desaturate_wheel_speeds};
pub use module::{ModuleStage, SwerveModule};
pub use state::{ChassisSpeeds, ModulePosition, ModuleState};
