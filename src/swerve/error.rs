// Drivetrain error taxonomy

use crate::hardware::HardwareError;

/// Errors surfaced by the drivetrain layer.
///
/// Construction and calibration return these; the per-cycle control path
/// contains failures internally (log, hold previous output) and never
/// propagates them.
#[derive(Debug, thiserror::Error)]
pub enum DriveError {
    /// A sensor reading is missing or too old to trust.
    #[error("stale sensor on module {module}: {source}")]
    SensorStale {
        module: String,
        #[source]
        source: HardwareError,
    },

    /// An actuator rejected or failed to acknowledge a command.
    #[error("actuator command failed on module {module}: {source}")]
    ActuatorCommandFailed {
        module: String,
        #[source]
        source: HardwareError,
    },

    /// Malformed geometry, gains, or limits. Fatal at startup.
    #[error("invalid configuration: {0}")]
    ConfigurationInvalid(String),
}

pub type Result<T> = std::result::Result<T, DriveError>;
