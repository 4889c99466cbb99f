// Hardware capability layer
//
// The drivetrain talks to actuators and sensors only through the traits
// in this module. Two backends are provided:
// - bus_servo/servo: serial bus servos behind the adapters
// - sim: an ideal simulated module, also used by tests

pub mod bus_servo;
mod servo;
pub mod sim;

pub use servo::{ServoAbsoluteEncoder, ServoIds, ServoModuleIo, ServoMotor, SharedBus};
pub use sim::{SimAbsoluteEncoder, SimModuleIo, SimMotor};

use crate::swerve::config::PidGains;

/// Errors from a hardware backend.
#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid response from device {id}: {reason}")]
    InvalidResponse { id: u8, reason: String },

    #[error("checksum mismatch for device {id}")]
    ChecksumMismatch { id: u8 },

    #[error("device {id} returned error status: 0x{status:02X}")]
    DeviceFault { id: u8, status: u8 },

    #[error("timeout waiting for response from device {id}")]
    Timeout { id: u8 },

    #[error("device {id} reading {value} out of range")]
    OutOfRange { id: u8, value: f64 },
}

pub type Result<T> = std::result::Result<T, HardwareError>;

/// Gain bank selector for controllers with more than one onboard PID slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GainSlot {
    Slot0,
    Slot1,
}

/// Closed-loop motor controller for one mechanism axis.
///
/// Everything at this boundary is in mechanism units: degrees for a
/// steering axis, meters and m/s for a drive axis. Gear ratios, wheel
/// geometry and sign conventions are the adapter's business.
pub trait MotorController: Send {
    /// Load PID gains into an onboard gain slot.
    fn configure_gains(&mut self, slot: GainSlot, gains: &PidGains) -> Result<()>;

    /// Bound the motor current, in amps.
    fn configure_current_limit(&mut self, amps: f64) -> Result<()>;

    /// Closed-loop position target in mechanism units, run with `slot`.
    fn set_position_target(&mut self, target: f64, slot: GainSlot) -> Result<()>;

    /// Closed-loop velocity target plus an additive feedforward output term.
    fn set_velocity_target(&mut self, velocity: f64, feedforward: f64) -> Result<()>;

    /// Open-loop output as a fraction of full output, clamped to [-1, 1].
    fn set_open_loop(&mut self, fraction: f64) -> Result<()>;

    /// Overwrite the controller's notion of its current position.
    fn seed_position(&mut self, position: f64) -> Result<()>;

    /// Measured position in mechanism units. Accumulates without wrapping.
    fn position(&mut self) -> Result<f64>;

    /// Measured velocity in mechanism units per second.
    fn velocity(&mut self) -> Result<f64>;
}

/// Absolute steering reference. Keeps its reading across power cycles.
pub trait AbsoluteEncoder: Send {
    /// Absolute angle in degrees, in [0, 360).
    fn absolute_degrees(&mut self) -> Result<f64>;
}

/// Actuators and sensor for one swerve module.
pub struct ModuleIo {
    pub steer: Box<dyn MotorController>,
    pub drive: Box<dyn MotorController>,
    pub encoder: Box<dyn AbsoluteEncoder>,
}
