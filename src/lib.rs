// Swerve drivetrain runtime
//
// Library surface for the runtime binary and the demo tools.

pub mod config;
pub mod hardware;
pub mod messages;
pub mod runtime;
pub mod swerve;
