// Four-module swerve drivetrain
//
// Owns the kinematic model and the four modules in FL, FR, BL, BR order.
// One call per control cycle: chassis velocity in, module commands out.

use tracing::info;

use crate::hardware::ModuleIo;

use super::config::DriveConfig;
use super::error::Result;
use super::kinematics::{SwerveKinematics, desaturate_wheel_speeds};
use super::module::SwerveModule;
use super::state::{ChassisSpeeds, ModulePosition, ModuleState};

pub struct SwerveDrive {
    modules: [SwerveModule; 4],
    kinematics: SwerveKinematics,
    max_speed: f64,
}

impl SwerveDrive {
    /// Validate the whole configuration and bring up four modules.
    /// Any configuration problem is fatal here; a drivetrain with bad
    /// geometry or gains must never start.
    pub fn new(config: &DriveConfig, io: [ModuleIo; 4]) -> Result<Self> {
        config.validate()?;
        let kinematics = SwerveKinematics::new(config.geometry)?;

        let [io_fl, io_fr, io_bl, io_br] = io;
        let build = |module_config, io| {
            SwerveModule::new(
                module_config,
                config.max_speed,
                config.steer_deadband,
                config.control_period,
                io,
            )
        };
        let modules = [
            build(&config.modules[0], io_fl)?,
            build(&config.modules[1], io_fr)?,
            build(&config.modules[2], io_bl)?,
            build(&config.modules[3], io_br)?,
        ];

        info!(
            "drivetrain up: 4 modules, max speed {:.2} m/s",
            config.max_speed
        );

        Ok(Self { modules, kinematics, max_speed: config.max_speed })
    }

    /// Calibrate every module and seed the kinematics headings from the
    /// measured angles. Returns how many modules got their reference from
    /// the absolute encoder; the rest fell back to relative readings.
    pub fn calibrate(&mut self) -> usize {
        let mut seeded = 0;
        for module in &mut self.modules {
            if module.calibrate() {
                seeded += 1;
            }
        }

        let mut headings = [0.0; 4];
        for (heading, module) in headings.iter_mut().zip(&mut self.modules) {
            *heading = module.state().angle;
        }
        self.kinematics.reset_headings(headings);

        info!("drivetrain calibrated: {}/4 modules from absolute encoders", seeded);
        seeded
    }

    /// One control cycle: kinematics, desaturation, then the four module
    /// commands in fixed order. Commands are independent per module; no
    /// cross-module barrier.
    pub fn drive(&mut self, speeds: ChassisSpeeds, open_loop: bool) {
        let mut states = self.kinematics.to_module_states(speeds);
        desaturate_wheel_speeds(&mut states, self.max_speed);

        for (module, state) in self.modules.iter_mut().zip(states) {
            module.set_desired_state(state, open_loop);
        }
    }

    /// Measured module states, read module-by-module without a
    /// consistency lock. Skew within one cycle is acceptable.
    pub fn states(&mut self) -> [ModuleState; 4] {
        let mut out = [ModuleState::default(); 4];
        for (slot, module) in out.iter_mut().zip(&mut self.modules) {
            *slot = module.state();
        }
        out
    }

    /// Odometry positions, same snapshot semantics as [`states`](Self::states).
    pub fn positions(&mut self) -> [ModulePosition; 4] {
        let mut out = [ModulePosition::default(); 4];
        for (slot, module) in out.iter_mut().zip(&mut self.modules) {
            *slot = module.position();
        }
        out
    }

    /// Chassis velocity estimate for an already-taken states snapshot.
    /// Telemetry uses this to avoid a second round of bus reads.
    pub fn estimate_chassis_speeds(&self, states: &[ModuleState; 4]) -> ChassisSpeeds {
        self.kinematics.to_chassis_speeds(states)
    }

    /// Chassis velocity estimate from fresh measurements.
    pub fn chassis_speeds(&mut self) -> ChassisSpeeds {
        let states = self.states();
        self.estimate_chassis_speeds(&states)
    }

    /// Zero output on every module immediately.
    pub fn stop_all(&mut self) {
        for module in &mut self.modules {
            module.stop();
        }
    }

    pub fn modules(&self) -> &[SwerveModule; 4] {
        &self.modules
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::sim::{SimCommand, SimModuleIo};
    use crate::swerve::config::{
        CalibrationOffset, FeedforwardGains, ModuleConfig, ModuleGeometry, PidGains,
    };
    use crate::swerve::module::ModuleStage;
    use approx::assert_relative_eq;
    use std::time::Duration;

    fn module_config(label: &str) -> ModuleConfig {
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
            offset: CalibrationOffset { absolute_at_zero: 0.0 },
        }
    }

    fn drive_config() -> DriveConfig {
        DriveConfig {
            geometry: [
                ModuleGeometry { offset_x: 0.5, offset_y: 0.5 },
                ModuleGeometry { offset_x: 0.5, offset_y: -0.5 },
                ModuleGeometry { offset_x: -0.5, offset_y: 0.5 },
                ModuleGeometry { offset_x: -0.5, offset_y: -0.5 },
            ],
            modules: [
                module_config("FL"),
                module_config("FR"),
                module_config("BL"),
                module_config("BR"),
            ],
            max_speed: 2.0,
            max_angular_velocity: 4.0,
            steer_deadband: 7.2,
            control_period: 0.02,
            calibration_settle: Duration::from_secs(1),
        }
    }

    /// All four wheels physically at `absolute` degrees, offsets zero.
    fn rig(absolute: f64) -> (SwerveDrive, [SimModuleIo; 4]) {
        let sims = [
            SimModuleIo::new(10, absolute, 2.0),
            SimModuleIo::new(20, absolute, 2.0),
            SimModuleIo::new(30, absolute, 2.0),
            SimModuleIo::new(40, absolute, 2.0),
        ];
        let io = [sims[0].io(), sims[1].io(), sims[2].io(), sims[3].io()];
        let drive = SwerveDrive::new(&drive_config(), io).unwrap();
        (drive, sims)
    }

    #[test]
    fn test_forward_drive_fans_out() {
        let (mut drive, sims) = rig(0.0);
        drive.calibrate();
        drive.drive(ChassisSpeeds::new(1.0, 0.0, 0.0), true);

        for sim in &sims {
            assert_eq!(
                sim.drive.last_command(),
                Some(SimCommand::OpenLoop { fraction: 0.5 })
            );
            // Wheels already face forward; steering stays quiet
            assert_eq!(sim.steer.command_count(), 0);
        }
    }

    #[test]
    fn test_strafe_steers_all_modules() {
        let (mut drive, sims) = rig(0.0);
        drive.calibrate();
        drive.drive(ChassisSpeeds::new(0.0, 1.0, 0.0), true);

        for sim in &sims {
            assert_eq!(
                sim.steer.last_command(),
                Some(SimCommand::Position { target: 90.0, slot: crate::hardware::GainSlot::Slot0 })
            );
        }
    }

    #[test]
    fn test_oversteer_command_desaturates() {
        let (mut drive, sims) = rig(0.0);
        drive.calibrate();
        // Twice the attainable speed: closed loop shows the scaled target
        drive.drive(ChassisSpeeds::new(4.0, 0.0, 0.0), false);

        for sim in &sims {
            match sim.drive.last_command() {
                Some(SimCommand::Velocity { velocity, .. }) => {
                    assert_relative_eq!(velocity, 2.0)
                }
                other => panic!("expected velocity command, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_reversed_wheels_flip_drive_not_steering() {
        let (mut drive, sims) = rig(180.0);
        drive.calibrate();
        drive.drive(ChassisSpeeds::new(1.0, 0.0, 0.0), true);

        for sim in &sims {
            assert_eq!(sim.steer.command_count(), 0);
            assert_eq!(
                sim.drive.last_command(),
                Some(SimCommand::OpenLoop { fraction: -0.5 })
            );
        }
    }

    #[test]
    fn test_calibrate_counts_absolute_seeds() {
        let (mut drive, sims) = rig(0.0);
        sims[1].encoder.fail(true);
        sims[2].encoder.fail(true);

        assert_eq!(drive.calibrate(), 2);
    }

    #[test]
    fn test_zero_command_after_calibrate_is_quiet_on_steering() {
        let (mut drive, sims) = rig(45.0);
        drive.calibrate();
        drive.drive(ChassisSpeeds::zero(), false);

        for sim in &sims {
            // Headings were seeded from measurement; nothing to correct
            assert_eq!(sim.steer.command_count(), 0);
        }
        for module in drive.modules() {
            assert_eq!(module.stage(), ModuleStage::Idle);
        }
    }

    #[test]
    fn test_states_and_estimate_round_trip() {
        let (mut drive, _sims) = rig(0.0);
        drive.calibrate();
        drive.drive(ChassisSpeeds::new(1.0, 0.0, 0.0), false);

        let states = drive.states();
        for state in &states {
            assert_relative_eq!(state.speed, 1.0);
            assert_relative_eq!(state.angle, 0.0);
        }

        let estimate = drive.chassis_speeds();
        assert_relative_eq!(estimate.vx, 1.0, epsilon = 1e-9);
        assert_relative_eq!(estimate.vy, 0.0, epsilon = 1e-9);
        assert_relative_eq!(estimate.omega, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_positions_accumulate() {
        let (mut drive, sims) = rig(0.0);
        drive.calibrate();
        drive.drive(ChassisSpeeds::new(1.0, 0.0, 0.0), false);

        for sim in &sims {
            sim.step(0.02);
        }
        let positions = drive.positions();
        for position in &positions {
            assert_relative_eq!(position.distance, 0.02);
        }
    }

    #[test]
    fn test_stop_all() {
        let (mut drive, sims) = rig(0.0);
        drive.calibrate();
        drive.drive(ChassisSpeeds::new(1.0, 0.5, 0.5), true);
        drive.stop_all();

        for sim in &sims {
            assert_eq!(
                sim.drive.last_command(),
                Some(SimCommand::OpenLoop { fraction: 0.0 })
            );
        }
        for module in drive.modules() {
            assert_eq!(module.stage(), ModuleStage::Idle);
        }
    }
}
