// One swerve module: a steering axis and a drive wheel
//
// The steering loop is closed on the relative sensor for responsiveness;
// the absolute encoder is read once at calibration to make that sensor
// trustworthy across power cycles. All per-cycle hardware failures are
// contained here: logged, command dropped, previous output held.

use tracing::{debug, info, warn};

use crate::hardware::{GainSlot, HardwareError, ModuleIo};

use super::angle::{normalize, optimize};
use super::config::{CalibrationOffset, FeedforwardGains, ModuleConfig};
use super::error::{DriveError, Result};
use super::state::{ModulePosition, ModuleState};

/// Module lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleStage {
    /// Constructed; the steering reference is not yet trustworthy.
    Uninitialized,
    /// Steering reference seeded, nothing commanded yet.
    Calibrated,
    /// Holding with zero drive output.
    Idle,
    /// Tracking a nonzero target.
    Driving,
}

pub struct SwerveModule {
    label: String,
    offset: CalibrationOffset,
    feedforward: FeedforwardGains,
    max_speed: f64,
    steer_deadband: f64,
    control_period: f64,
    io: ModuleIo,
    stage: ModuleStage,
    absolute_seeded: bool,
    /// Continuous degrees last sent to the steering loop.
    last_angle: f64,
    /// m/s commanded last cycle; first difference gives the acceleration
    /// estimate for feedforward.
    last_speed: f64,
    last_state: ModuleState,
    last_position: ModulePosition,
}

impl SwerveModule {
    /// Validate the config and push gains and current limits to both
    /// controllers. The module comes up `Uninitialized`; nothing moves
    /// until [`calibrate`](Self::calibrate) has run.
    pub fn new(
        config: &ModuleConfig,
        max_speed: f64,
        steer_deadband: f64,
        control_period: f64,
        mut io: ModuleIo,
    ) -> Result<Self> {
        config.validate()?;

        io.steer
            .configure_gains(GainSlot::Slot0, &config.steer_gains)
            .map_err(|e| actuator_failed(&config.label, e))?;
        io.steer
            .configure_current_limit(config.steer_current_limit)
            .map_err(|e| actuator_failed(&config.label, e))?;
        io.drive
            .configure_gains(GainSlot::Slot0, &config.drive_gains)
            .map_err(|e| actuator_failed(&config.label, e))?;
        io.drive
            .configure_current_limit(config.drive_current_limit)
            .map_err(|e| actuator_failed(&config.label, e))?;

        info!("module {}: controllers configured", config.label);

        Ok(Self {
            label: config.label.clone(),
            offset: config.offset,
            feedforward: config.drive_feedforward,
            max_speed,
            steer_deadband,
            control_period,
            io,
            stage: ModuleStage::Uninitialized,
            absolute_seeded: false,
            last_angle: 0.0,
            last_speed: 0.0,
            last_state: ModuleState::default(),
            last_position: ModulePosition::default(),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn stage(&self) -> ModuleStage {
        self.stage
    }

    /// True when the steering reference came from the absolute encoder
    /// rather than the relative fallback.
    pub fn absolute_seeded(&self) -> bool {
        self.absolute_seeded
    }

    /// Align the relative steering sensor to the absolute encoder, once
    /// per power cycle. Returns true when the absolute reference was
    /// used; on a stale or failed read the module keeps the relative
    /// reading as truth and continues, so startup is never blocked.
    pub fn calibrate(&mut self) -> bool {
        if self.stage != ModuleStage::Uninitialized {
            warn!(
                "module {}: calibrate called again, keeping existing reference",
                self.label
            );
            return self.absolute_seeded;
        }

        match self.seed_from_absolute() {
            Ok(angle) => {
                info!(
                    "module {}: steering seeded to {:.1} deg from absolute encoder",
                    self.label, angle
                );
                self.absolute_seeded = true;
                self.last_angle = angle;
            }
            Err(e) => {
                warn!("module {}: {}; keeping relative reading", self.label, e);
                self.absolute_seeded = false;
                self.last_angle = self.io.steer.position().unwrap_or_else(|read_err| {
                    warn!(
                        "module {}: relative read failed too ({}), assuming 0",
                        self.label, read_err
                    );
                    0.0
                });
            }
        }

        self.stage = ModuleStage::Calibrated;
        self.absolute_seeded
    }

    fn seed_from_absolute(&mut self) -> Result<f64> {
        let absolute = self
            .io
            .encoder
            .absolute_degrees()
            .map_err(|e| self.sensor_stale(e))?;
        let relative = normalize(absolute - self.offset.absolute_at_zero);
        self.io
            .steer
            .seed_position(relative)
            .map_err(|e| self.actuator_error(e))?;
        Ok(relative)
    }

    /// Command one cycle's target. Open-loop drive maps speed to a duty
    /// fraction; closed-loop adds the feedforward model on top of the
    /// velocity loop.
    pub fn set_desired_state(&mut self, target: ModuleState, open_loop: bool) {
        if self.stage == ModuleStage::Uninitialized {
            warn!(
                "module {}: dropping command, steering not calibrated",
                self.label
            );
            return;
        }

        let current = match self.io.steer.position() {
            Ok(angle) => angle,
            Err(e) => {
                warn!(
                    "module {}: steering read failed ({}), using last commanded angle",
                    self.label, e
                );
                self.last_angle
            }
        };

        let optimized = optimize(target, current);
        let rotation = optimized.angle - current;

        debug!(
            "module {}: target speed={:.2} angle={:.1} rotation={:.1} open_loop={}",
            self.label, optimized.speed, optimized.angle, rotation, open_loop
        );

        // Re-commanding a position already reached within tolerance only
        // feeds oscillation
        let mut steered = false;
        if rotation.abs() >= self.steer_deadband {
            match self.command_steer(optimized.angle) {
                Ok(()) => {
                    self.last_angle = optimized.angle;
                    steered = true;
                }
                Err(e) => warn!("module {}: {}; steering holds previous target", self.label, e),
            }
        }

        match self.command_drive(optimized.speed, open_loop) {
            Ok(()) => self.last_speed = optimized.speed,
            Err(e) => warn!("module {}: {}; drive holds previous output", self.label, e),
        }

        self.stage = if optimized.speed == 0.0 && !steered {
            ModuleStage::Idle
        } else {
            ModuleStage::Driving
        };
    }

    fn command_steer(&mut self, angle: f64) -> Result<()> {
        self.io
            .steer
            .set_position_target(angle, GainSlot::Slot0)
            .map_err(|e| self.actuator_error(e))
    }

    fn command_drive(&mut self, speed: f64, open_loop: bool) -> Result<()> {
        if open_loop {
            let fraction = (speed / self.max_speed).clamp(-1.0, 1.0);
            self.io
                .drive
                .set_open_loop(fraction)
                .map_err(|e| self.actuator_error(e))
        } else {
            let acceleration = (speed - self.last_speed) / self.control_period;
            let feedforward = self.drive_feedforward(speed, acceleration);
            self.io
                .drive
                .set_velocity_target(speed, feedforward)
                .map_err(|e| self.actuator_error(e))
        }
    }

    fn drive_feedforward(&self, velocity: f64, acceleration: f64) -> f64 {
        // signum(0.0) is 1.0 in Rust; a resting wheel gets no static push
        let static_term = if velocity == 0.0 {
            0.0
        } else {
            self.feedforward.ks * velocity.signum()
        };
        static_term + self.feedforward.kv * velocity + self.feedforward.ka * acceleration
    }

    /// Measured wheel speed and normalized steering angle. On a sensor
    /// failure the last good snapshot is served instead.
    pub fn state(&mut self) -> ModuleState {
        match self.measure_state() {
            Ok(state) => {
                self.last_state = state;
                state
            }
            Err(e) => {
                warn!("module {}: {}; serving cached state", self.label, e);
                self.last_state
            }
        }
    }

    fn measure_state(&mut self) -> Result<ModuleState> {
        let speed = self
            .io
            .drive
            .velocity()
            .map_err(|e| self.sensor_stale(e))?;
        let angle = self
            .io
            .steer
            .position()
            .map_err(|e| self.sensor_stale(e))?;
        Ok(ModuleState::new(speed, normalize(angle)))
    }

    /// Cumulative drive distance and normalized steering angle. Distance
    /// never wraps, so consecutive samples difference cleanly.
    pub fn position(&mut self) -> ModulePosition {
        match self.measure_position() {
            Ok(position) => {
                self.last_position = position;
                position
            }
            Err(e) => {
                warn!("module {}: {}; serving cached position", self.label, e);
                self.last_position
            }
        }
    }

    fn measure_position(&mut self) -> Result<ModulePosition> {
        let distance = self
            .io
            .drive
            .position()
            .map_err(|e| self.sensor_stale(e))?;
        let angle = self
            .io
            .steer
            .position()
            .map_err(|e| self.sensor_stale(e))?;
        Ok(ModulePosition { distance, angle: normalize(angle) })
    }

    /// Raw absolute encoder angle, for diagnostics.
    pub fn absolute_angle(&mut self) -> Result<f64> {
        self.io
            .encoder
            .absolute_degrees()
            .map_err(|e| self.sensor_stale(e))
    }

    /// Zero both actuator outputs now. Calibration is preserved.
    pub fn stop(&mut self) {
        if let Err(e) = self.io.steer.set_open_loop(0.0) {
            warn!("module {}: failed to zero steering: {}", self.label, e);
        }
        if let Err(e) = self.io.drive.set_open_loop(0.0) {
            warn!("module {}: failed to zero drive: {}", self.label, e);
        }
        self.last_speed = 0.0;
        if self.stage != ModuleStage::Uninitialized {
            self.stage = ModuleStage::Idle;
        }
    }

    fn sensor_stale(&self, source: HardwareError) -> DriveError {
        DriveError::SensorStale { module: self.label.clone(), source }
    }

    fn actuator_error(&self, source: HardwareError) -> DriveError {
        DriveError::ActuatorCommandFailed { module: self.label.clone(), source }
    }
}

fn actuator_failed(label: &str, source: HardwareError) -> DriveError {
    DriveError::ActuatorCommandFailed { module: label.to_string(), source }
}
