// Bus servo adapters for the capability traits
//
// One serial bus carries every device of the drivetrain, so the adapters
// share it behind a mutex. Each adapter owns the unit conversion for its
// axis: the drivetrain above speaks degrees and meters, the bus below
// speaks steps.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use super::bus_servo::{MAX_DUTY, OperatingMode, STEPS_PER_REVOLUTION, ServoBus};
use super::{AbsoluteEncoder, GainSlot, HardwareError, ModuleIo, MotorController, Result};
use crate::swerve::config::{ModuleConfig, PidGains};

/// Handle to the drivetrain's single serial bus.
pub type SharedBus = Arc<Mutex<ServoBus>>;

/// Full output duty corresponds to this phase current at the driver.
const FULL_SCALE_CURRENT_A: f64 = 40.0;

/// Free speed of the servo in steps/s; converts a feedforward output
/// fraction into an equivalent velocity bias.
const FREE_SPEED_STEPS_PER_S: f64 = 7000.0;

// A poisoned lock still holds a usable bus; the protocol has no
// cross-call state to corrupt.
fn lock_bus(bus: &SharedBus) -> MutexGuard<'_, ServoBus> {
    bus.lock().unwrap_or_else(|e| e.into_inner())
}

/// One servo on the bus, presented as a mechanism-unit motor controller.
pub struct ServoMotor {
    bus: SharedBus,
    id: u8,
    /// Mechanism units (degrees or meters) per encoder step.
    units_per_step: f64,
    sign: f64,
    wrap: bool,
    mode: Option<OperatingMode>,
    /// Driver-side zero from seed_position; the turn counter is read-only.
    zero_offset: f64,
    gains: [Option<PidGains>; 2],
    active_slot: Option<GainSlot>,
}

impl ServoMotor {
    /// Steering axis: the servo turns the azimuth through `gear_ratio`
    /// servo turns per azimuth turn. Mechanism unit is azimuth degrees.
    pub fn steering(bus: SharedBus, id: u8, gear_ratio: f64, invert: bool, wrap: bool) -> Self {
        Self::new(bus, id, 360.0 / (STEPS_PER_REVOLUTION * gear_ratio), invert, wrap)
    }

    /// Drive axis: `gear_ratio` servo turns per wheel turn. Mechanism unit
    /// is meters at the tread.
    pub fn drive(
        bus: SharedBus,
        id: u8,
        gear_ratio: f64,
        wheel_circumference: f64,
        invert: bool,
    ) -> Self {
        Self::new(
            bus,
            id,
            wheel_circumference / (STEPS_PER_REVOLUTION * gear_ratio),
            invert,
            false,
        )
    }

    fn new(bus: SharedBus, id: u8, units_per_step: f64, invert: bool, wrap: bool) -> Self {
        Self {
            bus,
            id,
            units_per_step,
            sign: if invert { -1.0 } else { 1.0 },
            wrap,
            mode: None,
            zero_offset: 0.0,
            gains: [None, None],
            active_slot: None,
        }
    }

    /// Switch operating mode with the torque dance the servos require:
    /// torque off, change mode, torque on.
    fn ensure_mode(&mut self, mode: OperatingMode) -> Result<()> {
        if self.mode == Some(mode) {
            return Ok(());
        }
        let mut bus = lock_bus(&self.bus);
        bus.disable_torque(self.id)?;
        bus.set_operating_mode(self.id, mode)?;
        bus.enable_torque(self.id)?;
        drop(bus);

        debug!("servo {}: operating mode -> {:?}", self.id, mode);
        self.mode = Some(mode);
        Ok(())
    }

    /// Push the cached gains for `slot` if they are not already active.
    /// The servo has one onboard gain bank, so slots are emulated here.
    fn ensure_slot(&mut self, slot: GainSlot) -> Result<()> {
        if self.active_slot == Some(slot) {
            return Ok(());
        }
        if let Some(gains) = self.gains[slot_index(slot)] {
            self.push_gains(&gains)?;
        }
        self.active_slot = Some(slot);
        Ok(())
    }

    fn push_gains(&mut self, gains: &PidGains) -> Result<()> {
        lock_bus(&self.bus).set_gains(
            self.id,
            gain_byte(gains.kp),
            gain_byte(gains.ki),
            gain_byte(gains.kd),
        )
    }

    fn raw_continuous_steps(&mut self) -> Result<i64> {
        lock_bus(&self.bus).get_continuous_steps(self.id)
    }

    fn steps_to_units(&self, steps: i64) -> f64 {
        self.sign * steps as f64 * self.units_per_step + self.zero_offset
    }
}

impl MotorController for ServoMotor {
    fn configure_gains(&mut self, slot: GainSlot, gains: &PidGains) -> Result<()> {
        self.gains[slot_index(slot)] = Some(*gains);
        if self.active_slot == Some(slot) {
            self.push_gains(gains)?;
        }
        Ok(())
    }

    fn configure_current_limit(&mut self, amps: f64) -> Result<()> {
        let permille = (amps / FULL_SCALE_CURRENT_A * 1000.0).clamp(0.0, 1000.0) as u16;
        lock_bus(&self.bus).set_torque_limit(self.id, permille)
    }

    fn set_position_target(&mut self, target: f64, slot: GainSlot) -> Result<()> {
        self.ensure_slot(slot)?;

        let target_steps =
            ((target - self.zero_offset) * self.sign / self.units_per_step).round() as i64;

        if self.wrap {
            // Relative step move toward the target; re-issued every cycle,
            // so i16 clamping only flattens the first cycle of a huge move.
            self.ensure_mode(OperatingMode::Step)?;
            let current = self.raw_continuous_steps()?;
            let delta = (target_steps - current).clamp(i16::MIN as i64, i16::MAX as i64) as i16;
            lock_bus(&self.bus).step_by(self.id, delta)
        } else {
            self.ensure_mode(OperatingMode::Position)?;
            let steps = target_steps.rem_euclid(STEPS_PER_REVOLUTION as i64) as u16;
            lock_bus(&self.bus).set_position_steps(self.id, steps)
        }
    }

    fn set_velocity_target(&mut self, velocity: f64, feedforward: f64) -> Result<()> {
        self.ensure_mode(OperatingMode::Velocity)?;

        // No separate feedforward input on the bus; fold it in as the
        // equivalent velocity at full output.
        let steps_per_s =
            self.sign * (velocity / self.units_per_step + feedforward * FREE_SPEED_STEPS_PER_S);
        let raw = steps_per_s.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16;
        lock_bus(&self.bus).set_velocity(self.id, raw)
    }

    fn set_open_loop(&mut self, fraction: f64) -> Result<()> {
        self.ensure_mode(OperatingMode::Pwm)?;
        let duty = (self.sign * fraction.clamp(-1.0, 1.0) * MAX_DUTY as f64).round() as i16;
        lock_bus(&self.bus).set_duty(self.id, duty)
    }

    fn seed_position(&mut self, position: f64) -> Result<()> {
        self.zero_offset = 0.0;
        let raw = self.raw_continuous_steps()?;
        self.zero_offset = position - self.sign * raw as f64 * self.units_per_step;
        debug!("servo {}: position seeded to {:.3}", self.id, position);
        Ok(())
    }

    fn position(&mut self) -> Result<f64> {
        let steps = self.raw_continuous_steps()?;
        Ok(self.steps_to_units(steps))
    }

    fn velocity(&mut self) -> Result<f64> {
        let steps_per_s = lock_bus(&self.bus).get_velocity(self.id)?;
        Ok(self.sign * steps_per_s as f64 * self.units_per_step)
    }
}

impl Drop for ServoMotor {
    fn drop(&mut self) {
        // Leave the axis unpowered-safe: zero whatever mode is active
        let result = match self.mode {
            Some(OperatingMode::Velocity) => lock_bus(&self.bus).set_velocity(self.id, 0),
            Some(OperatingMode::Pwm) => lock_bus(&self.bus).set_duty(self.id, 0),
            _ => Ok(()),
        };
        if let Err(e) = result {
            warn!("servo {}: failed to zero output on drop: {}", self.id, e);
        }
    }
}

/// Absolute azimuth encoder on the bus, mounted 1:1 on the steering shaft.
pub struct ServoAbsoluteEncoder {
    bus: SharedBus,
    id: u8,
}

impl ServoAbsoluteEncoder {
    pub fn new(bus: SharedBus, id: u8) -> Self {
        Self { bus, id }
    }
}

impl AbsoluteEncoder for ServoAbsoluteEncoder {
    fn absolute_degrees(&mut self) -> Result<f64> {
        let steps = lock_bus(&self.bus).get_position_steps(self.id)?;
        if steps as f64 >= STEPS_PER_REVOLUTION {
            // 12-bit sensor; anything above is garbage on the wire
            return Err(HardwareError::OutOfRange {
                id: self.id,
                value: steps as f64,
            });
        }
        Ok(steps as f64 * 360.0 / STEPS_PER_REVOLUTION)
    }
}

/// Bus device ids for one module.
#[derive(Debug, Clone, Copy)]
pub struct ServoIds {
    pub steer: u8,
    pub drive: u8,
    pub encoder: u8,
}

/// Connects one module's three bus devices and bundles them as [`ModuleIo`].
pub struct ServoModuleIo;

impl ServoModuleIo {
    /// Ping all three devices, then build the adapters. Fails fast when a
    /// device stays silent, like any wiring or power fault would.
    pub fn connect(bus: &SharedBus, ids: ServoIds, config: &ModuleConfig) -> Result<ModuleIo> {
        info!(
            "module {}: connecting servos steer={} drive={} encoder={}",
            config.label, ids.steer, ids.drive, ids.encoder
        );

        for id in [ids.steer, ids.drive, ids.encoder] {
            match lock_bus(bus).ping(id)? {
                true => debug!("device {} responding", id),
                false => {
                    warn!("device {} not responding to ping", id);
                    return Err(HardwareError::Timeout { id });
                }
            }
        }

        Ok(ModuleIo {
            steer: Box::new(ServoMotor::steering(
                bus.clone(),
                ids.steer,
                config.steer_ratio,
                config.invert_steer,
                config.continuous_wrap,
            )),
            drive: Box::new(ServoMotor::drive(
                bus.clone(),
                ids.drive,
                config.drive_ratio,
                config.wheel_circumference(),
                config.invert_drive,
            )),
            encoder: Box::new(ServoAbsoluteEncoder::new(bus.clone(), ids.encoder)),
        })
    }
}

fn slot_index(slot: GainSlot) -> usize {
    match slot {
        GainSlot::Slot0 => 0,
        GainSlot::Slot1 => 1,
    }
}

fn gain_byte(gain: f64) -> u8 {
    gain.round().clamp(0.0, 254.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gain_byte_clamps() {
        assert_eq!(gain_byte(20.0), 20);
        assert_eq!(gain_byte(-3.0), 0);
        assert_eq!(gain_byte(1000.0), 254);
        assert_eq!(gain_byte(0.4), 0);
    }

    #[test]
    fn test_steering_units_per_step() {
        // 21.4 servo turns per azimuth turn: one step is a small azimuth angle
        let per_step = 360.0 / (STEPS_PER_REVOLUTION * 21.4);
        assert!(per_step > 0.0041 && per_step < 0.0042, "got {per_step}");
        // A full azimuth turn is gear_ratio * 4096 steps
        assert!((360.0 / per_step - 21.4 * 4096.0).abs() < 1e-6);
    }

    #[test]
    fn test_drive_units_per_step() {
        // 4 inch wheel, 6.75:1 reduction
        let circumference = 0.1016 * std::f64::consts::PI;
        let per_step = circumference / (STEPS_PER_REVOLUTION * 6.75);
        // One wheel turn of distance equals gear_ratio * 4096 steps
        assert!((circumference / per_step - 6.75 * 4096.0).abs() < 1e-6);
    }
}
