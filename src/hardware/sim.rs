// Simulated module hardware
//
// Ideal-response stand-ins for the bus devices: position targets are
// reached instantly, velocity targets hold exactly. Handles are cheap
// clones over shared state, so a test (or the no-hardware runtime) can
// keep one handle for inspection while the drivetrain owns the other.

use std::sync::{Arc, Mutex, MutexGuard};

use super::{AbsoluteEncoder, GainSlot, HardwareError, ModuleIo, MotorController, Result};
use crate::swerve::config::PidGains;

/// Last command accepted by a simulated motor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SimCommand {
    Position { target: f64, slot: GainSlot },
    Velocity { velocity: f64, feedforward: f64 },
    OpenLoop { fraction: f64 },
}

#[derive(Debug, Default)]
struct MotorInner {
    position: f64,
    velocity: f64,
    free_speed: f64,
    gains: [Option<PidGains>; 2],
    current_limit: Option<f64>,
    last_command: Option<SimCommand>,
    command_count: u32,
    seed_count: u32,
    fail_commands: bool,
    fail_reads: bool,
}

fn lock<T>(inner: &Arc<Mutex<T>>) -> MutexGuard<'_, T> {
    inner.lock().unwrap_or_else(|e| e.into_inner())
}

/// Simulated motor controller.
#[derive(Clone)]
pub struct SimMotor {
    inner: Arc<Mutex<MotorInner>>,
    id: u8,
}

impl SimMotor {
    pub fn new(id: u8) -> Self {
        Self::with_free_speed(id, 0.0)
    }

    /// `free_speed` is the mechanism velocity at full open-loop output,
    /// so duty commands produce motion instead of only being recorded.
    pub fn with_free_speed(id: u8, free_speed: f64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MotorInner {
                free_speed,
                ..MotorInner::default()
            })),
            id,
        }
    }

    /// Advance the simulated mechanism.
    pub fn step(&self, dt: f64) {
        let mut inner = lock(&self.inner);
        let velocity = inner.velocity;
        inner.position += velocity * dt;
    }

    // === Test and telemetry introspection ===

    pub fn last_command(&self) -> Option<SimCommand> {
        lock(&self.inner).last_command
    }

    pub fn command_count(&self) -> u32 {
        lock(&self.inner).command_count
    }

    pub fn seed_count(&self) -> u32 {
        lock(&self.inner).seed_count
    }

    pub fn current_position(&self) -> f64 {
        lock(&self.inner).position
    }

    pub fn configured_gains(&self, slot: GainSlot) -> Option<PidGains> {
        lock(&self.inner).gains[slot_index(slot)]
    }

    pub fn configured_current_limit(&self) -> Option<f64> {
        lock(&self.inner).current_limit
    }

    // === Fault injection ===

    pub fn fail_commands(&self, fail: bool) {
        lock(&self.inner).fail_commands = fail;
    }

    pub fn fail_reads(&self, fail: bool) {
        lock(&self.inner).fail_reads = fail;
    }

    fn check_command(&self) -> Result<()> {
        if lock(&self.inner).fail_commands {
            Err(HardwareError::Timeout { id: self.id })
        } else {
            Ok(())
        }
    }

    fn check_read(&self) -> Result<()> {
        if lock(&self.inner).fail_reads {
            Err(HardwareError::Timeout { id: self.id })
        } else {
            Ok(())
        }
    }
}

impl MotorController for SimMotor {
    fn configure_gains(&mut self, slot: GainSlot, gains: &PidGains) -> Result<()> {
        self.check_command()?;
        lock(&self.inner).gains[slot_index(slot)] = Some(*gains);
        Ok(())
    }

    fn configure_current_limit(&mut self, amps: f64) -> Result<()> {
        self.check_command()?;
        lock(&self.inner).current_limit = Some(amps);
        Ok(())
    }

    fn set_position_target(&mut self, target: f64, slot: GainSlot) -> Result<()> {
        self.check_command()?;
        let mut inner = lock(&self.inner);
        inner.position = target;
        inner.last_command = Some(SimCommand::Position { target, slot });
        inner.command_count += 1;
        Ok(())
    }

    fn set_velocity_target(&mut self, velocity: f64, feedforward: f64) -> Result<()> {
        self.check_command()?;
        let mut inner = lock(&self.inner);
        inner.velocity = velocity;
        inner.last_command = Some(SimCommand::Velocity { velocity, feedforward });
        inner.command_count += 1;
        Ok(())
    }

    fn set_open_loop(&mut self, fraction: f64) -> Result<()> {
        self.check_command()?;
        let mut inner = lock(&self.inner);
        inner.velocity = fraction * inner.free_speed;
        inner.last_command = Some(SimCommand::OpenLoop { fraction });
        inner.command_count += 1;
        Ok(())
    }

    fn seed_position(&mut self, position: f64) -> Result<()> {
        self.check_command()?;
        let mut inner = lock(&self.inner);
        inner.position = position;
        inner.seed_count += 1;
        Ok(())
    }

    fn position(&mut self) -> Result<f64> {
        self.check_read()?;
        Ok(lock(&self.inner).position)
    }

    fn velocity(&mut self) -> Result<f64> {
        self.check_read()?;
        Ok(lock(&self.inner).velocity)
    }
}

#[derive(Debug, Default)]
struct EncoderInner {
    degrees: f64,
    fail: bool,
}

/// Simulated absolute encoder.
#[derive(Clone)]
pub struct SimAbsoluteEncoder {
    inner: Arc<Mutex<EncoderInner>>,
    id: u8,
}

impl SimAbsoluteEncoder {
    pub fn new(id: u8, degrees: f64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(EncoderInner { degrees, fail: false })),
            id,
        }
    }

    pub fn set_degrees(&self, degrees: f64) {
        lock(&self.inner).degrees = degrees;
    }

    pub fn fail(&self, fail: bool) {
        lock(&self.inner).fail = fail;
    }
}

impl AbsoluteEncoder for SimAbsoluteEncoder {
    fn absolute_degrees(&mut self) -> Result<f64> {
        let inner = lock(&self.inner);
        if inner.fail {
            return Err(HardwareError::Timeout { id: self.id });
        }
        Ok(inner.degrees)
    }
}

/// A full simulated module: two motors and an encoder, with the
/// inspection handles kept out for the owner.
pub struct SimModuleIo {
    pub steer: SimMotor,
    pub drive: SimMotor,
    pub encoder: SimAbsoluteEncoder,
}

impl SimModuleIo {
    /// `id_base` spaces the device ids so log lines stay distinguishable;
    /// `absolute_degrees` is where the azimuth physically points at boot.
    pub fn new(id_base: u8, absolute_degrees: f64, drive_free_speed: f64) -> Self {
        Self {
            steer: SimMotor::new(id_base),
            drive: SimMotor::with_free_speed(id_base + 1, drive_free_speed),
            encoder: SimAbsoluteEncoder::new(id_base + 2, absolute_degrees),
        }
    }

    /// The trait-object bundle the drivetrain consumes. Handles held on
    /// `self` keep watching the same state.
    pub fn io(&self) -> ModuleIo {
        ModuleIo {
            steer: Box::new(self.steer.clone()),
            drive: Box::new(self.drive.clone()),
            encoder: Box::new(self.encoder.clone()),
        }
    }

    /// Advance both axes.
    pub fn step(&self, dt: f64) {
        self.steer.step(dt);
        self.drive.step(dt);
    }
}

fn slot_index(slot: GainSlot) -> usize {
    match slot {
        GainSlot::Slot0 => 0,
        GainSlot::Slot1 => 1,
    }
}
