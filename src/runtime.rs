// 50 Hz control loop with watchdog
//
// If teleop crashes and stops sending commands, the watchdog zeroes the
// chassis velocity within CMD_TIMEOUT instead of letting the last command
// run forever.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::config::{
    CMD_TIMEOUT, DRIVE_ENABLED, LOOP_HZ, OPEN_LOOP_TELEOP, SERVO_IDS, SERVO_PORT,
    TOPIC_CMD_CHASSIS, TOPIC_HEALTH, TOPIC_RT_DRIVE, drive_config,
};
use crate::hardware::bus_servo::ServoBus;
use crate::hardware::{ModuleIo, ServoModuleIo, SharedBus, SimModuleIo};
use crate::messages::{ChassisCommand, DriveTelemetry, RuntimeHealth};
use crate::swerve::{ChassisSpeeds, SwerveDrive};
use crate::swerve::config::DriveConfig;

type AnyError = Box<dyn std::error::Error + Send + Sync>;

pub struct Runtime {
    latest_cmd: Option<ChassisCommand>,
    cmd_received_at: Instant,
    health: RuntimeHealth,
}

impl Runtime {
    pub fn new() -> Self {
        Self {
            latest_cmd: None,
            cmd_received_at: Instant::now(),
            health: RuntimeHealth::CmdStale, // Start stale until first cmd
        }
    }

    /// Process incoming command
    fn on_command(&mut self, cmd: ChassisCommand) {
        debug!("Received command: {:?}", &cmd);
        self.latest_cmd = Some(cmd);
        self.cmd_received_at = Instant::now();
    }

    /// Chassis velocity for this cycle, with the watchdog applied
    fn compute_speeds(&mut self) -> ChassisSpeeds {
        let cmd_age = self.cmd_received_at.elapsed();

        if cmd_age > CMD_TIMEOUT {
            // Watchdog triggered - stop the robot
            if self.health != RuntimeHealth::CmdStale {
                warn!("Command stale ({:?} old), stopping drivetrain", cmd_age);
            }
            self.health = RuntimeHealth::CmdStale;
            ChassisSpeeds::zero()
        } else if let Some(ref cmd) = self.latest_cmd {
            self.health = RuntimeHealth::Ok;
            ChassisSpeeds::from(cmd)
        } else {
            // No command ever received
            self.health = RuntimeHealth::CmdStale;
            ChassisSpeeds::zero()
        }
    }
}

/// Connect the four modules over the servo bus.
fn servo_io(config: &DriveConfig) -> Result<[ModuleIo; 4], AnyError> {
    info!("Opening servo bus on {}", SERVO_PORT);
    let bus: SharedBus = Arc::new(Mutex::new(ServoBus::open(SERVO_PORT)?));

    let [fl, fr, bl, br] = SERVO_IDS;
    Ok([
        ServoModuleIo::connect(&bus, fl, &config.modules[0])?,
        ServoModuleIo::connect(&bus, fr, &config.modules[1])?,
        ServoModuleIo::connect(&bus, bl, &config.modules[2])?,
        ServoModuleIo::connect(&bus, br, &config.modules[3])?,
    ])
}

/// Simulated modules with the absolute encoders reading their stored
/// offsets, so calibration seeds every wheel to straight ahead.
fn simulated_io(config: &DriveConfig) -> [ModuleIo; 4] {
    info!("Drive hardware disabled, using simulated modules");
    [0usize, 1, 2, 3].map(|i| {
        SimModuleIo::new(
            (10 * (i + 1)) as u8,
            config.modules[i].offset.absolute_at_zero,
            config.max_speed,
        )
        .io()
    })
}

pub async fn run() -> Result<(), AnyError> {
    let config = drive_config();

    let io = if DRIVE_ENABLED {
        servo_io(&config)?
    } else {
        simulated_io(&config)
    };
    let mut drive = SwerveDrive::new(&config, io)?;

    let seeded = drive.calibrate();
    if seeded < 4 {
        warn!("{}/4 modules seeded from absolute encoders, rest on relative fallback", seeded);
    }
    info!("Waiting {:?} for steering to settle", config.calibration_settle);
    tokio::time::sleep(config.calibration_settle).await;

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let subscriber = session.declare_subscriber(TOPIC_CMD_CHASSIS).await?;
    let pub_telemetry = session.declare_publisher(TOPIC_RT_DRIVE).await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;

    let mut runtime = Runtime::new();
    let mut tick = interval(Duration::from_millis(1000 / LOOP_HZ));

    info!(
        "Runtime started: {}Hz loop, {}ms watchdog timeout",
        LOOP_HZ,
        CMD_TIMEOUT.as_millis()
    );
    info!("Subscribed to: {}", TOPIC_CMD_CHASSIS);
    info!("Publishing to: {}, {}", TOPIC_RT_DRIVE, TOPIC_HEALTH);

    loop {
        tick.tick().await;

        // 1. Drain all pending commands (non-blocking), keep latest
        while let Ok(Some(sample)) = subscriber.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<ChassisCommand>(&payload) {
                Ok(cmd) => {
                    runtime.on_command(cmd);
                }
                Err(e) => {
                    warn!("Failed to parse command: {}", e);
                }
            }
        }

        // 2. Watchdog, then one drivetrain cycle
        let speeds = runtime.compute_speeds();
        drive.drive(speeds, OPEN_LOOP_TELEOP);

        // 3. Publish telemetry
        let states = drive.states();
        let telemetry = DriveTelemetry {
            states,
            positions: drive.positions(),
            estimated_speeds: drive.estimate_chassis_speeds(&states),
        };
        pub_telemetry.put(serde_json::to_string(&telemetry)?).await?;

        // 4. Publish health
        pub_health.put(serde_json::to_string(&runtime.health)?).await?;
    }
}
