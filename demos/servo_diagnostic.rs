// Servo diagnostic: READ-ONLY test to verify drivetrain wiring
//
// This tool does NOT write anything to the servos - it's completely safe.
// Use this first before running module_test.
//
// Usage: cargo run --example servo_diagnostic -- [port]

use clap::Parser;
use std::io::{self, Write};

use swerve_zenoh_runtime::config::{SERVO_IDS, SERVO_PORT};
use swerve_zenoh_runtime::hardware::bus_servo::{Register, ServoBus, STEPS_PER_REVOLUTION};

const CORNERS: [&str; 4] = ["FL", "FR", "BL", "BR"];

/// Read-only scan of every drivetrain servo and encoder.
#[derive(Parser)]
#[command(name = "servo_diagnostic")]
struct Args {
    /// Serial port for the servo bus
    #[arg(default_value = SERVO_PORT)]
    port: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Setup logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║          Swerve Servo Diagnostic (READ-ONLY)                 ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  This tool only READS from servos - no writes, no movement   ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
    println!("Serial port: {}", args.port);
    println!();

    // Try to open serial port
    println!("Step 1: Opening serial port...");
    let mut bus = match ServoBus::open(&args.port) {
        Ok(bus) => {
            println!("  ✓ Serial port opened successfully");
            bus
        }
        Err(e) => {
            println!("  ✗ Failed to open serial port: {}", e);
            println!();
            println!("Troubleshooting:");
            println!("  - Check the port path is correct");
            println!("  - Verify the USB cable is connected");
            println!("  - Check the user has permission on the device node");
            return Err(e.into());
        }
    };
    println!();

    // Ping every device, corner by corner
    println!("Step 2: Pinging devices...");
    let mut all_found = true;
    for (corner, ids) in CORNERS.iter().zip(SERVO_IDS) {
        for (role, id) in [
            ("steer", ids.steer),
            ("drive", ids.drive),
            ("encoder", ids.encoder),
        ] {
            print!("  {} {} (ID {}): ", corner, role, id);
            io::stdout().flush()?;

            match bus.ping(id) {
                Ok(true) => println!("✓ RESPONDING"),
                Ok(false) => {
                    println!("✗ NO RESPONSE");
                    all_found = false;
                }
                Err(e) => {
                    println!("✗ ERROR: {}", e);
                    all_found = false;
                }
            }
        }
    }
    println!();

    if !all_found {
        println!("⚠ WARNING: Not all devices responded!");
        println!("  - Check servo power supply");
        println!("  - Verify the bus ids match the wiring plan");
        println!("  - Check daisy-chain connections between corners");
        println!();
        print!("Continue reading available devices? [y/N]: ");
        io::stdout().flush()?;
        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Aborted.");
            return Ok(());
        }
        println!();
    }

    // Read registers from each corner
    println!("Step 3: Reading registers...");
    println!();

    for (corner, ids) in CORNERS.iter().zip(SERVO_IDS) {
        println!("  === Module {} ===", corner);
        print_servo(&mut bus, "steer", ids.steer);
        print_servo(&mut bus, "drive", ids.drive);

        // The encoder is position-only; everything else is noise
        match bus.get_position_steps(ids.encoder) {
            Ok(steps) => {
                let degrees = steps as f64 * 360.0 / STEPS_PER_REVOLUTION;
                println!("    encoder (ID {}): {} steps ({:.1}°)", ids.encoder, steps, degrees);
            }
            Err(e) => println!("    encoder (ID {}): ERROR - {}", ids.encoder, e),
        }
        println!();
    }

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                    Diagnostic Complete                       ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
    println!("If all devices responded and show reasonable values:");
    println!("  1. Servos show Operating Mode 0 (Position) or 1 (Velocity) from the last run");
    println!("  2. Present Velocity should be ~0 while the robot is stationary");
    println!("  3. Encoder angles should change when you turn a wheel by hand");
    println!();
    println!("Next step: run 'cargo run --example module_test' with the robot ON BLOCKS");

    Ok(())
}

fn print_servo(bus: &mut ServoBus, role: &str, id: u8) {
    println!("    {} servo (ID {}):", role, id);

    match bus.read_u8(id, Register::OperatingMode) {
        Ok(mode) => {
            let mode_str = match mode {
                0 => "Position",
                1 => "Velocity",
                2 => "PWM",
                3 => "Step",
                _ => "Unknown",
            };
            println!("      Operating Mode:   {} ({})", mode, mode_str);
        }
        Err(e) => println!("      Operating Mode:   ERROR - {}", e),
    }

    match bus.read_u8(id, Register::TorqueEnable) {
        Ok(val) => {
            let status = if val == 1 { "ENABLED" } else { "disabled" };
            println!("      Torque Enable:    {} ({})", val, status);
        }
        Err(e) => println!("      Torque Enable:    ERROR - {}", e),
    }

    match bus.read_u16(id, Register::PresentPosition) {
        Ok(pos) => {
            let degrees = pos as f64 * 360.0 / STEPS_PER_REVOLUTION;
            println!("      Present Position: {} ({:.1}°)", pos, degrees);
        }
        Err(e) => println!("      Present Position: ERROR - {}", e),
    }

    match bus.get_velocity(id) {
        Ok(vel) => println!("      Present Velocity: {} (raw)", vel),
        Err(e) => println!("      Present Velocity: ERROR - {}", e),
    }

    match bus.get_turn_count(id) {
        Ok(turns) => println!("      Turn Count:       {}", turns),
        Err(e) => println!("      Turn Count:       ERROR - {}", e),
    }

    match bus.read_u8(id, Register::PresentVoltage) {
        Ok(raw) => println!("      Voltage:          {:.1} V", raw as f64 / 10.0),
        Err(e) => println!("      Voltage:          ERROR - {}", e),
    }

    match bus.read_u8(id, Register::PresentTemperature) {
        Ok(celsius) => println!("      Temperature:      {} °C", celsius),
        Err(e) => println!("      Temperature:      ERROR - {}", e),
    }
}
