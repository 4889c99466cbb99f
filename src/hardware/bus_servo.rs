// Serial bus servo protocol
//
// Half-duplex packet protocol in the Dynamixel 1.0 family:
// [0xFF, 0xFF, ID, Length, Instruction, Params..., Checksum]
// One bus daisy-chains every steering and drive servo of the drivetrain.

use serialport::{self, SerialPort};
use std::io::{Read, Write};
use std::time::Duration;
use tracing::debug;

use super::{HardwareError, Result};

/// Default serial configuration for the servo bus.
pub const DEFAULT_BAUDRATE: u32 = 1_000_000;
pub const DEFAULT_TIMEOUT_MS: u64 = 100;

/// Encoder resolution: one output turn spans this many steps.
pub const STEPS_PER_REVOLUTION: f64 = 4096.0;

/// Full-scale PWM duty command.
pub const MAX_DUTY: i16 = 1000;

/// Packet header bytes
const HEADER: [u8; 2] = [0xFF, 0xFF];

/// Instruction set
#[repr(u8)]
#[derive(Debug, Clone, Copy)]
pub enum Instruction {
    Ping = 0x01,
    Read = 0x02,
    Write = 0x03,
    RegWrite = 0x04,
    Action = 0x05,
    SyncWrite = 0x83,
}

/// Register map
#[repr(u8)]
#[derive(Debug, Clone, Copy)]
pub enum Register {
    // EEPROM area (persists across power cycles)
    ModelNumber = 3, // 2 bytes, read-only
    Id = 5,          // 1 byte
    BaudRate = 6,    // 1 byte
    GainP = 21,      // 1 byte, position loop P
    GainD = 22,      // 1 byte, position loop D
    GainI = 23,      // 1 byte, position loop I

    // RAM area (volatile)
    OperatingMode = 33,    // 1 byte: 0=position, 1=velocity, 2=PWM, 3=step
    TorqueEnable = 40,     // 1 byte: 0=off, 1=on
    GoalPosition = 42,     // 2 bytes; step delta (sign-magnitude) in step mode
    GoalTime = 44,         // 2 bytes; PWM duty (sign-magnitude, +-1000) in PWM mode
    GoalVelocity = 46,     // 2 bytes, sign-magnitude, steps/s
    TorqueLimit = 48,      // 2 bytes, permille of stall torque
    Lock = 55,             // 1 byte: 0=unlocked, 1=locked
    PresentPosition = 56,  // 2 bytes, read-only, steps within the turn
    PresentVelocity = 58,  // 2 bytes, read-only, sign-magnitude steps/s
    PresentLoad = 60,      // 2 bytes, read-only
    PresentVoltage = 62,   // 1 byte, read-only, 0.1 V
    PresentTemperature = 63, // 1 byte, read-only, degrees C
    PresentTurnCount = 67, // 2 bytes, read-only, signed (two's complement) turns
}

/// Operating modes
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OperatingMode {
    Position = 0,
    Velocity = 1,
    Pwm = 2,
    Step = 3,
}

/// Servo bus master. Owns the serial port; all device traffic goes
/// through one of these.
pub struct ServoBus {
    port: Box<dyn SerialPort>,
}

impl ServoBus {
    /// Open the bus at the default baudrate.
    pub fn open(port_name: &str) -> Result<Self> {
        Self::open_with_baudrate(port_name, DEFAULT_BAUDRATE)
    }

    /// Open with a custom baudrate.
    pub fn open_with_baudrate(port_name: &str, baudrate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baudrate)
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .open()?;

        Ok(Self { port })
    }

    /// Checksum over everything after the header: ones' complement of the
    /// byte sum, truncated to 8 bits.
    fn checksum(data: &[u8]) -> u8 {
        let sum: u16 = data.iter().map(|&b| b as u16).sum();
        (!sum & 0xFF) as u8
    }

    fn build_packet(id: u8, instruction: Instruction, params: &[u8]) -> Vec<u8> {
        let length = (params.len() + 2) as u8; // instruction + checksum
        let mut packet = Vec::with_capacity(6 + params.len());

        packet.extend_from_slice(&HEADER);
        packet.push(id);
        packet.push(length);
        packet.push(instruction as u8);
        packet.extend_from_slice(params);
        packet.push(Self::checksum(&packet[2..]));

        packet
    }

    fn send_packet(&mut self, packet: &[u8]) -> Result<()> {
        self.port.write_all(packet)?;
        self.port.flush()?;
        Ok(())
    }

    /// Read one status packet, verifying header, id, checksum and the
    /// device's own error byte.
    fn read_response(&mut self, expected_id: u8) -> Result<Vec<u8>> {
        let mut header = [0u8; 2];
        self.port.read_exact(&mut header).map_err(|e| {
            if e.kind() == std::io::ErrorKind::TimedOut {
                HardwareError::Timeout { id: expected_id }
            } else {
                HardwareError::Io(e)
            }
        })?;

        if header != HEADER {
            return Err(HardwareError::InvalidResponse {
                id: expected_id,
                reason: format!("bad header: {:02X?}", header),
            });
        }

        let mut id_length = [0u8; 2];
        self.port.read_exact(&mut id_length)?;
        let id = id_length[0];
        let length = id_length[1] as usize;

        if id != expected_id {
            return Err(HardwareError::InvalidResponse {
                id: expected_id,
                reason: format!("id mismatch: expected {expected_id}, got {id}"),
            });
        }

        // Shortest legal status packet is error byte + checksum
        if length < 2 {
            return Err(HardwareError::InvalidResponse {
                id: expected_id,
                reason: format!("implausible length {length}"),
            });
        }

        // status byte + params + checksum
        let mut body = vec![0u8; length];
        self.port.read_exact(&mut body)?;

        let mut checked = vec![id, length as u8];
        checked.extend_from_slice(&body[..body.len() - 1]);
        if Self::checksum(&checked) != body[body.len() - 1] {
            return Err(HardwareError::ChecksumMismatch { id });
        }

        let status = body[0];
        if status != 0 {
            return Err(HardwareError::DeviceFault { id, status });
        }

        Ok(body[1..body.len() - 1].to_vec())
    }

    /// Ping a device. Ok(false) means it stayed silent.
    pub fn ping(&mut self, id: u8) -> Result<bool> {
        let packet = Self::build_packet(id, Instruction::Ping, &[]);
        self.send_packet(&packet)?;

        match self.read_response(id) {
            Ok(_) => Ok(true),
            Err(HardwareError::Timeout { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn write_u8(&mut self, id: u8, register: Register, value: u8) -> Result<()> {
        let params = [register as u8, value];
        let packet = Self::build_packet(id, Instruction::Write, &params);
        debug!("write u8 to {}: reg={:?}, value={}", id, register, value);
        self.send_packet(&packet)?;
        let _ = self.read_response(id)?;
        Ok(())
    }

    /// Write two bytes, little-endian.
    pub fn write_u16(&mut self, id: u8, register: Register, value: u16) -> Result<()> {
        let params = [register as u8, (value & 0xFF) as u8, (value >> 8) as u8];
        let packet = Self::build_packet(id, Instruction::Write, &params);
        debug!("write u16 to {}: reg={:?}, value={}", id, register, value);
        self.send_packet(&packet)?;
        let _ = self.read_response(id)?;
        Ok(())
    }

    /// Write a signed 16-bit value in the bus's sign-magnitude encoding
    /// (bit 15 = direction, bits 0-14 = magnitude).
    pub fn write_i16(&mut self, id: u8, register: Register, value: i16) -> Result<()> {
        self.write_u16(id, register, encode_sign_magnitude(value))
    }

    pub fn read_u8(&mut self, id: u8, register: Register) -> Result<u8> {
        let params = [register as u8, 1];
        let packet = Self::build_packet(id, Instruction::Read, &params);
        self.send_packet(&packet)?;

        let response = self.read_response(id)?;
        match response.first() {
            Some(&byte) => Ok(byte),
            None => Err(HardwareError::InvalidResponse {
                id,
                reason: "empty response".to_string(),
            }),
        }
    }

    /// Read two bytes, little-endian.
    pub fn read_u16(&mut self, id: u8, register: Register) -> Result<u16> {
        let params = [register as u8, 2];
        let packet = Self::build_packet(id, Instruction::Read, &params);
        self.send_packet(&packet)?;

        let response = self.read_response(id)?;
        if response.len() < 2 {
            return Err(HardwareError::InvalidResponse {
                id,
                reason: format!("expected 2 bytes, got {}", response.len()),
            });
        }
        Ok(u16::from_le_bytes([response[0], response[1]]))
    }

    /// Read a sign-magnitude encoded 16-bit value.
    pub fn read_i16(&mut self, id: u8, register: Register) -> Result<i16> {
        Ok(decode_sign_magnitude(self.read_u16(id, register)?))
    }

    /// Sync write: same register on many devices in one packet.
    /// data: [(id, value), ...]
    pub fn sync_write_u16(&mut self, register: Register, data: &[(u8, u16)]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        // [start_addr, bytes_per_device, id1, lo1, hi1, id2, lo2, hi2, ...]
        let mut params = vec![register as u8, 2];
        for &(id, value) in data {
            params.push(id);
            params.push((value & 0xFF) as u8);
            params.push((value >> 8) as u8);
        }

        // Broadcast id; sync write gets no status packet back
        let packet = Self::build_packet(0xFE, Instruction::SyncWrite, &params);
        debug!("sync write to {} devices: reg={:?}", data.len(), register);
        self.send_packet(&packet)
    }

    pub fn sync_write_i16(&mut self, register: Register, data: &[(u8, i16)]) -> Result<()> {
        let encoded: Vec<(u8, u16)> = data
            .iter()
            .map(|&(id, val)| (id, encode_sign_magnitude(val)))
            .collect();
        self.sync_write_u16(register, &encoded)
    }

    // === High-level operations ===

    pub fn enable_torque(&mut self, id: u8) -> Result<()> {
        self.write_u8(id, Register::TorqueEnable, 1)?;
        self.write_u8(id, Register::Lock, 1)
    }

    pub fn disable_torque(&mut self, id: u8) -> Result<()> {
        self.write_u8(id, Register::TorqueEnable, 0)?;
        self.write_u8(id, Register::Lock, 0)
    }

    /// Switch operating mode. Torque must be off while the mode changes.
    pub fn set_operating_mode(&mut self, id: u8, mode: OperatingMode) -> Result<()> {
        self.write_u8(id, Register::OperatingMode, mode as u8)
    }

    /// Position loop gains, raw register units.
    pub fn set_gains(&mut self, id: u8, p: u8, i: u8, d: u8) -> Result<()> {
        self.write_u8(id, Register::GainP, p)?;
        self.write_u8(id, Register::GainI, i)?;
        self.write_u8(id, Register::GainD, d)
    }

    /// Torque ceiling in permille of stall torque.
    pub fn set_torque_limit(&mut self, id: u8, permille: u16) -> Result<()> {
        self.write_u16(id, Register::TorqueLimit, permille.min(1000))
    }

    /// Goal velocity in steps/s (velocity mode).
    pub fn set_velocity(&mut self, id: u8, steps_per_s: i16) -> Result<()> {
        self.write_i16(id, Register::GoalVelocity, steps_per_s)
    }

    /// Absolute goal position within the turn (position mode).
    pub fn set_position_steps(&mut self, id: u8, steps: u16) -> Result<()> {
        self.write_u16(id, Register::GoalPosition, steps)
    }

    /// Relative move by a signed step count (step mode).
    pub fn step_by(&mut self, id: u8, delta_steps: i16) -> Result<()> {
        self.write_i16(id, Register::GoalPosition, delta_steps)
    }

    /// PWM duty in [-1000, 1000] (PWM mode).
    pub fn set_duty(&mut self, id: u8, duty: i16) -> Result<()> {
        self.write_i16(id, Register::GoalTime, duty.clamp(-MAX_DUTY, MAX_DUTY))
    }

    /// Present velocity in steps/s.
    pub fn get_velocity(&mut self, id: u8) -> Result<i16> {
        self.read_i16(id, Register::PresentVelocity)
    }

    /// Present position within the turn, 0..4095 steps.
    pub fn get_position_steps(&mut self, id: u8) -> Result<u16> {
        self.read_u16(id, Register::PresentPosition)
    }

    /// Signed completed-turn counter. Two's complement, unlike velocity.
    pub fn get_turn_count(&mut self, id: u8) -> Result<i16> {
        Ok(self.read_u16(id, Register::PresentTurnCount)? as i16)
    }

    /// Continuous position in steps: turns * 4096 + steps within the turn.
    ///
    /// The two registers cannot be read atomically, so re-read when the
    /// turn counter moved underneath us.
    pub fn get_continuous_steps(&mut self, id: u8) -> Result<i64> {
        let mut turns = self.get_turn_count(id)?;
        let mut steps = self.get_position_steps(id)?;

        let check = self.get_turn_count(id)?;
        if check != turns {
            turns = check;
            steps = self.get_position_steps(id)?;
        }

        Ok(turns as i64 * STEPS_PER_REVOLUTION as i64 + steps as i64)
    }
}

/// Encode to sign-magnitude: bit 15 = sign (1 = negative), bits 0-14 = magnitude.
fn encode_sign_magnitude(value: i16) -> u16 {
    if value >= 0 {
        value as u16
    } else {
        (0x8000 | (-value as u16)) & 0xFFFF
    }
}

/// Decode sign-magnitude back to a signed value.
fn decode_sign_magnitude(raw: u16) -> i16 {
    let magnitude = (raw & 0x7FFF) as i16;
    if raw & 0x8000 != 0 { -magnitude } else { magnitude }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum() {
        // ID=1, Length=4, Instruction=WRITE, Addr=30, Data=0, 2
        let data = [1u8, 4, 0x03, 30, 0, 2];
        // ~(1+4+3+30+0+2) = ~40 = 215
        assert_eq!(ServoBus::checksum(&data), 215);
    }

    #[test]
    fn test_sign_magnitude_encoding() {
        assert_eq!(encode_sign_magnitude(0), 0);
        assert_eq!(encode_sign_magnitude(100), 100);
        assert_eq!(encode_sign_magnitude(-100), 0x8064);
        assert_eq!(encode_sign_magnitude(-1), 0x8001);

        assert_eq!(decode_sign_magnitude(0), 0);
        assert_eq!(decode_sign_magnitude(100), 100);
        assert_eq!(decode_sign_magnitude(0x8064), -100);
        assert_eq!(decode_sign_magnitude(0x8001), -1);
    }

    #[test]
    fn test_sign_magnitude_round_trip() {
        for value in [-30000, -4096, -1, 0, 1, 4096, 30000] {
            assert_eq!(decode_sign_magnitude(encode_sign_magnitude(value)), value);
        }
    }

    #[test]
    fn test_build_ping_packet() {
        let packet = ServoBus::build_packet(1, Instruction::Ping, &[]);
        // Header (2) + ID (1) + Length (1) + Instruction (1) + Checksum (1)
        assert_eq!(packet.len(), 6);
        assert_eq!(packet[0], 0xFF);
        assert_eq!(packet[1], 0xFF);
        assert_eq!(packet[2], 1); // ID
        assert_eq!(packet[3], 2); // Length (instruction + checksum)
        assert_eq!(packet[4], 0x01); // PING
    }

    #[test]
    fn test_build_write_packet_checksum() {
        let packet = ServoBus::build_packet(4, Instruction::Write, &[42, 0x10, 0x00]);
        let body = &packet[2..packet.len() - 1];
        assert_eq!(*packet.last().unwrap(), ServoBus::checksum(body));
        assert_eq!(packet[3] as usize, 3 + 2); // params + instruction + checksum
    }

    #[test]
    fn test_sync_write_layout() {
        // [addr, len, id, lo, hi] * n inside a broadcast packet
        let packet = ServoBus::build_packet(
            0xFE,
            Instruction::SyncWrite,
            &[Register::GoalVelocity as u8, 2, 7, 0x64, 0x00, 9, 0x64, 0x80],
        );
        assert_eq!(packet[2], 0xFE);
        assert_eq!(packet[4], 0x83);
        assert_eq!(packet[5], 46); // start address
        assert_eq!(packet[6], 2); // bytes per device
    }

    #[test]
    fn test_turn_count_is_twos_complement() {
        assert_eq!(0xFFFFu16 as i16, -1);
        assert_eq!(0x8000u16 as i16, i16::MIN);
        assert_eq!(0x0FFFu16 as i16, 4095);
    }
}
