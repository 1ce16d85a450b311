//! # PZEM-004T Meter Driver
//!
//! Modbus-RTU codec and polling driver for PZEM-004T v3 style single-phase meters.
//! One poll is a single "read input registers" request for the ten measurement
//! registers starting at 0x0000:
//!
//! | Register | Quantity     | Resolution               |
//! |----------|--------------|--------------------------|
//! | 0x0000   | Voltage      | 0.1 V                    |
//! | 0x0001-2 | Current      | 0.001 A (low word first) |
//! | 0x0003-4 | Power        | 0.1 W (low word first)   |
//! | 0x0005-6 | Energy       | 1 Wh (low word first)    |
//! | 0x0007   | Frequency    | 0.1 Hz                   |
//! | 0x0008   | Power factor | 0.01                     |
//! | 0x0009   | Alarm        | ignored                  |
//!
//! The driver is generic over any [`MeterPort`]; with the `hardware` feature
//! [`open_serial`] opens a real serial device whose read timeout bounds each poll.
//! Pending input is dropped before every request, so a late reply to a timed-out
//! poll can never be read as the start of the next frame.

use crate::sensor::{MeterSource, RawReading, SensorReadError};
use std::io::{self, Read, Write};
use tracing::debug;

/// Modbus function code: read input registers
pub const READ_INPUT_REGISTERS: u8 = 0x04;
/// Measurement registers read per poll
pub const REGISTER_COUNT: u16 = 10;
/// Address every PZEM answers to when it is alone on the bus
pub const GENERAL_ADDRESS: u8 = 0xF8;

/// CRC-16/MODBUS (poly 0xA001 reflected, init 0xFFFF).
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Build the read request for `address`; the CRC goes low byte first.
pub fn encode_read_request(address: u8) -> [u8; 8] {
    let [count_hi, count_lo] = REGISTER_COUNT.to_be_bytes();
    let mut frame = [address, READ_INPUT_REGISTERS, 0x00, 0x00, count_hi, count_lo, 0, 0];
    let [crc_lo, crc_hi] = crc16(&frame[..6]).to_le_bytes();
    frame[6] = crc_lo;
    frame[7] = crc_hi;
    frame
}

fn check_crc(frame: &[u8]) -> Result<(), SensorReadError> {
    let (body, tail) = frame.split_at(frame.len() - 2);
    let received = u16::from_le_bytes([tail[0], tail[1]]);
    let computed = crc16(body);
    if received != computed {
        return Err(SensorReadError::Frame(format!(
            "crc mismatch: received {received:#06x}, computed {computed:#06x}"
        )));
    }
    Ok(())
}

/// Decode a complete response frame from `address` into a raw reading.
pub fn decode_response(address: u8, frame: &[u8]) -> Result<RawReading, SensorReadError> {
    if frame.len() < 5 {
        return Err(SensorReadError::Frame(format!("short frame: {} bytes", frame.len())));
    }
    check_crc(frame)?;

    if frame[0] != address && address != GENERAL_ADDRESS {
        return Err(SensorReadError::Frame(format!(
            "answer from {:#04x}, expected {address:#04x}",
            frame[0]
        )));
    }
    if frame[1] == READ_INPUT_REGISTERS | 0x80 {
        return Err(SensorReadError::Exception(frame[2]));
    }
    if frame[1] != READ_INPUT_REGISTERS {
        return Err(SensorReadError::Frame(format!("unexpected function {:#04x}", frame[1])));
    }

    let byte_count = frame[2] as usize;
    let expected = REGISTER_COUNT as usize * 2;
    if byte_count != expected || frame.len() != 3 + byte_count + 2 {
        return Err(SensorReadError::Frame(format!(
            "expected {expected} data bytes, got {byte_count}"
        )));
    }

    let registers: Vec<u16> = frame[3..3 + byte_count]
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();
    let wide = |low: usize| ((registers[low + 1] as u32) << 16) | registers[low] as u32;

    Ok(RawReading {
        voltage: registers[0] as f32 / 10.0,
        current: wide(1) as f32 / 1000.0,
        power: wide(3) as f32 / 10.0,
        energy: wide(5) as f32 / 1000.0,
        frequency: registers[7] as f32 / 10.0,
        power_factor: registers[8] as f32 / 100.0,
    })
}

/// Byte-oriented port the meter is polled over.
pub trait MeterPort: Read + Write {
    /// Drop whatever has been received but not read yet.
    fn discard_input(&mut self) -> io::Result<()>;
}

#[cfg(feature = "hardware")]
impl MeterPort for Box<dyn serialport::SerialPort> {
    fn discard_input(&mut self) -> io::Result<()> {
        self.clear(serialport::ClearBuffer::Input)
            .map_err(|e| io::Error::other(e.to_string()))
    }
}

/// Polling driver over a byte-oriented port.
pub struct PzemMeter<P> {
    port: P,
    address: u8,
}

impl<P: MeterPort> PzemMeter<P> {
    pub fn new(port: P, address: u8) -> Self {
        Self { port, address }
    }

    fn read_frame(&mut self) -> Result<Vec<u8>, SensorReadError> {
        // Address, function, then either a byte count or an exception code
        let mut frame = vec![0u8; 3];
        self.port.read_exact(&mut frame)?;

        let remaining = if frame[1] & 0x80 != 0 {
            2
        } else {
            frame[2] as usize + 2
        };
        let start = frame.len();
        frame.resize(start + remaining, 0);
        self.port.read_exact(&mut frame[start..])?;
        Ok(frame)
    }
}

impl<P: MeterPort> MeterSource for PzemMeter<P> {
    fn poll(&mut self) -> Result<RawReading, SensorReadError> {
        let request = encode_read_request(self.address);
        self.port.discard_input()?;
        self.port.write_all(&request)?;
        self.port.flush()?;

        let frame = self.read_frame()?;
        debug!(bytes = frame.len(), "meter frame received");
        decode_response(self.address, &frame)
    }
}

/// Open the configured serial port with its read timeout.
#[cfg(feature = "hardware")]
pub fn open_serial(
    config: &crate::config::MeterConfig,
) -> Result<PzemMeter<Box<dyn serialport::SerialPort>>, SensorReadError> {
    let port = serialport::new(config.port.as_str(), config.baud_rate)
        .timeout(std::time::Duration::from_millis(config.timeout_ms))
        .open()
        .map_err(|e| SensorReadError::Io(std::io::Error::other(e.to_string())))?;
    tracing::info!(port = %config.port, baud = config.baud_rate, "meter port opened");
    Ok(PzemMeter::new(port, config.address))
}
