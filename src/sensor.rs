//! # Sensor Acquisition
//!
//! Polls the meter peripheral through the [`MeterSource`] trait and turns raw
//! readings into [`SensorSample`]s. A reading with any non-numeric field (NaN or
//! infinity, which is what most meter drivers report on a failed bus transaction)
//! is rejected here so nothing downstream ever sees it.
//!
//! Failures are never fatal: the control loop logs them, shows the error overlay
//! and tries again on its next sampling tick, indefinitely.

use crate::{ErrorKind, SensorSample};
use chrono::{DateTime, Utc};
use std::io;
use thiserror::Error;

/// Errors that can occur while polling the meter.
#[derive(Error, Debug)]
pub enum SensorReadError {
    /// A field came back as NaN or infinite
    #[error("invalid {field} reading: {value}")]
    InvalidField { field: &'static str, value: f32 },

    /// The port could not be read or written (includes read timeouts)
    #[error("meter IO: {0}")]
    Io(#[from] io::Error),

    /// The response frame was damaged or not what was asked for
    #[error("malformed meter frame: {0}")]
    Frame(String),

    /// The meter answered with a Modbus exception code
    #[error("meter exception code {0:#04x}")]
    Exception(u8),
}

impl SensorReadError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::SensorRead
    }
}

/// One unvalidated reading, exactly as the peripheral reported it.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RawReading {
    pub voltage: f32,
    pub current: f32,
    pub power: f32,
    pub energy: f32,
    pub frequency: f32,
    pub power_factor: f32,
}

/// A meter peripheral that can be polled for one reading at a time.
///
/// Implementations block for at most their own driver timeout.
pub trait MeterSource {
    fn poll(&mut self) -> Result<RawReading, SensorReadError>;
}

impl<M: MeterSource + ?Sized> MeterSource for Box<M> {
    fn poll(&mut self) -> Result<RawReading, SensorReadError> {
        (**self).poll()
    }
}

/// Validate a raw reading and stamp it with `timestamp`.
pub fn validate(raw: RawReading, timestamp: DateTime<Utc>) -> Result<SensorSample, SensorReadError> {
    let fields = [
        ("voltage", raw.voltage),
        ("current", raw.current),
        ("power", raw.power),
        ("energy", raw.energy),
        ("frequency", raw.frequency),
        ("power_factor", raw.power_factor),
    ];
    if let Some(&(field, value)) = fields.iter().find(|(_, value)| !value.is_finite()) {
        return Err(SensorReadError::InvalidField { field, value });
    }

    Ok(SensorSample {
        timestamp,
        voltage: raw.voltage,
        current: raw.current,
        power: raw.power,
        energy: raw.energy,
        frequency: raw.frequency,
        power_factor: raw.power_factor,
    })
}

/// Front end of the meter: one `read()` per sampling tick.
pub struct SensorAcquisition {
    meter: Box<dyn MeterSource>,
}

impl SensorAcquisition {
    pub fn new(meter: Box<dyn MeterSource>) -> Self {
        Self { meter }
    }

    /// Poll the meter once and validate the result.
    pub fn read(&mut self) -> Result<SensorSample, SensorReadError> {
        let raw = self.meter.poll()?;
        validate(raw, Utc::now())
    }
}
