//! # Simulated Meter
//!
//! A deterministic household load model used when no meter is attached
//! (development mode, demos and tests). Like a real single-point meter it only
//! sees the aggregate: a constant base load plus appliances that switch on and off
//! on fixed schedules, with small mains voltage and frequency ripple on top.
//!
//! ## Model Characteristics
//!
//! ### Loads
//! - **Base load**: 60 W of always-on devices
//! - **Refrigerator**: 120 W compressor, on for 4 of every 10 minutes
//! - **Kettle**: 1800 W resistive load, on for 3 minutes every half hour
//!
//! ### Mains
//! - **Voltage**: 230 V nominal with a ±2 V, 90 s ripple
//! - **Frequency**: 50 Hz nominal with a ±0.05 Hz, 40 s ripple
//!
//! All quantities are a pure function of the clock reading, so two meters driven
//! by clocks at the same instant report the same values. Energy is integrated
//! between polls.

use crate::clock::Clock;
use crate::sensor::{MeterSource, RawReading, SensorReadError};
use std::f64::consts::TAU;
use std::time::Duration;

const BASE_LOAD_W: f64 = 60.0;
const FRIDGE_W: f64 = 120.0;
const FRIDGE_PERIOD_S: f64 = 600.0;
const FRIDGE_ON_S: f64 = 240.0;
const KETTLE_W: f64 = 1800.0;
const KETTLE_PERIOD_S: f64 = 1800.0;
const KETTLE_START_S: f64 = 900.0;
const KETTLE_ON_S: f64 = 180.0;

const NOMINAL_VOLTAGE: f64 = 230.0;
const NOMINAL_FREQUENCY: f64 = 50.0;

/// Meter whose readings are synthesised from the clock.
pub struct SimulatedMeter<C: Clock> {
    clock: C,
    energy_kwh: f64,
    last_poll: Option<Duration>,
    polls: u64,
    fault_every: Option<u64>,
}

impl<C: Clock> SimulatedMeter<C> {
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            energy_kwh: 0.0,
            last_poll: None,
            polls: 0,
            fault_every: None,
        }
    }

    /// Report a NaN voltage on every `n`th poll, the way a meter with a loose
    /// bus connection does.
    pub fn with_fault_every(mut self, n: u64) -> Self {
        self.fault_every = (n > 0).then_some(n);
        self
    }
}

/// Active power in watts at `t` seconds.
pub fn load_at(t: f64) -> f64 {
    let fridge_on = t.rem_euclid(FRIDGE_PERIOD_S) < FRIDGE_ON_S;
    let kettle_phase = t.rem_euclid(KETTLE_PERIOD_S);
    let kettle_on = (KETTLE_START_S..KETTLE_START_S + KETTLE_ON_S).contains(&kettle_phase);

    let mut power = BASE_LOAD_W + 1.5 * (TAU * t / 7.0).sin();
    if fridge_on {
        power += FRIDGE_W;
    }
    if kettle_on {
        power += KETTLE_W;
    }
    power
}

/// Power factor at `t` seconds: the compressor drags it down, the kettle pulls it up.
fn power_factor_at(t: f64) -> f64 {
    let fridge_on = t.rem_euclid(FRIDGE_PERIOD_S) < FRIDGE_ON_S;
    let kettle_phase = t.rem_euclid(KETTLE_PERIOD_S);
    let kettle_on = (KETTLE_START_S..KETTLE_START_S + KETTLE_ON_S).contains(&kettle_phase);

    match (kettle_on, fridge_on) {
        (true, _) => 0.99,
        (false, true) => 0.82,
        (false, false) => 0.93,
    }
}

impl<C: Clock> MeterSource for SimulatedMeter<C> {
    fn poll(&mut self) -> Result<RawReading, SensorReadError> {
        let now = self.clock.now();
        let t = now.as_secs_f64();
        self.polls += 1;

        let power = load_at(t);
        if let Some(last) = self.last_poll {
            let hours = now.saturating_sub(last).as_secs_f64() / 3600.0;
            self.energy_kwh += power * hours / 1000.0;
        }
        self.last_poll = Some(now);

        let voltage = NOMINAL_VOLTAGE + 2.0 * (TAU * t / 90.0).sin();
        let frequency = NOMINAL_FREQUENCY + 0.05 * (TAU * t / 40.0).sin();
        let power_factor = power_factor_at(t);
        let current = power / (voltage * power_factor);

        let faulty = self.fault_every.is_some_and(|n| self.polls % n == 0);

        Ok(RawReading {
            voltage: if faulty { f32::NAN } else { voltage as f32 },
            current: current as f32,
            power: power as f32,
            energy: self.energy_kwh as f32,
            frequency: frequency as f32,
            power_factor: power_factor as f32,
        })
    }
}
