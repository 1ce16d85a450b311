//! # Telemetry Envelope
//!
//! The JSON body accepted by the ingestion endpoint. Precision is part of the
//! contract, so values are rounded when the envelope is built rather than left to
//! whatever the float formatter happens to print:
//!
//! | Field          | Type    | Decimals |
//! |----------------|---------|----------|
//! | `type`         | string  | -        |
//! | `voltage`      | number  | 2        |
//! | `current`      | number  | 3        |
//! | `power`        | number  | 2        |
//! | `energy`       | number  | 3        |
//! | `frequency`    | number  | 2        |
//! | `power_factor` | number  | 2        |
//! | `rssi`         | integer | -        |
//! | `heap`         | integer | -        |

use crate::{Category, TelemetryEvent};
use serde::{Deserialize, Serialize};

/// Wire form of a [`TelemetryEvent`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub category: Category,
    pub voltage: f64,
    pub current: f64,
    pub power: f64,
    pub energy: f64,
    pub frequency: f64,
    pub power_factor: f64,
    pub rssi: i32,
    pub heap: u64,
}

/// Round `value` to `places` decimal places.
pub fn round_to(value: f32, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (f64::from(value) * scale).round() / scale
}

impl From<&TelemetryEvent> for Envelope {
    fn from(event: &TelemetryEvent) -> Self {
        let sample = &event.sample;
        Envelope {
            category: event.category,
            voltage: round_to(sample.voltage, 2),
            current: round_to(sample.current, 3),
            power: round_to(sample.power, 2),
            energy: round_to(sample.energy, 3),
            frequency: round_to(sample.frequency, 2),
            power_factor: round_to(sample.power_factor, 2),
            rssi: event.diagnostics.rssi,
            heap: event.diagnostics.heap,
        }
    }
}

/// Serialize an event into the compact JSON request body.
pub fn encode(event: &TelemetryEvent) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&Envelope::from(event))
}
