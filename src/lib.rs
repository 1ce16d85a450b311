//! # NILM Edge Agent Core Library
//!
//! This library provides the data model and every component of the edge telemetry
//! agent: meter acquisition, power-change detection, the rotating status display and
//! the resilient transmission client. It is designed for small single-board targets
//! where one cooperative control loop owns all state.
//!
//! ## Design Philosophy
//!
//! ### Single Owner
//! - **No shared state**: counters, connectivity and the latest sample live in one
//!   [`DeviceState`] value owned by the control loop and passed explicitly to each
//!   component
//! - **No locking**: there is exactly one writer at a time by construction
//! - **Deterministic tests**: every cadence runs on a [`clock::Clock`], so tests drive
//!   time by hand instead of waiting
//!
//! ### Data Flow
//! 1. **Acquire**: poll the meter, reject readings with non-numeric fields
//! 2. **Detect**: compare the new power value against the previous one
//! 3. **Transmit**: events and periodic heartbeats share one delivery path
//! 4. **Display**: a fixed five-view cycle on its own cadence, with an error overlay
//!
//! ## Core Types
//!
//! - [`SensorSample`]: one validated meter reading
//! - [`TelemetryEvent`]: a sample tagged for delivery, plus device diagnostics
//! - [`Counters`]: process-lifetime delivery statistics
//! - [`ConnectivityState`]: link status as last observed by the transmission client

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Module declarations
pub mod agent;
pub mod clock;
pub mod config;
pub mod detector;
pub mod diagnostics;
pub mod display;
pub mod link;
pub mod payload;
pub mod pzem;
pub mod sensor;
pub mod simulated;
pub mod transmit;

#[cfg(test)]
mod tests;

/// A single validated reading from the meter peripheral.
///
/// Every numeric field is guaranteed finite; readings that fail this check are
/// rejected by [`sensor::SensorAcquisition::read`] before reaching any other component.
///
/// # Example
/// ```
/// use chrono::Utc;
/// use nilm_edge_lib::SensorSample;
///
/// let sample = SensorSample {
///     timestamp: Utc::now(),
///     voltage: 230.1,
///     current: 0.456,
///     power: 100.5,
///     energy: 1.234,
///     frequency: 50.0,
///     power_factor: 0.95,
/// };
/// assert!(sample.power > 0.0);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SensorSample {
    /// Wall-clock time the reading was accepted
    pub timestamp: DateTime<Utc>,
    /// RMS voltage in volts
    pub voltage: f32,
    /// RMS current in amperes
    pub current: f32,
    /// Active power in watts
    pub power: f32,
    /// Cumulative energy in kWh
    pub energy: f32,
    /// Mains frequency in hertz
    pub frequency: f32,
    /// Power factor, 0 to 1
    pub power_factor: f32,
}

/// Why a telemetry record is being sent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Power delta exceeded the configured threshold
    Event,
    /// Heartbeat from the periodic scheduler
    Periodic,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Event => "event",
            Category::Periodic => "periodic",
        }
    }
}

/// Device health fields attached to every outgoing record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDiagnostics {
    /// Received signal strength in dBm (0 when unknown)
    pub rssi: i32,
    /// Free memory in bytes
    pub heap: u64,
}

/// A sample tagged for delivery to the ingestion endpoint.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TelemetryEvent {
    pub sample: SensorSample,
    pub category: Category,
    pub diagnostics: DeviceDiagnostics,
}

/// Coarse error classes shared by the acquisition and transmission paths.
///
/// The display overlay and the logs branch on this rather than on the concrete error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Meter returned nothing usable; retried on the next sampling tick
    SensorRead,
    /// Link down and the reconnect budget was exhausted
    Connectivity,
    /// Endpoint rejected the API key
    Auth,
    /// Non-success status or no response at all
    Transport,
}

impl ErrorKind {
    pub fn label(self) -> &'static str {
        match self {
            ErrorKind::SensorRead => "SENSOR ERROR",
            ErrorKind::Connectivity => "NO NETWORK",
            ErrorKind::Auth => "AUTH FAILED",
            ErrorKind::Transport => "SEND FAILED",
        }
    }
}

/// Delivery statistics for the lifetime of the process.
///
/// Fields are private so the only possible mutation is an increment; the counters
/// are monotonically non-decreasing and reset only when the process restarts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Counters {
    data_points_sent: u64,
    events_detected: u64,
    failed_requests: u64,
}

impl Counters {
    pub fn data_points_sent(&self) -> u64 {
        self.data_points_sent
    }

    pub fn events_detected(&self) -> u64 {
        self.events_detected
    }

    pub fn failed_requests(&self) -> u64 {
        self.failed_requests
    }

    pub fn record_sent(&mut self) {
        self.data_points_sent = self.data_points_sent.saturating_add(1);
    }

    pub fn record_event(&mut self) {
        self.events_detected = self.events_detected.saturating_add(1);
    }

    pub fn record_failure(&mut self) {
        self.failed_requests = self.failed_requests.saturating_add(1);
    }
}

/// Link status as observed by the transmission client's connectivity check.
///
/// Only [`transmit::TransmissionClient`] moves this between states.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConnectivityState {
    connected: bool,
    reconnect_attempts: u32,
}

impl ConnectivityState {
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Attempts made in the current (or most recent) reconnect round
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    pub(crate) fn mark_connected(&mut self) {
        self.connected = true;
        self.reconnect_attempts = 0;
    }

    pub(crate) fn mark_disconnected(&mut self) {
        self.connected = false;
    }

    pub(crate) fn record_attempt(&mut self, attempt: u32) {
        self.reconnect_attempts = attempt;
    }
}

/// Everything the control loop owns and hands to its components.
#[derive(Clone, Debug, Default)]
pub struct DeviceState {
    /// Most recent sample that passed validation
    pub latest: Option<SensorSample>,
    pub counters: Counters,
    pub connectivity: ConnectivityState,
    /// Set by a 401 from the endpoint, cleared by the next successful delivery
    pub auth_failed: bool,
    /// Status of the last HTTP exchange, `None` if it never produced a response
    pub last_status: Option<u16>,
}
