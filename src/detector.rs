//! # Power-Change Event Detector
//!
//! Single-level amplitude comparison between consecutive samples. There is no
//! hysteresis, no minimum-duration filter and no debouncing: one noisy sample over
//! the threshold fires an event even if power returns to baseline immediately
//! afterwards. Appliance identification and noise rejection happen downstream of
//! the ingestion endpoint, not here.

use crate::{Counters, SensorSample};

/// A power step large enough to report.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PowerChange {
    pub before: f32,
    pub after: f32,
    /// Signed change (`after - before`); positive means a load switched on
    pub delta: f32,
}

/// Compares each sample's power with the previous one.
#[derive(Clone, Debug)]
pub struct EventDetector {
    threshold: f32,
    previous_power: f32,
}

impl EventDetector {
    /// The previous power starts at zero, so a first sample above the threshold
    /// is itself reported as an event.
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            previous_power: 0.0,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn previous_power(&self) -> f32 {
        self.previous_power
    }

    /// Feed one valid sample. Returns the change and bumps `events_detected` when
    /// `|power - previous| > threshold`; equality does not fire. The previous
    /// power is updated either way.
    pub fn observe(&mut self, sample: &SensorSample, counters: &mut Counters) -> Option<PowerChange> {
        let before = self.previous_power;
        let after = sample.power;
        self.previous_power = after;

        let delta = after - before;
        if delta.abs() > self.threshold {
            counters.record_event();
            Some(PowerChange { before, after, delta })
        } else {
            None
        }
    }
}
