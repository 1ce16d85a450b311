//! # Status Display
//!
//! A five-view rotation on its own cadence, independent of sampling and telemetry:
//!
//! 1. **Voltage / Current**
//! 2. **Power / Energy**
//! 3. **Frequency / PF**
//! 4. **Network Status**: link state, signal, last HTTP status, auth failures
//! 5. **System Status**: counters, free memory, uptime
//!
//! What is drawn is a pure function of the latest accepted sample, the counters and
//! the connectivity state ([`frame::compose`]). Failures reported by acquisition or
//! transmission are drawn as an overlay for one frame; the overlay never moves the
//! rotation, so the next tick resumes exactly where the cycle would have been.

pub mod frame;
#[cfg(feature = "hardware")]
pub mod oled;
pub mod panel;

use crate::clock::Cadence;
use crate::{DeviceState, ErrorKind};
use frame::{Frame, ViewContext};
use panel::{DisplayError, Panel};
use std::time::Duration;
use tracing::debug;

/// The fixed, ordered set of views.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DisplayView {
    VoltageCurrent,
    PowerEnergy,
    FrequencyPf,
    NetworkStatus,
    SystemStatus,
}

impl DisplayView {
    /// Rotation order
    pub const ALL: [DisplayView; 5] = [
        DisplayView::VoltageCurrent,
        DisplayView::PowerEnergy,
        DisplayView::FrequencyPf,
        DisplayView::NetworkStatus,
        DisplayView::SystemStatus,
    ];

    pub fn index(self) -> usize {
        match self {
            DisplayView::VoltageCurrent => 0,
            DisplayView::PowerEnergy => 1,
            DisplayView::FrequencyPf => 2,
            DisplayView::NetworkStatus => 3,
            DisplayView::SystemStatus => 4,
        }
    }

    /// Following view, wrapping after the last
    pub fn next(self) -> DisplayView {
        DisplayView::ALL[(self.index() + 1) % DisplayView::ALL.len()]
    }

    pub fn title(self) -> &'static str {
        match self {
            DisplayView::VoltageCurrent => "Voltage/Current",
            DisplayView::PowerEnergy => "Power/Energy",
            DisplayView::FrequencyPf => "Frequency/PF",
            DisplayView::NetworkStatus => "Network",
            DisplayView::SystemStatus => "System",
        }
    }
}

/// Rotation state machine plus render entry points.
#[derive(Clone, Debug)]
pub struct DisplayController {
    cadence: Cadence,
    view: DisplayView,
}

impl DisplayController {
    /// Starts on the first view; the first rotation is one interval after `start`.
    pub fn new(interval: Duration, start: Duration) -> Self {
        Self {
            cadence: Cadence::new(interval, start),
            view: DisplayView::VoltageCurrent,
        }
    }

    pub fn view(&self) -> DisplayView {
        self.view
    }

    pub fn next_due(&self) -> Duration {
        self.cadence.next_due()
    }

    /// Advance the rotation if its cadence is due. Returns true when the view changed.
    pub fn tick(&mut self, now: Duration) -> bool {
        if !self.cadence.poll(now) {
            return false;
        }
        self.view = self.view.next();
        debug!(view = self.view.title(), "display view advanced");
        true
    }

    /// Draw the current view.
    pub fn render(
        &self,
        panel: &mut dyn Panel,
        state: &DeviceState,
        context: &ViewContext<'_>,
    ) -> Result<(), DisplayError> {
        panel.show(&frame::compose(self.view, state, context))
    }

    /// Draw the error overlay in place of the current view for this frame only.
    pub fn render_fault(
        &self,
        panel: &mut dyn Panel,
        kind: ErrorKind,
        detail: &str,
    ) -> Result<(), DisplayError> {
        panel.show(&Frame::overlay(kind, detail))
    }
}
