//! # Control Loop
//!
//! The single cooperative loop that owns [`DeviceState`] and drives every
//! component. Three cadences run side by side on one [`Clock`]:
//!
//! | Cadence   | First due     | Action                                           |
//! |-----------|---------------|--------------------------------------------------|
//! | sampling  | immediately   | read the meter, run the detector, send on events |
//! | periodic  | one interval  | heartbeat send of the latest accepted sample     |
//! | display   | one interval  | advance the view rotation and redraw             |
//!
//! Each iteration polls the cadences in that order, so side effects follow loop
//! order and the two kinds of send never overlap. Between iterations the loop
//! sleeps until the earliest cadence is due.
//!
//! Failures below the fatal threshold are absorbed here: they move counters,
//! get logged and draw the error overlay, and the loop carries on.

use crate::clock::{Cadence, Clock};
use crate::config::Config;
use crate::detector::EventDetector;
use crate::diagnostics::MemoryProbe;
use crate::display::frame::ViewContext;
use crate::display::panel::{DisplayError, Panel};
use crate::display::{DisplayController, DisplayView};
use crate::sensor::SensorAcquisition;
use crate::transmit::TransmissionClient;
use crate::{Category, DeviceDiagnostics, DeviceState, ErrorKind, SensorSample, TelemetryEvent};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// What one pass through the loop did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Iteration {
    /// A sample was due and the meter returned a valid one
    pub sampled: bool,
    /// The detector flagged a power change
    pub event: bool,
    /// The heartbeat cadence fired with a sample available
    pub heartbeat: bool,
    /// The display moved to the next view
    pub rotated: bool,
    /// An error overlay was drawn
    pub fault: bool,
}

/// The edge agent: peripherals, policy components and the device state.
pub struct Agent<C: Clock> {
    clock: C,
    sensor: SensorAcquisition,
    detector: EventDetector,
    transmitter: TransmissionClient,
    display: DisplayController,
    panel: Box<dyn Panel>,
    sampling: Cadence,
    periodic: Cadence,
    state: DeviceState,
    memory: MemoryProbe,
    ssid: String,
    started: Duration,
}

impl<C: Clock> Agent<C> {
    /// Bring the agent up.
    ///
    /// The panel is initialised first and a failure there is returned: without the
    /// display the device has no diagnostics surface, so startup stops. The link is
    /// then checked once (failure is only logged, the first send retries) and the
    /// first view is drawn.
    pub fn start(
        config: &Config,
        clock: C,
        sensor: SensorAcquisition,
        transmitter: TransmissionClient,
        mut panel: Box<dyn Panel>,
    ) -> Result<Self, DisplayError> {
        panel.init()?;

        let now = clock.now();
        let mut agent = Agent {
            sensor,
            detector: EventDetector::new(config.sampling.power_threshold_w),
            transmitter,
            display: DisplayController::new(config.display.cycle_interval(), now),
            panel,
            sampling: Cadence::immediate(config.sampling.sample_interval(), now),
            periodic: Cadence::new(config.sampling.periodic_interval(), now),
            state: DeviceState::default(),
            memory: MemoryProbe::new(),
            ssid: config.network.ssid.clone(),
            started: now,
            clock,
        };

        match agent.transmitter.ensure_connected(&mut agent.state, &agent.clock) {
            Ok(()) => info!(endpoint = %agent.transmitter.settings().endpoint, "link up"),
            Err(err) => warn!(error = %err, "link not available at startup"),
        }

        agent.redraw();
        info!(
            threshold_w = agent.detector.threshold(),
            sample_ms = agent.sampling.interval().as_millis() as u64,
            periodic_ms = agent.periodic.interval().as_millis() as u64,
            "agent started"
        );
        Ok(agent)
    }

    /// Replace the free-memory probe (tests point it at a fixture file).
    pub fn with_memory_probe(mut self, memory: MemoryProbe) -> Self {
        self.memory = memory;
        self
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    pub fn view(&self) -> DisplayView {
        self.display.view()
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Poll every cadence once, in loop order.
    pub fn run_once(&mut self) -> Iteration {
        let mut iteration = Iteration::default();

        if self.sampling.poll(self.clock.now()) {
            match self.sensor.read() {
                Ok(sample) => {
                    iteration.sampled = true;
                    self.state.latest = Some(sample);
                    if let Some(change) = self.detector.observe(&sample, &mut self.state.counters) {
                        info!(
                            before_w = change.before,
                            after_w = change.after,
                            delta_w = change.delta,
                            "power change detected"
                        );
                        iteration.event = true;
                        iteration.fault |= self.transmit(Category::Event, sample);
                    }
                }
                Err(err) => {
                    warn!(error = %err, "meter read failed");
                    self.show_fault(err.kind(), &err.to_string());
                    iteration.fault = true;
                }
            }
        }

        if self.periodic.poll(self.clock.now()) {
            match self.state.latest {
                Some(sample) => {
                    iteration.heartbeat = true;
                    iteration.fault |= self.transmit(Category::Periodic, sample);
                }
                None => debug!("heartbeat skipped, no sample yet"),
            }
        }

        if self.display.tick(self.clock.now()) {
            iteration.rotated = true;
            // An overlay drawn this iteration stays up until the next tick
            if !iteration.fault {
                self.redraw();
            }
        }

        iteration
    }

    /// Block until the earliest cadence is due.
    pub fn sleep_until_next_due(&self) {
        let now = self.clock.now();
        let wait = [
            self.sampling.remaining(now),
            self.periodic.remaining(now),
            self.display.next_due().saturating_sub(now),
        ]
        .into_iter()
        .min()
        .unwrap_or(Duration::ZERO);
        if !wait.is_zero() {
            self.clock.sleep(wait);
        }
    }

    /// Run until `running` is cleared or, if given, `max_iterations` passes have
    /// completed. Returns the number of iterations run.
    pub fn run(&mut self, running: &AtomicBool, max_iterations: Option<u64>) -> u64 {
        let mut iterations = 0;
        while running.load(Ordering::SeqCst) {
            self.run_once();
            iterations += 1;
            if max_iterations.is_some_and(|max| iterations >= max) {
                break;
            }
            self.sleep_until_next_due();
        }

        let counters = &self.state.counters;
        info!(
            iterations,
            sent = counters.data_points_sent(),
            events = counters.events_detected(),
            failed = counters.failed_requests(),
            "agent stopped"
        );
        iterations
    }

    /// Send one event through the shared transmission path. Returns true if a
    /// fault overlay was drawn.
    fn transmit(&mut self, category: Category, sample: SensorSample) -> bool {
        let event = TelemetryEvent {
            sample,
            category,
            diagnostics: self.diagnostics(),
        };
        match self.transmitter.send(&event, &mut self.state, &self.clock) {
            Ok(()) => false,
            Err(err) => {
                self.show_fault(err.kind(), &err.to_string());
                true
            }
        }
    }

    fn diagnostics(&mut self) -> DeviceDiagnostics {
        DeviceDiagnostics {
            rssi: self.transmitter.rssi(),
            heap: self.memory.free_bytes(),
        }
    }

    fn redraw(&mut self) {
        let diagnostics = self.diagnostics();
        let context = ViewContext {
            uptime: self.clock.now().saturating_sub(self.started),
            diagnostics,
            ssid: &self.ssid,
        };
        if let Err(err) = self
            .display
            .render(self.panel.as_mut(), &self.state, &context)
        {
            warn!(error = %err, "display refresh failed");
        }
    }

    fn show_fault(&mut self, kind: ErrorKind, detail: &str) {
        if let Err(err) = self
            .display
            .render_fault(self.panel.as_mut(), kind, detail)
        {
            warn!(error = %err, "error overlay failed");
        }
    }
}
