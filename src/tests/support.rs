//! In-memory peripherals for driving an [`Agent`] without hardware or a network.
//!
//! Every fake hands its observations back through `Rc` handles so a test can keep
//! inspecting them after the fake itself has been boxed into the agent.

use crate::agent::{Agent, Iteration};
use crate::clock::{Clock, ManualClock};
use crate::config::Config;
use crate::diagnostics::MemoryProbe;
use crate::display::frame::Frame;
use crate::display::panel::{DisplayError, MonoFrameBuffer, Panel, PanelDevice};
use crate::link::Link;
use crate::sensor::{MeterSource, RawReading, SensorAcquisition, SensorReadError};
use crate::transmit::{HttpPoster, HttpResponse, PostError, TransmissionClient, TransmitSettings};
use embedded_graphics::pixelcolor::BinaryColor;
use embedded_graphics::prelude::*;
use std::cell::{Cell, RefCell};
use std::convert::Infallible;
use std::rc::Rc;
use std::time::Duration;

/// Meter that replays a list of power readings, repeating the last one.
/// `None` entries come back with a NaN voltage so validation rejects them.
pub struct ScriptedMeter {
    powers: Vec<Option<f32>>,
    next: usize,
}

impl ScriptedMeter {
    pub fn new(powers: Vec<Option<f32>>) -> Self {
        Self { powers, next: 0 }
    }

    pub fn constant(power: f32) -> Self {
        Self::new(vec![Some(power)])
    }
}

impl MeterSource for ScriptedMeter {
    fn poll(&mut self) -> Result<RawReading, SensorReadError> {
        let index = self.next.min(self.powers.len().saturating_sub(1));
        self.next += 1;
        let power = self.powers.get(index).copied().flatten();
        Ok(RawReading {
            voltage: if power.is_some() { 230.0 } else { f32::NAN },
            current: power.unwrap_or(0.0) / 230.0,
            power: power.unwrap_or(0.0),
            energy: 1.5,
            frequency: 50.0,
            power_factor: 0.95,
        })
    }
}

/// Link whose state the test flips; counts reconnect attempts.
#[derive(Clone, Default)]
pub struct SwitchLink {
    pub up: Rc<Cell<bool>>,
    pub reconnects: Rc<Cell<u32>>,
}

impl SwitchLink {
    pub fn up() -> Self {
        let link = Self::default();
        link.up.set(true);
        link
    }

    pub fn down() -> Self {
        Self::default()
    }
}

impl Link for SwitchLink {
    fn is_up(&mut self) -> bool {
        self.up.get()
    }

    fn reconnect(&mut self) -> bool {
        self.reconnects.set(self.reconnects.get() + 1);
        self.up.get()
    }

    fn rssi(&mut self) -> i32 {
        if self.up.get() {
            -58
        } else {
            0
        }
    }
}

/// Poster answering from a list of statuses (last one repeats); `None` means no
/// response at all. Request bodies are kept for inspection.
#[derive(Clone)]
pub struct RecordingPoster {
    statuses: Rc<RefCell<Vec<Option<u16>>>>,
    pub bodies: Rc<RefCell<Vec<String>>>,
}

impl RecordingPoster {
    pub fn new(statuses: Vec<Option<u16>>) -> Self {
        Self {
            statuses: Rc::new(RefCell::new(statuses)),
            bodies: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub fn always(status: u16) -> Self {
        Self::new(vec![Some(status)])
    }

    pub fn count(&self) -> usize {
        self.bodies.borrow().len()
    }

    /// Number of bodies whose `type` is `category`
    pub fn count_of(&self, category: &str) -> usize {
        let needle = format!(r#""type":"{category}""#);
        self.bodies
            .borrow()
            .iter()
            .filter(|body| body.contains(&needle))
            .count()
    }
}

impl HttpPoster for RecordingPoster {
    fn post(&mut self, _url: &str, _api_key: &str, body: Vec<u8>) -> Result<HttpResponse, PostError> {
        self.bodies
            .borrow_mut()
            .push(String::from_utf8_lossy(&body).into_owned());
        let mut statuses = self.statuses.borrow_mut();
        let status = if statuses.len() > 1 {
            statuses.remove(0)
        } else {
            statuses.first().copied().flatten()
        };
        match status {
            Some(status) => Ok(HttpResponse {
                status,
                body: String::new(),
            }),
            None => Err(PostError::Unreachable("connection reset".into())),
        }
    }
}

/// Panel that keeps every frame it is shown.
#[derive(Clone, Default)]
pub struct RecordingPanel {
    pub frames: Rc<RefCell<Vec<Frame>>>,
    pub fail_init: bool,
}

impl RecordingPanel {
    pub fn last_title(&self) -> Option<String> {
        self.frames.borrow().last().map(|frame| frame.title.clone())
    }

    pub fn titles(&self) -> Vec<String> {
        self.frames
            .borrow()
            .iter()
            .map(|frame| frame.title.clone())
            .collect()
    }
}

impl Panel for RecordingPanel {
    fn init(&mut self) -> Result<(), DisplayError> {
        if self.fail_init {
            return Err(DisplayError::Draw("no panel on the bus".into()));
        }
        Ok(())
    }

    fn show(&mut self, frame: &Frame) -> Result<(), DisplayError> {
        self.frames.borrow_mut().push(frame.clone());
        Ok(())
    }
}

/// Graphics device whose bus never answers, like an OLED that is not plugged in.
pub struct UnpluggedOled(pub MonoFrameBuffer);

impl OriginDimensions for UnpluggedOled {
    fn size(&self) -> Size {
        self.0.size()
    }
}

impl DrawTarget for UnpluggedOled {
    type Color = BinaryColor;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        self.0.draw_iter(pixels)
    }
}

impl PanelDevice for UnpluggedOled {
    fn bring_up(&mut self) -> Result<(), DisplayError> {
        Err(DisplayError::Bus("/dev/i2c-1: no ACK at 0x3C".into()))
    }
}

/// Reference cadences: 1 s samples, 10 s heartbeat, 3 s display, 10 x 500 ms reconnects.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.sampling.power_threshold_w = 20.0;
    config.sampling.sample_interval_ms = 1000;
    config.sampling.periodic_interval_ms = 10_000;
    config.display.cycle_interval_ms = 3000;
    config.network.reconnect_attempts = 10;
    config.network.reconnect_delay_ms = 500;
    config.network.api_key = "test-key".into();
    config
}

/// Handles onto everything a running agent touches.
pub struct Harness {
    pub agent: Agent<ManualClock>,
    pub clock: ManualClock,
    pub link: SwitchLink,
    pub poster: RecordingPoster,
    pub panel: RecordingPanel,
}

impl Harness {
    pub fn start(meter: ScriptedMeter, link: SwitchLink, poster: RecordingPoster) -> Self {
        Self::start_with(&test_config(), meter, link, poster)
    }

    pub fn start_with(
        config: &Config,
        meter: ScriptedMeter,
        link: SwitchLink,
        poster: RecordingPoster,
    ) -> Self {
        let clock = ManualClock::new();
        let panel = RecordingPanel::default();
        let transmitter = TransmissionClient::new(
            TransmitSettings::from(&config.network),
            Box::new(link.clone()),
            Box::new(poster.clone()),
        );
        let agent = match Agent::start(
            config,
            clock.clone(),
            SensorAcquisition::new(Box::new(meter)),
            transmitter,
            Box::new(panel.clone()),
        ) {
            Ok(agent) => agent,
            Err(err) => panic!("agent failed to start: {err}"),
        };
        Self {
            agent: agent.with_memory_probe(MemoryProbe::with_path("/nonexistent/meminfo")),
            clock,
            link,
            poster,
            panel,
        }
    }

    /// Run iterations, sleeping between them, while the clock is at or before `until`.
    pub fn run_until(&mut self, until: Duration) -> Vec<Iteration> {
        let mut iterations = Vec::new();
        while self.clock.now() <= until {
            iterations.push(self.agent.run_once());
            self.agent.sleep_until_next_due();
        }
        iterations
    }
}
