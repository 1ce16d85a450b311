//! # NILM Edge Agent Entry Point
//!
//! Wires configuration, peripherals and the control loop together. Production
//! mode reads a PZEM meter over a serial port, watches the wireless interface and
//! asks the supplicant to reassociate when it drops, and with `--panel oled` draws
//! on an SSD1306 over I2C. `--simulate` swaps in the synthetic load model and an always-up link so the
//! agent can be exercised on a desktop against a local ingestion service.

use anyhow::Context;
use clap::{Parser, ValueEnum};
use nilm_edge_lib::agent::Agent;
use nilm_edge_lib::clock::SystemClock;
use nilm_edge_lib::config::{self, Config};
use nilm_edge_lib::display::panel::{Panel, PixelPreviewPanel, TerminalPanel};
use nilm_edge_lib::link::{AlwaysUpLink, Link, WirelessLink};
use nilm_edge_lib::sensor::{MeterSource, SensorAcquisition};
use nilm_edge_lib::simulated::SimulatedMeter;
use nilm_edge_lib::transmit::{ReqwestPoster, TransmissionClient, TransmitSettings};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PanelKind {
    /// Boxed text frames on stdout
    Text,
    /// Pixel-accurate preview of the graphics panel as ASCII art
    Pixels,
    /// SSD1306 OLED on the configured I2C bus (hardware builds)
    Oled,
}

#[derive(Debug, Parser)]
#[command(author, version, about = "Edge telemetry agent for single-point electrical monitoring")]
struct Cli {
    /// Configuration file
    #[arg(long, value_name = "FILE", default_value = config::DEFAULT_PATH)]
    config: PathBuf,

    /// Use the synthetic load model and an always-up link instead of real hardware
    #[arg(long)]
    simulate: bool,

    /// With --simulate, make every Nth meter poll fail validation
    #[arg(long, value_name = "N", requires = "simulate")]
    fault_every: Option<u64>,

    /// Where the status display is drawn
    #[arg(long, value_enum, default_value_t = PanelKind::Text)]
    panel: PanelKind,

    /// Stop after this many loop iterations
    #[arg(long)]
    iterations: Option<u64>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load_from_path(&cli.config);
    config.validate().context("invalid configuration")?;
    info!(
        endpoint = %config.network.endpoint,
        interface = %config.network.interface,
        simulate = cli.simulate,
        "configuration loaded"
    );

    let clock = SystemClock::new();
    let (meter, link): (Box<dyn MeterSource>, Box<dyn Link>) = if cli.simulate {
        let mut meter = SimulatedMeter::new(clock);
        if let Some(n) = cli.fault_every {
            meter = meter.with_fault_every(n);
        }
        (Box::new(meter), Box::new(AlwaysUpLink))
    } else {
        (
            open_meter(&config)?,
            Box::new(WirelessLink::new(&config.network)),
        )
    };

    let poster = ReqwestPoster::new(config.network.request_timeout())
        .context("failed to build HTTP client")?;
    let transmitter = TransmissionClient::new(
        TransmitSettings::from(&config.network),
        link,
        Box::new(poster),
    );

    let panel: Box<dyn Panel> = match cli.panel {
        PanelKind::Text => Box::new(TerminalPanel::stdout()),
        PanelKind::Pixels => Box::new(PixelPreviewPanel::new(
            config.display.width,
            config.display.height,
            io::stdout(),
        )),
        PanelKind::Oled => open_oled(&config)?,
    };

    let mut agent = Agent::start(
        &config,
        clock,
        SensorAcquisition::new(meter),
        transmitter,
        panel,
    )
    .context("display initialisation failed")?;

    let running = Arc::new(AtomicBool::new(true));
    let flag = running.clone();
    if let Err(err) = ctrlc::set_handler(move || flag.store(false, Ordering::SeqCst)) {
        warn!(error = %err, "could not install Ctrl-C handler");
    }

    agent.run(&running, cli.iterations);
    Ok(())
}

#[cfg(feature = "hardware")]
fn open_meter(config: &Config) -> anyhow::Result<Box<dyn MeterSource>> {
    let meter = nilm_edge_lib::pzem::open_serial(&config.meter)
        .with_context(|| format!("failed to open meter on {}", config.meter.port))?;
    Ok(Box::new(meter))
}

#[cfg(not(feature = "hardware"))]
fn open_meter(_config: &Config) -> anyhow::Result<Box<dyn MeterSource>> {
    anyhow::bail!("meter support not built; rebuild with --features hardware or pass --simulate")
}

#[cfg(feature = "hardware")]
fn open_oled(config: &Config) -> anyhow::Result<Box<dyn Panel>> {
    let panel = nilm_edge_lib::display::oled::open_oled(&config.display)
        .with_context(|| format!("failed to open OLED on {}", config.display.i2c_bus))?;
    Ok(Box::new(panel))
}

#[cfg(not(feature = "hardware"))]
fn open_oled(_config: &Config) -> anyhow::Result<Box<dyn Panel>> {
    anyhow::bail!("OLED support not built; rebuild with --features hardware or pick another --panel")
}
