//! SSD1306 128x64 OLED on a Linux I2C bus.
//!
//! The driver keeps a frame buffer in memory; [`GraphicPanel`] draws into it and
//! then flushes, which is the only point where the bus is written.

use super::panel::{DisplayError, GraphicPanel, PanelDevice};
use crate::config::DisplayConfig;
use linux_embedded_hal::I2cdev;
use ssd1306::mode::BufferedGraphicsMode;
use ssd1306::prelude::{DisplayConfig as _, DisplayRotation, I2CInterface};
use ssd1306::size::DisplaySize128x64;
use ssd1306::{I2CDisplayInterface, Ssd1306};
use tracing::{info, warn};

/// The panel as driven over `/dev/i2c-*`
pub type Oled = Ssd1306<
    I2CInterface<I2cdev>,
    DisplaySize128x64,
    BufferedGraphicsMode<DisplaySize128x64>,
>;

impl PanelDevice for Oled {
    fn bring_up(&mut self) -> Result<(), DisplayError> {
        self.init()
            .map_err(|e| DisplayError::Bus(format!("init: {e:?}")))
    }

    fn flush(&mut self) -> Result<(), DisplayError> {
        Ssd1306::flush(self).map_err(|e| DisplayError::Bus(format!("flush: {e:?}")))
    }
}

/// Open the I2C bus and wrap the panel. Nothing is sent to the device until
/// `Panel::init`, so a missing panel surfaces there.
pub fn open_oled(config: &DisplayConfig) -> Result<GraphicPanel<Oled>, DisplayError> {
    if (config.width, config.height) != (128, 64) {
        warn!(
            width = config.width,
            height = config.height,
            "OLED is fixed at 128x64, ignoring configured size"
        );
    }
    let bus = I2cdev::new(&config.i2c_bus)
        .map_err(|e| DisplayError::Bus(format!("{}: {e}", config.i2c_bus)))?;
    let interface = I2CDisplayInterface::new_custom_address(bus, config.i2c_address);
    let display = Ssd1306::new(interface, DisplaySize128x64, DisplayRotation::Rotate0)
        .into_buffered_graphics_mode();
    info!(bus = %config.i2c_bus, address = config.i2c_address, "OLED bus opened");
    Ok(GraphicPanel::new(display))
}
