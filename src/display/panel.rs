//! Output surfaces for composed frames.
//!
//! [`TerminalPanel`] prints a boxed text frame and is what a desktop run uses.
//! [`GraphicPanel`] draws onto any monochrome [`PanelDevice`]: the SSD1306 OLED
//! (`display::oled`, hardware builds only) or the in-memory [`MonoFrameBuffer`]
//! used for previews and tests.

use super::frame::Frame;
use embedded_graphics::{
    mono_font::{ascii::FONT_6X10, MonoTextStyle},
    pixelcolor::BinaryColor,
    prelude::*,
    primitives::{Line, PrimitiveStyle, Rectangle},
    text::{Baseline, Text},
};
use std::convert::Infallible;
use std::io::{self, Write};
use thiserror::Error;

/// Characters per line on a 128 px panel with the 6x10 font
pub const TEXT_COLUMNS: usize = 21;

const LINE_HEIGHT: i32 = 10;
const BODY_TOP: i32 = 13;

#[derive(Error, Debug)]
pub enum DisplayError {
    #[error("display I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("drawing failed: {0}")]
    Draw(String),
    #[error("panel too small: {width}x{height}")]
    TooSmall { width: u32, height: u32 },
    #[error("panel bus: {0}")]
    Bus(String),
}

/// A monochrome draw target that has to be brought up before use and may buffer
/// drawing until it is flushed.
pub trait PanelDevice: DrawTarget<Color = BinaryColor> {
    /// Power-on and configuration sequence
    fn bring_up(&mut self) -> Result<(), DisplayError> {
        Ok(())
    }

    /// Push everything drawn since the last flush to the glass
    fn flush(&mut self) -> Result<(), DisplayError> {
        Ok(())
    }
}

/// Something a [`Frame`] can be shown on.
pub trait Panel {
    /// Bring the panel up. A failure here is fatal at startup.
    fn init(&mut self) -> Result<(), DisplayError>;

    /// Replace whatever is on the panel with `frame`.
    fn show(&mut self, frame: &Frame) -> Result<(), DisplayError>;
}

impl<P: Panel + ?Sized> Panel for Box<P> {
    fn init(&mut self) -> Result<(), DisplayError> {
        (**self).init()
    }

    fn show(&mut self, frame: &Frame) -> Result<(), DisplayError> {
        (**self).show(frame)
    }
}

/// Boxed ASCII rendering to any writer.
pub struct TerminalPanel<W: Write> {
    out: W,
}

impl<W: Write> TerminalPanel<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl TerminalPanel<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

/// Text form of a frame, one string per terminal row.
pub fn text_rows(frame: &Frame) -> Vec<String> {
    let border = format!("+{}+", "-".repeat(TEXT_COLUMNS));
    let title = if frame.alert {
        format!("|{:^width$}|", frame.title.to_uppercase(), width = TEXT_COLUMNS)
    } else {
        format!("|{:<width$}|", frame.title, width = TEXT_COLUMNS)
    };
    let mut rows = vec![border.clone(), title, border.clone()];
    for line in &frame.lines {
        let clipped: String = line.chars().take(TEXT_COLUMNS).collect();
        rows.push(format!("|{:<width$}|", clipped, width = TEXT_COLUMNS));
    }
    rows.push(border);
    rows
}

impl<W: Write> Panel for TerminalPanel<W> {
    fn init(&mut self) -> Result<(), DisplayError> {
        writeln!(self.out, "nilm-edge-agent display ({TEXT_COLUMNS} columns)")?;
        self.out.flush()?;
        Ok(())
    }

    fn show(&mut self, frame: &Frame) -> Result<(), DisplayError> {
        for row in text_rows(frame) {
            writeln!(self.out, "{row}")?;
        }
        self.out.flush()?;
        Ok(())
    }
}

/// Draws frames with the 6x10 font: title bar, separator, then one line per 10 px.
pub struct GraphicPanel<D> {
    target: D,
}

impl<D> GraphicPanel<D>
where
    D: PanelDevice,
    D::Error: core::fmt::Debug,
{
    pub fn new(target: D) -> Self {
        Self { target }
    }

    pub fn target(&self) -> &D {
        &self.target
    }

    fn draw(&mut self, frame: &Frame) -> Result<(), D::Error> {
        let size = self.target.bounding_box().size;
        self.target.clear(BinaryColor::Off)?;

        let title_color = if frame.alert {
            Rectangle::new(Point::zero(), Size::new(size.width, LINE_HEIGHT as u32 + 1))
                .into_styled(PrimitiveStyle::with_fill(BinaryColor::On))
                .draw(&mut self.target)?;
            BinaryColor::Off
        } else {
            BinaryColor::On
        };
        Text::with_baseline(
            &frame.title,
            Point::new(1, 1),
            MonoTextStyle::new(&FONT_6X10, title_color),
            Baseline::Top,
        )
        .draw(&mut self.target)?;

        Line::new(
            Point::new(0, LINE_HEIGHT + 1),
            Point::new(size.width as i32 - 1, LINE_HEIGHT + 1),
        )
        .into_styled(PrimitiveStyle::with_stroke(BinaryColor::On, 1))
        .draw(&mut self.target)?;

        let style = MonoTextStyle::new(&FONT_6X10, BinaryColor::On);
        for (row, line) in frame.lines.iter().enumerate() {
            let y = BODY_TOP + row as i32 * LINE_HEIGHT;
            if y + LINE_HEIGHT > size.height as i32 {
                break;
            }
            Text::with_baseline(line, Point::new(1, y), style, Baseline::Top)
                .draw(&mut self.target)?;
        }
        Ok(())
    }
}

impl<D> Panel for GraphicPanel<D>
where
    D: PanelDevice,
    D::Error: core::fmt::Debug,
{
    fn init(&mut self) -> Result<(), DisplayError> {
        self.target.bring_up()?;
        let size = self.target.bounding_box().size;
        if size.width < 64 || size.height < 32 {
            return Err(DisplayError::TooSmall {
                width: size.width,
                height: size.height,
            });
        }
        self.target
            .clear(BinaryColor::Off)
            .map_err(|e| DisplayError::Draw(format!("{e:?}")))?;
        self.target.flush()
    }

    fn show(&mut self, frame: &Frame) -> Result<(), DisplayError> {
        self.draw(frame)
            .map_err(|e| DisplayError::Draw(format!("{e:?}")))?;
        self.target.flush()
    }
}

/// One bit per pixel, row major.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MonoFrameBuffer {
    width: u32,
    height: u32,
    pixels: Vec<bool>,
}

impl MonoFrameBuffer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![false; width as usize * height as usize],
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        self.pixels[self.index(x, y)]
    }

    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    pub fn lit_pixels(&self) -> usize {
        self.pixels.iter().filter(|lit| **lit).count()
    }

    /// `#` for lit pixels, `.` otherwise
    pub fn to_ascii(&self) -> String {
        let mut out = String::with_capacity((self.width as usize + 1) * self.height as usize);
        for row in self.pixels.chunks(self.width.max(1) as usize) {
            out.extend(row.iter().map(|lit| if *lit { '#' } else { '.' }));
            out.push('\n');
        }
        out
    }
}

impl OriginDimensions for MonoFrameBuffer {
    fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

impl DrawTarget for MonoFrameBuffer {
    type Color = BinaryColor;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(point, color) in pixels {
            if point.x < 0 || point.y < 0 {
                continue;
            }
            let (x, y) = (point.x as u32, point.y as u32);
            if x < self.width && y < self.height {
                let index = self.index(x, y);
                self.pixels[index] = color.is_on();
            }
        }
        Ok(())
    }
}

impl PanelDevice for MonoFrameBuffer {}

/// Draws into a [`MonoFrameBuffer`] sized like the real panel and dumps it as ASCII art.
pub struct PixelPreviewPanel<W: Write> {
    inner: GraphicPanel<MonoFrameBuffer>,
    out: W,
}

impl<W: Write> PixelPreviewPanel<W> {
    pub fn new(width: u32, height: u32, out: W) -> Self {
        Self {
            inner: GraphicPanel::new(MonoFrameBuffer::new(width, height)),
            out,
        }
    }

    pub fn buffer(&self) -> &MonoFrameBuffer {
        self.inner.target()
    }
}

impl<W: Write> Panel for PixelPreviewPanel<W> {
    fn init(&mut self) -> Result<(), DisplayError> {
        self.inner.init()
    }

    fn show(&mut self, frame: &Frame) -> Result<(), DisplayError> {
        self.inner.show(frame)?;
        self.out.write_all(self.inner.target().to_ascii().as_bytes())?;
        writeln!(self.out)?;
        self.out.flush()?;
        Ok(())
    }
}
