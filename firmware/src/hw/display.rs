//! SSD1306 128x64 text display.
//!
//! Rows are rendered with `embedded-graphics` into a local framebuffer and
//! pushed one row band (two controller pages) at a time, so a countdown digit
//! update moves 258 bytes instead of the whole panel.

#![cfg(target_os = "none")]

use core::convert::Infallible;

use detonator_core::detonation::{
    DISPLAY_ROWS, DisplayLine, DisplaySnapshot, StatusDisplay, truncate_line,
};
use embedded_graphics::mono_font::MonoTextStyle;
use embedded_graphics::mono_font::ascii::FONT_6X10;
use embedded_graphics::pixelcolor::BinaryColor;
use embedded_graphics::prelude::*;
use embedded_graphics::text::{Baseline, Text};

use super::{BusError, DeviceHandle};

const WIDTH: usize = 128;
const HEIGHT: usize = 64;
const PAGES: usize = HEIGHT / 8;
const PAGES_PER_ROW: usize = PAGES / DISPLAY_ROWS;
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
const ROW_PITCH: i32 = (HEIGHT / DISPLAY_ROWS) as i32;

const CONTROL_COMMAND: u8 = 0x00;
const CONTROL_DATA: u8 = 0x40;

const INIT_SEQUENCE: &[u8] = &[
    0xAE, // display off
    0xD5, 0x80, // clock divide
    0xA8, 0x3F, // multiplex 64
    0xD3, 0x00, // no offset
    0x40, // start line 0
    0x8D, 0x14, // charge pump on
    0x20, 0x00, // horizontal addressing
    0xA1, // segment remap
    0xC8, // COM scan descending
    0xDA, 0x12, // COM pins
    0x81, 0xCF, // contrast
    0xD9, 0xF1, // precharge
    0xDB, 0x40, // VCOMH deselect
    0xA4, // resume from RAM
    0xA6, // non-inverted
    0xAF, // display on
];

/// Page-major monochrome framebuffer in the controller's memory layout.
struct FrameBuffer {
    pages: [[u8; WIDTH]; PAGES],
}

impl FrameBuffer {
    const fn new() -> Self {
        Self {
            pages: [[0; WIDTH]; PAGES],
        }
    }

    fn clear_row(&mut self, row: usize) {
        for page in &mut self.pages[row * PAGES_PER_ROW..(row + 1) * PAGES_PER_ROW] {
            page.fill(0);
        }
    }
}

impl OriginDimensions for FrameBuffer {
    #[allow(clippy::cast_possible_truncation)]
    fn size(&self) -> Size {
        Size::new(WIDTH as u32, HEIGHT as u32)
    }
}

impl DrawTarget for FrameBuffer {
    type Color = BinaryColor;
    type Error = Infallible;

    fn draw_iter<P>(&mut self, pixels: P) -> Result<(), Self::Error>
    where
        P: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(point, color) in pixels {
            let (Ok(x), Ok(y)) = (usize::try_from(point.x), usize::try_from(point.y)) else {
                continue;
            };
            if x >= WIDTH || y >= HEIGHT {
                continue;
            }
            let bit = 1u8 << (y % 8);
            let byte = &mut self.pages[y / 8][x];
            if color.is_on() {
                *byte |= bit;
            } else {
                *byte &= !bit;
            }
        }
        Ok(())
    }
}

/// Four-row status display on the shared bus.
pub struct Ssd1306Display {
    device: DeviceHandle,
    frame: FrameBuffer,
    rows: [DisplayLine; DISPLAY_ROWS],
}

impl Ssd1306Display {
    pub const fn new(device: DeviceHandle) -> Self {
        Self {
            device,
            frame: FrameBuffer::new(),
            rows: [const { DisplayLine::new() }; DISPLAY_ROWS],
        }
    }

    /// Runs the controller power-up sequence and blanks the panel.
    pub fn init(&mut self) -> Result<(), BusError> {
        for command in INIT_SEQUENCE {
            self.device.write(&[CONTROL_COMMAND, *command])?;
        }
        self.clear()
    }

    fn flush_row(&mut self, row: usize) -> Result<(), BusError> {
        let first_page = row * PAGES_PER_ROW;
        #[allow(clippy::cast_possible_truncation)]
        let (start, end) = (first_page as u8, (first_page + PAGES_PER_ROW - 1) as u8);
        #[allow(clippy::cast_possible_truncation)]
        let last_column = (WIDTH - 1) as u8;
        self.device
            .write(&[CONTROL_COMMAND, 0x21, 0, last_column, 0x22, start, end])?;

        let mut payload = [0u8; WIDTH + 1];
        payload[0] = CONTROL_DATA;
        for page in &self.frame.pages[first_page..first_page + PAGES_PER_ROW] {
            payload[1..].copy_from_slice(page);
            self.device.write(&payload)?;
        }
        Ok(())
    }
}

impl StatusDisplay for Ssd1306Display {
    type Error = BusError;

    fn clear(&mut self) -> Result<(), Self::Error> {
        for line in &mut self.rows {
            line.clear();
        }
        for row in 0..DISPLAY_ROWS {
            self.frame.clear_row(row);
            self.flush_row(row)?;
        }
        Ok(())
    }

    fn write_line(&mut self, row: u8, text: &str) -> Result<(), Self::Error> {
        let row = usize::from(row);
        if row >= DISPLAY_ROWS {
            return Ok(());
        }
        let line = truncate_line(text);
        self.frame.clear_row(row);
        let style = MonoTextStyle::new(&FONT_6X10, BinaryColor::On);
        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        let top = row as i32 * ROW_PITCH;
        let _ = Text::with_baseline(&line, Point::new(0, top), style, Baseline::Top)
            .draw(&mut self.frame);
        self.rows[row] = line;
        self.flush_row(row)
    }

    fn capture(&mut self) -> Result<DisplaySnapshot, Self::Error> {
        Ok(DisplaySnapshot::from_rows(
            self.rows.iter().map(DisplayLine::as_str),
        ))
    }
}
