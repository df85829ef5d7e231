//! Peripheral adapters that implement the `detonator-core` collaborator traits
//! on top of Embassy drivers.
//!
//! The motion sensor and the display share I2C1. Both adapters hold a
//! reference to the same [`SharedBus`]; every transaction borrows the bus for
//! its duration only, so the two never interleave bytes on the wire.

#![cfg(target_os = "none")]

use core::cell::RefCell;
use core::fmt;

use embassy_stm32::i2c::{self, I2c};
use embassy_stm32::mode::Blocking;

pub mod display;
pub mod ignition;
pub mod mpu6050;

pub use display::Ssd1306Display;
pub use ignition::PulseIgnition;
pub use mpu6050::{EmbassyClock, Mpu6050};

/// Blocking I2C1 driver shared between the sensor and the display.
pub type SharedBus = RefCell<I2c<'static, Blocking>>;

/// Failure of a single transaction on the shared bus.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BusError {
    /// The peripheral reported a NACK, arbitration loss, or timeout.
    Transfer(i2c::Error),
    /// Another adapter still holds the bus.
    Busy,
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusError::Transfer(err) => write!(f, "i2c transfer failed: {err:?}"),
            BusError::Busy => f.write_str("i2c bus busy"),
        }
    }
}

impl defmt::Format for BusError {
    fn format(&self, fmt: defmt::Formatter<'_>) {
        match self {
            BusError::Transfer(err) => defmt::write!(fmt, "Transfer({})", err),
            BusError::Busy => defmt::write!(fmt, "Busy"),
        }
    }
}

/// One device address on the shared bus.
#[derive(Copy, Clone)]
pub struct DeviceHandle {
    bus: &'static SharedBus,
    address: u8,
}

impl DeviceHandle {
    pub const fn new(bus: &'static SharedBus, address: u8) -> Self {
        Self { bus, address }
    }

    /// Writes raw bytes in a single transaction.
    pub fn write(&self, bytes: &[u8]) -> Result<(), BusError> {
        let mut bus = self.bus.try_borrow_mut().map_err(|_| BusError::Busy)?;
        bus.blocking_write(self.address, bytes)
            .map_err(BusError::Transfer)
    }

    /// Writes one register.
    pub fn write_reg(&self, register: u8, value: u8) -> Result<(), BusError> {
        self.write(&[register, value])
    }

    /// Reads `buf.len()` bytes starting at `register`.
    pub fn read_regs(&self, register: u8, buf: &mut [u8]) -> Result<(), BusError> {
        let mut bus = self.bus.try_borrow_mut().map_err(|_| BusError::Busy)?;
        bus.blocking_write_read(self.address, &[register], buf)
            .map_err(BusError::Transfer)
    }

    /// Reads one register.
    pub fn read_reg(&self, register: u8) -> Result<u8, BusError> {
        let mut value = [0u8; 1];
        self.read_regs(register, &mut value)?;
        Ok(value[0])
    }
}
