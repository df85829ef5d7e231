//! MPU6050 register access for the FIFO reader.

#![cfg(target_os = "none")]

use core::fmt;

use detonator_core::config::FIFO_MAX_TRANSFER;
use detonator_core::fifo::{FifoRegisters, MicrosClock};
use embassy_time::Instant;

use super::{BusError, DeviceHandle};

const REG_USER_CTRL: u8 = 0x6A;
const REG_PWR_MGMT_1: u8 = 0x6B;
const REG_FIFO_COUNT_H: u8 = 0x72;
const REG_FIFO_R_W: u8 = 0x74;
const REG_WHO_AM_I: u8 = 0x75;

const USER_CTRL_FIFO_EN: u8 = 1 << 6;
const USER_CTRL_FIFO_RESET: u8 = 1 << 2;

/// Identity this driver was written against.
pub const EXPECTED_WHO_AM_I: u8 = 0x70;

#[derive(Copy, Clone, Debug, Eq, PartialEq, defmt::Format)]
pub enum MpuError {
    Bus(BusError),
    /// `WHO_AM_I` returned something other than [`EXPECTED_WHO_AM_I`].
    Identity { found: u8 },
}

impl From<BusError> for MpuError {
    fn from(err: BusError) -> Self {
        MpuError::Bus(err)
    }
}

impl fmt::Display for MpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MpuError::Bus(err) => write!(f, "{err}"),
            MpuError::Identity { found } => {
                write!(f, "unexpected WHO_AM_I {found:#04x} (want {EXPECTED_WHO_AM_I:#04x})")
            }
        }
    }
}

/// Motion sensor on the shared bus.
pub struct Mpu6050 {
    device: DeviceHandle,
}

impl Mpu6050 {
    pub const fn new(device: DeviceHandle) -> Self {
        Self { device }
    }

    /// Checks the identity register.
    pub fn verify_identity(&mut self) -> Result<(), MpuError> {
        let found = self.device.read_reg(REG_WHO_AM_I)?;
        if found == EXPECTED_WHO_AM_I {
            Ok(())
        } else {
            Err(MpuError::Identity { found })
        }
    }

    /// Wakes the sensor and sets `USER_CTRL.FIFO_EN`.
    ///
    /// No FIFO source or DMP program is configured here, so the FIFO stays
    /// empty and reads report no data until one is loaded.
    pub fn enable_fifo(&mut self) -> Result<(), MpuError> {
        self.device.write_reg(REG_PWR_MGMT_1, 0)?;
        let user_ctrl = self.device.read_reg(REG_USER_CTRL)?;
        self.device
            .write_reg(REG_USER_CTRL, user_ctrl | USER_CTRL_FIFO_EN)?;
        Ok(())
    }
}

impl FifoRegisters for Mpu6050 {
    type Error = BusError;

    fn fifo_count(&mut self) -> Result<u16, Self::Error> {
        let mut raw = [0u8; 2];
        self.device.read_regs(REG_FIFO_COUNT_H, &mut raw)?;
        Ok(u16::from_be_bytes(raw))
    }

    fn read_fifo(&mut self, buf: &mut [u8]) -> Result<(), Self::Error> {
        for chunk in buf.chunks_mut(FIFO_MAX_TRANSFER) {
            self.device.read_regs(REG_FIFO_R_W, chunk)?;
        }
        Ok(())
    }

    fn reset_fifo(&mut self) -> Result<(), Self::Error> {
        let user_ctrl = self.device.read_reg(REG_USER_CTRL)?;
        self.device
            .write_reg(REG_USER_CTRL, user_ctrl | USER_CTRL_FIFO_RESET)
    }
}

/// [`MicrosClock`] backed by the Embassy time driver.
#[derive(Copy, Clone, Default)]
pub struct EmbassyClock;

impl MicrosClock for EmbassyClock {
    fn now_micros(&self) -> u64 {
        Instant::now().as_micros()
    }
}
