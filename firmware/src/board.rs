//! Bus addresses for the detonator board (STM32G0B1KE).
//!
//! Pins are bound by peripheral type in `runtime::main`; input names and
//! trigger edges come from `detonator_core::input::ALL_INPUTS`.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

/// I2C bus clock.
pub const I2C_FREQUENCY_HZ: u32 = 400_000;

/// MPU6050 address with AD0 tied low.
pub const MPU6050_ADDRESS: u8 = 0x68;

/// SSD1306 address with SA0 tied low.
pub const SSD1306_ADDRESS: u8 = 0x3C;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bus_devices_have_distinct_addresses() {
        assert_ne!(MPU6050_ADDRESS, SSD1306_ADDRESS);
        assert!(MPU6050_ADDRESS < 0x80 && SSD1306_ADDRESS < 0x80);
    }
}
