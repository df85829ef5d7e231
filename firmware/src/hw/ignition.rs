#![cfg(target_os = "none")]

use core::convert::Infallible;

use detonator_core::detonation::Ignition;
use embassy_stm32::gpio::Output;

/// Push-pull gate driving the ignition transistor, active high.
pub struct PulseIgnition<'d> {
    pin: Output<'d>,
}

impl<'d> PulseIgnition<'d> {
    /// Wraps `pin`, forcing it low first.
    pub fn new(mut pin: Output<'d>) -> Self {
        pin.set_low();
        Self { pin }
    }
}

impl Ignition for PulseIgnition<'_> {
    type Error = Infallible;

    fn set_active(&mut self, active: bool) -> Result<(), Self::Error> {
        if active {
            self.pin.set_high();
        } else {
            self.pin.set_low();
        }
        Ok(())
    }
}
