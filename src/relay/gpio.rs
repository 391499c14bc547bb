//! rppal-backed output lines for Raspberry Pi class boards

use super::{Level, OutputLine, RelayError};
use rppal::gpio::{Gpio, OutputPin};
use tracing::debug;

/// A BCM-numbered GPIO pin configured as an output
pub struct GpioLine {
    pin: OutputPin,
}

impl GpioLine {
    /// Claims `pin` and drives it to `initial` before returning.
    pub fn open(gpio: &Gpio, pin: u8, initial: Level) -> Result<Self, RelayError> {
        let pin = gpio.get(pin)?;
        let mut output = match initial {
            Level::High => pin.into_output_high(),
            Level::Low => pin.into_output_low(),
        };
        // keep the relay where it is if the process exits
        output.set_reset_on_drop(false);
        debug!("Claimed GPIO {} as output ({:?})", output.pin(), initial);
        Ok(Self { pin: output })
    }
}

impl OutputLine for GpioLine {
    fn drive(&mut self, level: Level) {
        match level {
            Level::High => self.pin.set_high(),
            Level::Low => self.pin.set_low(),
        }
    }

    fn level(&self) -> Level {
        if self.pin.is_set_high() {
            Level::High
        } else {
            Level::Low
        }
    }
}
