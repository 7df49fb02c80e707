//! Control line helpers.
//!
//! Click boards route a few GPIO lines besides the bus: reset, enable, power key, interrupt.
//! Boards are often used with some of them left unconnected, in which case the driver is
//! given a [`NoPin`].

use core::convert::Infallible;

use embedded_hal::{
    delay::DelayNs,
    digital::{ErrorType, InputPin, OutputPin, PinState},
};

use crate::BusError;

/// A control line that is not wired.
///
/// Writes are ignored and reads report a low level.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub struct NoPin;

impl ErrorType for NoPin {
    type Error = Infallible;
}

impl OutputPin for NoPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl InputPin for NoPin {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(false)
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// Drives `pin` to `state`.
///
/// # Errors
///
/// Returns a [`BusError::Pin`] if the HAL fails to drive the line.
pub fn set<P: OutputPin>(pin: &mut P, state: PinState) -> Result<(), BusError> {
    pin.set_state(state).map_err(BusError::pin)
}

/// Samples `pin`, returning `true` for a high level.
///
/// # Errors
///
/// Returns a [`BusError::Pin`] if the HAL fails to read the line.
pub fn is_high<P: InputPin>(pin: &mut P) -> Result<bool, BusError> {
    pin.is_high().map_err(BusError::pin)
}

/// Holds `pin` at `active` for `ms` milliseconds, then releases it to the opposite level.
///
/// This is the shape of every reset and power-key sequence in the driver set.
///
/// # Errors
///
/// Returns a [`BusError::Pin`] if the HAL fails to drive the line.
pub fn pulse<P: OutputPin, D: DelayNs>(
    pin: &mut P,
    delay: &mut D,
    active: PinState,
    ms: u32,
) -> Result<(), BusError> {
    set(pin, active)?;
    delay.delay_ms(ms);
    set(pin, !active)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mock::{MockDelay, MockPin};

    #[test]
    fn pulse_toggles_and_waits() {
        let mut pin = MockPin::new();
        let mut delay = MockDelay::new();

        pulse(&mut pin, &mut delay, PinState::Low, 100).unwrap();

        assert_eq!(pin.history(), vec![false, true]);
        assert_eq!(delay.elapsed_ms(), 100);
    }

    #[test]
    fn unconnected_pin_reads_low() {
        assert!(!is_high(&mut NoPin).unwrap());
        assert!(set(&mut NoPin, PinState::High).is_ok());
    }
}
