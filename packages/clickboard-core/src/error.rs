//! Bus errors and error accumulation.
//!
//! Every driver in the workspace reports HAL failures through [`BusError`], which keeps the
//! HAL's error *kind* and drops the concrete error type. This lets driver error enums stay
//! non-generic and `Copy`, the same way a C driver would return a single status code.

use embedded_hal::{digital, i2c, spi};
use snafu::Snafu;

/// A failure reported by the underlying bus or GPIO implementation.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Snafu)]
pub enum BusError {
    /// An I2C transfer failed.
    #[snafu(display("I2C transfer failed: {kind:?}"))]
    I2c {
        /// The kind of failure reported by the HAL.
        kind: i2c::ErrorKind,
    },

    /// An SPI transfer failed.
    #[snafu(display("SPI transfer failed: {kind:?}"))]
    Spi {
        /// The kind of failure reported by the HAL.
        kind: spi::ErrorKind,
    },

    /// Driving or sampling a GPIO line failed.
    #[snafu(display("GPIO access failed: {kind:?}"))]
    Pin {
        /// The kind of failure reported by the HAL.
        kind: digital::ErrorKind,
    },

    /// A UART read or write failed.
    #[snafu(display("UART transfer failed: {kind:?}"))]
    Uart {
        /// The kind of failure reported by the HAL.
        kind: embedded_io::ErrorKind,
    },
}

impl BusError {
    /// Converts an I2C error from any HAL.
    pub fn i2c(error: impl i2c::Error) -> Self {
        Self::I2c { kind: error.kind() }
    }

    /// Converts an SPI error from any HAL.
    pub fn spi(error: impl spi::Error) -> Self {
        Self::Spi { kind: error.kind() }
    }

    /// Converts a GPIO error from any HAL.
    pub fn pin(error: impl digital::Error) -> Self {
        Self::Pin { kind: error.kind() }
    }

    /// Converts a UART error from any `embedded-io` implementation.
    pub fn uart(error: impl embedded_io::Error) -> Self {
        Self::Uart { kind: error.kind() }
    }

    /// Returns `true` if the error is an I2C address or data NAK.
    ///
    /// Devices that are busy writing their internal EEPROM commonly NAK their own address,
    /// so drivers poll on this condition.
    #[must_use]
    pub const fn is_nak(&self) -> bool {
        matches!(
            self,
            Self::I2c {
                kind: i2c::ErrorKind::NoAcknowledge(_)
            }
        )
    }
}

/// Runs a fixed sequence of fallible steps without stopping at the first failure.
///
/// Device configuration sequences write every register in the sequence even if an earlier
/// write failed, and report a single failure at the end. [`Accumulator::finish`] returns the
/// *first* recorded error, so callers learn that the sequence failed but not which step
/// failed, or whether later steps failed too.
///
/// ```
/// use clickboard_core::Accumulator;
///
/// let mut acc = Accumulator::new();
/// acc.record(Ok::<(), u8>(()));
/// acc.record(Err::<(), u8>(2));
/// acc.record(Err::<(), u8>(3));
/// assert_eq!(acc.finish(), Err(2));
/// ```
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Accumulator<E> {
    first: Option<E>,
}

impl<E> Accumulator<E> {
    /// Creates an accumulator with no recorded failures.
    #[must_use]
    pub const fn new() -> Self {
        Self { first: None }
    }

    /// Records the outcome of one step.
    pub fn record<T>(&mut self, result: Result<T, E>) {
        if let Err(error) = result {
            if self.first.is_none() {
                self.first = Some(error);
            }
        }
    }

    /// Returns `true` if any recorded step failed.
    #[must_use]
    pub const fn failed(&self) -> bool {
        self.first.is_some()
    }

    /// Finishes the sequence.
    ///
    /// # Errors
    ///
    /// Returns the first error passed to [`Accumulator::record`], if any.
    pub fn finish(self) -> Result<(), E> {
        match self.first {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl<E> Default for Accumulator<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use embedded_hal::i2c::NoAcknowledgeSource;

    use super::*;

    #[test]
    fn accumulator_keeps_first_error() {
        let mut acc = Accumulator::new();
        acc.record(Ok::<u8, &str>(1));
        assert!(!acc.failed());
        acc.record(Err::<(), _>("first"));
        acc.record(Err::<(), _>("second"));
        assert!(acc.failed());
        assert_eq!(acc.finish(), Err("first"));
    }

    #[test]
    fn empty_accumulator_succeeds() {
        assert_eq!(Accumulator::<()>::new().finish(), Ok(()));
    }

    #[test]
    fn nak_detection() {
        let nak = BusError::I2c {
            kind: i2c::ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address),
        };
        let bus = BusError::I2c {
            kind: i2c::ErrorKind::Bus,
        };
        assert!(nak.is_nak());
        assert!(!bus.is_nak());
    }
}
