//! LTE IoT 11 Click, an LTE Cat-M1/NB-IoT board with a Quectel LPWA module.
//!
//! # Hardware Description
//!
//! The module starts after its power key is held for about a second and accepts commands once
//! it answers `AT`. Bands are selected with the vendor command `AT+QCFG="band"`, which takes one
//! hexadecimal bit mask per radio access technology (bit `n - 1` enables band `n`).

use core::{
    fmt::Write as _,
    ops::{Deref, DerefMut},
};

use clickboard_core::at::{AtCommand, AtError, TextBuffer};
use embedded_hal::{delay::DelayNs, digital::OutputPin};
use embedded_io::{Read, ReadReady, Write};

use super::{COMMAND_TIMEOUT_MS, CellularError, CellularModem};

/// How long the power key is held to switch the module on.
pub const POWER_KEY_MS: u32 = 1_000;

/// Budget for the module to answer after power on.
pub const BOOT_TIMEOUT_MS: u32 = 10_000;

/// Builds the band bit mask for the given LTE band numbers.
///
/// Returns [`None`] if a band is 0 or above 128.
#[must_use]
pub fn band_mask(bands: &[u8]) -> Option<u128> {
    bands.iter().try_fold(0u128, |mask, &band| {
        let bit = band.checked_sub(1).filter(|bit| *bit < 128)?;
        Some(mask | (1 << bit))
    })
}

/// An LTE IoT 11 Click.
#[derive(Debug)]
pub struct LteIot11<U, D, PWR, RST> {
    modem: CellularModem<U, D, PWR, RST>,
}

impl<U, D, PWR, RST> LteIot11<U, D, PWR, RST>
where
    U: Read + ReadReady + Write,
    D: DelayNs,
    PWR: OutputPin,
    RST: OutputPin,
{
    /// Creates a driver.
    pub const fn new(uart: U, delay: D, pwr: PWR, rst: RST) -> Self {
        Self {
            modem: CellularModem::new(uart, delay, pwr, rst),
        }
    }

    /// Switches the module on and waits until it answers.
    ///
    /// # Errors
    ///
    /// See [`CellularModem::power_key`] and [`CellularModem::wait_ready`].
    pub fn power_on(&mut self) -> Result<(), CellularError> {
        self.modem.power_key(POWER_KEY_MS)?;
        self.modem.wait_ready(BOOT_TIMEOUT_MS)
    }

    /// Restricts the module to the given LTE-M and NB-IoT bands. An empty list keeps the current
    /// setting for that technology.
    ///
    /// # Errors
    ///
    /// - [`CellularError::InvalidArgument`] if a band number is not valid.
    /// - See [`CellularModem::command`].
    pub fn set_band(&mut self, lte_m: &[u8], nb_iot: &[u8]) -> Result<(), CellularError> {
        let lte_m = band_mask(lte_m).ok_or(CellularError::InvalidArgument)?;
        let nb_iot = band_mask(nb_iot).ok_or(CellularError::InvalidArgument)?;

        let mut value = TextBuffer::<96>::new();
        write!(value, "\"band\",0,{lte_m:X},{nb_iot:X}").map_err(|_| AtError::Format)?;
        log::debug!("lteiot11: bands {}", value.as_str());
        self.modem
            .command(AtCommand::Set("AT+QCFG", value.as_str()), COMMAND_TIMEOUT_MS)
    }

    /// Returns the UART, the delay and the pins.
    pub fn release(self) -> (U, D, PWR, RST) {
        self.modem.release()
    }
}

impl<U, D, PWR, RST> Deref for LteIot11<U, D, PWR, RST> {
    type Target = CellularModem<U, D, PWR, RST>;

    fn deref(&self) -> &Self::Target {
        &self.modem
    }
}

impl<U, D, PWR, RST> DerefMut for LteIot11<U, D, PWR, RST> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.modem
    }
}

#[cfg(test)]
mod test {
    use clickboard_core::{
        mock::{MockDelay, MockPin, MockUart},
        pin::NoPin,
    };

    use super::*;

    #[test]
    fn band_numbers_map_to_bits() {
        assert_eq!(band_mask(&[3, 8, 20]), Some(0x80084));
        assert_eq!(band_mask(&[]), Some(0));
        assert_eq!(band_mask(&[0]), None);
        assert_eq!(band_mask(&[128]), Some(1 << 127));
    }

    #[test]
    fn set_band_writes_hex_masks() {
        let uart = MockUart::new();
        uart.reply_on_flush(b"OK\r\n");
        let mut click = LteIot11::new(uart.clone(), MockDelay::new(), NoPin, NoPin);

        click.set_band(&[3, 20], &[20]).unwrap();
        assert_eq!(uart.written_str(), "AT+QCFG=\"band\",0,80004,80000\r");
        assert_eq!(
            click.set_band(&[0], &[]),
            Err(CellularError::InvalidArgument)
        );
    }

    #[test]
    fn power_on_holds_key_for_a_second() {
        let uart = MockUart::new();
        uart.reply_on_flush(b"OK\r\n");
        let pwr = MockPin::new();
        let delay = MockDelay::new();
        let mut click = LteIot11::new(uart, delay.clone(), pwr.clone(), NoPin);

        click.power_on().unwrap();
        assert_eq!(pwr.history(), vec![true, false]);
        assert_eq!(delay.elapsed_ms(), u64::from(POWER_KEY_MS));
    }
}
