//! LTE IoT 19 Click, an LTE Cat-M1/NB-IoT board.
//!
//! # Hardware Description
//!
//! The module starts after a 500 ms pulse on its power key. Extended discontinuous reception
//! (eDRX) is configured with `+CEDRXS` from 3GPP TS 27.007, which takes the requested cycle as a
//! 4-bit string coded per TS 24.008.

use core::{
    fmt::Write as _,
    ops::{Deref, DerefMut},
};

use clickboard_core::at::{AtCommand, AtError, TextBuffer};
use embedded_hal::{delay::DelayNs, digital::OutputPin};
use embedded_io::{Read, ReadReady, Write};

use super::{COMMAND_TIMEOUT_MS, CellularError, CellularModem};

/// How long the power key is held to switch the module on.
pub const POWER_KEY_MS: u32 = 500;

/// Budget for the module to answer after power on.
pub const BOOT_TIMEOUT_MS: u32 = 10_000;

/// Radio access technology an eDRX setting applies to.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[repr(u8)]
pub enum AccessTechnology {
    /// LTE Cat-M1.
    LteM = 4,
    /// NB-IoT.
    NbIot = 5,
}

/// An LTE IoT 19 Click.
#[derive(Debug)]
pub struct LteIot19<U, D, PWR, RST> {
    modem: CellularModem<U, D, PWR, RST>,
}

impl<U, D, PWR, RST> LteIot19<U, D, PWR, RST>
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

    /// Requests eDRX with the given 4-bit cycle value, or disables it when `cycle` is [`None`].
    ///
    /// # Errors
    ///
    /// - [`CellularError::InvalidArgument`] if `cycle` does not fit in 4 bits.
    /// - See [`CellularModem::command`].
    pub fn set_edrx(
        &mut self,
        act: AccessTechnology,
        cycle: Option<u8>,
    ) -> Result<(), CellularError> {
        let mut value = TextBuffer::<16>::new();
        let written = match cycle {
            Some(cycle) if cycle > 0x0F => return Err(CellularError::InvalidArgument),
            Some(cycle) => write!(value, "1,{},\"{cycle:04b}\"", act as u8),
            None => write!(value, "0,{}", act as u8),
        };
        written.map_err(|_| AtError::Format)?;

        self.modem
            .command(AtCommand::Set("AT+CEDRXS", value.as_str()), COMMAND_TIMEOUT_MS)
    }

    /// Returns the UART, the delay and the pins.
    pub fn release(self) -> (U, D, PWR, RST) {
        self.modem.release()
    }
}

impl<U, D, PWR, RST> Deref for LteIot19<U, D, PWR, RST> {
    type Target = CellularModem<U, D, PWR, RST>;

    fn deref(&self) -> &Self::Target {
        &self.modem
    }
}

impl<U, D, PWR, RST> DerefMut for LteIot19<U, D, PWR, RST> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.modem
    }
}

#[cfg(test)]
mod test {
    use clickboard_core::{
        mock::{MockDelay, MockUart},
        pin::NoPin,
    };

    use super::*;

    #[test]
    fn edrx_cycle_is_a_bit_string() {
        let uart = MockUart::new();
        uart.reply_on_flush(b"OK\r\n");
        uart.reply_on_flush(b"OK\r\n");
        let mut click = LteIot19::new(uart.clone(), MockDelay::new(), NoPin, NoPin);

        click.set_edrx(AccessTechnology::LteM, Some(5)).unwrap();
        click.set_edrx(AccessTechnology::NbIot, None).unwrap();
        assert_eq!(
            uart.written_str(),
            "AT+CEDRXS=1,4,\"0101\"\rAT+CEDRXS=0,5\r"
        );
    }

    #[test]
    fn oversized_cycle_is_rejected() {
        let uart = MockUart::new();
        let mut click = LteIot19::new(uart.clone(), MockDelay::new(), NoPin, NoPin);

        assert_eq!(
            click.set_edrx(AccessTechnology::LteM, Some(16)),
            Err(CellularError::InvalidArgument)
        );
        assert!(uart.written().is_empty());
    }

    #[test]
    fn shared_commands_are_reachable() {
        let uart = MockUart::new();
        uart.reply_on_flush(b"\r\n+CSQ: 10,0\r\n\r\nOK\r\n");
        let mut click = LteIot19::new(uart, MockDelay::new(), NoPin, NoPin);

        assert_eq!(click.signal_quality().unwrap().dbm(), Some(-93));
    }
}
