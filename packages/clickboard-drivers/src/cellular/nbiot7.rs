//! NB IoT 7 Click, an NB-IoT board.
//!
//! # Hardware Description
//!
//! The module starts after an 800 ms pulse on its power key. Power saving mode is configured
//! with `+CPSMS` from 3GPP TS 27.007. The requested periodic TAU (T3412 extended) and active
//! time (T3324) are passed as 8-bit strings in the GPRS Timer 3 and GPRS Timer 2 formats of
//! TS 24.008: a 3-bit unit followed by a 5-bit multiplier.

use core::{
    fmt::Write as _,
    ops::{Deref, DerefMut},
};

use clickboard_core::at::{AtCommand, AtError, TextBuffer};
use embedded_hal::{delay::DelayNs, digital::OutputPin};
use embedded_io::{Read, ReadReady, Write};

use super::{COMMAND_TIMEOUT_MS, CellularError, CellularModem};

/// How long the power key is held to switch the module on.
pub const POWER_KEY_MS: u32 = 800;

/// Budget for the module to answer after power on.
pub const BOOT_TIMEOUT_MS: u32 = 10_000;

const MAX_MULTIPLIER: u32 = 0x1F;

// (unit code, seconds per step), shortest step first.
const TIMER3_UNITS: [(u8, u32); 7] = [
    (0b011, 2),
    (0b100, 30),
    (0b101, 60),
    (0b000, 600),
    (0b001, 3_600),
    (0b010, 36_000),
    (0b110, 1_152_000),
];

const TIMER2_UNITS: [(u8, u32); 3] = [(0b000, 2), (0b001, 60), (0b010, 360)];

fn encode_timer(units: &[(u8, u32)], seconds: u32) -> Option<u8> {
    units.iter().find_map(|&(unit, step)| {
        let multiplier = seconds.div_ceil(step);
        (multiplier <= MAX_MULTIPLIER).then_some((unit << 5) | multiplier as u8)
    })
}

/// Encodes `seconds` as a GPRS Timer 3 value, rounding up to the next representable duration.
///
/// Returns [`None`] if `seconds` is longer than the timer can express.
#[must_use]
pub fn gprs_timer3(seconds: u32) -> Option<u8> {
    encode_timer(&TIMER3_UNITS, seconds)
}

/// Encodes `seconds` as a GPRS Timer 2 value, rounding up to the next representable duration.
///
/// Returns [`None`] if `seconds` is longer than 186 minutes.
#[must_use]
pub fn gprs_timer2(seconds: u32) -> Option<u8> {
    encode_timer(&TIMER2_UNITS, seconds)
}

/// Requested power saving mode timers.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct PsmTimers {
    /// Periodic tracking area update interval (T3412 extended), in seconds.
    pub tau_s: u32,
    /// Time the module stays reachable after going idle (T3324), in seconds.
    pub active_s: u32,
}

/// An NB IoT 7 Click.
#[derive(Debug)]
pub struct NbIot7<U, D, PWR, RST> {
    modem: CellularModem<U, D, PWR, RST>,
}

impl<U, D, PWR, RST> NbIot7<U, D, PWR, RST>
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

    /// Requests power saving mode with `timers`, or disables it when `timers` is [`None`].
    ///
    /// # Errors
    ///
    /// - [`CellularError::InvalidArgument`] if a timer is too long to encode.
    /// - See [`CellularModem::command`].
    pub fn set_psm(&mut self, timers: Option<PsmTimers>) -> Result<(), CellularError> {
        let mut value = TextBuffer::<32>::new();
        let written = match timers {
            Some(timers) => {
                let tau = gprs_timer3(timers.tau_s).ok_or(CellularError::InvalidArgument)?;
                let active =
                    gprs_timer2(timers.active_s).ok_or(CellularError::InvalidArgument)?;
                write!(value, "1,,,\"{tau:08b}\",\"{active:08b}\"")
            }
            None => write!(value, "0"),
        };
        written.map_err(|_| AtError::Format)?;

        log::debug!("nbiot7: psm {}", value.as_str());
        self.modem
            .command(AtCommand::Set("AT+CPSMS", value.as_str()), COMMAND_TIMEOUT_MS)
    }

    /// Returns the UART, the delay and the pins.
    pub fn release(self) -> (U, D, PWR, RST) {
        self.modem.release()
    }
}

impl<U, D, PWR, RST> Deref for NbIot7<U, D, PWR, RST> {
    type Target = CellularModem<U, D, PWR, RST>;

    fn deref(&self) -> &Self::Target {
        &self.modem
    }
}

impl<U, D, PWR, RST> DerefMut for NbIot7<U, D, PWR, RST> {
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
    fn timer3_picks_the_finest_unit() {
        assert_eq!(gprs_timer3(60), Some(0b011_11110));
        assert_eq!(gprs_timer3(3_600), Some(0b000_00110));
        assert_eq!(gprs_timer3(24 * 3_600), Some(0b001_11000));
        assert_eq!(gprs_timer3(31 * 1_152_000 + 1), None);
    }

    #[test]
    fn timer2_rounds_up() {
        assert_eq!(gprs_timer2(0), Some(0));
        assert_eq!(gprs_timer2(61), Some(0b000_11111));
        assert_eq!(gprs_timer2(63), Some(0b001_00010));
        assert_eq!(gprs_timer2(186 * 60), Some(0b010_11111));
        assert_eq!(gprs_timer2(186 * 60 + 1), None);
    }

    #[test]
    fn psm_request_is_encoded() {
        let uart = MockUart::new();
        uart.reply_on_flush(b"OK\r\n");
        uart.reply_on_flush(b"OK\r\n");
        let mut click = NbIot7::new(uart.clone(), MockDelay::new(), NoPin, NoPin);

        click
            .set_psm(Some(PsmTimers {
                tau_s: 3_600,
                active_s: 60,
            }))
            .unwrap();
        click.set_psm(None).unwrap();
        assert_eq!(
            uart.written_str(),
            "AT+CPSMS=1,,,\"00000110\",\"00011110\"\rAT+CPSMS=0\r"
        );
    }
}
