//! XBee 3 Click, a Digi XBee 3 RF module (Zigbee, 802.15.4 or DigiMesh).
//!
//! # Hardware Description
//!
//! The module talks to the host over UART. In transparent mode everything written to the UART
//! is sent over the air, and the module is configured by switching to command mode: the host
//! stays silent for the guard time, sends `+++`, stays silent again and receives `OK\r`. In
//! command mode settings are read with `AT<cmd>\r` and written with `AT<cmd> <value>\r`;
//! `ATCN` returns to transparent mode.
//!
//! In API mode (`ATAP 1`) the UART carries [`frame`]s instead.
//!
//! The RST line is active low.

pub mod frame;

use core::fmt::Write as _;

use clickboard_core::{
    BusError,
    at::{AtCommand, AtError, AtPort, ResponseTokens, TextBuffer},
    pin,
};
use embedded_hal::{
    delay::DelayNs,
    digital::{OutputPin, PinState},
};
use embedded_io::{Read, ReadReady, Write};
pub use frame::{ApiFrame, ApiFrameParser, FrameError};
use snafu::Snafu;

/// Default command mode guard time.
pub const DEFAULT_GUARD_TIME_MS: u32 = 1_000;

/// Budget for a reply in command mode.
pub const COMMAND_TIMEOUT_MS: u32 = 1_000;

/// A setting read in command mode.
pub type Value = TextBuffer<32>;

/// UART framing selected with `ATAP`.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[repr(u8)]
pub enum ApiMode {
    /// Transparent mode.
    Transparent = 0,
    /// API mode without escaping.
    Api = 1,
    /// API mode with escaped control bytes.
    ApiEscaped = 2,
}

/// Device configuration.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Config {
    /// Command mode guard time, as configured with `ATGT`. Defaults to
    /// [`DEFAULT_GUARD_TIME_MS`].
    pub guard_time_ms: u32,
}

impl Config {
    /// Sets the guard time.
    #[must_use]
    pub const fn with_guard_time_ms(mut self, guard_time_ms: u32) -> Self {
        self.guard_time_ms = guard_time_ms;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            guard_time_ms: DEFAULT_GUARD_TIME_MS,
        }
    }
}

/// An XBee 3 Click.
#[derive(Debug)]
pub struct Xbee3<U, D, RST> {
    port: AtPort<U, D>,
    rst: RST,
    guard_time_ms: u32,
}

impl<U, D, RST> Xbee3<U, D, RST>
where
    U: Read + ReadReady + Write,
    D: DelayNs,
    RST: OutputPin,
{
    /// Creates a driver.
    pub const fn new(uart: U, delay: D, rst: RST, config: Config) -> Self {
        Self {
            port: AtPort::new(uart, delay, ResponseTokens::STANDARD),
            rst,
            guard_time_ms: config.guard_time_ms,
        }
    }

    /// Resets the module through RST.
    ///
    /// # Errors
    ///
    /// Returns [`Xbee3Error::Bus`] if the pin cannot be driven.
    pub fn reset(&mut self) -> Result<(), Xbee3Error> {
        pin::pulse(&mut self.rst, self.port.delay_mut(), PinState::Low, 100)?;
        self.port.delay_mut().delay_ms(500);
        self.port.clear();
        Ok(())
    }

    /// Switches from transparent mode to command mode.
    ///
    /// # Errors
    ///
    /// - [`Xbee3Error::At`] if the module does not answer `OK`.
    /// - [`Xbee3Error::Bus`] if the UART fails.
    pub fn enter_command_mode(&mut self) -> Result<(), Xbee3Error> {
        let guard = self.guard_time_ms;
        self.port.delay_mut().delay_ms(guard);
        self.port.clear();
        self.port.send_raw(b"+++")?;
        self.port.wait_response(guard + COMMAND_TIMEOUT_MS)?;
        Ok(())
    }

    /// Leaves command mode (`ATCN`).
    ///
    /// # Errors
    ///
    /// See [`Xbee3::at_command`].
    pub fn exit_command_mode(&mut self) -> Result<(), Xbee3Error> {
        self.at_command("CN")
    }

    /// Runs a command that takes no parameter and answers `OK`, such as `WR`.
    ///
    /// # Errors
    ///
    /// - [`Xbee3Error::At`] if the module answers `ERROR` or not at all.
    /// - [`Xbee3Error::Bus`] if the UART fails.
    pub fn at_command(&mut self, cmd: &str) -> Result<(), Xbee3Error> {
        let line = command_line(cmd, None)?;
        self.port
            .command(AtCommand::Run(line.as_str()), COMMAND_TIMEOUT_MS)?;
        Ok(())
    }

    /// Reads setting `cmd` (for example `"NI"`).
    ///
    /// # Errors
    ///
    /// - [`Xbee3Error::At`] if the module answers `ERROR`, nothing, or a value that does not
    ///   fit a [`Value`].
    /// - [`Xbee3Error::Bus`] if the UART fails.
    pub fn at_get(&mut self, cmd: &str) -> Result<Value, Xbee3Error> {
        let line = command_line(cmd, None)?;
        self.port.send(AtCommand::Run(line.as_str()))?;
        self.port.wait_for("\r", COMMAND_TIMEOUT_MS)?;

        let reply = self
            .port
            .response()
            .lines()
            .next()
            .ok_or(AtError::UnexpectedResponse)?;
        if reply == "ERROR" {
            return Err(AtError::Command.into());
        }

        let mut value = Value::new();
        value.write_str(reply).map_err(|_| AtError::Format)?;
        Ok(value)
    }

    /// Writes setting `cmd`. The new value is active after [`Xbee3::apply_changes`] and
    /// survives a reset after [`Xbee3::write_settings`].
    ///
    /// # Errors
    ///
    /// See [`Xbee3::at_command`].
    pub fn at_set(&mut self, cmd: &str, value: &str) -> Result<(), Xbee3Error> {
        let line = command_line(cmd, Some(value))?;
        self.port
            .command(AtCommand::Run(line.as_str()), COMMAND_TIMEOUT_MS)?;
        Ok(())
    }

    /// Stores the settings in flash (`ATWR`).
    ///
    /// # Errors
    ///
    /// See [`Xbee3::at_command`].
    pub fn write_settings(&mut self) -> Result<(), Xbee3Error> {
        self.at_command("WR")
    }

    /// Applies pending setting changes (`ATAC`).
    ///
    /// # Errors
    ///
    /// See [`Xbee3::at_command`].
    pub fn apply_changes(&mut self) -> Result<(), Xbee3Error> {
        self.at_command("AC")
    }

    /// Sets the node identifier string (`ATNI`).
    ///
    /// # Errors
    ///
    /// See [`Xbee3::at_command`].
    pub fn set_node_identifier(&mut self, name: &str) -> Result<(), Xbee3Error> {
        self.at_set("NI", name)
    }

    /// Sets the network (PAN) identifier (`ATID`).
    ///
    /// # Errors
    ///
    /// See [`Xbee3::at_command`].
    pub fn set_network_id(&mut self, id: u64) -> Result<(), Xbee3Error> {
        let hex = hex_value(id)?;
        self.at_set("ID", hex.as_str())
    }

    /// Sets the 64-bit destination address (`ATDH` and `ATDL`).
    ///
    /// # Errors
    ///
    /// See [`Xbee3::at_command`].
    pub fn set_destination(&mut self, address: u64) -> Result<(), Xbee3Error> {
        let high = hex_value(address >> 32)?;
        let low = hex_value(address & 0xFFFF_FFFF)?;
        self.at_set("DH", high.as_str())?;
        self.at_set("DL", low.as_str())
    }

    /// Reads the 64-bit serial number (`ATSH` and `ATSL`).
    ///
    /// # Errors
    ///
    /// - [`Xbee3Error::At`] if a half is missing or not hexadecimal.
    /// - [`Xbee3Error::Bus`] if the UART fails.
    pub fn serial_number(&mut self) -> Result<u64, Xbee3Error> {
        let high = self.read_hex("SH")?;
        let low = self.read_hex("SL")?;
        Ok((u64::from(high) << 32) | u64::from(low))
    }

    /// Selects transparent or API framing (`ATAP`).
    ///
    /// # Errors
    ///
    /// See [`Xbee3::at_command`].
    pub fn set_api_mode(&mut self, mode: ApiMode) -> Result<(), Xbee3Error> {
        let hex = hex_value(mode as u64)?;
        self.at_set("AP", hex.as_str())
    }

    /// Makes the module form a network as coordinator, or join one (`ATCE`).
    ///
    /// # Errors
    ///
    /// See [`Xbee3::at_command`].
    pub fn set_coordinator(&mut self, coordinator: bool) -> Result<(), Xbee3Error> {
        self.at_set("CE", if coordinator { "1" } else { "0" })
    }

    /// Sends `data` over the air in transparent mode.
    ///
    /// # Errors
    ///
    /// Returns [`Xbee3Error::At`] if the UART fails.
    pub fn send_data(&mut self, data: &[u8]) -> Result<(), Xbee3Error> {
        self.port.send_raw(data)?;
        Ok(())
    }

    /// Sends an API frame. The module must be in API mode.
    ///
    /// # Errors
    ///
    /// Returns [`Xbee3Error::At`] if the UART fails.
    pub fn send_frame(&mut self, frame: &ApiFrame) -> Result<(), Xbee3Error> {
        let mut bytes = [0; frame::MAX_FRAME_DATA + 4];
        let len = frame.encode(&mut bytes)?;
        log::trace!("xbee3 > {frame:?}");
        self.port.send_raw(&bytes[..len])?;
        Ok(())
    }

    /// Reads an API frame, waiting up to `timeout_ms`.
    ///
    /// # Errors
    ///
    /// - [`Xbee3Error::At`] with [`AtError::Timeout`] if no frame completes in time.
    /// - [`Xbee3Error::Frame`] if a corrupt frame was received.
    /// - [`Xbee3Error::Bus`] if the UART fails.
    pub fn read_frame(
        &mut self,
        parser: &mut ApiFrameParser,
        timeout_ms: u32,
    ) -> Result<ApiFrame, Xbee3Error> {
        let mut timeout = clickboard_core::time::Timeout::from_millis(timeout_ms);
        loop {
            let uart = self.port.uart_mut();
            while uart.read_ready().map_err(BusError::uart)? {
                let mut byte = [0];
                if uart.read(&mut byte).map_err(BusError::uart)? == 0 {
                    break;
                }
                if let Some(frame) = parser.push(byte[0])? {
                    log::trace!("xbee3 < {frame:?}");
                    return Ok(frame);
                }
            }

            if timeout.expired() {
                return Err(AtError::Timeout { timeout_ms }.into());
            }
            timeout.tick(self.port.delay_mut(), 1);
        }
    }

    /// Returns the UART, the delay and the reset pin.
    pub fn release(self) -> (U, D, RST) {
        let (uart, delay) = self.port.release();
        (uart, delay, self.rst)
    }

    fn read_hex(&mut self, cmd: &str) -> Result<u32, Xbee3Error> {
        let value = self.at_get(cmd)?;
        Ok(u32::from_str_radix(value.as_str(), 16).map_err(|_| AtError::UnexpectedResponse)?)
    }
}

fn command_line(cmd: &str, value: Option<&str>) -> Result<TextBuffer<64>, AtError> {
    let mut line = TextBuffer::new();
    let written = match value {
        Some(value) => write!(line, "AT{cmd} {value}"),
        None => write!(line, "AT{cmd}"),
    };
    written.map_err(|_| AtError::Format)?;
    Ok(line)
}

fn hex_value(value: u64) -> Result<TextBuffer<16>, AtError> {
    let mut hex = TextBuffer::new();
    write!(hex, "{value:X}").map_err(|_| AtError::Format)?;
    Ok(hex)
}

/// Errors that can occur when using an XBee 3 Click.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Snafu)]
pub enum Xbee3Error {
    /// A command mode exchange failed.
    #[snafu(transparent)]
    At {
        /// The source of the error.
        source: AtError,
    },

    /// An API frame could not be built or was corrupt.
    #[snafu(transparent)]
    Frame {
        /// The source of the error.
        source: FrameError,
    },

    /// Generic bus related error.
    #[snafu(transparent)]
    Bus {
        /// The source of the error.
        source: BusError,
    },
}

#[cfg(test)]
mod test {
    use clickboard_core::{
        mock::{MockDelay, MockUart},
        pin::NoPin,
    };

    use super::*;

    fn driver() -> (MockUart, MockDelay, Xbee3<MockUart, MockDelay, NoPin>) {
        let uart = MockUart::new();
        let delay = MockDelay::new();
        let xbee = Xbee3::new(uart.clone(), delay.clone(), NoPin, Config::default());
        (uart, delay, xbee)
    }

    #[test]
    fn command_mode_waits_for_guard_time() {
        let (uart, delay, mut xbee) = driver();
        uart.reply_on_flush(b"OK\r");

        xbee.enter_command_mode().unwrap();
        assert_eq!(uart.written(), b"+++");
        assert!(delay.elapsed_ms() >= u64::from(DEFAULT_GUARD_TIME_MS));
    }

    #[test]
    fn set_uses_a_space_separator() {
        let (uart, _, mut xbee) = driver();
        uart.reply_on_flush(b"OK\r");
        uart.reply_on_flush(b"OK\r");

        xbee.set_node_identifier("sensor").unwrap();
        xbee.write_settings().unwrap();
        assert_eq!(uart.written_str(), "ATNI sensor\rATWR\r");
    }

    #[test]
    fn serial_number_combines_halves() {
        let (uart, _, mut xbee) = driver();
        uart.reply_on_flush(b"13A200\r");
        uart.reply_on_flush(b"41B7C3D2\r");

        assert_eq!(xbee.serial_number().unwrap(), 0x0013_A200_41B7_C3D2);
        assert_eq!(uart.written_str(), "ATSH\rATSL\r");
    }

    #[test]
    fn destination_is_split_in_hex() {
        let (uart, _, mut xbee) = driver();
        uart.reply_on_flush(b"OK\r");
        uart.reply_on_flush(b"OK\r");

        xbee.set_destination(0x0013_A200_4000_0001).unwrap();
        assert_eq!(uart.written_str(), "ATDH 13A200\rATDL 40000001\r");
    }

    #[test]
    fn error_reply_is_reported() {
        let (uart, _, mut xbee) = driver();
        uart.reply_on_flush(b"ERROR\r");

        assert_eq!(
            xbee.at_get("ZZ"),
            Err(Xbee3Error::At {
                source: AtError::Command
            })
        );
    }

    #[test]
    fn api_frames_round_trip_through_the_uart() {
        let (uart, _, mut xbee) = driver();
        let frame = ApiFrame::at_command(1, "NI", &[]).unwrap();
        xbee.send_frame(&frame).unwrap();

        uart.inject(&uart.written());
        let mut parser = ApiFrameParser::new();
        assert_eq!(xbee.read_frame(&mut parser, 10).unwrap(), frame);
    }
}
