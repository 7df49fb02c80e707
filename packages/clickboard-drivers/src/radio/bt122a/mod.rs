//! BT122-A Click, a Bluetooth Classic module.
//!
//! # Hardware Description
//!
//! The Silicon Labs BT122-A runs the Bluetooth stack on-module and is controlled over UART
//! with the binary BGAPI protocol described in [`package`]. The host sends a command package
//! and the module answers with a response package of the same class and id whose payload
//! starts with a 16-bit result code (0 is success). Events arrive asynchronously and may be
//! interleaved with responses.
//!
//! The RST line is active low.

pub mod package;

use clickboard_core::{BusError, pin, time::Timeout};
use embedded_hal::{
    delay::DelayNs,
    digital::{OutputPin, PinState},
};
use embedded_io::{Read, ReadReady, Write};
pub use package::{MAX_PAYLOAD_LEN, MessageType, Package, PackageError, PackageParser};
use snafu::Snafu;

/// Default budget for a command response.
pub const RESPONSE_TIMEOUT_MS: u32 = 1_000;

/// Budget for the boot event after a reset.
pub const BOOT_TIMEOUT_MS: u32 = 3_000;

/// Message classes and ids.
#[allow(missing_docs)]
pub mod msg {
    pub mod class {
        pub const SYSTEM: u8 = 0x01;
        pub const BT_GAP: u8 = 0x02;
        pub const BT_RFCOMM: u8 = 0x04;
        pub const ENDPOINT: u8 = 0x0C;
        pub const SM: u8 = 0x0F;
    }

    pub mod system {
        pub const HELLO: u8 = 0x00;
        pub const RESET: u8 = 0x01;
        pub const FACTORY_RESET: u8 = 0x05;
        pub const SET_LOCAL_NAME: u8 = 0x0D;

        pub const EVT_BOOT: u8 = 0x00;
    }

    pub mod bt_gap {
        pub const SET_MODE: u8 = 0x03;
    }

    pub mod bt_rfcomm {
        pub const START_SERVER: u8 = 0x01;

        pub const EVT_OPENED: u8 = 0x01;
    }

    pub mod endpoint {
        pub const SEND: u8 = 0x00;

        pub const EVT_DATA: u8 = 0x01;
    }

    pub mod sm {
        pub const SET_BONDABLE_MODE: u8 = 0x00;
    }
}

/// Where the module boots after [`Bt122a::system_reset`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[repr(u8)]
pub enum BootMode {
    /// The application firmware.
    Normal = 0,
    /// The UART DFU bootloader.
    Dfu = 1,
}

/// A BT122-A Click.
#[derive(Debug)]
pub struct Bt122a<U, D, RST> {
    uart: U,
    delay: D,
    rst: RST,
    parser: PackageParser,
}

impl<U, D, RST> Bt122a<U, D, RST>
where
    U: Read + ReadReady + Write,
    D: DelayNs,
    RST: OutputPin,
{
    /// Creates a driver.
    pub const fn new(uart: U, delay: D, rst: RST) -> Self {
        Self {
            uart,
            delay,
            rst,
            parser: PackageParser::new(),
        }
    }

    /// Resets the module through RST and waits for its boot event.
    ///
    /// # Errors
    ///
    /// - [`Bt122aError::Timeout`] if the module does not boot within [`BOOT_TIMEOUT_MS`].
    /// - [`Bt122aError::Bus`] if the pin or UART fails.
    pub fn reset(&mut self) -> Result<Package, Bt122aError> {
        pin::pulse(&mut self.rst, &mut self.delay, PinState::Low, 100)?;
        self.parser.reset();
        self.wait_event(msg::class::SYSTEM, msg::system::EVT_BOOT, BOOT_TIMEOUT_MS)
    }

    /// Writes `package` to the UART.
    ///
    /// # Errors
    ///
    /// Returns [`Bt122aError::Bus`] if the UART write fails.
    pub fn send_package(&mut self, package: &Package) -> Result<(), Bt122aError> {
        log::trace!("bt122a > {package:?}");
        self.uart
            .write_all(&package.header())
            .map_err(BusError::uart)?;
        self.uart
            .write_all(package.payload())
            .map_err(BusError::uart)?;
        self.uart.flush().map_err(BusError::uart)?;
        Ok(())
    }

    /// Waits up to `timeout_ms` for the next complete package.
    ///
    /// # Errors
    ///
    /// - [`Bt122aError::Timeout`] if no package completes in time.
    /// - [`Bt122aError::Package`] if an over-long package header was received.
    /// - [`Bt122aError::Bus`] if the UART read fails.
    pub fn read_package(&mut self, timeout_ms: u32) -> Result<Package, Bt122aError> {
        let mut timeout = Timeout::from_millis(timeout_ms);
        self.next_package(&mut timeout)?
            .ok_or(Bt122aError::Timeout { timeout_ms })
    }

    /// Waits for the response to command `class`/`id`.
    ///
    /// Events and unrelated responses received meanwhile are logged and dropped.
    ///
    /// # Errors
    ///
    /// - [`Bt122aError::Command`] if the response carries a non-zero result code.
    /// - [`Bt122aError::Timeout`] if the response does not arrive in time.
    /// - [`Bt122aError::Package`] if an over-long package header was received.
    /// - [`Bt122aError::Bus`] if the UART read fails.
    pub fn wait_response(&mut self, class: u8, id: u8, timeout_ms: u32) -> Result<Package, Bt122aError> {
        let package = self.wait_package(MessageType::Command, class, id, timeout_ms)?;
        match package.result() {
            Some(0) | None => Ok(package),
            Some(result) => {
                log::debug!("bt122a: command {class:#04x}/{id:#04x} failed with {result:#06x}");
                Err(Bt122aError::Command { result })
            }
        }
    }

    /// Waits for event `class`/`id`, dropping any other packages.
    ///
    /// # Errors
    ///
    /// - [`Bt122aError::Timeout`] if the event does not arrive in time.
    /// - [`Bt122aError::Package`] if an over-long package header was received.
    /// - [`Bt122aError::Bus`] if the UART read fails.
    pub fn wait_event(&mut self, class: u8, id: u8, timeout_ms: u32) -> Result<Package, Bt122aError> {
        self.wait_package(MessageType::Event, class, id, timeout_ms)
    }

    /// Sends `package` and waits for its response.
    ///
    /// # Errors
    ///
    /// See [`Bt122a::send_package`] and [`Bt122a::wait_response`].
    pub fn command(&mut self, package: &Package) -> Result<Package, Bt122aError> {
        self.send_package(package)?;
        self.wait_response(package.class, package.id, RESPONSE_TIMEOUT_MS)
    }

    /// Checks that the module is responsive.
    ///
    /// # Errors
    ///
    /// See [`Bt122a::command`].
    pub fn system_hello(&mut self) -> Result<(), Bt122aError> {
        self.command(&Package::command(msg::class::SYSTEM, msg::system::HELLO))?;
        Ok(())
    }

    /// Restarts the module in `mode` and waits for its boot event. The command has no
    /// response.
    ///
    /// # Errors
    ///
    /// - [`Bt122aError::Timeout`] if the module does not boot within [`BOOT_TIMEOUT_MS`].
    /// - [`Bt122aError::Bus`] if the UART fails.
    pub fn system_reset(&mut self, mode: BootMode) -> Result<Package, Bt122aError> {
        let package = Package::new(
            MessageType::Command,
            msg::class::SYSTEM,
            msg::system::RESET,
            &[mode as u8],
        )?;
        self.send_package(&package)?;
        self.wait_event(msg::class::SYSTEM, msg::system::EVT_BOOT, BOOT_TIMEOUT_MS)
    }

    /// Erases bondings and settings stored on the module.
    ///
    /// # Errors
    ///
    /// See [`Bt122a::command`].
    pub fn factory_reset(&mut self) -> Result<(), Bt122aError> {
        self.command(&Package::command(msg::class::SYSTEM, msg::system::FACTORY_RESET))?;
        Ok(())
    }

    /// Sets the name shown to discovering devices.
    ///
    /// # Errors
    ///
    /// - [`Bt122aError::Package`] if `name` is too long for one package.
    /// - See [`Bt122a::command`].
    pub fn set_local_name(&mut self, name: &str) -> Result<(), Bt122aError> {
        let mut package = Package::command(msg::class::SYSTEM, msg::system::SET_LOCAL_NAME);
        package.extend_array(name.as_bytes())?;
        self.command(&package)?;
        Ok(())
    }

    /// Allows or refuses new bondings.
    ///
    /// # Errors
    ///
    /// See [`Bt122a::command`].
    pub fn set_bondable_mode(&mut self, bondable: bool) -> Result<(), Bt122aError> {
        let package = Package::new(
            MessageType::Command,
            msg::class::SM,
            msg::sm::SET_BONDABLE_MODE,
            &[u8::from(bondable)],
        )?;
        self.command(&package)?;
        Ok(())
    }

    /// Sets whether the module accepts connections and answers inquiries.
    ///
    /// # Errors
    ///
    /// See [`Bt122a::command`].
    pub fn set_discoverable_connectable(
        &mut self,
        connectable: bool,
        discoverable: bool,
    ) -> Result<(), Bt122aError> {
        // The third parameter selects limited discoverability, which is never used.
        let package = Package::new(
            MessageType::Command,
            msg::class::BT_GAP,
            msg::bt_gap::SET_MODE,
            &[u8::from(connectable), u8::from(discoverable), 0],
        )?;
        self.command(&package)?;
        Ok(())
    }

    /// Starts an RFCOMM (serial port profile) server.
    ///
    /// `sdp_id` selects the SDP entry and `streaming_destination` the endpoint incoming data is
    /// routed to.
    ///
    /// # Errors
    ///
    /// See [`Bt122a::command`].
    pub fn rfcomm_start_server(
        &mut self,
        sdp_id: u8,
        streaming_destination: u8,
    ) -> Result<(), Bt122aError> {
        let package = Package::new(
            MessageType::Command,
            msg::class::BT_RFCOMM,
            msg::bt_rfcomm::START_SERVER,
            &[sdp_id, streaming_destination],
        )?;
        self.command(&package)?;
        Ok(())
    }

    /// Sends `data` to `endpoint`, typically an open RFCOMM connection.
    ///
    /// # Errors
    ///
    /// - [`Bt122aError::Package`] if `data` is too long for one package.
    /// - See [`Bt122a::command`].
    pub fn endpoint_send_data(&mut self, endpoint: u8, data: &[u8]) -> Result<(), Bt122aError> {
        let mut package = Package::command(msg::class::ENDPOINT, msg::endpoint::SEND);
        package.extend(&[endpoint])?.extend_array(data)?;
        self.command(&package)?;
        Ok(())
    }

    /// Returns the UART, the delay and the reset pin.
    pub fn release(self) -> (U, D, RST) {
        (self.uart, self.delay, self.rst)
    }

    fn wait_package(
        &mut self,
        msg_type: MessageType,
        class: u8,
        id: u8,
        timeout_ms: u32,
    ) -> Result<Package, Bt122aError> {
        let mut timeout = Timeout::from_millis(timeout_ms);
        while let Some(package) = self.next_package(&mut timeout)? {
            if package.is(msg_type, class, id) {
                return Ok(package);
            }
            log::debug!("bt122a: dropping {package:?}");
        }
        Err(Bt122aError::Timeout { timeout_ms })
    }

    /// Feeds received bytes to the parser until a package completes or `timeout` expires.
    fn next_package(&mut self, timeout: &mut Timeout) -> Result<Option<Package>, Bt122aError> {
        loop {
            while self.uart.read_ready().map_err(BusError::uart)? {
                let mut byte = [0];
                if self.uart.read(&mut byte).map_err(BusError::uart)? == 0 {
                    break;
                }
                if let Some(package) = self.parser.push(byte[0])? {
                    log::trace!("bt122a < {package:?}");
                    return Ok(Some(package));
                }
            }

            if timeout.expired() {
                return Ok(None);
            }
            timeout.tick(&mut self.delay, 1);
        }
    }
}

/// Errors that can occur when using a BT122-A Click.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Snafu)]
pub enum Bt122aError {
    /// No matching package arrived within the budget.
    #[snafu(display("no response within {timeout_ms} ms"))]
    Timeout {
        /// The budget that was exhausted.
        timeout_ms: u32,
    },

    /// The module rejected a command.
    #[snafu(display("command failed with result {result:#06x}"))]
    Command {
        /// The result code from the response.
        result: u16,
    },

    /// A package was malformed.
    #[snafu(transparent)]
    Package {
        /// The source of the error.
        source: PackageError,
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
    use clickboard_core::mock::{MockDelay, MockPin, MockUart};

    use super::*;

    fn driver() -> (MockUart, MockDelay, MockPin, Bt122a<MockUart, MockDelay, MockPin>) {
        let uart = MockUart::new();
        let delay = MockDelay::new();
        let rst = MockPin::new();
        let bt = Bt122a::new(uart.clone(), delay.clone(), rst.clone());
        (uart, delay, rst, bt)
    }

    #[test]
    fn local_name_is_length_prefixed() {
        let (uart, _, _, mut bt) = driver();
        uart.reply_on_flush(&[0x20, 0x02, 0x01, 0x0D, 0x00, 0x00]);

        bt.set_local_name("Click").unwrap();
        assert_eq!(uart.written(), b"\x20\x06\x01\x0D\x05Click");
    }

    #[test]
    fn events_before_the_response_are_skipped() {
        let (uart, _, _, mut bt) = driver();
        uart.reply_on_flush(&[
            0xA0, 0x01, 0x0C, 0x01, 0x07, // endpoint data event
            0x20, 0x02, 0x0F, 0x00, 0x00, 0x00,
        ]);

        assert_eq!(bt.set_bondable_mode(true), Ok(()));
        assert_eq!(uart.written(), [0x20, 0x01, 0x0F, 0x00, 0x01]);
    }

    #[test]
    fn non_zero_result_is_an_error() {
        let (uart, _, _, mut bt) = driver();
        uart.reply_on_flush(&[0x20, 0x02, 0x04, 0x01, 0x80, 0x01]);

        assert_eq!(
            bt.rfcomm_start_server(2, 0),
            Err(Bt122aError::Command { result: 0x0180 })
        );
    }

    #[test]
    fn missing_response_times_out() {
        let (_, delay, _, mut bt) = driver();
        assert_eq!(
            bt.system_hello(),
            Err(Bt122aError::Timeout {
                timeout_ms: RESPONSE_TIMEOUT_MS
            })
        );
        assert_eq!(delay.elapsed_ms(), u64::from(RESPONSE_TIMEOUT_MS));
    }

    #[test]
    fn reset_waits_for_boot_event() {
        let (uart, _, rst, mut bt) = driver();
        uart.inject(&[0xA0, 0x02, 0x01, 0x00, 0x01, 0x00]);

        let boot = bt.reset().unwrap();
        assert_eq!(boot.payload(), [0x01, 0x00]);
        assert_eq!(rst.history(), vec![false, true]);
    }

    #[test]
    fn endpoint_data_layout() {
        let (uart, _, _, mut bt) = driver();
        uart.reply_on_flush(&[0x20, 0x02, 0x0C, 0x00, 0x00, 0x00]);

        bt.endpoint_send_data(3, b"hi").unwrap();
        assert_eq!(uart.written(), [0x20, 0x04, 0x0C, 0x00, 0x03, 0x02, b'h', b'i']);
    }
}
