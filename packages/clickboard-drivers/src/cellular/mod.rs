//! Cellular modems.
//!
//! Every cellular Click carries a module that implements the 3GPP TS 27.007 and TS 27.005
//! command sets on top of its vendor extensions. [`CellularModem`] drives the common part; the
//! board modules add power sequencing and the vendor commands:
//!
//! - [`lteiot11`]: LTE Cat-M1/NB-IoT, band selection.
//! - [`lteiot19`]: LTE Cat-M1/NB-IoT, eDRX.
//! - [`nbiot7`]: NB-IoT, power saving mode.
//!
//! # Hardware Description
//!
//! Modules are switched on by holding their power key for a module specific time. The PWR and
//! RST lines on the boards drive the module pins through transistors, so both are active high
//! from the host's side.

#[cfg(feature = "lteiot11")]
pub mod lteiot11;
#[cfg(feature = "lteiot19")]
pub mod lteiot19;
#[cfg(feature = "nbiot7")]
pub mod nbiot7;

use core::fmt::Write as _;

use clickboard_core::{
    BusError,
    at::{AtCommand, AtError, AtPort, ResponseBuffer, ResponseTokens, TextBuffer},
    pin,
};
use embedded_hal::{
    delay::DelayNs,
    digital::{OutputPin, PinState},
};
use embedded_io::{Read, ReadReady, Write};
use snafu::Snafu;

/// Budget for an ordinary command.
pub const COMMAND_TIMEOUT_MS: u32 = 5_000;

/// Budget for commands that touch the network, such as `+CFUN` and `+COPS`.
pub const NETWORK_TIMEOUT_MS: u32 = 60_000;

/// Budget for an SMS to be accepted by the network.
pub const SMS_TIMEOUT_MS: u32 = 60_000;

/// Longest SMS text accepted in text mode.
pub const MAX_SMS_LEN: usize = 160;

/// Budget for a single `AT` probe while waiting for the module to boot.
const PROBE_TIMEOUT_MS: u32 = 300;

/// Ends an SMS body in text mode.
const CTRL_Z: u8 = 0x1A;

/// An identity string such as the IMEI or IMSI.
pub type Identity = TextBuffer<16>;

/// Phone functionality level set with `+CFUN`.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[repr(u8)]
pub enum Function {
    /// Radio and SIM off.
    Minimum = 0,
    /// Full functionality.
    Full = 1,
    /// Radio off, SIM on.
    Airplane = 4,
}

/// Packet data protocol of a PDP context.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum PdpType {
    /// IPv4.
    Ip,
    /// IPv6.
    Ipv6,
    /// Dual stack.
    Ipv4v6,
    /// Non-IP data delivery.
    NonIp,
}

impl PdpType {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Ip => "IP",
            Self::Ipv6 => "IPV6",
            Self::Ipv4v6 => "IPV4V6",
            Self::NonIp => "Non-IP",
        }
    }
}

/// Network registration state reported by `+CREG`, `+CGREG` or `+CEREG`.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RegistrationStatus {
    /// Not registered and not searching.
    NotRegistered,
    /// Registered on the home network.
    Home,
    /// Searching for an operator.
    Searching,
    /// Registration was denied.
    Denied,
    /// Out of coverage, or a state this driver does not know.
    Unknown,
    /// Registered while roaming.
    Roaming,
}

impl RegistrationStatus {
    /// Decodes a `<stat>` value.
    #[must_use]
    pub const fn from_code(code: u8) -> Self {
        match code {
            0 => Self::NotRegistered,
            1 => Self::Home,
            2 => Self::Searching,
            3 => Self::Denied,
            5 => Self::Roaming,
            _ => Self::Unknown,
        }
    }

    /// Returns `true` when attached to a home or roaming network.
    #[must_use]
    pub const fn is_registered(self) -> bool {
        matches!(self, Self::Home | Self::Roaming)
    }
}

/// A `+CSQ` report.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct SignalQuality {
    /// Received signal strength index, 0..=31, or 99 when unknown.
    pub rssi: u8,
    /// Channel bit error rate index, 0..=7, or 99 when unknown.
    pub ber: u8,
}

impl SignalQuality {
    /// Converts the RSSI index to dBm. Index 0 is -113 dBm or less and 31 is -51 dBm or more.
    #[must_use]
    pub const fn dbm(self) -> Option<i16> {
        if self.rssi > 31 {
            return None;
        }
        Some(-113 + 2 * self.rssi as i16)
    }
}

/// Parses a `+CSQ: <rssi>,<ber>` line.
#[must_use]
pub fn parse_csq(line: &str) -> Option<SignalQuality> {
    let (rssi, ber) = line.trim().strip_prefix("+CSQ:")?.split_once(',')?;
    Some(SignalQuality {
        rssi: rssi.trim().parse().ok()?,
        ber: ber.trim().parse().ok()?,
    })
}

/// Parses a `+CREG`, `+CGREG` or `+CEREG` line.
///
/// Both the read command response (`<n>,<stat>[,...]`) and the unsolicited report
/// (`<stat>[,...]`) are understood.
#[must_use]
pub fn parse_registration(line: &str) -> Option<RegistrationStatus> {
    let line = line.trim();
    let params = ["+CREG:", "+CGREG:", "+CEREG:"]
        .iter()
        .find_map(|prefix| line.strip_prefix(prefix))?;

    let mut fields = params.split(',').map(str::trim);
    let first: u8 = fields.next()?.parse().ok()?;
    let stat = match fields.next().map(str::parse::<u8>) {
        Some(Ok(stat)) => stat,
        _ => first,
    };
    Some(RegistrationStatus::from_code(stat))
}

/// A modem speaking the 3GPP command set.
#[derive(Debug)]
pub struct CellularModem<U, D, PWR, RST> {
    port: AtPort<U, D>,
    pwr: PWR,
    rst: RST,
}

impl<U, D, PWR, RST> CellularModem<U, D, PWR, RST>
where
    U: Read + ReadReady + Write,
    D: DelayNs,
    PWR: OutputPin,
    RST: OutputPin,
{
    /// Creates a driver.
    pub const fn new(uart: U, delay: D, pwr: PWR, rst: RST) -> Self {
        Self {
            port: AtPort::new(uart, delay, ResponseTokens::CELLULAR),
            pwr,
            rst,
        }
    }

    /// Holds the power key for `ms` milliseconds.
    ///
    /// # Errors
    ///
    /// Returns [`CellularError::Bus`] if the pin cannot be driven.
    pub fn power_key(&mut self, ms: u32) -> Result<(), CellularError> {
        pin::pulse(&mut self.pwr, self.port.delay_mut(), PinState::High, ms)?;
        Ok(())
    }

    /// Holds the reset line for `ms` milliseconds.
    ///
    /// # Errors
    ///
    /// Returns [`CellularError::Bus`] if the pin cannot be driven.
    pub fn hard_reset(&mut self, ms: u32) -> Result<(), CellularError> {
        pin::pulse(&mut self.rst, self.port.delay_mut(), PinState::High, ms)?;
        self.port.clear();
        Ok(())
    }

    /// Probes the module with `AT` until it answers or `timeout_ms` runs out.
    ///
    /// # Errors
    ///
    /// - [`CellularError::At`] with [`AtError::Timeout`] if the module never answered.
    /// - [`CellularError::Bus`] if the UART fails.
    pub fn wait_ready(&mut self, timeout_ms: u32) -> Result<(), CellularError> {
        let attempts = (timeout_ms / PROBE_TIMEOUT_MS).max(1);
        for _ in 0..attempts {
            match self.port.command(AtCommand::Run("AT"), PROBE_TIMEOUT_MS) {
                Ok(()) => return Ok(()),
                Err(AtError::Timeout { .. } | AtError::Command) => {}
                Err(error) => return Err(error.into()),
            }
        }
        log::warn!("cellular: no answer within {timeout_ms} ms");
        Err(AtError::Timeout { timeout_ms }.into())
    }

    /// Sends `cmd` and waits up to `timeout_ms` for its result code.
    ///
    /// The information lines of the answer are available from [`CellularModem::response`].
    ///
    /// # Errors
    ///
    /// - [`CellularError::At`] if the module answers with an error or not at all.
    /// - [`CellularError::Bus`] if the UART fails.
    pub fn command(&mut self, cmd: AtCommand<'_>, timeout_ms: u32) -> Result<(), CellularError> {
        self.port.command(cmd, timeout_ms)?;
        Ok(())
    }

    /// Returns the answer to the last command.
    #[must_use]
    pub const fn response(&self) -> &ResponseBuffer<256> {
        self.port.response()
    }

    /// Checks that the module answers `AT`.
    ///
    /// # Errors
    ///
    /// See [`CellularModem::command`].
    pub fn check_communication(&mut self) -> Result<(), CellularError> {
        self.command(AtCommand::Run("AT"), COMMAND_TIMEOUT_MS)
    }

    /// Turns command echo on or off.
    ///
    /// # Errors
    ///
    /// See [`CellularModem::command`].
    pub fn set_echo(&mut self, echo: bool) -> Result<(), CellularError> {
        let cmd = if echo { "ATE1" } else { "ATE0" };
        self.command(AtCommand::Run(cmd), COMMAND_TIMEOUT_MS)
    }

    /// Sets the functionality level.
    ///
    /// # Errors
    ///
    /// See [`CellularModem::command`].
    pub fn set_function(&mut self, function: Function) -> Result<(), CellularError> {
        let mut value = TextBuffer::<4>::new();
        write!(value, "{}", function as u8).map_err(|_| AtError::Format)?;
        self.command(AtCommand::Set("AT+CFUN", value.as_str()), NETWORK_TIMEOUT_MS)
    }

    /// Defines PDP context `cid` with access point name `apn`.
    ///
    /// # Errors
    ///
    /// - [`CellularError::At`] with [`AtError::Format`] if `apn` is too long.
    /// - See [`CellularModem::command`].
    pub fn set_apn(&mut self, cid: u8, pdp: PdpType, apn: &str) -> Result<(), CellularError> {
        let mut value = TextBuffer::<128>::new();
        write!(value, "{cid},\"{}\",\"{apn}\"", pdp.as_str()).map_err(|_| AtError::Format)?;
        self.command(AtCommand::Set("AT+CGDCONT", value.as_str()), COMMAND_TIMEOUT_MS)
    }

    /// Lets the module pick the operator.
    ///
    /// # Errors
    ///
    /// See [`CellularModem::command`].
    pub fn set_operator_auto(&mut self) -> Result<(), CellularError> {
        self.command(AtCommand::Set("AT+COPS", "0"), NETWORK_TIMEOUT_MS)
    }

    /// Reads the EPS registration state (`+CEREG`).
    ///
    /// # Errors
    ///
    /// - [`CellularError::At`] with [`AtError::UnexpectedResponse`] if no report came back.
    /// - See [`CellularModem::command`].
    pub fn registration_status(&mut self) -> Result<RegistrationStatus, CellularError> {
        self.command(AtCommand::Get("AT+CEREG"), COMMAND_TIMEOUT_MS)?;
        let status = self
            .port
            .response()
            .lines()
            .find_map(parse_registration)
            .ok_or(AtError::UnexpectedResponse)?;
        log::debug!("cellular: registration {status:?}");
        Ok(status)
    }

    /// Reads the signal quality (`+CSQ`).
    ///
    /// # Errors
    ///
    /// - [`CellularError::At`] with [`AtError::UnexpectedResponse`] if no report came back.
    /// - See [`CellularModem::command`].
    pub fn signal_quality(&mut self) -> Result<SignalQuality, CellularError> {
        self.command(AtCommand::Run("AT+CSQ"), COMMAND_TIMEOUT_MS)?;
        Ok(self
            .port
            .response()
            .lines()
            .find_map(parse_csq)
            .ok_or(AtError::UnexpectedResponse)?)
    }

    /// Reads the module's IMEI (`+CGSN`).
    ///
    /// # Errors
    ///
    /// See [`CellularModem::signal_quality`].
    pub fn imei(&mut self) -> Result<Identity, CellularError> {
        self.identity("AT+CGSN")
    }

    /// Reads the SIM's IMSI (`+CIMI`).
    ///
    /// # Errors
    ///
    /// See [`CellularModem::signal_quality`].
    pub fn imsi(&mut self) -> Result<Identity, CellularError> {
        self.identity("AT+CIMI")
    }

    /// Sends a text mode SMS to `number` and returns its message reference.
    ///
    /// # Errors
    ///
    /// - [`CellularError::MessageTooLong`] if `text` exceeds [`MAX_SMS_LEN`].
    /// - [`CellularError::At`] if the module refuses the message or no `>` prompt appears.
    /// - [`CellularError::Bus`] if the UART fails.
    pub fn send_sms_text(&mut self, number: &str, text: &str) -> Result<u8, CellularError> {
        if text.len() > MAX_SMS_LEN {
            return Err(CellularError::MessageTooLong { len: text.len() });
        }

        self.command(AtCommand::Set("AT+CMGF", "1"), COMMAND_TIMEOUT_MS)?;

        let mut destination = TextBuffer::<32>::new();
        write!(destination, "\"{number}\"").map_err(|_| AtError::Format)?;
        self.port.send(AtCommand::Set("AT+CMGS", destination.as_str()))?;
        self.port.wait_for(">", COMMAND_TIMEOUT_MS)?;

        self.port.send_raw(text.as_bytes())?;
        self.port.send_raw(&[CTRL_Z])?;
        self.port.wait_response(SMS_TIMEOUT_MS)?;

        let reference = self
            .port
            .response()
            .line_after("+CMGS:")
            .and_then(|reference| reference.parse().ok())
            .ok_or(AtError::UnexpectedResponse)?;
        log::debug!("cellular: sms {reference} sent");
        Ok(reference)
    }

    /// Returns the UART, the delay and the pins.
    pub fn release(self) -> (U, D, PWR, RST) {
        let (uart, delay) = self.port.release();
        (uart, delay, self.pwr, self.rst)
    }

    fn identity(&mut self, cmd: &str) -> Result<Identity, CellularError> {
        self.command(AtCommand::Run(cmd), COMMAND_TIMEOUT_MS)?;
        let line = self
            .port
            .response()
            .lines()
            .find(|line| !line.is_empty() && line.bytes().all(|byte| byte.is_ascii_digit()))
            .ok_or(AtError::UnexpectedResponse)?;

        let mut identity = Identity::new();
        identity.write_str(line).map_err(|_| AtError::Format)?;
        Ok(identity)
    }
}

/// Errors that can occur when using a cellular Click.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Snafu)]
pub enum CellularError {
    /// An SMS text exceeds [`MAX_SMS_LEN`].
    #[snafu(display("message of {len} bytes exceeds {MAX_SMS_LEN}"))]
    MessageTooLong {
        /// The offending length.
        len: usize,
    },

    /// An argument is out of range for the command.
    InvalidArgument,

    /// A command exchange failed.
    #[snafu(transparent)]
    At {
        /// The source of the error.
        source: AtError,
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
        mock::{MockDelay, MockPin, MockUart},
        pin::NoPin,
    };

    use super::*;

    fn modem() -> (
        MockUart,
        MockPin,
        CellularModem<MockUart, MockDelay, MockPin, NoPin>,
    ) {
        let uart = MockUart::new();
        let pwr = MockPin::new();
        let modem = CellularModem::new(uart.clone(), MockDelay::new(), pwr.clone(), NoPin);
        (uart, pwr, modem)
    }

    #[test]
    fn csq_is_parsed() {
        let quality = parse_csq("+CSQ: 21,99").unwrap();
        assert_eq!(quality, SignalQuality { rssi: 21, ber: 99 });
        assert_eq!(quality.dbm(), Some(-71));

        assert_eq!(SignalQuality { rssi: 0, ber: 0 }.dbm(), Some(-113));
        assert_eq!(SignalQuality { rssi: 31, ber: 0 }.dbm(), Some(-51));
        assert_eq!(SignalQuality { rssi: 99, ber: 99 }.dbm(), None);
        assert_eq!(parse_csq("+CREG: 0,1"), None);
    }

    #[test]
    fn registration_forms_are_parsed() {
        assert_eq!(
            parse_registration("+CEREG: 0,1"),
            Some(RegistrationStatus::Home)
        );
        assert_eq!(
            parse_registration("+CREG: 2,5,\"1A2B\",\"01A2B3C4\",7"),
            Some(RegistrationStatus::Roaming)
        );
        assert_eq!(
            parse_registration("+CEREG: 2"),
            Some(RegistrationStatus::Searching)
        );
        assert_eq!(
            parse_registration("+CEREG: 3,\"1A2B\",\"01A2B3C4\",9"),
            Some(RegistrationStatus::Denied)
        );
        assert_eq!(parse_registration("+CSQ: 2,1"), None);
        assert!(!RegistrationStatus::from_code(4).is_registered());
    }

    #[test]
    fn registration_status_reads_cereg() {
        let (uart, _, mut modem) = modem();
        uart.reply_on_flush(b"\r\n+CEREG: 0,5\r\n\r\nOK\r\n");

        assert_eq!(
            modem.registration_status(),
            Ok(RegistrationStatus::Roaming)
        );
        assert_eq!(uart.written_str(), "AT+CEREG?\r");
    }

    #[test]
    fn cme_error_is_a_command_error() {
        let (uart, _, mut modem) = modem();
        uart.reply_on_flush(b"\r\n+CME ERROR: 10\r\n");

        assert_eq!(
            modem.imsi(),
            Err(CellularError::At {
                source: AtError::Command
            })
        );
    }

    #[test]
    fn imei_skips_echo() {
        let (uart, _, mut modem) = modem();
        uart.reply_on_flush(b"AT+CGSN\r\r\n490154203237518\r\n\r\nOK\r\n");

        assert_eq!(modem.imei().unwrap().as_str(), "490154203237518");
    }

    #[test]
    fn apn_and_function_are_encoded() {
        let (uart, _, mut modem) = modem();
        uart.reply_on_flush(b"OK\r\n");
        uart.reply_on_flush(b"OK\r\n");

        modem.set_function(Function::Airplane).unwrap();
        modem.set_apn(1, PdpType::Ip, "internet").unwrap();
        assert_eq!(
            uart.written_str(),
            "AT+CFUN=4\rAT+CGDCONT=1,\"IP\",\"internet\"\r"
        );
    }

    #[test]
    fn sms_waits_for_prompt_and_ends_with_ctrl_z() {
        let (uart, _, mut modem) = modem();
        uart.reply_on_flush(b"OK\r\n");
        uart.reply_on_flush(b"\r\n> ");
        uart.reply_on_flush(b"");
        uart.reply_on_flush(b"\r\n+CMGS: 12\r\n\r\nOK\r\n");

        assert_eq!(modem.send_sms_text("+15550100", "hello"), Ok(12));
        assert_eq!(
            uart.written(),
            b"AT+CMGF=1\rAT+CMGS=\"+15550100\"\rhello\x1A"
        );
    }

    #[test]
    fn long_sms_is_rejected() {
        let (uart, _, mut modem) = modem();
        let text = "x".repeat(MAX_SMS_LEN + 1);

        assert_eq!(
            modem.send_sms_text("+15550100", &text),
            Err(CellularError::MessageTooLong {
                len: MAX_SMS_LEN + 1
            })
        );
        assert!(uart.written().is_empty());
    }

    #[test]
    fn power_key_pulses_high() {
        let (_, pwr, mut modem) = modem();
        modem.power_key(500).unwrap();
        assert_eq!(pwr.history(), vec![true, false]);
    }

    #[test]
    fn wait_ready_retries_until_answered() {
        let (uart, _, mut modem) = modem();
        uart.reply_on_flush(b"");
        uart.reply_on_flush(b"OK\r\n");

        modem.wait_ready(3_000).unwrap();
        assert_eq!(uart.written_str(), "AT\rAT\r");
    }
}
