//! Calypso Click, a Würth Elektronik Calypso Wi-Fi module.
//!
//! # Hardware Description
//!
//! The module runs its own TCP/IP stack and is driven over UART with a text command set.
//! Commands look like `AT+<name>=<params>\r\n`; the module answers `OK` or a line starting with
//! `error:`, optionally preceded by a `+<name>:` information line. Asynchronous events such as
//! `+eventstartup` or `+eventwlan:connect,...` may arrive at any time.
//!
//! Two application mode pins (AM0 and AM1) are sampled at startup and select the module's
//! firmware mode. Both are held low to start the AT command interpreter. The RST line is
//! active low.
//!
//! # Examples
//!
//! ```
//! use clickboard_drivers::wifi::calypso::{Calypso, CalypsoError, Security, SocketKind, WlanMode};
//! use embedded_hal::{delay::DelayNs, digital::OutputPin};
//! use embedded_io::{Read, ReadReady, Write};
//!
//! fn post<U, D, P>(wifi: &mut Calypso<U, D, P, P, P>) -> Result<(), CalypsoError>
//! where
//!     U: Read + ReadReady + Write,
//!     D: DelayNs,
//!     P: OutputPin,
//! {
//!     wifi.init()?;
//!     wifi.set_wlan_mode(WlanMode::Station)?;
//!     wifi.wlan_connect("workshop", Security::WpaWpa2, "hunter22")?;
//!     wifi.wait_event("+eventnetapp:", 10_000)?;
//!
//!     let socket = wifi.socket_open(SocketKind::Tcp)?;
//!     wifi.socket_connect(socket, 8080, "192.168.1.10")?;
//!     wifi.socket_send(socket, b"hello")
//! }
//! ```

use core::fmt::Write as _;

use clickboard_core::{
    BusError,
    at::{AtCommand, AtError, AtPort, ResponseTokens, TextBuffer},
    pin,
    time::Timeout,
};
use embedded_hal::{
    delay::DelayNs,
    digital::{OutputPin, PinState},
};
use embedded_io::{Read, ReadReady, Write};
use snafu::Snafu;

/// Result codes of the Calypso command set.
pub const TOKENS: ResponseTokens = ResponseTokens {
    ok: &["OK"],
    error: &["error"],
};

/// Event sent once the module has booted.
pub const EVENT_STARTUP: &str = "+eventstartup";

/// Budget for a command's result code.
pub const COMMAND_TIMEOUT_MS: u32 = 3_000;

/// Budget for [`EVENT_STARTUP`] after a reset or reboot.
pub const STARTUP_TIMEOUT_MS: u32 = 5_000;

/// Budget for a factory reset, which reformats the module's file system.
pub const FACTORY_RESET_TIMEOUT_MS: u32 = 90_000;

/// Largest payload accepted by [`Calypso::socket_send`].
pub const MAX_SEND_LEN: usize = 1_460;

/// Parameters that follow an event token.
pub type Event = TextBuffer<128>;

/// Role of the WLAN interface.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum WlanMode {
    /// Joins an existing network.
    Station,
    /// Hosts a network.
    AccessPoint,
    /// Wi-Fi Direct.
    P2p,
}

impl WlanMode {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Station => "STA",
            Self::AccessPoint => "AP",
            Self::P2p => "P2P",
        }
    }
}

/// Network security used by [`Calypso::wlan_connect`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Security {
    /// No encryption.
    Open,
    /// WEP, open authentication.
    Wep,
    /// WPA or WPA2 personal.
    WpaWpa2,
    /// WPA2 with protected management frames.
    Wpa2Plus,
    /// WPA3 personal.
    Wpa3,
}

impl Security {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Wep => "WEP",
            Self::WpaWpa2 => "WPA_WPA2",
            Self::Wpa2Plus => "WPA2_PLUS",
            Self::Wpa3 => "WPA3",
        }
    }
}

/// Transport of a socket opened with [`Calypso::socket_open`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SocketKind {
    /// IPv4 stream socket.
    Tcp,
    /// IPv4 datagram socket.
    Udp,
}

impl SocketKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "INET,STREAM,TCP",
            Self::Udp => "INET,DGRAM,UDP",
        }
    }
}

/// A Calypso Click.
#[derive(Debug)]
pub struct Calypso<U, D, RST, AM0, AM1> {
    port: AtPort<U, D>,
    rst: RST,
    am0: AM0,
    am1: AM1,
}

impl<U, D, RST, AM0, AM1> Calypso<U, D, RST, AM0, AM1>
where
    U: Read + ReadReady + Write,
    D: DelayNs,
    RST: OutputPin,
    AM0: OutputPin,
    AM1: OutputPin,
{
    /// Creates a driver.
    pub const fn new(uart: U, delay: D, rst: RST, am0: AM0, am1: AM1) -> Self {
        Self {
            port: AtPort::new(uart, delay, TOKENS).with_terminator("\r\n"),
            rst,
            am0,
            am1,
        }
    }

    /// Selects AT command mode, resets the module and waits for [`EVENT_STARTUP`].
    ///
    /// # Errors
    ///
    /// - [`CalypsoError::At`] if the module does not start within [`STARTUP_TIMEOUT_MS`].
    /// - [`CalypsoError::Bus`] if a pin or the UART fails.
    pub fn init(&mut self) -> Result<(), CalypsoError> {
        pin::set(&mut self.am0, PinState::Low)?;
        pin::set(&mut self.am1, PinState::Low)?;

        self.port.clear();
        pin::pulse(&mut self.rst, self.port.delay_mut(), PinState::Low, 100)?;
        self.wait_event(EVENT_STARTUP, STARTUP_TIMEOUT_MS)?;
        log::debug!("calypso: started");
        Ok(())
    }

    /// Sends a command without parameters, such as `AT+test`, and waits for its result.
    ///
    /// # Errors
    ///
    /// - [`CalypsoError::At`] if the module answers `error` or nothing.
    /// - [`CalypsoError::Bus`] if the UART fails.
    pub fn send_cmd(&mut self, cmd: &str) -> Result<(), CalypsoError> {
        self.port.command(AtCommand::Run(cmd), COMMAND_TIMEOUT_MS)?;
        Ok(())
    }

    /// Sends `<cmd>=<params>` and waits for its result.
    ///
    /// # Errors
    ///
    /// See [`Calypso::send_cmd`].
    pub fn send_cmd_with_params(&mut self, cmd: &str, params: &str) -> Result<(), CalypsoError> {
        self.port
            .command(AtCommand::Set(cmd, params), COMMAND_TIMEOUT_MS)?;
        Ok(())
    }

    /// Sends `<cmd>?` and waits for its result. The reply is left in [`Calypso::response`].
    ///
    /// # Errors
    ///
    /// See [`Calypso::send_cmd`].
    pub fn send_cmd_check(&mut self, cmd: &str) -> Result<(), CalypsoError> {
        self.port.command(AtCommand::Get(cmd), COMMAND_TIMEOUT_MS)?;
        Ok(())
    }

    /// Sends `<cmd>=?` and waits for its result. The reply is left in [`Calypso::response`].
    ///
    /// # Errors
    ///
    /// See [`Calypso::send_cmd`].
    pub fn send_cmd_parameter_check(&mut self, cmd: &str) -> Result<(), CalypsoError> {
        self.port.command(AtCommand::Test(cmd), COMMAND_TIMEOUT_MS)?;
        Ok(())
    }

    /// Returns the text received since the last command.
    #[must_use]
    pub fn response(&self) -> &str {
        self.port.response().as_str()
    }

    /// Checks that the command interpreter answers.
    ///
    /// # Errors
    ///
    /// See [`Calypso::send_cmd`].
    pub fn test(&mut self) -> Result<(), CalypsoError> {
        self.send_cmd("AT+test")
    }

    /// Restarts the module and waits for [`EVENT_STARTUP`].
    ///
    /// # Errors
    ///
    /// See [`Calypso::send_cmd`] and [`Calypso::wait_event`].
    pub fn reboot(&mut self) -> Result<(), CalypsoError> {
        self.send_cmd("AT+reboot")?;
        self.wait_event(EVENT_STARTUP, STARTUP_TIMEOUT_MS)?;
        Ok(())
    }

    /// Restores factory settings and waits for the module to restart.
    ///
    /// # Errors
    ///
    /// See [`Calypso::send_cmd`] and [`Calypso::wait_event`].
    pub fn factory_reset(&mut self) -> Result<(), CalypsoError> {
        self.send_cmd("AT+factoryReset")?;
        self.wait_event(EVENT_STARTUP, FACTORY_RESET_TIMEOUT_MS)?;
        Ok(())
    }

    /// Sets the WLAN role. The module applies it on its next start.
    ///
    /// # Errors
    ///
    /// See [`Calypso::send_cmd`].
    pub fn set_wlan_mode(&mut self, mode: WlanMode) -> Result<(), CalypsoError> {
        self.send_cmd_with_params("AT+wlanSetMode", mode.as_str())
    }

    /// Starts connecting to `ssid`. Completion is reported by a `+eventwlan:connect` event.
    ///
    /// `key` is ignored for [`Security::Open`].
    ///
    /// # Errors
    ///
    /// - [`CalypsoError::At`] with [`AtError::Format`] if the parameters are too long.
    /// - See [`Calypso::send_cmd`].
    pub fn wlan_connect(
        &mut self,
        ssid: &str,
        security: Security,
        key: &str,
    ) -> Result<(), CalypsoError> {
        let key = if security == Security::Open { "" } else { key };
        let mut params = TextBuffer::<128>::new();
        write!(params, "{ssid},,{},{key},,,", security.as_str()).map_err(|_| AtError::Format)?;
        self.send_cmd_with_params("AT+wlanConnect", params.as_str())
    }

    /// Disconnects from the current network.
    ///
    /// # Errors
    ///
    /// See [`Calypso::send_cmd`].
    pub fn wlan_disconnect(&mut self) -> Result<(), CalypsoError> {
        self.send_cmd("AT+wlanDisconnect")
    }

    /// Opens a socket and returns its descriptor.
    ///
    /// # Errors
    ///
    /// - [`CalypsoError::At`] with [`AtError::UnexpectedResponse`] if no descriptor was returned.
    /// - See [`Calypso::send_cmd`].
    pub fn socket_open(&mut self, kind: SocketKind) -> Result<u8, CalypsoError> {
        self.send_cmd_with_params("AT+socket", kind.as_str())?;
        let socket = self
            .port
            .response()
            .line_after("+socket:")
            .and_then(|sd| sd.parse().ok())
            .ok_or(AtError::UnexpectedResponse)?;
        log::debug!("calypso: opened socket {socket}");
        Ok(socket)
    }

    /// Connects `socket` to an IPv4 `address` and `port`.
    ///
    /// # Errors
    ///
    /// See [`Calypso::send_cmd`].
    pub fn socket_connect(
        &mut self,
        socket: u8,
        port: u16,
        address: &str,
    ) -> Result<(), CalypsoError> {
        let mut params = TextBuffer::<64>::new();
        write!(params, "{socket},INET,{port},{address}").map_err(|_| AtError::Format)?;
        self.send_cmd_with_params("AT+connect", params.as_str())
    }

    /// Sends `data` as binary over a connected socket.
    ///
    /// # Errors
    ///
    /// - [`CalypsoError::PayloadTooLong`] if `data` exceeds [`MAX_SEND_LEN`].
    /// - See [`Calypso::send_cmd`].
    pub fn socket_send(&mut self, socket: u8, data: &[u8]) -> Result<(), CalypsoError> {
        if data.len() > MAX_SEND_LEN {
            return Err(CalypsoError::PayloadTooLong { len: data.len() });
        }

        let mut header = TextBuffer::<32>::new();
        write!(header, "AT+send={socket},0,{},", data.len()).map_err(|_| AtError::Format)?;

        self.port.clear();
        self.port.send_raw(header.as_bytes())?;
        self.port.send_raw(data)?;
        self.port.send_raw(b"\r\n")?;
        self.port.wait_response(COMMAND_TIMEOUT_MS)?;
        Ok(())
    }

    /// Waits for a complete line starting with `token` and returns the rest of it.
    ///
    /// Only output received since the last command is searched.
    ///
    /// # Errors
    ///
    /// - [`CalypsoError::At`] with [`AtError::Timeout`] if the event does not arrive in time.
    /// - [`CalypsoError::Bus`] if the UART fails.
    pub fn wait_event(&mut self, token: &str, timeout_ms: u32) -> Result<Event, CalypsoError> {
        let mut timeout = Timeout::from_millis(timeout_ms);
        loop {
            self.port.read_available()?;
            if let Some(params) = self.port.response().line_after(token) {
                let mut event = Event::new();
                event.write_str(params).map_err(|_| AtError::Format)?;
                log::trace!("calypso: {token}{params}");
                return Ok(event);
            }

            if timeout.expired() {
                return Err(AtError::Timeout { timeout_ms }.into());
            }
            timeout.tick(self.port.delay_mut(), 1);
        }
    }

    /// Returns the UART, the delay and the pins.
    pub fn release(self) -> (U, D, RST, AM0, AM1) {
        let (uart, delay) = self.port.release();
        (uart, delay, self.rst, self.am0, self.am1)
    }
}

/// Errors that can occur when using a Calypso Click.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Snafu)]
pub enum CalypsoError {
    /// A socket payload exceeds [`MAX_SEND_LEN`].
    #[snafu(display("payload of {len} bytes exceeds {MAX_SEND_LEN}"))]
    PayloadTooLong {
        /// The offending length.
        len: usize,
    },

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

    type Driver = Calypso<MockUart, MockDelay, MockPin, NoPin, NoPin>;

    fn driver() -> (MockUart, MockPin, Driver) {
        let uart = MockUart::new();
        let rst = MockPin::new();
        let wifi = Calypso::new(uart.clone(), MockDelay::new(), rst.clone(), NoPin, NoPin);
        (uart, rst, wifi)
    }

    #[test]
    fn init_resets_and_waits_for_startup() {
        let (uart, rst, mut wifi) = driver();
        uart.inject(b"\r\n+eventstartup\r\n");

        wifi.init().unwrap();
        assert_eq!(rst.history(), vec![false, true]);
    }

    #[test]
    fn init_times_out_without_startup_event() {
        let (_, _, mut wifi) = driver();
        assert_eq!(
            wifi.init(),
            Err(CalypsoError::At {
                source: AtError::Timeout {
                    timeout_ms: STARTUP_TIMEOUT_MS
                }
            })
        );
    }

    #[test]
    fn commands_use_crlf() {
        let (uart, _, mut wifi) = driver();
        uart.reply_on_flush(b"OK\r\n");
        uart.reply_on_flush(b"OK\r\n");

        wifi.set_wlan_mode(WlanMode::Station).unwrap();
        wifi.wlan_connect("lab", Security::Wpa3, "secret").unwrap();
        assert_eq!(
            uart.written_str(),
            "AT+wlanSetMode=STA\r\nAT+wlanConnect=lab,,WPA3,secret,,,\r\n"
        );
    }

    #[test]
    fn error_reply_is_reported() {
        let (uart, _, mut wifi) = driver();
        uart.reply_on_flush(b"error:command,-1\r\n");

        assert_eq!(
            wifi.test(),
            Err(CalypsoError::At {
                source: AtError::Command
            })
        );
    }

    #[test]
    fn socket_descriptor_is_parsed() {
        let (uart, _, mut wifi) = driver();
        uart.reply_on_flush(b"+socket:2\r\nOK\r\n");

        assert_eq!(wifi.socket_open(SocketKind::Udp), Ok(2));
        assert_eq!(uart.written_str(), "AT+socket=INET,DGRAM,UDP\r\n");
    }

    #[test]
    fn send_writes_binary_payload() {
        let (uart, _, mut wifi) = driver();
        uart.reply_on_flush(b"OK\r\n");

        wifi.socket_send(1, &[0x00, 0x0D, 0xFF]).unwrap();
        assert_eq!(uart.written(), b"AT+send=1,0,3,\x00\x0D\xFF\r\n");

        assert_eq!(
            wifi.socket_send(1, &[0; MAX_SEND_LEN + 1]),
            Err(CalypsoError::PayloadTooLong {
                len: MAX_SEND_LEN + 1
            })
        );
    }

    #[test]
    fn events_return_their_parameters() {
        let (uart, _, mut wifi) = driver();
        uart.inject(b"+eventwlan:connect,lab,0x1a:2b:3c:4d:5e:6f\r\n");

        let event = wifi.wait_event("+eventwlan:", 10).unwrap();
        assert_eq!(event.as_str(), "connect,lab,0x1a:2b:3c:4d:5e:6f");
    }

    #[test]
    fn reboot_waits_for_startup() {
        let (uart, _, mut wifi) = driver();
        uart.reply_on_flush(b"OK\r\n+eventstartup\r\n");

        wifi.reboot().unwrap();
        assert_eq!(uart.written_str(), "AT+reboot\r\n");
    }
}
