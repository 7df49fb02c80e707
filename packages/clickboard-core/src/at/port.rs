use core::fmt;

use embedded_hal::delay::DelayNs;
use embedded_io::{Read, ReadReady, Write};

use super::{AtCommand, AtError, Outcome, ResponseBuffer, ResponseTokens};
use crate::{BusError, time::Timeout};

/// Polling interval while waiting for a response, in milliseconds.
const POLL_STEP_MS: u32 = 1;

/// A UART connected to an AT command interpreter.
///
/// The port owns the UART, a delay used for busy-waiting, and a bounded buffer that collects
/// everything the device sends back. Sending a command clears the buffer, so after
/// [`AtPort::wait_response`] returns the buffer holds exactly the response to that command
/// (plus any unsolicited output that arrived in between).
///
/// # Examples
///
/// ```
/// use clickboard_core::at::{AtCommand, AtError, AtPort, ResponseTokens};
/// use embedded_hal::delay::DelayNs;
/// use embedded_io::{Read, ReadReady, Write};
///
/// fn signal_report<U, D>(uart: U, delay: D) -> Result<Option<i32>, AtError>
/// where
///     U: Read + ReadReady + Write,
///     D: DelayNs,
/// {
///     let mut port = AtPort::<_, _>::new(uart, delay, ResponseTokens::STANDARD);
///     port.command(AtCommand::Run("AT+CSQ"), 1_000)?;
///
///     let rssi = port
///         .response()
///         .line_after("+CSQ:")
///         .and_then(|line| line.split(',').next())
///         .and_then(|rssi| rssi.parse().ok());
///     Ok(rssi)
/// }
/// ```
#[derive(Debug)]
pub struct AtPort<U, D, const N: usize = 256> {
    uart: U,
    delay: D,
    tokens: ResponseTokens,
    terminator: &'static str,
    rx: ResponseBuffer<N>,
}

impl<U, D, const N: usize> AtPort<U, D, N>
where
    U: Read + ReadReady + Write,
    D: DelayNs,
{
    /// Creates a port that terminates commands with `\r`.
    pub const fn new(uart: U, delay: D, tokens: ResponseTokens) -> Self {
        Self {
            uart,
            delay,
            tokens,
            terminator: "\r",
            rx: ResponseBuffer::new(),
        }
    }

    /// Replaces the command line terminator.
    #[must_use]
    pub const fn with_terminator(mut self, terminator: &'static str) -> Self {
        self.terminator = terminator;
        self
    }

    /// Returns the result codes this port waits for.
    #[must_use]
    pub const fn tokens(&self) -> &ResponseTokens {
        &self.tokens
    }

    /// Clears the response buffer and writes `cmd` followed by the terminator.
    ///
    /// # Errors
    ///
    /// Returns [`AtError::Bus`] if the UART write fails.
    pub fn send(&mut self, cmd: AtCommand<'_>) -> Result<(), AtError> {
        log::trace!("> {cmd}");
        self.rx.clear();

        let terminator = self.terminator;
        let mut out = UartWriter {
            uart: &mut self.uart,
            error: None,
        };
        if cmd.encode(&mut out, terminator).is_err() {
            return Err(out.error.map_or(AtError::Format, AtError::from));
        }
        self.flush()
    }

    /// Writes `bytes` verbatim, without a terminator and without clearing the response buffer.
    ///
    /// # Errors
    ///
    /// Returns [`AtError::Bus`] if the UART write fails.
    pub fn send_raw(&mut self, bytes: &[u8]) -> Result<(), AtError> {
        log::trace!("> {} raw bytes", bytes.len());
        self.write(bytes)?;
        self.flush()
    }

    /// Moves every byte the UART has ready into the response buffer.
    ///
    /// Returns the number of bytes moved.
    ///
    /// # Errors
    ///
    /// Returns [`AtError::Bus`] if the UART read fails.
    pub fn read_available(&mut self) -> Result<usize, AtError> {
        let mut chunk = [0; 32];
        let mut total = 0;

        while self.uart.read_ready().map_err(BusError::uart)? {
            let count = self.uart.read(&mut chunk).map_err(BusError::uart)?;
            if count == 0 {
                break;
            }
            self.rx.push(&chunk[..count]);
            total += count;
        }

        Ok(total)
    }

    /// Polls the UART until a final result code arrives.
    ///
    /// # Errors
    ///
    /// - [`AtError::Command`] if the device answered with an error result code.
    /// - [`AtError::Timeout`] if no result code arrived within `timeout_ms`.
    /// - [`AtError::Bus`] if the UART read fails.
    pub fn wait_response(&mut self, timeout_ms: u32) -> Result<(), AtError> {
        let mut timeout = Timeout::from_millis(timeout_ms);
        loop {
            self.read_available()?;
            match self.rx.outcome(&self.tokens) {
                Some(Outcome::Ok) => {
                    log::trace!("< {}", self.rx.as_str().trim());
                    return Ok(());
                }
                Some(Outcome::Error) => {
                    log::debug!("command failed: {}", self.rx.as_str().trim());
                    return Err(AtError::Command);
                }
                None => {}
            }

            if timeout.expired() {
                return Err(AtError::Timeout { timeout_ms });
            }
            timeout.tick(&mut self.delay, POLL_STEP_MS);
        }
    }

    /// Polls the UART until `token` appears anywhere in the response buffer.
    ///
    /// # Errors
    ///
    /// - [`AtError::Timeout`] if `token` did not arrive within `timeout_ms`.
    /// - [`AtError::Bus`] if the UART read fails.
    pub fn wait_for(&mut self, token: &str, timeout_ms: u32) -> Result<(), AtError> {
        let mut timeout = Timeout::from_millis(timeout_ms);
        loop {
            self.read_available()?;
            if self.rx.contains(token) {
                return Ok(());
            }

            if timeout.expired() {
                return Err(AtError::Timeout { timeout_ms });
            }
            timeout.tick(&mut self.delay, POLL_STEP_MS);
        }
    }

    /// Sends `cmd` and waits for its final result code.
    ///
    /// # Errors
    ///
    /// See [`AtPort::send`] and [`AtPort::wait_response`].
    pub fn command(&mut self, cmd: AtCommand<'_>, timeout_ms: u32) -> Result<(), AtError> {
        self.send(cmd)?;
        self.wait_response(timeout_ms)
    }

    /// Returns the bytes received since the last command.
    #[must_use]
    pub const fn response(&self) -> &ResponseBuffer<N> {
        &self.rx
    }

    /// Empties the response buffer.
    pub fn clear(&mut self) {
        self.rx.clear();
    }

    /// Returns the delay, for drivers that need to wait between commands.
    pub const fn delay_mut(&mut self) -> &mut D {
        &mut self.delay
    }

    /// Returns the UART, for drivers that need to bypass the command layer.
    pub const fn uart_mut(&mut self) -> &mut U {
        &mut self.uart
    }

    /// Returns the UART and the delay.
    pub fn release(self) -> (U, D) {
        (self.uart, self.delay)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), AtError> {
        self.uart.write_all(bytes).map_err(BusError::uart)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), AtError> {
        self.uart.flush().map_err(BusError::uart)?;
        Ok(())
    }
}

/// Writes formatted text straight to the UART, keeping the first write error.
struct UartWriter<'a, U> {
    uart: &'a mut U,
    error: Option<BusError>,
}

impl<U: Write> fmt::Write for UartWriter<'_, U> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.uart.write_all(s.as_bytes()).map_err(|error| {
            self.error = Some(BusError::uart(error));
            fmt::Error
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mock::{MockDelay, MockUart};

    fn port(uart: &MockUart, delay: &MockDelay) -> AtPort<MockUart, MockDelay> {
        AtPort::new(uart.clone(), delay.clone(), ResponseTokens::STANDARD)
    }

    #[test]
    fn set_and_get_are_encoded_exactly() {
        let uart = MockUart::new();
        let mut port = port(&uart, &MockDelay::new());

        port.send(AtCommand::Set("AT+CFUN", "1")).unwrap();
        assert_eq!(uart.written(), b"AT+CFUN=1\r");

        uart.clear_written();
        port.send(AtCommand::Get("AT+CEREG")).unwrap();
        assert_eq!(uart.written(), b"AT+CEREG?\r");
    }

    #[test]
    fn custom_terminator_follows_every_shape() {
        let uart = MockUart::new();
        let mut port = port(&uart, &MockDelay::new()).with_terminator("\r\n");

        port.send(AtCommand::Test("AT+COPS")).unwrap();
        port.send(AtCommand::Run("ATI")).unwrap();
        assert_eq!(uart.written(), b"AT+COPS=?\r\nATI\r\n");
    }

    #[test]
    fn ok_finishes_the_wait() {
        let uart = MockUart::new();
        uart.reply_on_flush(b"AT\r\r\nOK\r\n");
        let mut port = port(&uart, &MockDelay::new());

        assert_eq!(port.command(AtCommand::Run("AT"), 100), Ok(()));
    }

    #[test]
    fn error_result_is_reported() {
        let uart = MockUart::new();
        uart.reply_on_flush(b"\r\nERROR\r\n");
        let mut port = port(&uart, &MockDelay::new());

        assert_eq!(
            port.command(AtCommand::Set("AT+COPS", "9"), 100),
            Err(AtError::Command)
        );
    }

    #[test]
    fn silence_times_out() {
        let uart = MockUart::new();
        let delay = MockDelay::new();
        let mut port = port(&uart, &delay);

        assert_eq!(
            port.command(AtCommand::Run("AT"), 50),
            Err(AtError::Timeout { timeout_ms: 50 })
        );
        assert_eq!(delay.elapsed_ms(), 50);
    }

    #[test]
    fn unterminated_ok_times_out() {
        let uart = MockUart::new();
        uart.reply_on_flush(b"\r\nOK");
        let mut port = port(&uart, &MockDelay::new());

        assert_eq!(
            port.command(AtCommand::Run("AT"), 10),
            Err(AtError::Timeout { timeout_ms: 10 })
        );
    }

    #[test]
    fn wait_for_prompt() {
        let uart = MockUart::new();
        uart.reply_on_flush(b"\r\n> ");
        let mut port = port(&uart, &MockDelay::new());

        port.send(AtCommand::Set("AT+CMGS", "\"+15550100\"")).unwrap();
        assert_eq!(port.wait_for(">", 100), Ok(()));
    }
}
