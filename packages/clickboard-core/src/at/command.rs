use core::fmt;

/// One AT command.
///
/// The command text includes its prefix (`"AT+CFUN"`, `"ATI"`), so the same type covers
/// extended and basic commands. The line terminator is added by [`AtPort`](super::AtPort).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum AtCommand<'a> {
    /// `<cmd>`: execute.
    Run(&'a str),

    /// `<cmd>=<value>`: set a parameter.
    Set(&'a str, &'a str),

    /// `<cmd>?`: read the current parameter value.
    Get(&'a str),

    /// `<cmd>=?`: list the supported parameter values.
    Test(&'a str),
}

impl AtCommand<'_> {
    /// Returns the command text without its terminator.
    #[must_use]
    pub const fn command(&self) -> &str {
        match self {
            Self::Run(cmd) | Self::Set(cmd, _) | Self::Get(cmd) | Self::Test(cmd) => *cmd,
        }
    }

    /// Writes the encoded command, followed by `terminator`, into `out`.
    ///
    /// # Errors
    ///
    /// Returns [`fmt::Error`] if `out` refuses the text.
    pub fn encode<W: fmt::Write>(&self, out: &mut W, terminator: &str) -> fmt::Result {
        write!(out, "{self}{terminator}")
    }
}

impl fmt::Display for AtCommand<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Run(cmd) => f.write_str(cmd),
            Self::Set(cmd, value) => write!(f, "{cmd}={value}"),
            Self::Get(cmd) => write!(f, "{cmd}?"),
            Self::Test(cmd) => write!(f, "{cmd}=?"),
        }
    }
}

/// A fixed-capacity text buffer for building command arguments.
///
/// Writing past the capacity fails with [`fmt::Error`] and leaves the contents untouched.
///
/// ```
/// use core::fmt::Write;
/// use clickboard_core::at::TextBuffer;
///
/// let mut value = TextBuffer::<32>::new();
/// write!(value, "1,\"IP\",\"{}\"", "internet").unwrap();
/// assert_eq!(value.as_str(), "1,\"IP\",\"internet\"");
/// ```
pub type TextBuffer<const N: usize> = heapless::String<N>;

#[cfg(test)]
mod test {
    use core::fmt::Write;

    use super::*;

    fn encoded(cmd: AtCommand<'_>) -> TextBuffer<64> {
        let mut out = TextBuffer::new();
        cmd.encode(&mut out, "\r").unwrap();
        out
    }

    #[test]
    fn command_shapes() {
        assert_eq!(encoded(AtCommand::Run("AT")).as_str(), "AT\r");
        assert_eq!(encoded(AtCommand::Set("AT+CFUN", "1")).as_str(), "AT+CFUN=1\r");
        assert_eq!(encoded(AtCommand::Get("AT+CREG")).as_str(), "AT+CREG?\r");
        assert_eq!(encoded(AtCommand::Test("AT+COPS")).as_str(), "AT+COPS=?\r");
    }

    #[test]
    fn text_buffer_rejects_overflow() {
        let mut value = TextBuffer::<4>::new();
        assert!(write!(value, "abcd").is_ok());
        assert!(write!(value, "e").is_err());
        assert_eq!(value.as_str(), "abcd");

        value.clear();
        assert!(value.is_empty());
    }
}
