//! BGAPI packet framing.
//!
//! ```text
//! byte 0: message type    0x20 command or response, 0xA0 event; bits 0..2 are length bits 8..10
//! byte 1: payload length  bits 0..7
//! byte 2: message class
//! byte 3: message id
//! byte 4..: payload
//! ```

use snafu::Snafu;

/// Largest payload a package may carry.
pub const MAX_PAYLOAD_LEN: usize = 255;

/// Length of the fixed package header.
pub const HEADER_LEN: usize = 4;

const TYPE_COMMAND: u8 = 0x20;
const TYPE_EVENT: u8 = 0xA0;
const TYPE_MASK: u8 = 0xF8;
const LENGTH_HIGH_MASK: u8 = 0x07;

/// Whether a package is a command (or its response) or an event.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum MessageType {
    /// A command from the host, or the module's response to one.
    Command,
    /// An event raised by the module.
    Event,
}

impl MessageType {
    const fn from_byte(byte: u8) -> Option<Self> {
        match byte & TYPE_MASK {
            TYPE_COMMAND => Some(Self::Command),
            TYPE_EVENT => Some(Self::Event),
            _ => None,
        }
    }

    const fn to_byte(self) -> u8 {
        match self {
            Self::Command => TYPE_COMMAND,
            Self::Event => TYPE_EVENT,
        }
    }
}

/// A BGAPI package.
#[derive(Clone, Eq, PartialEq)]
pub struct Package {
    /// Command/response or event.
    pub msg_type: MessageType,
    /// Message class.
    pub class: u8,
    /// Message id within the class.
    pub id: u8,
    payload: [u8; MAX_PAYLOAD_LEN],
    len: usize,
}

impl Package {
    /// Creates a package from its parts.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::PayloadTooLong`] if `payload` exceeds [`MAX_PAYLOAD_LEN`].
    pub fn new(
        msg_type: MessageType,
        class: u8,
        id: u8,
        payload: &[u8],
    ) -> Result<Self, PackageError> {
        let mut package = Self::empty(msg_type, class, id);
        package.extend(payload)?;
        Ok(package)
    }

    /// Creates a command package with no payload.
    #[must_use]
    pub const fn command(class: u8, id: u8) -> Self {
        Self::empty(MessageType::Command, class, id)
    }

    const fn empty(msg_type: MessageType, class: u8, id: u8) -> Self {
        Self {
            msg_type,
            class,
            id,
            payload: [0; MAX_PAYLOAD_LEN],
            len: 0,
        }
    }

    /// Appends raw bytes to the payload.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::PayloadTooLong`] if the payload would exceed [`MAX_PAYLOAD_LEN`].
    pub fn extend(&mut self, bytes: &[u8]) -> Result<&mut Self, PackageError> {
        let len = self.len + bytes.len();
        if len > MAX_PAYLOAD_LEN {
            return Err(PackageError::PayloadTooLong { len });
        }
        self.payload[self.len..len].copy_from_slice(bytes);
        self.len = len;
        Ok(self)
    }

    /// Appends a length-prefixed byte array parameter.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::PayloadTooLong`] if the payload would exceed [`MAX_PAYLOAD_LEN`].
    pub fn extend_array(&mut self, bytes: &[u8]) -> Result<&mut Self, PackageError> {
        let prefix = u8::try_from(bytes.len()).map_err(|_| PackageError::PayloadTooLong {
            len: self.len + 1 + bytes.len(),
        })?;
        self.extend(&[prefix])?.extend(bytes)
    }

    /// Returns the payload.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload[..self.len]
    }

    /// Returns the 16-bit result code that starts every response payload.
    #[must_use]
    pub fn result(&self) -> Option<u16> {
        match self.payload() {
            [low, high, ..] => Some(u16::from_le_bytes([*low, *high])),
            _ => None,
        }
    }

    /// Returns `true` if this package has the given type, class and id.
    #[must_use]
    pub const fn is(&self, msg_type: MessageType, class: u8, id: u8) -> bool {
        self.msg_type as u8 == msg_type as u8 && self.class == class && self.id == id
    }

    /// Returns the four header bytes.
    #[must_use]
    pub const fn header(&self) -> [u8; HEADER_LEN] {
        let len = self.len as u16;
        [
            self.msg_type.to_byte() | ((len >> 8) as u8 & LENGTH_HIGH_MASK),
            len as u8,
            self.class,
            self.id,
        ]
    }
}

impl core::fmt::Debug for Package {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Package")
            .field("msg_type", &self.msg_type)
            .field("class", &self.class)
            .field("id", &self.id)
            .field("payload", &self.payload())
            .finish()
    }
}

/// Errors produced while building or parsing packages.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Snafu)]
pub enum PackageError {
    /// The payload exceeds [`MAX_PAYLOAD_LEN`].
    #[snafu(display("payload of {len} bytes exceeds {MAX_PAYLOAD_LEN}"))]
    PayloadTooLong {
        /// The offending length.
        len: usize,
    },
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum State {
    Type,
    Length,
    Class,
    Id,
    Payload,
}

/// Reassembles packages from a byte stream.
///
/// Bytes are fed one at a time. While waiting for a package to start, bytes that are not a
/// valid message type are dropped, which resynchronises the parser after line noise. A header
/// announcing an over-long payload is rejected and the parser starts over.
#[derive(Debug, Clone)]
pub struct PackageParser {
    state: State,
    expected: usize,
    package: Package,
}

impl PackageParser {
    /// Creates an idle parser.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: State::Type,
            expected: 0,
            package: Package::command(0, 0),
        }
    }

    /// Drops any partially received package.
    pub const fn reset(&mut self) {
        self.state = State::Type;
        self.expected = 0;
    }

    /// Returns `true` if no package is partially received.
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        matches!(self.state, State::Type)
    }

    /// Feeds one byte. Returns the package it completes, if any.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::PayloadTooLong`] if a header announces more than
    /// [`MAX_PAYLOAD_LEN`] payload bytes.
    pub fn push(&mut self, byte: u8) -> Result<Option<Package>, PackageError> {
        match self.state {
            State::Type => match MessageType::from_byte(byte) {
                Some(msg_type) => {
                    self.package = Package::empty(msg_type, 0, 0);
                    self.expected = usize::from(byte & LENGTH_HIGH_MASK) << 8;
                    self.state = State::Length;
                }
                None => log::trace!("bt122a: skipping {byte:#04x}"),
            },
            State::Length => {
                self.expected |= usize::from(byte);
                if self.expected > MAX_PAYLOAD_LEN {
                    let len = self.expected;
                    self.reset();
                    return Err(PackageError::PayloadTooLong { len });
                }
                self.state = State::Class;
            }
            State::Class => {
                self.package.class = byte;
                self.state = State::Id;
            }
            State::Id => {
                self.package.id = byte;
                if self.expected == 0 {
                    return Ok(Some(self.finish()));
                }
                self.state = State::Payload;
            }
            State::Payload => {
                self.package.payload[self.package.len] = byte;
                self.package.len += 1;
                if self.package.len == self.expected {
                    return Ok(Some(self.finish()));
                }
            }
        }
        Ok(None)
    }

    fn finish(&mut self) -> Package {
        self.reset();
        self.package.clone()
    }
}

impl Default for PackageParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn parse_all(parser: &mut PackageParser, bytes: &[u8]) -> Vec<Result<Package, PackageError>> {
        bytes
            .iter()
            .filter_map(|&byte| parser.push(byte).transpose())
            .collect()
    }

    #[test]
    fn header_carries_length_and_type() {
        let mut package = Package::command(0x01, 0x0D);
        package.extend_array(b"Click").unwrap();

        assert_eq!(package.header(), [0x20, 0x06, 0x01, 0x0D]);
        assert_eq!(package.payload(), b"\x05Click");
    }

    #[test]
    fn parses_response_and_event() {
        let mut parser = PackageParser::new();
        let packages = parse_all(
            &mut parser,
            &[0x20, 0x02, 0x01, 0x00, 0x00, 0x00, 0xA0, 0x01, 0x01, 0x00, 0x07],
        );

        assert_eq!(packages.len(), 2);
        let response = packages[0].as_ref().unwrap();
        assert!(response.is(MessageType::Command, 0x01, 0x00));
        assert_eq!(response.result(), Some(0));

        let event = packages[1].as_ref().unwrap();
        assert!(event.is(MessageType::Event, 0x01, 0x00));
        assert_eq!(event.payload(), [0x07]);
        assert!(parser.is_idle());
    }

    #[test]
    fn resynchronises_on_noise() {
        let mut parser = PackageParser::new();
        let packages = parse_all(&mut parser, &[0x00, 0xFF, 0x13, 0x20, 0x00, 0x0C, 0x02]);

        assert_eq!(packages.len(), 1);
        assert!(packages[0].as_ref().unwrap().is(MessageType::Command, 0x0C, 0x02));
    }

    #[test]
    fn rejects_long_payloads() {
        let mut parser = PackageParser::new();
        assert_eq!(
            parse_all(&mut parser, &[0x21, 0x10]),
            vec![Err(PackageError::PayloadTooLong { len: 0x110 })]
        );
        assert!(parser.is_idle());

        let mut package = Package::command(0, 0);
        assert_eq!(
            package.extend(&[0; 256]).map(|_| ()),
            Err(PackageError::PayloadTooLong { len: 256 })
        );
    }
}
