//! API mode framing.
//!
//! In API mode every message is wrapped in a frame:
//!
//! ```text
//! 0x7E | length (u16, big endian) | frame data | checksum
//! ```
//!
//! The first byte of the frame data is the frame type. The checksum is `0xFF` minus the low
//! byte of the sum of the frame data.

use snafu::Snafu;

/// Start delimiter.
pub const START: u8 = 0x7E;

/// Largest frame data accepted.
pub const MAX_FRAME_DATA: usize = 256;

/// Frame type of a 64-bit transmit request.
pub const TRANSMIT_REQUEST: u8 = 0x10;
/// Frame type of a local AT command.
pub const AT_COMMAND: u8 = 0x08;

/// Broadcast 64-bit destination.
pub const BROADCAST_ADDRESS: u64 = 0xFFFF;
/// 16-bit destination meaning "unknown, use the 64-bit address".
pub const UNKNOWN_NETWORK_ADDRESS: u16 = 0xFFFE;

/// Computes the checksum of `data`.
#[must_use]
pub fn checksum(data: &[u8]) -> u8 {
    0xFF - data.iter().fold(0u8, |sum, byte| sum.wrapping_add(*byte))
}

/// Errors produced while building or parsing frames.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Snafu)]
pub enum FrameError {
    /// The frame data exceeds [`MAX_FRAME_DATA`], or the output buffer is too small.
    #[snafu(display("frame of {len} bytes does not fit"))]
    FrameTooLong {
        /// The offending length.
        len: usize,
    },

    /// The received checksum does not match the frame data.
    #[snafu(display("checksum {received:#04x}, expected {expected:#04x}"))]
    ChecksumMismatch {
        /// The checksum computed from the received data.
        expected: u8,
        /// The checksum byte that was received.
        received: u8,
    },
}

/// The data of one API frame, frame type included.
#[derive(Clone, Eq, PartialEq)]
pub struct ApiFrame {
    data: [u8; MAX_FRAME_DATA],
    len: usize,
}

impl ApiFrame {
    /// Creates a frame of type `frame_type` followed by `body`.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::FrameTooLong`] if the frame data exceeds [`MAX_FRAME_DATA`].
    pub fn new(frame_type: u8, body: &[u8]) -> Result<Self, FrameError> {
        let mut frame = Self {
            data: [0; MAX_FRAME_DATA],
            len: 1,
        };
        frame.data[0] = frame_type;
        frame.extend(body)?;
        Ok(frame)
    }

    /// Builds a transmit request to `destination`.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::FrameTooLong`] if `payload` does not fit.
    pub fn transmit_request(
        frame_id: u8,
        destination: u64,
        network_address: u16,
        options: u8,
        payload: &[u8],
    ) -> Result<Self, FrameError> {
        let mut frame = Self::new(TRANSMIT_REQUEST, &[frame_id])?;
        frame.extend(&destination.to_be_bytes())?;
        frame.extend(&network_address.to_be_bytes())?;
        // Broadcast radius 0 selects the maximum hop count.
        frame.extend(&[0, options])?;
        frame.extend(payload)?;
        Ok(frame)
    }

    /// Builds a local AT command frame such as `("NI", b"")` to query the node identifier.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::FrameTooLong`] if `parameter` does not fit.
    pub fn at_command(frame_id: u8, command: &str, parameter: &[u8]) -> Result<Self, FrameError> {
        let mut frame = Self::new(AT_COMMAND, &[frame_id])?;
        frame.extend(command.as_bytes())?;
        frame.extend(parameter)?;
        Ok(frame)
    }

    /// Returns the frame type.
    #[must_use]
    pub const fn frame_type(&self) -> u8 {
        self.data[0]
    }

    /// Returns the frame data after the frame type.
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.data[1..self.len]
    }

    /// Returns the frame data, frame type included.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Writes the complete frame, delimiter to checksum, into `out` and returns its length.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::FrameTooLong`] if `out` is too small.
    pub fn encode(&self, out: &mut [u8]) -> Result<usize, FrameError> {
        let total = self.len + 4;
        if out.len() < total {
            return Err(FrameError::FrameTooLong { len: total });
        }

        let [hi, lo] = (self.len as u16).to_be_bytes();
        out[..3].copy_from_slice(&[START, hi, lo]);
        out[3..3 + self.len].copy_from_slice(self.data());
        out[3 + self.len] = checksum(self.data());
        Ok(total)
    }

    fn extend(&mut self, bytes: &[u8]) -> Result<(), FrameError> {
        let len = self.len + bytes.len();
        if len > MAX_FRAME_DATA {
            return Err(FrameError::FrameTooLong { len });
        }
        self.data[self.len..len].copy_from_slice(bytes);
        self.len = len;
        Ok(())
    }
}

impl core::fmt::Debug for ApiFrame {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ApiFrame")
            .field("frame_type", &self.frame_type())
            .field("body", &self.body())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum State {
    Start,
    LengthHigh,
    LengthLow,
    Data,
    Checksum,
}

/// Reassembles API frames from a byte stream, skipping bytes until a start delimiter.
#[derive(Debug, Clone)]
pub struct ApiFrameParser {
    state: State,
    expected: usize,
    frame: ApiFrame,
}

impl ApiFrameParser {
    /// Creates an idle parser.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: State::Start,
            expected: 0,
            frame: ApiFrame {
                data: [0; MAX_FRAME_DATA],
                len: 0,
            },
        }
    }

    /// Feeds one byte. Returns the frame it completes, if any.
    ///
    /// # Errors
    ///
    /// - [`FrameError::FrameTooLong`] if the length field exceeds [`MAX_FRAME_DATA`] or is 0.
    /// - [`FrameError::ChecksumMismatch`] if the frame is corrupt.
    ///
    /// The parser is ready for the next frame after an error.
    pub fn push(&mut self, byte: u8) -> Result<Option<ApiFrame>, FrameError> {
        match self.state {
            State::Start => {
                if byte == START {
                    self.state = State::LengthHigh;
                }
            }
            State::LengthHigh => {
                self.expected = usize::from(byte) << 8;
                self.state = State::LengthLow;
            }
            State::LengthLow => {
                self.expected |= usize::from(byte);
                if self.expected == 0 || self.expected > MAX_FRAME_DATA {
                    self.state = State::Start;
                    return Err(FrameError::FrameTooLong { len: self.expected });
                }
                self.frame.len = 0;
                self.state = State::Data;
            }
            State::Data => {
                self.frame.data[self.frame.len] = byte;
                self.frame.len += 1;
                if self.frame.len == self.expected {
                    self.state = State::Checksum;
                }
            }
            State::Checksum => {
                self.state = State::Start;
                let expected = checksum(self.frame.data());
                if byte != expected {
                    return Err(FrameError::ChecksumMismatch {
                        expected,
                        received: byte,
                    });
                }
                return Ok(Some(self.frame.clone()));
            }
        }
        Ok(None)
    }
}

impl Default for ApiFrameParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const NJ_QUERY: [u8; 8] = [0x7E, 0x00, 0x04, 0x08, 0x52, 0x4E, 0x4A, 0x0D];

    #[test]
    fn encodes_at_command_frame() {
        let frame = ApiFrame::at_command(0x52, "NJ", &[]).unwrap();
        let mut out = [0; 16];
        let len = frame.encode(&mut out).unwrap();
        assert_eq!(out[..len], NJ_QUERY);
    }

    #[test]
    fn parses_after_noise() {
        let mut parser = ApiFrameParser::new();
        let mut frames = Vec::new();
        for byte in [0x00, 0x11].into_iter().chain(NJ_QUERY) {
            if let Some(frame) = parser.push(byte).unwrap() {
                frames.push(frame);
            }
        }

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].frame_type(), AT_COMMAND);
        assert_eq!(frames[0].body(), [0x52, 0x4E, 0x4A]);
    }

    #[test]
    fn corrupt_checksum_is_reported() {
        let mut parser = ApiFrameParser::new();
        let mut corrupt = NJ_QUERY;
        corrupt[7] = 0x0E;

        let results: Vec<_> = corrupt.iter().map(|&byte| parser.push(byte)).collect();
        assert_eq!(
            results.last(),
            Some(&Err(FrameError::ChecksumMismatch {
                expected: 0x0D,
                received: 0x0E
            }))
        );
    }

    #[test]
    fn transmit_request_layout() {
        let frame =
            ApiFrame::transmit_request(1, 0x0013_A200_4000_0001, UNKNOWN_NETWORK_ADDRESS, 0, b"Hi")
                .unwrap();
        assert_eq!(
            frame.data(),
            [
                0x10, 0x01, 0x00, 0x13, 0xA2, 0x00, 0x40, 0x00, 0x00, 0x01, 0xFF, 0xFE, 0x00,
                0x00, b'H', b'i'
            ]
        );
        assert!(ApiFrame::transmit_request(1, 0, 0, 0, &[0; 250]).is_err());
    }
}
