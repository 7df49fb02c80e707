use core::fmt;

use heapless::Vec;

/// The final result codes of one AT dialect.
///
/// A response is finished when a complete line equals one of the `ok` codes or starts with one
/// of the `error` codes. Lines are separated by `\r` and/or `\n`; a line still being received
/// never counts.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ResponseTokens {
    /// Lines that finish a successful response.
    pub ok: &'static [&'static str],

    /// Line prefixes that finish a failed response.
    pub error: &'static [&'static str],
}

impl ResponseTokens {
    /// Plain `OK` / `ERROR`.
    pub const STANDARD: Self = Self {
        ok: &["OK"],
        error: &["ERROR"],
    };

    /// 3GPP TS 27.007 final result codes, including extended mobile equipment and SMS errors.
    pub const CELLULAR: Self = Self {
        ok: &["OK"],
        error: &["ERROR", "+CME ERROR", "+CMS ERROR"],
    };
}

/// How a response buffer ended.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Outcome {
    /// An `ok` result code was received.
    Ok,

    /// An `error` result code was received.
    Error,
}

/// A bounded buffer of response bytes.
///
/// When an append would overflow the buffer, its previous contents are discarded first, so a
/// flood of unsolicited output cannot wedge the driver. The overflow is logged.
#[derive(Clone)]
pub struct ResponseBuffer<const N: usize> {
    bytes: Vec<u8, N>,
}

impl<const N: usize> ResponseBuffer<N> {
    /// Creates an empty buffer.
    #[must_use]
    pub const fn new() -> Self {
        Self { bytes: Vec::new() }
    }

    /// Appends received bytes.
    ///
    /// Returns `true` if earlier contents were discarded to make room.
    pub fn push(&mut self, bytes: &[u8]) -> bool {
        if self.bytes.extend_from_slice(bytes).is_ok() {
            return false;
        }

        log::warn!("response buffer full ({N} bytes), discarding contents");
        self.bytes.clear();
        // At most N bytes, so this always fits.
        let tail = &bytes[bytes.len().saturating_sub(N)..];
        let _ = self.bytes.extend_from_slice(tail);
        true
    }

    /// Empties the buffer.
    pub fn clear(&mut self) {
        self.bytes.clear();
    }

    /// Returns the received bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Returns the received bytes up to the first invalid UTF-8 sequence.
    #[must_use]
    pub fn as_str(&self) -> &str {
        let bytes = self.as_bytes();
        match core::str::from_utf8(bytes) {
            Ok(text) => text,
            Err(error) => core::str::from_utf8(&bytes[..error.valid_up_to()]).unwrap_or(""),
        }
    }

    /// Returns the number of buffered bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns `true` if nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Returns `true` if `token` occurs anywhere in the buffer.
    #[must_use]
    pub fn contains(&self, token: &str) -> bool {
        self.find(token).is_some()
    }

    /// Returns the byte offset of the first occurrence of `token`.
    #[must_use]
    pub fn find(&self, token: &str) -> Option<usize> {
        let needle = token.as_bytes();
        if needle.is_empty() {
            return Some(0);
        }
        self.as_bytes()
            .windows(needle.len())
            .position(|window| window == needle)
    }

    /// Iterates over the complete, non-empty lines received so far.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        let text = self.as_str();
        let complete = text.rfind(['\r', '\n']).map_or("", |end| &text[..end]);
        complete
            .split(['\r', '\n'])
            .map(str::trim)
            .filter(|line| !line.is_empty())
    }

    /// Returns the first complete line starting with `prefix`, with the prefix removed.
    ///
    /// Useful for information responses such as `+CSQ: 21,99`.
    #[must_use]
    pub fn line_after(&self, prefix: &str) -> Option<&str> {
        self.lines()
            .find_map(|line| line.strip_prefix(prefix))
            .map(str::trim)
    }

    /// Returns how the response ended, if it has.
    #[must_use]
    pub fn outcome(&self, tokens: &ResponseTokens) -> Option<Outcome> {
        self.lines().find_map(|line| {
            if tokens.error.iter().any(|token| line.starts_with(token)) {
                Some(Outcome::Error)
            } else if tokens.ok.iter().any(|token| *token == line) {
                Some(Outcome::Ok)
            } else {
                None
            }
        })
    }
}

impl<const N: usize> Default for ResponseBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> fmt::Debug for ResponseBuffer<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseBuffer")
            .field("contents", &self.as_str())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn finds_tokens() {
        let mut buffer = ResponseBuffer::<32>::new();
        buffer.push(b"\r\n+CSQ: 21,99\r\n");
        buffer.push(b"\r\nOK\r\n");

        assert!(buffer.contains("+CSQ"));
        assert_eq!(buffer.find("OK"), Some(17));
        assert_eq!(buffer.line_after("+CSQ:"), Some("21,99"));
        assert_eq!(buffer.outcome(&ResponseTokens::STANDARD), Some(Outcome::Ok));
    }

    #[test]
    fn partial_line_is_not_a_result() {
        let mut buffer = ResponseBuffer::<32>::new();
        buffer.push(b"\r\nOK");
        assert_eq!(buffer.outcome(&ResponseTokens::STANDARD), None);

        buffer.push(b"\r\n");
        assert_eq!(buffer.outcome(&ResponseTokens::STANDARD), Some(Outcome::Ok));
    }

    #[test]
    fn ok_must_be_the_whole_line() {
        let mut buffer = ResponseBuffer::<64>::new();
        buffer.push(b"+COPS: 0,0,\"TOKYO\"\r\n");
        assert_eq!(buffer.outcome(&ResponseTokens::STANDARD), None);
    }

    #[test]
    fn extended_errors() {
        let mut buffer = ResponseBuffer::<64>::new();
        buffer.push(b"\r\n+CME ERROR: 10\r\n");

        assert_eq!(buffer.outcome(&ResponseTokens::STANDARD), None);
        assert_eq!(
            buffer.outcome(&ResponseTokens::CELLULAR),
            Some(Outcome::Error)
        );
    }

    #[test]
    fn overflow_discards_old_contents() {
        let mut buffer = ResponseBuffer::<8>::new();
        assert!(!buffer.push(b"abcdef"));
        assert!(buffer.push(b"ghij"));
        assert_eq!(buffer.as_str(), "ghij");

        assert!(buffer.push(b"0123456789"));
        assert_eq!(buffer.as_str(), "23456789");
    }
}
