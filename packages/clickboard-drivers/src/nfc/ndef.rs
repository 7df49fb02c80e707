//! NDEF record and TLV encoding.
//!
//! Only single short records are produced, which is all a phone needs to open a link or show
//! a line of text when it taps the tag.

use snafu::Snafu;

/// Type of an NDEF message TLV.
pub const NDEF_TLV: u8 = 0x03;

/// Type of the terminator TLV.
pub const TERMINATOR_TLV: u8 = 0xFE;

/// Header of a lone short record with a well-known type: `MB | ME | SR | TNF=1`.
const SHORT_WELL_KNOWN: u8 = 0xD1;

/// URI identifier codes from the NFC Forum URI record type definition.
///
/// Longer prefixes come first so the best match wins.
const URI_PREFIXES: [(&str, u8); 8] = [
    ("http://www.", 0x01),
    ("https://www.", 0x02),
    ("http://", 0x03),
    ("https://", 0x04),
    ("tel:", 0x05),
    ("mailto:", 0x06),
    ("ftp://", 0x0D),
    ("file://", 0x1D),
];

/// Errors produced while encoding NDEF data.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Snafu)]
pub enum NdefError {
    /// The record payload does not fit a short record.
    #[snafu(display("payload of {len} bytes does not fit a short record"))]
    PayloadTooLong {
        /// Payload length that was requested.
        len: usize,
    },

    /// The output buffer is too small for the encoded record.
    #[snafu(display("record needs {needed} bytes"))]
    BufferTooSmall {
        /// Bytes the record needs.
        needed: usize,
    },
}

/// Writes a text record (`T`) in UTF-8 to `out` and returns its length.
///
/// `language` is an IANA language code such as `"en"`.
///
/// # Errors
///
/// - [`NdefError::PayloadTooLong`] if status byte, language and text exceed 255 bytes.
/// - [`NdefError::BufferTooSmall`] if `out` cannot hold the record.
///
/// # Examples
///
/// ```
/// use clickboard_drivers::nfc::ndef::text_record;
///
/// let mut out = [0; 16];
/// let len = text_record("hi", "en", &mut out).unwrap();
/// assert_eq!(&out[..len], b"\xD1\x01\x05T\x02enhi");
/// ```
pub fn text_record(text: &str, language: &str, out: &mut [u8]) -> Result<usize, NdefError> {
    let payload_len = 1 + language.len() + text.len();
    // Status byte: bit 7 clear for UTF-8, low six bits carry the language code length.
    let status = (language.len() & 0x3F) as u8;
    short_record(b'T', &[&[status], language.as_bytes(), text.as_bytes()], payload_len, out)
}

/// Writes a URI record (`U`) to `out` and returns its length.
///
/// Common schemes are replaced by their one-byte identifier code.
///
/// # Errors
///
/// - [`NdefError::PayloadTooLong`] if the abbreviated URI exceeds 254 bytes.
/// - [`NdefError::BufferTooSmall`] if `out` cannot hold the record.
pub fn uri_record(uri: &str, out: &mut [u8]) -> Result<usize, NdefError> {
    let (code, rest) = URI_PREFIXES
        .iter()
        .find_map(|&(prefix, code)| uri.strip_prefix(prefix).map(|rest| (code, rest)))
        .unwrap_or((0x00, uri));

    short_record(b'U', &[&[code], rest.as_bytes()], 1 + rest.len(), out)
}

/// Returns the NDEF message TLV header for a message of `len` bytes, and how many of the
/// returned bytes are used.
///
/// Messages shorter than 255 bytes use the one-byte length form, longer ones the three-byte
/// form.
#[must_use]
pub const fn tlv_header(len: u16) -> ([u8; 4], usize) {
    if len < 0xFF {
        ([NDEF_TLV, len as u8, 0, 0], 2)
    } else {
        let [hi, lo] = len.to_be_bytes();
        ([NDEF_TLV, 0xFF, hi, lo], 4)
    }
}

fn short_record(
    record_type: u8,
    parts: &[&[u8]],
    payload_len: usize,
    out: &mut [u8],
) -> Result<usize, NdefError> {
    let payload_len_byte =
        u8::try_from(payload_len).map_err(|_| NdefError::PayloadTooLong { len: payload_len })?;

    let needed = 4 + payload_len;
    if out.len() < needed {
        return Err(NdefError::BufferTooSmall { needed });
    }

    out[..4].copy_from_slice(&[SHORT_WELL_KNOWN, 0x01, payload_len_byte, record_type]);
    let mut offset = 4;
    for part in parts {
        out[offset..offset + part.len()].copy_from_slice(part);
        offset += part.len();
    }
    Ok(offset)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn uri_prefix_is_abbreviated() {
        let mut out = [0; 32];
        let len = uri_record("https://www.mikroe.com", &mut out).unwrap();
        assert_eq!(&out[..len], b"\xD1\x01\x0BU\x02mikroe.com");

        let len = uri_record("urn:x", &mut out).unwrap();
        assert_eq!(&out[..len], b"\xD1\x01\x06U\x00urn:x");
    }

    #[test]
    fn text_record_layout() {
        let mut out = [0; 32];
        let len = text_record("Click", "en", &mut out).unwrap();
        assert_eq!(len, 12);
        assert_eq!(out[2], 8);
        assert_eq!(out[4], 2);
        assert_eq!(&out[5..len], b"enClick");
    }

    #[test]
    fn size_limits() {
        let mut small = [0; 4];
        assert_eq!(
            uri_record("tel:1", &mut small),
            Err(NdefError::BufferTooSmall { needed: 6 })
        );

        let long = "x".repeat(300);
        let mut out = [0; 512];
        assert_eq!(
            text_record(&long, "en", &mut out),
            Err(NdefError::PayloadTooLong { len: 303 })
        );
    }

    #[test]
    fn tlv_length_forms() {
        assert_eq!(tlv_header(12), ([0x03, 12, 0, 0], 2));
        assert_eq!(tlv_header(0x0123), ([0x03, 0xFF, 0x01, 0x23], 4));
    }
}
