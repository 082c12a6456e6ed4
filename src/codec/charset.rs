//! Character sets supported by the line codec

use std::fmt;
use std::str::FromStr;

use bytes::{BufMut, BytesMut};

use crate::error::Error;

/// Replacement byte for characters the target charset cannot represent.
const UNMAPPABLE: u8 = b'?';

/// A single-byte or UTF-8 text encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Charset {
    /// ISO-8859-1: every byte maps to the code point of the same value.
    Latin1,
    /// US-ASCII: 7-bit only.
    Ascii,
    Utf8,
}

impl Charset {
    /// Look up a charset by one of its common names (case-insensitive).
    pub fn for_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "iso-8859-1" | "iso8859-1" | "iso_8859_1" | "latin1" | "latin-1" | "l1" => {
                Some(Self::Latin1)
            }
            "us-ascii" | "ascii" => Some(Self::Ascii),
            "utf-8" | "utf8" => Some(Self::Utf8),
            _ => None,
        }
    }

    /// Canonical name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Latin1 => "iso-8859-1",
            Self::Ascii => "us-ascii",
            Self::Utf8 => "utf-8",
        }
    }

    /// Decode bytes into text. Invalid input is replaced, never rejected.
    pub fn decode(&self, bytes: &[u8]) -> String {
        match self {
            Self::Latin1 => bytes.iter().map(|&b| b as char).collect(),
            Self::Ascii => bytes
                .iter()
                .map(|&b| if b.is_ascii() { b as char } else { char::REPLACEMENT_CHARACTER })
                .collect(),
            Self::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
        }
    }

    /// Number of bytes `text` occupies once encoded.
    pub fn encoded_len(&self, text: &str) -> usize {
        match self {
            Self::Latin1 | Self::Ascii => text.chars().count(),
            Self::Utf8 => text.len(),
        }
    }

    /// Encode text, appending to `dst`.
    pub fn encode_into(&self, text: &str, dst: &mut BytesMut) {
        match self {
            Self::Latin1 => {
                dst.reserve(text.len());
                for c in text.chars() {
                    let code = c as u32;
                    dst.put_u8(if code <= 0xFF { code as u8 } else { UNMAPPABLE });
                }
            }
            Self::Ascii => {
                dst.reserve(text.len());
                for c in text.chars() {
                    dst.put_u8(if c.is_ascii() { c as u8 } else { UNMAPPABLE });
                }
            }
            Self::Utf8 => dst.extend_from_slice(text.as_bytes()),
        }
    }
}

impl Default for Charset {
    fn default() -> Self {
        Self::Latin1
    }
}

impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Charset {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::for_name(s).ok_or_else(|| Error::invalid("charset", format!("not supported: {s}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_charset_lookup() {
        assert_eq!(Charset::for_name("ISO-8859-1"), Some(Charset::Latin1));
        assert_eq!(Charset::for_name(" utf8 "), Some(Charset::Utf8));
        assert_eq!(Charset::for_name("US-ASCII"), Some(Charset::Ascii));
        assert!(Charset::for_name("ebcdic").is_none());
        assert!("".parse::<Charset>().is_err());
    }

    #[test]
    fn test_latin1_maps_high_bytes() {
        let decoded = Charset::Latin1.decode(&[0x63, 0x61, 0x66, 0xE9]);
        assert_eq!(decoded, "caf\u{e9}");

        let mut buf = BytesMut::new();
        Charset::Latin1.encode_into("caf\u{e9}\u{20ac}", &mut buf);
        assert_eq!(&buf[..], &[0x63, 0x61, 0x66, 0xE9, b'?']);
    }

    #[test]
    fn test_ascii_replaces_non_ascii() {
        assert_eq!(Charset::Ascii.decode(&[b'a', 0xFF]), "a\u{fffd}");

        let mut buf = BytesMut::new();
        Charset::Ascii.encode_into("a\u{e9}", &mut buf);
        assert_eq!(&buf[..], b"a?");
    }
}
