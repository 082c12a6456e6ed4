//! Text line codec
//!
//! Implements tokio's `Decoder` and `Encoder` traits for newline-delimited
//! text. Decoding and encoding are configured independently: each side has
//! its own charset, delimiter and maximum line length.

use std::fmt;
use std::io;

use bytes::{Buf, BytesMut};
use serde::{Deserialize, Serialize};
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

use super::Charset;
use crate::config::CodecConfig;
use crate::error::{Error, Result};

/// Default maximum decoded line length in bytes.
pub const DEFAULT_DECODER_MAX_LINE_LENGTH: usize = 10 * 1024;

/// Default maximum encoded line length in bytes.
pub const DEFAULT_ENCODER_MAX_LINE_LENGTH: usize = 100 * 1024;

/// Line terminator style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LineDelimiter {
    /// Decoding only: a line ends at `\n`, and any `\r` right before it is dropped.
    Auto,
    /// `\n`
    Unix,
    /// `\r\n`
    Windows,
    /// `\r`
    Mac,
}

impl LineDelimiter {
    /// Delimiter bytes. Empty for [`LineDelimiter::Auto`].
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            Self::Auto => b"",
            Self::Unix => b"\n",
            Self::Windows => b"\r\n",
            Self::Mac => b"\r",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Auto => "AUTO",
            Self::Unix => "UNIX",
            Self::Windows => "WINDOWS",
            Self::Mac => "MAC",
        }
    }
}

impl fmt::Display for LineDelimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Codec for delimited text lines.
#[derive(Debug, Clone)]
pub struct TextLineCodec {
    decoder_charset: Charset,
    decoder_delimiter: LineDelimiter,
    decoder_max_line_length: usize,
    encoder_charset: Charset,
    encoder_delimiter: LineDelimiter,
    encoder_max_line_length: usize,
    /// Where the next delimiter scan resumes within the read buffer.
    next_index: usize,
}

impl TextLineCodec {
    /// ISO-8859-1 both ways, `Auto` for decoding and `Windows` for encoding.
    pub fn new() -> Self {
        Self {
            decoder_charset: Charset::Latin1,
            decoder_delimiter: LineDelimiter::Auto,
            decoder_max_line_length: DEFAULT_DECODER_MAX_LINE_LENGTH,
            encoder_charset: Charset::Latin1,
            encoder_delimiter: LineDelimiter::Windows,
            encoder_max_line_length: DEFAULT_ENCODER_MAX_LINE_LENGTH,
            next_index: 0,
        }
    }

    /// Codec with explicit charsets and delimiters.
    ///
    /// # Errors
    ///
    /// Fails if either charset is blank or unsupported, or if the encoder
    /// delimiter is [`LineDelimiter::Auto`].
    pub fn with_settings(
        decoder_charset: &str,
        decoder_delimiter: LineDelimiter,
        encoder_charset: &str,
        encoder_delimiter: LineDelimiter,
    ) -> Result<Self> {
        if decoder_charset.trim().is_empty() {
            return Err(Error::MissingArgument {
                name: "decoder_charset",
            });
        }
        if encoder_charset.trim().is_empty() {
            return Err(Error::MissingArgument {
                name: "encoder_charset",
            });
        }
        if encoder_delimiter == LineDelimiter::Auto {
            return Err(Error::invalid(
                "encoder_delimiter",
                "should not be AUTO",
            ));
        }
        let decoder_charset = Charset::for_name(decoder_charset).ok_or_else(|| {
            Error::invalid(
                "decoder_charset",
                format!("not supported: {decoder_charset}"),
            )
        })?;
        let encoder_charset = Charset::for_name(encoder_charset).ok_or_else(|| {
            Error::invalid(
                "encoder_charset",
                format!("not supported: {encoder_charset}"),
            )
        })?;

        Ok(Self {
            decoder_charset,
            decoder_delimiter,
            encoder_charset,
            encoder_delimiter,
            ..Self::new()
        })
    }

    /// Set both maximum line lengths.
    ///
    /// # Errors
    ///
    /// Both limits must be greater than zero.
    pub fn with_max_line_length(mut self, decoder: usize, encoder: usize) -> Result<Self> {
        if decoder == 0 {
            return Err(Error::invalid(
                "decoder_max_line_length",
                format!("should be > 0: {decoder}"),
            ));
        }
        if encoder == 0 {
            return Err(Error::invalid(
                "encoder_max_line_length",
                format!("should be > 0: {encoder}"),
            ));
        }
        self.decoder_max_line_length = decoder;
        self.encoder_max_line_length = encoder;
        Ok(self)
    }

    /// Build a codec from its configuration section.
    pub fn from_config(config: &CodecConfig) -> Result<Self> {
        Self::with_settings(
            &config.decoder_charset,
            config.decoder_delimiter,
            &config.encoder_charset,
            config.encoder_delimiter,
        )?
        .with_max_line_length(
            config.decoder_max_line_length,
            config.encoder_max_line_length,
        )
    }

    pub fn decoder_max_line_length(&self) -> usize {
        self.decoder_max_line_length
    }

    pub fn encoder_max_line_length(&self) -> usize {
        self.encoder_max_line_length
    }

    fn line_too_long(&mut self, src: &mut BytesMut) -> io::Error {
        let len = src.len();
        src.clear();
        self.next_index = 0;
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "line is too long: {len} bytes exceeds maximum {}",
                self.decoder_max_line_length
            ),
        )
    }

    /// Locate the end of the next line: `(content_len, consumed_len)`.
    fn find_line(&self, src: &[u8]) -> Option<(usize, usize)> {
        match self.decoder_delimiter {
            LineDelimiter::Auto => {
                let offset = src[self.next_index..].iter().position(|&b| b == b'\n')?;
                let newline = self.next_index + offset;
                let mut end = newline;
                while end > 0 && src[end - 1] == b'\r' {
                    end -= 1;
                }
                Some((end, newline + 1))
            }
            delimiter => {
                let delim = delimiter.as_bytes();
                let start = self.next_index.saturating_sub(delim.len() - 1);
                src[start..]
                    .windows(delim.len())
                    .position(|w| w == delim)
                    .map(|offset| (start + offset, start + offset + delim.len()))
            }
        }
    }
}

impl Default for TextLineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TextLineCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "decoder: {}, {}, {}; encoder: {}, {}, {}",
            self.decoder_charset,
            self.decoder_delimiter,
            self.decoder_max_line_length,
            self.encoder_charset,
            self.encoder_delimiter,
            self.encoder_max_line_length
        )
    }
}

impl Decoder for TextLineCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> std::result::Result<Option<Self::Item>, Self::Error> {
        match self.find_line(src) {
            Some((content_len, consumed)) => {
                self.next_index = 0;
                if content_len > self.decoder_max_line_length {
                    return Err(self.line_too_long(src));
                }
                let line = self.decoder_charset.decode(&src[..content_len]);
                src.advance(consumed);
                Ok(Some(line))
            }
            None => {
                if src.len() > self.decoder_max_line_length {
                    return Err(self.line_too_long(src));
                }
                self.next_index = src.len();
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> std::result::Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(line) => Ok(Some(line)),
            None => {
                if !src.is_empty() {
                    debug!(bytes = src.len(), "discarding unterminated line at end of stream");
                    src.clear();
                }
                self.next_index = 0;
                Ok(None)
            }
        }
    }
}

impl Encoder<String> for TextLineCodec {
    type Error = io::Error;

    fn encode(&mut self, line: String, dst: &mut BytesMut) -> std::result::Result<(), Self::Error> {
        let len = self.encoder_charset.encoded_len(&line);
        if len > self.encoder_max_line_length {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "line is too long: {len} bytes exceeds maximum {}",
                    self.encoder_max_line_length
                ),
            ));
        }
        let delim = self.encoder_delimiter.as_bytes();
        dst.reserve(len + delim.len());
        self.encoder_charset.encode_into(&line, dst);
        dst.extend_from_slice(delim);
        Ok(())
    }
}
