//! Line codec
//!
//! Converts between raw socket bytes and text lines.

pub mod charset;
pub mod line;

pub use charset::Charset;
pub use line::{
    LineDelimiter, TextLineCodec, DEFAULT_DECODER_MAX_LINE_LENGTH,
    DEFAULT_ENCODER_MAX_LINE_LENGTH,
};
