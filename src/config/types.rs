//! Configuration Types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use crate::codec::{
    LineDelimiter, DEFAULT_DECODER_MAX_LINE_LENGTH, DEFAULT_ENCODER_MAX_LINE_LENGTH,
};
use crate::transport::socket::platform_defaults;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub pipeline: PipelineConfig,
    /// Line codec. Building a pipeline without one is an argument error.
    pub codec: Option<CodecConfig>,
    pub socket: SocketConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    pub log_level: String,
}

/// Pipeline stages and their per-event toggles
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Add the logging stage.
    pub log: bool,
    /// Maximum logged body width; `<= 0` means unlimited.
    pub log_width: i64,
    pub log_received: bool,
    pub log_written: bool,
    pub log_sent: bool,
    /// Route writes through the shared single-worker lane.
    pub ordered_dispatch: bool,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Raise reader-idle events after this much inactivity.
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Option<Duration>,
}

/// Line codec configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CodecConfig {
    pub decoder_charset: String,
    pub decoder_delimiter: LineDelimiter,
    pub decoder_max_line_length: usize,
    pub encoder_charset: String,
    pub encoder_delimiter: LineDelimiter,
    pub encoder_max_line_length: usize,
}

/// Per-connection socket options
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SocketConfig {
    pub reuse_address: bool,
    pub keep_alive: bool,
    /// `None` leaves the platform linger behaviour untouched.
    #[serde(with = "humantime_serde")]
    pub linger: Option<Duration>,
    pub recv_buffer_size: usize,
    pub send_buffer_size: usize,
    pub tcp_no_delay: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            pipeline: PipelineConfig::default(),
            codec: Some(CodecConfig::default()),
            socket: SocketConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 9123)),
            shutdown_timeout: Duration::from_secs(30),
            log_level: "info".to_string(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            log: true,
            log_width: 0,
            log_received: true,
            log_written: false,
            log_sent: true,
            ordered_dispatch: true,
            connect_timeout: Duration::from_secs(1),
            idle_timeout: None,
        }
    }
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            decoder_charset: "iso-8859-1".to_string(),
            decoder_delimiter: LineDelimiter::Auto,
            decoder_max_line_length: DEFAULT_DECODER_MAX_LINE_LENGTH,
            encoder_charset: "iso-8859-1".to_string(),
            encoder_delimiter: LineDelimiter::Windows,
            encoder_max_line_length: DEFAULT_ENCODER_MAX_LINE_LENGTH,
        }
    }
}

impl Default for SocketConfig {
    fn default() -> Self {
        let platform = platform_defaults();
        Self {
            reuse_address: true,
            keep_alive: true,
            linger: Some(Duration::ZERO),
            recv_buffer_size: platform.recv_buffer_size,
            send_buffer_size: platform.send_buffer_size,
            tcp_no_delay: platform.tcp_no_delay,
        }
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "bind address: {}", self.server.bind_addr)?;
        writeln!(
            f,
            "logging: {} (width {}, received {}, written {}, sent {})",
            self.pipeline.log,
            self.pipeline.log_width,
            self.pipeline.log_received,
            self.pipeline.log_written,
            self.pipeline.log_sent
        )?;
        writeln!(f, "ordered dispatch: {}", self.pipeline.ordered_dispatch)?;
        writeln!(
            f,
            "connect timeout: {}",
            humantime::format_duration(self.pipeline.connect_timeout)
        )?;
        match &self.codec {
            Some(codec) => writeln!(
                f,
                "codec: decoder: {}, {}, {}; encoder: {}, {}, {}",
                codec.decoder_charset,
                codec.decoder_delimiter,
                codec.decoder_max_line_length,
                codec.encoder_charset,
                codec.encoder_delimiter,
                codec.encoder_max_line_length
            )?,
            None => writeln!(f, "codec: <unset>")?,
        }
        write!(
            f,
            "socket: reuse_address={}, keep_alive={}, linger={:?}, recv_buffer={}, send_buffer={}, no_delay={}",
            self.socket.reuse_address,
            self.socket.keep_alive,
            self.socket.linger,
            self.socket.recv_buffer_size,
            self.socket.send_buffer_size,
            self.socket.tcp_no_delay
        )
    }
}
