//! Configuration Manager

use super::Config;
use crate::codec::TextLineCodec;
use anyhow::{bail, Context, Result};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Manages configuration loading and validation
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration from file
    pub fn load_from_file(path: &Path) -> Result<Config> {
        if path.exists() {
            tracing::info!("Loading configuration from: {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;

            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

            config
                .validate()
                .with_context(|| "Configuration validation failed")?;

            tracing::info!("Configuration loaded and validated successfully");
            Ok(config)
        } else {
            tracing::warn!(
                "Configuration file not found at {}, using defaults",
                path.display()
            );
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Load configuration from `CONNKIT_*` environment variables
    pub fn load_from_env() -> Result<Config> {
        let mut config = Config::default();

        if let Ok(bind_addr) = std::env::var("CONNKIT_BIND_ADDR") {
            config.server.bind_addr = bind_addr
                .parse::<SocketAddr>()
                .with_context(|| format!("Invalid CONNKIT_BIND_ADDR: {}", bind_addr))?;
        }

        if let Ok(timeout) = std::env::var("CONNKIT_CONNECT_TIMEOUT") {
            config.pipeline.connect_timeout = humantime::parse_duration(&timeout)
                .with_context(|| format!("Invalid CONNKIT_CONNECT_TIMEOUT: {}", timeout))?;
        }

        if let Ok(idle) = std::env::var("CONNKIT_IDLE_TIMEOUT") {
            config.pipeline.idle_timeout = Some(
                humantime::parse_duration(&idle)
                    .with_context(|| format!("Invalid CONNKIT_IDLE_TIMEOUT: {}", idle))?,
            );
        }

        if let Ok(width) = std::env::var("CONNKIT_LOG_WIDTH") {
            config.pipeline.log_width = width
                .parse::<i64>()
                .with_context(|| format!("Invalid CONNKIT_LOG_WIDTH: {}", width))?;
        }

        if let Ok(ordered) = std::env::var("CONNKIT_ORDERED_DISPATCH") {
            config.pipeline.ordered_dispatch = ordered
                .parse::<bool>()
                .with_context(|| format!("Invalid CONNKIT_ORDERED_DISPATCH: {}", ordered))?;
        }

        if let Ok(log_level) = std::env::var("CONNKIT_LOG_LEVEL") {
            config.server.log_level = log_level;
        }

        config.validate()?;
        Ok(config)
    }
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_server_config()
            .with_context(|| "Server configuration validation failed")?;

        self.validate_pipeline_config()
            .with_context(|| "Pipeline configuration validation failed")?;

        self.validate_codec_config()
            .with_context(|| "Codec configuration validation failed")?;

        self.validate_socket_config()
            .with_context(|| "Socket configuration validation failed")?;

        Ok(())
    }

    fn validate_server_config(&self) -> Result<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.server.log_level.as_str()) {
            bail!(
                "server.log_level must be one of: {}",
                valid_log_levels.join(", ")
            );
        }

        if self.server.shutdown_timeout.is_zero() {
            bail!("shutdown_timeout must be greater than 0");
        }

        Ok(())
    }

    fn validate_pipeline_config(&self) -> Result<()> {
        if self.pipeline.connect_timeout.is_zero() {
            bail!("connect_timeout must be greater than 0");
        }

        if self.pipeline.connect_timeout > Duration::from_secs(3600) {
            bail!("connect_timeout cannot exceed 1 hour");
        }

        if let Some(idle) = self.pipeline.idle_timeout {
            if idle.is_zero() {
                bail!("idle_timeout must be greater than 0 when set");
            }
        }

        Ok(())
    }

    /// A missing codec is not rejected here: the pipeline builder reports it
    /// as an argument error at build time.
    fn validate_codec_config(&self) -> Result<()> {
        if let Some(codec) = &self.codec {
            TextLineCodec::from_config(codec)?;
        }
        Ok(())
    }

    fn validate_socket_config(&self) -> Result<()> {
        if self.socket.recv_buffer_size == 0 {
            bail!("recv_buffer_size must be greater than 0");
        }

        if self.socket.send_buffer_size == 0 {
            bail!("send_buffer_size must be greater than 0");
        }

        Ok(())
    }

    /// Merge with CLI arguments
    pub fn merge_with_cli_args(
        &mut self,
        bind: Option<&str>,
        port: Option<u16>,
        connect_timeout: Option<u64>,
        log_width: Option<i64>,
        unordered: bool,
    ) {
        if let Some(bind_str) = bind {
            if let Ok(addr) = bind_str.parse::<SocketAddr>() {
                self.server.bind_addr = addr;
                tracing::info!("CLI override: bind address set to {}", addr);
            } else {
                tracing::warn!("Invalid bind address provided: {}", bind_str);
            }
        }

        if let Some(port) = port {
            self.server.bind_addr.set_port(port);
            tracing::info!("CLI override: port set to {}", port);
        }

        if let Some(timeout_secs) = connect_timeout {
            self.pipeline.connect_timeout = Duration::from_secs(timeout_secs);
            tracing::info!("CLI override: connect timeout set to {}s", timeout_secs);
        }

        if let Some(width) = log_width {
            self.pipeline.log_width = width;
            tracing::info!("CLI override: log width set to {}", width);
        }

        if unordered {
            self.pipeline.ordered_dispatch = false;
            tracing::info!("CLI override: ordered dispatch disabled");
        }
    }
}
