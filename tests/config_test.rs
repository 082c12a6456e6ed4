//! Tests for configuration loading

use std::io::Write;
use std::time::Duration;

use connkit::config::ConfigManager;
use connkit::{Config, LineDelimiter, PipelineBuilder, Role, TextLineCodec};
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_load_partial_config_keeps_defaults() {
    let file = write_config(
        r#"
[server]
bind_addr = "0.0.0.0:7000"

[pipeline]
log_width = 6
log_written = true
connect_timeout = "500ms"
idle_timeout = "30s"

[codec]
decoder_charset = "utf-8"
decoder_delimiter = "unix"
encoder_delimiter = "unix"

[socket]
linger = "2s"
tcp_no_delay = true
"#,
    );

    let config = ConfigManager::load_from_file(file.path()).unwrap();
    let defaults = Config::default();

    assert_eq!(config.server.bind_addr.to_string(), "0.0.0.0:7000");
    assert_eq!(config.server.shutdown_timeout, defaults.server.shutdown_timeout);
    assert_eq!(config.pipeline.log_width, 6);
    assert!(config.pipeline.log_written);
    assert!(config.pipeline.log_received);
    assert_eq!(config.pipeline.connect_timeout, Duration::from_millis(500));
    assert_eq!(config.pipeline.idle_timeout, Some(Duration::from_secs(30)));
    assert_eq!(config.socket.linger, Some(Duration::from_secs(2)));
    assert!(config.socket.tcp_no_delay);
    assert!(config.socket.keep_alive);

    let codec = TextLineCodec::from_config(config.codec.as_ref().unwrap()).unwrap();
    assert_eq!(
        codec.to_string(),
        "decoder: utf-8, UNIX, 10240; encoder: iso-8859-1, UNIX, 102400"
    );
}

#[test]
fn test_missing_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = ConfigManager::load_from_file(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(config.pipeline.connect_timeout, Duration::from_secs(1));
    assert!(config.codec.is_some());
}

#[test]
fn test_invalid_files_are_rejected() {
    let garbage = write_config("this is [not toml");
    assert!(ConfigManager::load_from_file(garbage.path()).is_err());

    let auto_encoder = write_config(
        r#"
[codec]
encoder_delimiter = "auto"
"#,
    );
    assert!(ConfigManager::load_from_file(auto_encoder.path()).is_err());

    let zero_timeout = write_config(
        r#"
[pipeline]
connect_timeout = "0s"
"#,
    );
    assert!(ConfigManager::load_from_file(zero_timeout.path()).is_err());

    let bad_charset = write_config(
        r#"
[codec]
decoder_charset = "ebcdic"
"#,
    );
    assert!(ConfigManager::load_from_file(bad_charset.path()).is_err());
}

#[test]
fn test_env_overrides() {
    std::env::set_var("CONNKIT_LOG_WIDTH", "12");
    std::env::set_var("CONNKIT_CONNECT_TIMEOUT", "3s");
    let config = ConfigManager::load_from_env();
    std::env::remove_var("CONNKIT_LOG_WIDTH");
    std::env::remove_var("CONNKIT_CONNECT_TIMEOUT");

    let config = config.unwrap();
    assert_eq!(config.pipeline.log_width, 12);
    assert_eq!(config.pipeline.connect_timeout, Duration::from_secs(3));
}

#[test]
fn test_display_summary_mentions_every_section() {
    let summary = Config::default().to_string();
    assert!(summary.contains("bind address: 127.0.0.1:9123"));
    assert!(summary.contains("ordered dispatch: true"));
    assert!(summary.contains("codec: decoder: iso-8859-1, AUTO, 10240"));
    assert!(summary.contains("linger=Some(0ns)"));
}

#[test]
fn test_logging_only_pipeline_builds_without_runtime() {
    let mut config = Config::default();
    config.pipeline.ordered_dispatch = false;
    if let Some(codec) = config.codec.as_mut() {
        codec.decoder_delimiter = LineDelimiter::Mac;
    }

    let pipeline = PipelineBuilder::new(Role::Acceptor, config).build().unwrap();
    assert_eq!(pipeline.stage_names(), vec!["codec", "logging"]);
}
