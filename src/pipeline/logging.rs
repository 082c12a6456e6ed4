//! Event logging stage

use std::borrow::Cow;

use tracing::{error, info, Level};

use super::Event;
use crate::config::PipelineConfig;
use crate::session::Session;

/// Appended to message bodies cut down to the configured width.
pub const TRUNCATION_MARKER: &str = "...";

/// Cut `message` to at most `width` characters, ending in
/// [`TRUNCATION_MARKER`]. A width of zero means unlimited.
pub fn abbreviate(message: &str, width: usize) -> Cow<'_, str> {
    if width == 0 || message.chars().count() <= width {
        return Cow::Borrowed(message);
    }
    let marker_len = TRUNCATION_MARKER.len();
    if width <= marker_len {
        return Cow::Borrowed(&TRUNCATION_MARKER[..width]);
    }
    let cut = message
        .char_indices()
        .nth(width - marker_len)
        .map_or(message.len(), |(i, _)| i);
    Cow::Owned(format!("{}{}", &message[..cut], TRUNCATION_MARKER))
}

/// Emits one log line per session event.
#[derive(Debug, Clone)]
pub struct LoggingStage {
    max_width: usize,
    log_received: bool,
    log_written: bool,
    log_sent: bool,
}

impl LoggingStage {
    /// `max_width <= 0` disables truncation.
    pub fn new(max_width: i64, log_received: bool, log_written: bool, log_sent: bool) -> Self {
        Self {
            max_width: usize::try_from(max_width).unwrap_or(0),
            log_received,
            log_written,
            log_sent,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            config.log_width,
            config.log_received,
            config.log_written,
            config.log_sent,
        )
    }

    pub fn max_width(&self) -> usize {
        self.max_width
    }

    /// The log line for `event`, or `None` if that event kind is switched off.
    /// Lifecycle lines are never truncated.
    pub fn describe(&self, session: &Session, event: &Event<'_>) -> Option<String> {
        let peer = session.peer_label();
        let line = match event {
            Event::Created => format!("{peer} CREATED"),
            Event::Opened => format!("{peer} OPENED"),
            Event::Closed => format!("{peer} CLOSED"),
            Event::Idle(status) => format!("{peer} IDLE: {status}"),
            Event::CloseRequested => format!("{peer} CLOSE"),
            Event::Exception(e) => format!("{peer} EXCEPTION: {e}"),
            Event::Received(body) if self.log_received => {
                format!("{peer} RECEIVED: {}", abbreviate(body, self.max_width))
            }
            Event::Sent(body) if self.log_sent => {
                format!("{peer} SENT: {}", abbreviate(body, self.max_width))
            }
            Event::Write(body) if self.log_written => {
                format!("{peer} WRITE: {}", abbreviate(body, self.max_width))
            }
            Event::Received(_) | Event::Sent(_) | Event::Write(_) => return None,
        };
        Some(line)
    }

    pub fn observe(&self, session: &Session, event: &Event<'_>) {
        let enabled = match event {
            Event::Exception(_) => tracing::enabled!(Level::ERROR),
            _ => tracing::enabled!(Level::INFO),
        };
        if !enabled {
            return;
        }
        if let Some(line) = self.describe(session, event) {
            match event {
                Event::Exception(_) => error!("{line}"),
                _ => info!("{line}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::IdleStatus;
    use std::io;
    use std::net::SocketAddr;
    use std::sync::Arc;

    fn session() -> Arc<Session> {
        let remote: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        Session::detached(None, Some(remote))
    }

    #[test]
    fn test_abbreviate_widths() {
        assert_eq!(abbreviate("123456789", 6), "123...");
        assert_eq!(abbreviate("123456", 6), "123456");
        assert_eq!(abbreviate("123456789", 0), "123456789");
        assert_eq!(abbreviate("123456789", 4), "1...");
        assert_eq!(abbreviate("123456789", 2), "..");
        assert_eq!(abbreviate("h\u{e9}llo w\u{f6}rld", 7), "h\u{e9}ll...");
    }

    #[test]
    fn test_truncated_body_has_exact_width() {
        let body = "x".repeat(50);
        for width in 4..60 {
            let out = abbreviate(&body, width);
            assert_eq!(out.chars().count(), width.min(50));
        }
    }

    #[test]
    fn test_negative_width_is_unlimited() {
        let stage = LoggingStage::new(-5, true, false, true);
        assert_eq!(stage.max_width(), 0);
        let line = stage
            .describe(&session(), &Event::Received("123456789"))
            .unwrap();
        assert_eq!(line, "[/127.0.0.1: 4000] RECEIVED: 123456789");
    }

    #[test]
    fn test_event_lines() {
        let stage = LoggingStage::new(6, true, false, true);
        let s = session();

        assert_eq!(
            stage.describe(&s, &Event::Received("123456789")).unwrap(),
            "[/127.0.0.1: 4000] RECEIVED: 123..."
        );
        assert_eq!(
            stage.describe(&s, &Event::Opened).unwrap(),
            "[/127.0.0.1: 4000] OPENED"
        );
        assert_eq!(
            stage
                .describe(&s, &Event::Idle(IdleStatus::ReaderIdle))
                .unwrap(),
            "[/127.0.0.1: 4000] IDLE: reader idle"
        );
        // Written lines are off by default.
        assert!(stage.describe(&s, &Event::Write("hello")).is_none());

        let err = io::Error::new(io::ErrorKind::ConnectionReset, "connection reset by peer");
        assert_eq!(
            stage.describe(&s, &Event::Exception(&err)).unwrap(),
            "[/127.0.0.1: 4000] EXCEPTION: connection reset by peer"
        );
    }
}
