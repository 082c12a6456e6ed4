//! Application callbacks for session events

use std::fmt;
use std::io;
use std::sync::Arc;

use crate::session::Session;

/// Which direction of a session has gone quiet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleStatus {
    ReaderIdle,
}

impl fmt::Display for IdleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReaderIdle => f.write_str("reader idle"),
        }
    }
}

/// Receives session events after the pipeline stages have observed them.
///
/// Callbacks run on the connection's driver task and should not block;
/// spawn for anything slow. Every method defaults to a no-op.
pub trait IoHandler: Send + Sync {
    fn session_created(&self, _session: &Arc<Session>) {}

    fn session_opened(&self, _session: &Arc<Session>) {}

    fn session_closed(&self, _session: &Arc<Session>) {}

    fn session_idle(&self, _session: &Arc<Session>, _status: IdleStatus) {}

    fn message_received(&self, _session: &Arc<Session>, _message: &str) {}

    fn message_sent(&self, _session: &Arc<Session>, _message: &str) {}

    fn exception_caught(&self, _session: &Arc<Session>, _error: &io::Error) {}
}

/// Handler that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

impl IoHandler for NoopHandler {}
