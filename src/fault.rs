//! Process-wide fault monitor
//!
//! Non-fatal setup errors (a socket option the platform refuses, a failed
//! accept) are reported here instead of aborting the operation in progress.

use std::error::Error as StdError;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::warn;

/// Sink for fire-and-forget error reports.
pub trait FaultMonitor: Send + Sync {
    fn exception_caught(&self, context: &str, error: &(dyn StdError + 'static));
}

/// Default monitor: logs every report at warn level.
#[derive(Debug, Default)]
pub struct LoggingMonitor;

impl FaultMonitor for LoggingMonitor {
    fn exception_caught(&self, context: &str, error: &(dyn StdError + 'static)) {
        warn!(context = context, error = %error, "unexpected fault");
    }
}

static MONITOR: RwLock<Option<Arc<dyn FaultMonitor>>> = RwLock::new(None);

/// Install a process-wide monitor, returning the previous one if any.
pub fn set_monitor(monitor: Arc<dyn FaultMonitor>) -> Option<Arc<dyn FaultMonitor>> {
    MONITOR
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .replace(monitor)
}

/// Restore the default logging monitor.
pub fn reset_monitor() {
    MONITOR
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
}

/// Report a non-fatal error to the installed monitor.
pub fn report(context: &str, error: &(dyn StdError + 'static)) {
    let monitor = MONITOR
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    match monitor {
        Some(monitor) => monitor.exception_caught(context, error),
        None => LoggingMonitor.exception_caught(context, error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingMonitor {
        reports: Mutex<Vec<String>>,
    }

    impl FaultMonitor for RecordingMonitor {
        fn exception_caught(&self, context: &str, error: &(dyn StdError + 'static)) {
            self.reports
                .lock()
                .unwrap()
                .push(format!("{context}: {error}"));
        }
    }

    #[test]
    fn test_reports_reach_installed_monitor() {
        let monitor = Arc::new(RecordingMonitor::default());
        set_monitor(monitor.clone());

        let err = std::io::Error::new(std::io::ErrorKind::Other, "linger refused");
        report("fault-monitor-test", &err);

        reset_monitor();

        let reports = monitor.reports.lock().unwrap();
        assert!(reports
            .iter()
            .any(|r| r == "fault-monitor-test: linger refused"));
    }
}
