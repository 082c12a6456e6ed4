//! Auto-disconnect policy
//!
//! Closes a session after a grace period unless disarmed first. Each arming
//! owns an [`ArmToken`]; the firing task and `disarm` race on it with a
//! compare-and-swap, so exactly one of them wins. One `disarm` suppresses
//! one pending firing: the armed token due first.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use super::{ScopedTask, TaskHandle, TaskScheduler};
use crate::error::{Error, Result};
use crate::session::{lock, Session};

/// Session attribute holding the armed policies.
pub const AUTO_DISCONNECT_KEY: &str = "connkit.task.auto-disconnect";

const ARMED: u8 = 0;
const CANCELLED: u8 = 1;
const FIRED: u8 = 2;

/// Single-use outcome of one arming.
struct ArmToken {
    state: AtomicU8,
    deadline: Instant,
    task: OnceLock<TaskHandle>,
}

impl ArmToken {
    fn new(deadline: Instant) -> Self {
        Self {
            state: AtomicU8::new(ARMED),
            deadline,
            task: OnceLock::new(),
        }
    }

    fn transition(&self, to: u8) -> bool {
        self.state
            .compare_exchange(ARMED, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn is_armed(&self) -> bool {
        self.state.load(Ordering::Acquire) == ARMED
    }
}

#[derive(Default)]
struct ArmedPolicies {
    tokens: Mutex<Vec<Arc<ArmToken>>>,
}

pub struct AutoDisconnect;

impl AutoDisconnect {
    /// Close `session` after `seconds` unless [`disarm`](Self::disarm) is
    /// called first. `Ok(None)` if the session is already closing.
    pub fn arm(
        scheduler: &TaskScheduler,
        session: &Arc<Session>,
        seconds: u64,
    ) -> Result<Option<TaskHandle>> {
        if session.is_closing() {
            return Ok(None);
        }

        let policies = session
            .attribute_or_insert_with(AUTO_DISCONNECT_KEY, || {
                Arc::new(ArmedPolicies::default())
            })
            .downcast::<ArmedPolicies>()
            .map_err(|_| {
                Error::invalid(
                    "session",
                    format!("attribute {AUTO_DISCONNECT_KEY} holds a foreign value"),
                )
            })?;

        let grace = Duration::from_secs(seconds);
        let token = Arc::new(ArmToken::new(Instant::now() + grace));
        {
            let mut tokens = lock(&policies.tokens);
            tokens.retain(|t| t.is_armed());
            tokens.push(Arc::clone(&token));
        }

        let firing = Arc::clone(&token);
        let task = ScopedTask::new(
            format!("auto disconnect after {seconds}s"),
            move |ctx| {
                let token = Arc::clone(&firing);
                async move {
                    if !token.transition(FIRED) {
                        return;
                    }
                    if let Some(session) = ctx.session() {
                        info!(
                            "{} auto-disconnect after {}s",
                            session.peer_label(),
                            seconds
                        );
                        session.close();
                    }
                }
            },
        );

        match scheduler.bind(session, task, grace, Duration::ZERO) {
            Ok(Some(handle)) => {
                let _ = token.task.set(handle.clone());
                Ok(Some(handle))
            }
            outcome => {
                lock(&policies.tokens).retain(|t| !Arc::ptr_eq(t, &token));
                outcome
            }
        }
    }

    /// Cancel the armed policy due first on `session`. Returns `true` if one
    /// was cancelled; later armings stay armed. Calls with nothing armed and
    /// calls after the session closed have no effect.
    pub fn disarm(session: &Arc<Session>) -> bool {
        if session.is_closed() {
            return false;
        }
        let Some(policies) = session.attribute_as::<ArmedPolicies>(AUTO_DISCONNECT_KEY) else {
            return false;
        };

        let mut tokens = lock(&policies.tokens);
        tokens.retain(|t| t.is_armed());
        tokens.sort_by_key(|t| t.deadline);
        // A token may fire between the retain and the swap; fall through to
        // the next one due.
        let Some(index) = tokens.iter().position(|t| t.transition(CANCELLED)) else {
            return false;
        };
        let token = tokens.remove(index);
        drop(tokens);

        if let Some(task) = token.task.get() {
            task.cancel();
        }
        debug!(session = session.id(), "auto-disconnect disarmed");
        true
    }

    /// Whether an armed policy is waiting to fire on `session`.
    pub fn is_armed(session: &Session) -> bool {
        session
            .attribute_as::<ArmedPolicies>(AUTO_DISCONNECT_KEY)
            .map_or(false, |p| lock(&p.tokens).iter().any(|t| t.is_armed()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::scoped::ScopedTasks;

    #[tokio::test]
    async fn test_rearming_does_not_accumulate_close_listeners() {
        let scheduler = TaskScheduler::start().unwrap();
        let session = Session::detached(None, None);

        for _ in 0..1000 {
            AutoDisconnect::arm(&scheduler, &session, 60).unwrap();
            assert!(AutoDisconnect::disarm(&session));
        }

        assert_eq!(session.close_listener_count(), 1);
        assert_eq!(ScopedTasks::of(&session).unwrap().live(), 0);
        assert!(session
            .attribute_keys()
            .iter()
            .all(|key| !key.starts_with(crate::task::SCOPED_TASK_KEY_PREFIX)));
    }

    #[tokio::test]
    async fn test_close_cancels_every_live_binding_once() {
        let scheduler = TaskScheduler::start().unwrap();
        let session = Session::detached(None, None);

        let first = AutoDisconnect::arm(&scheduler, &session, 30).unwrap().unwrap();
        let second = AutoDisconnect::arm(&scheduler, &session, 60).unwrap().unwrap();
        assert_eq!(ScopedTasks::of(&session).unwrap().live(), 2);

        session.close();
        assert!(first.is_cancelled());
        assert!(second.is_cancelled());
        assert_eq!(ScopedTasks::of(&session).unwrap().live(), 0);
    }
}
