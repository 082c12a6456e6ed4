//! Shared delay queue for scoped tasks
//!
//! One Tokio task owns a [`DelayQueue`] of every scheduled binding. Each
//! expiry is run on its own spawned task, so a slow task never delays the
//! others. Repeating tasks are re-queued only after their run finished.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{FutureExt, StreamExt};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::time::{delay_queue, DelayQueue};
use tracing::{debug, error, info};

use super::scoped::{Binding, TaskContext};
use crate::error::{Error, Result};

pub(crate) type TaskId = u64;

/// Longest delay or interval a binding may use. The timer wheel behind
/// [`DelayQueue`] cannot hold deadlines much past two years.
pub const MAX_TASK_DELAY: Duration = Duration::from_secs(365 * 24 * 60 * 60);

pub(crate) enum Command {
    Schedule {
        binding: Arc<Binding>,
        delay: Duration,
    },
    Cancel(TaskId),
    /// Re-queue a repeating task after its run finished.
    Rearm(TaskId),
    Shutdown,
}

struct Entry {
    /// `None` while the task is running.
    key: Option<delay_queue::Key>,
    binding: Arc<Binding>,
}

/// Runs scoped tasks for any number of sessions.
pub struct TaskScheduler {
    commands: mpsc::UnboundedSender<Command>,
    stopped: Arc<AtomicBool>,
    scheduled: Arc<AtomicUsize>,
    next_id: AtomicU64,
}

impl TaskScheduler {
    /// Start the scheduler on the current Tokio runtime.
    pub fn start() -> Result<Arc<Self>> {
        let handle = Handle::try_current()?;
        let (commands, receiver) = mpsc::unbounded_channel();
        let stopped = Arc::new(AtomicBool::new(false));
        let scheduled = Arc::new(AtomicUsize::new(0));

        handle.spawn(run(
            receiver,
            commands.clone(),
            Arc::clone(&stopped),
            Arc::clone(&scheduled),
        ));
        debug!("task scheduler started");

        Ok(Arc::new(Self {
            commands,
            stopped,
            scheduled,
            next_id: AtomicU64::new(1),
        }))
    }

    /// Stop the scheduler. Pending tasks never fire and further bindings fail.
    pub fn shutdown(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            if self.commands.send(Command::Shutdown).is_err() {
                debug!("task scheduler already exited");
            }
            info!("task scheduler shutting down");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Bindings currently queued or running.
    pub fn scheduled(&self) -> usize {
        self.scheduled.load(Ordering::Acquire)
    }

    pub(crate) fn next_id(&self) -> TaskId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn commands(&self) -> &mpsc::UnboundedSender<Command> {
        &self.commands
    }

    pub(crate) fn ensure_running(&self) -> Result<()> {
        if self.is_stopped() {
            return Err(Error::SchedulerStopped);
        }
        Ok(())
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Marks the scheduler stopped however the run loop ends, panics included.
struct StopOnExit {
    stopped: Arc<AtomicBool>,
    scheduled: Arc<AtomicUsize>,
}

impl Drop for StopOnExit {
    fn drop(&mut self) {
        self.stopped.store(true, Ordering::Release);
        self.scheduled.store(0, Ordering::Release);
    }
}

async fn run(
    mut receiver: mpsc::UnboundedReceiver<Command>,
    commands: mpsc::UnboundedSender<Command>,
    stopped: Arc<AtomicBool>,
    scheduled: Arc<AtomicUsize>,
) {
    let _exit = StopOnExit {
        stopped,
        scheduled: Arc::clone(&scheduled),
    };
    let mut queue: DelayQueue<TaskId> = DelayQueue::new();
    let mut entries: HashMap<TaskId, Entry> = HashMap::new();

    loop {
        tokio::select! {
            command = receiver.recv() => match command {
                Some(Command::Schedule { binding, delay }) => {
                    if binding.handle().is_cancelled() {
                        continue;
                    }
                    let id = binding.handle().id();
                    let key = queue.insert(id, delay.min(MAX_TASK_DELAY));
                    entries.insert(id, Entry { key: Some(key), binding });
                }
                Some(Command::Cancel(id)) => {
                    if let Some(entry) = entries.remove(&id) {
                        if let Some(key) = entry.key {
                            queue.remove(&key);
                        }
                        debug!(task = id, "scoped task cancelled");
                    }
                }
                Some(Command::Rearm(id)) => {
                    if let Some(entry) = entries.get_mut(&id) {
                        if entry.key.is_none() && !entry.binding.handle().is_cancelled() {
                            let interval = entry.binding.interval().min(MAX_TASK_DELAY);
                            entry.key = Some(queue.insert(id, interval));
                        }
                    }
                }
                Some(Command::Shutdown) | None => break,
            },
            Some(expired) = queue.next(), if !queue.is_empty() => {
                let id = expired.into_inner();
                let Some(entry) = entries.get_mut(&id) else {
                    continue;
                };
                entry.key = None;
                let binding = Arc::clone(&entry.binding);
                if !binding.is_repeating() {
                    entries.remove(&id);
                }
                tokio::spawn(fire(binding, commands.clone()));
            }
        }
        scheduled.store(entries.len(), Ordering::Release);
    }

    debug!(dropped = entries.len(), "task scheduler stopped");
}

async fn fire(binding: Arc<Binding>, commands: mpsc::UnboundedSender<Command>) {
    let handle = binding.handle().clone();
    if handle.is_cancelled() {
        return;
    }
    let Some(session) = binding.session() else {
        handle.cancel();
        return;
    };
    if session.is_closing() {
        handle.cancel();
        return;
    }

    handle.record_fire();
    let context = TaskContext::new(&session, handle.clone());
    drop(session);
    if AssertUnwindSafe(binding.task().run(context))
        .catch_unwind()
        .await
        .is_err()
    {
        error!(task = %handle.name(), "scoped task panicked");
    }

    if binding.is_repeating() {
        if !handle.is_cancelled() && commands.send(Command::Rearm(handle.id())).is_err() {
            debug!(task = %handle.name(), "scheduler gone, repeating task not re-queued");
        }
    } else {
        binding.finish();
    }
}
