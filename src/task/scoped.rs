//! Tasks scoped to a session's lifetime

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use super::scheduler::{Command, TaskId, TaskScheduler, MAX_TASK_DELAY};
use crate::error::{Error, Result};
use crate::session::{lock, Session};

/// Prefix of the session attribute holding each binding's [`TaskHandle`].
pub const SCOPED_TASK_KEY_PREFIX: &str = "connkit.task.scoped:";

/// Session attribute holding the live bindings and their shared close hook.
const SCOPED_TASKS_KEY: &str = "connkit.task.scoped-registry";

const ACTIVE: u8 = 0;
const CANCELLED: u8 = 1;
const FINISHED: u8 = 2;

type TaskFn = dyn Fn(TaskContext) -> BoxFuture<'static, ()> + Send + Sync;

/// A named unit of deferred or periodic work.
#[derive(Clone)]
pub struct ScopedTask {
    name: String,
    run: Arc<TaskFn>,
}

impl ScopedTask {
    pub fn new<F, Fut>(name: impl Into<String>, run: F) -> Self
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            name: name.into(),
            run: Arc::new(move |ctx: TaskContext| run(ctx).boxed()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn run(&self, context: TaskContext) -> BoxFuture<'static, ()> {
        (self.run)(context)
    }
}

impl fmt::Debug for ScopedTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedTask").field("name", &self.name).finish()
    }
}

/// What a running task can see: its session and its own handle.
pub struct TaskContext {
    session: Weak<Session>,
    handle: TaskHandle,
}

impl TaskContext {
    pub(crate) fn new(session: &Arc<Session>, handle: TaskHandle) -> Self {
        Self {
            session: Arc::downgrade(session),
            handle,
        }
    }

    /// The session, unless it has already been dropped.
    pub fn session(&self) -> Option<Arc<Session>> {
        self.session.upgrade()
    }

    /// The task's own handle, for self-cancellation.
    pub fn handle(&self) -> &TaskHandle {
        &self.handle
    }
}

struct TaskShared {
    id: TaskId,
    name: String,
    attribute_key: String,
    state: AtomicU8,
    fire_count: AtomicU64,
    commands: mpsc::UnboundedSender<Command>,
    session: Weak<Session>,
}

/// Handle to one scheduled binding.
#[derive(Clone)]
pub struct TaskHandle(Arc<TaskShared>);

impl TaskHandle {
    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Session attribute key under which this handle is stored.
    pub fn attribute_key(&self) -> &str {
        &self.0.attribute_key
    }

    /// Stop the task. Returns `true` only for the call that cancelled it; a
    /// task already cancelled or finished is left alone.
    pub fn cancel(&self) -> bool {
        if self
            .0
            .state
            .compare_exchange(ACTIVE, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        if self.0.commands.send(Command::Cancel(self.0.id)).is_err() {
            debug!(task = %self.0.name, id = self.0.id, "scheduler gone, nothing to dequeue");
        }
        self.detach();
        debug!(task = %self.0.name, id = self.0.id, "scoped task cancelled");
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.state.load(Ordering::Acquire) == CANCELLED
    }

    /// True once a one-shot task has run.
    pub fn is_finished(&self) -> bool {
        self.0.state.load(Ordering::Acquire) == FINISHED
    }

    pub fn fire_count(&self) -> u64 {
        self.0.fire_count.load(Ordering::Acquire)
    }

    pub(crate) fn record_fire(&self) {
        self.0.fire_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Remove this handle from its session, if it is still the value stored.
    fn detach(&self) {
        if let Some(session) = self.0.session.upgrade() {
            let id = self.0.id;
            if let Some(tasks) = session.attribute_as::<ScopedTasks>(SCOPED_TASKS_KEY) {
                tasks.forget(id);
            }
            session.remove_attribute_if(&self.0.attribute_key, |value| {
                (**value)
                    .downcast_ref::<TaskHandle>()
                    .map_or(false, |handle| handle.id() == id)
            });
        }
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.0.id)
            .field("name", &self.0.name)
            .field("cancelled", &self.is_cancelled())
            .field("fire_count", &self.fire_count())
            .finish()
    }
}

/// Live bindings of one session. A single close hook per session cancels
/// whatever is still live, so finished and cancelled bindings leave nothing
/// behind.
pub(crate) struct ScopedTasks {
    hooked: OnceLock<()>,
    /// `None` once the session closed.
    live: Mutex<Option<HashMap<TaskId, TaskHandle>>>,
}

impl ScopedTasks {
    fn new() -> Self {
        Self {
            hooked: OnceLock::new(),
            live: Mutex::new(Some(HashMap::new())),
        }
    }

    /// The session's registry, installing its close hook on first use.
    fn for_session(session: &Arc<Session>) -> Result<Arc<Self>> {
        let tasks = session
            .attribute_or_insert_with(SCOPED_TASKS_KEY, || Arc::new(ScopedTasks::new()))
            .downcast::<ScopedTasks>()
            .map_err(|_| {
                Error::invalid(
                    "session",
                    format!("attribute {SCOPED_TASKS_KEY} holds a foreign value"),
                )
            })?;
        if tasks.hooked.set(()).is_ok() {
            let hook = Arc::clone(&tasks);
            session.on_close(move |_| hook.cancel_all());
        }
        Ok(tasks)
    }

    /// Track `handle`. `false` once the session has closed.
    fn register(&self, handle: &TaskHandle) -> bool {
        match lock(&self.live).as_mut() {
            Some(live) => {
                live.insert(handle.id(), handle.clone());
                true
            }
            None => false,
        }
    }

    fn forget(&self, id: TaskId) {
        if let Some(live) = lock(&self.live).as_mut() {
            live.remove(&id);
        }
    }

    fn cancel_all(&self) {
        let live = lock(&self.live).take().unwrap_or_default();
        for handle in live.into_values() {
            handle.cancel();
        }
    }

    /// Bindings neither finished nor cancelled.
    #[cfg(test)]
    pub(crate) fn live(&self) -> usize {
        lock(&self.live).as_ref().map_or(0, HashMap::len)
    }

    #[cfg(test)]
    pub(crate) fn of(session: &Session) -> Option<Arc<Self>> {
        session.attribute_as::<ScopedTasks>(SCOPED_TASKS_KEY)
    }
}

/// A scheduled task together with its timing and owning session.
pub(crate) struct Binding {
    handle: TaskHandle,
    task: ScopedTask,
    interval: Duration,
}

impl Binding {
    pub(crate) fn handle(&self) -> &TaskHandle {
        &self.handle
    }

    pub(crate) fn task(&self) -> &ScopedTask {
        &self.task
    }

    pub(crate) fn interval(&self) -> Duration {
        self.interval
    }

    pub(crate) fn is_repeating(&self) -> bool {
        !self.interval.is_zero()
    }

    pub(crate) fn session(&self) -> Option<Arc<Session>> {
        self.handle.0.session.upgrade()
    }

    /// A one-shot task ran: release its slot on the session.
    pub(crate) fn finish(&self) {
        if self
            .handle
            .0
            .state
            .compare_exchange(ACTIVE, FINISHED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.handle.detach();
        }
    }
}

impl TaskScheduler {
    /// Run `task` after `delay`, then every `interval` (zero runs it once),
    /// for as long as `session` stays open.
    ///
    /// Returns `Ok(None)` without scheduling anything if the session is
    /// already closing.
    ///
    /// # Errors
    ///
    /// An argument error for a blank task name or a delay or interval above
    /// [`MAX_TASK_DELAY`], or [`Error::SchedulerStopped`]. Nothing is
    /// registered on failure.
    pub fn bind(
        &self,
        session: &Arc<Session>,
        task: ScopedTask,
        delay: Duration,
        interval: Duration,
    ) -> Result<Option<TaskHandle>> {
        if task.name().trim().is_empty() {
            return Err(Error::invalid("task", "name must not be blank"));
        }
        if delay > MAX_TASK_DELAY {
            return Err(Error::invalid(
                "delay",
                format!("should be <= {MAX_TASK_DELAY:?}: {delay:?}"),
            ));
        }
        if interval > MAX_TASK_DELAY {
            return Err(Error::invalid(
                "interval",
                format!("should be <= {MAX_TASK_DELAY:?}: {interval:?}"),
            ));
        }
        self.ensure_running()?;
        if session.is_closing() {
            debug!(task = %task.name(), session = session.id(), "session closing, task not bound");
            return Ok(None);
        }

        let attribute_key = format!("{SCOPED_TASK_KEY_PREFIX}{}", Uuid::new_v4());
        let handle = TaskHandle(Arc::new(TaskShared {
            id: self.next_id(),
            name: task.name().to_string(),
            attribute_key: attribute_key.clone(),
            state: AtomicU8::new(ACTIVE),
            fire_count: AtomicU64::new(0),
            commands: self.commands().clone(),
            session: Arc::downgrade(session),
        }));

        let tasks = ScopedTasks::for_session(session)?;
        session.set_attribute(attribute_key.clone(), Arc::new(handle.clone()));
        if !tasks.register(&handle) {
            session.remove_attribute(&attribute_key);
            debug!(task = %task.name(), session = session.id(), "session closed, task not bound");
            return Ok(None);
        }

        let binding = Arc::new(Binding {
            handle: handle.clone(),
            task,
            interval,
        });
        if self
            .commands()
            .send(Command::Schedule { binding, delay })
            .is_err()
        {
            handle.cancel();
            return Err(Error::SchedulerStopped);
        }

        debug!(
            task = %handle.name(),
            id = handle.id(),
            session = session.id(),
            delay = ?delay,
            interval = ?interval,
            "scoped task bound"
        );
        Ok(Some(handle))
    }
}
