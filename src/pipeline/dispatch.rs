//! Ordered dispatch lane
//!
//! A single worker task draining an unbounded queue. Jobs run one at a time
//! in submission order, whichever session submitted them.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};

use crate::error::Result;
use crate::session::lock;

type Job = BoxFuture<'static, ()>;

/// Strictly serialized execution lane with exactly one worker.
pub struct DispatchLane {
    name: String,
    /// `None` after shutdown.
    sender: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    discard: Arc<AtomicBool>,
    pending: Arc<AtomicUsize>,
    terminated: watch::Receiver<bool>,
}

impl DispatchLane {
    /// Start the lane's worker on the current Tokio runtime.
    pub fn spawn(name: impl Into<String>) -> Result<Arc<Self>> {
        let handle = Handle::try_current()?;
        let name = name.into();
        let (sender, receiver) = mpsc::unbounded_channel();
        let (terminated_tx, terminated) = watch::channel(false);
        let discard = Arc::new(AtomicBool::new(false));
        let pending = Arc::new(AtomicUsize::new(0));

        handle.spawn(run_worker(
            name.clone(),
            receiver,
            Arc::clone(&discard),
            Arc::clone(&pending),
            terminated_tx,
        ));
        debug!(lane = %name, "dispatch lane started");

        Ok(Arc::new(Self {
            name,
            sender: Mutex::new(Some(sender)),
            discard,
            pending,
            terminated,
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue a job behind everything submitted before it. Returns `false`,
    /// dropping the job, once the lane has been shut down.
    pub fn submit<F>(&self, job: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let sender = lock(&self.sender);
        let Some(sender) = sender.as_ref() else {
            debug!(lane = %self.name, "lane is shut down, discarding job");
            return false;
        };
        self.pending.fetch_add(1, Ordering::AcqRel);
        if sender.send(job.boxed()).is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            debug!(lane = %self.name, "lane worker is gone, discarding job");
            return false;
        }
        true
    }

    /// Stop accepting jobs; the backlog still runs.
    pub fn shutdown(&self) {
        if lock(&self.sender).take().is_some() {
            info!(lane = %self.name, pending = self.pending(), "dispatch lane shutting down");
        }
    }

    /// Stop accepting jobs and drop the backlog. A job already running
    /// finishes.
    pub fn shutdown_now(&self) {
        self.discard.store(true, Ordering::Release);
        if lock(&self.sender).take().is_some() {
            info!(lane = %self.name, dropped = self.pending(), "dispatch lane stopped");
        }
    }

    pub fn is_shutdown(&self) -> bool {
        lock(&self.sender).is_none()
    }

    /// True once the worker has exited.
    pub fn is_terminated(&self) -> bool {
        *self.terminated.borrow()
    }

    /// Wait for the worker to exit.
    pub async fn terminated(&self) {
        let mut rx = self.terminated.clone();
        let _ = rx.wait_for(|done| *done).await;
    }

    /// Jobs queued or running.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

impl fmt::Debug for DispatchLane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchLane")
            .field("name", &self.name)
            .field("pending", &self.pending())
            .field("shutdown", &self.is_shutdown())
            .field("terminated", &self.is_terminated())
            .finish()
    }
}

async fn run_worker(
    name: String,
    mut receiver: mpsc::UnboundedReceiver<Job>,
    discard: Arc<AtomicBool>,
    pending: Arc<AtomicUsize>,
    terminated: watch::Sender<bool>,
) {
    while let Some(job) = receiver.recv().await {
        if !discard.load(Ordering::Acquire) {
            if AssertUnwindSafe(job).catch_unwind().await.is_err() {
                error!(lane = %name, "dispatch job panicked");
            }
        }
        pending.fetch_sub(1, Ordering::AcqRel);
    }
    debug!(lane = %name, "dispatch lane terminated");
    terminated.send_replace(true);
}
