//! Connection sessions
//!
//! A [`Session`] is one logical connection between two endpoints. It carries
//! a string-keyed attribute map scoped to its lifetime, a closing/closed
//! state, and close listeners that run exactly once when the session
//! transitions to closed.
//!
//! Sessions produced by an acceptor or connector are driven by the transport
//! layer; [`Session::detached`] creates one with no transport at all.

mod address;
mod attributes;

pub use attributes::AttributeValue;

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::handler::{IdleStatus, IoHandler};
use crate::pipeline::{Event, Pipeline};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

type CloseListener = Box<dyn FnOnce(&Arc<Session>) + Send>;

/// A line queued for the session's writer, with its completion signal.
pub(crate) struct Outbound {
    pub(crate) message: String,
    pub(crate) ack: oneshot::Sender<io::Result<()>>,
}

struct Transport {
    pipeline: Arc<Pipeline>,
    handler: Arc<dyn IoHandler>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Outbound>>>,
}

/// A single network connection.
pub struct Session {
    id: u64,
    local_addr: Option<SocketAddr>,
    remote_addr: Option<SocketAddr>,
    attributes: Mutex<HashMap<String, AttributeValue>>,
    closing: AtomicBool,
    closed: AtomicBool,
    /// `None` once the listeners have run.
    close_listeners: Mutex<Option<Vec<CloseListener>>>,
    closed_tx: watch::Sender<bool>,
    close_requested: CancellationToken,
    transport: Option<Transport>,
    peer_label: OnceLock<String>,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Session {
    fn with_transport(
        local_addr: Option<SocketAddr>,
        remote_addr: Option<SocketAddr>,
        transport: Option<Transport>,
    ) -> Arc<Self> {
        let (closed_tx, _) = watch::channel(false);
        Arc::new(Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            local_addr,
            remote_addr,
            attributes: Mutex::new(HashMap::new()),
            closing: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            close_listeners: Mutex::new(Some(Vec::new())),
            closed_tx,
            close_requested: CancellationToken::new(),
            transport,
            peer_label: OnceLock::new(),
        })
    }

    /// A session with no transport behind it. Closing it transitions straight
    /// to closed, and writes are dropped.
    pub fn detached(local_addr: Option<SocketAddr>, remote_addr: Option<SocketAddr>) -> Arc<Self> {
        Self::with_transport(local_addr, remote_addr, None)
    }

    /// A transport-backed session and the receiving end of its write queue.
    pub(crate) fn attached(
        local_addr: SocketAddr,
        remote_addr: SocketAddr,
        pipeline: Arc<Pipeline>,
        handler: Arc<dyn IoHandler>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Transport {
            pipeline,
            handler,
            outbound: Mutex::new(Some(tx)),
        };
        let session = Self::with_transport(Some(local_addr), Some(remote_addr), Some(transport));
        (session, rx)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// The pipeline this session was created by, if any.
    pub fn pipeline(&self) -> Option<&Arc<Pipeline>> {
        self.transport.as_ref().map(|t| &t.pipeline)
    }

    /// True once [`close`](Self::close) has been called or the transport went away.
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// True once the close listeners have run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Request the session to close. Idempotent.
    ///
    /// Transport-backed sessions are closed by their driver, which fires the
    /// `closed` event and then runs the close listeners. Detached sessions
    /// close immediately.
    pub fn close(self: &Arc<Self>) {
        if self.closing.swap(true, Ordering::AcqRel) {
            return;
        }
        match &self.transport {
            Some(transport) => {
                transport.pipeline.fire(self, Event::CloseRequested);
                self.close_requested.cancel();
            }
            None => self.mark_closed(),
        }
    }

    /// Register a listener that runs once when the session closes. Runs it
    /// immediately if the session is already closed.
    pub fn on_close<F>(self: &Arc<Self>, listener: F)
    where
        F: FnOnce(&Arc<Session>) + Send + 'static,
    {
        let mut listeners = lock(&self.close_listeners);
        if let Some(pending) = listeners.as_mut() {
            pending.push(Box::new(listener));
            return;
        }
        drop(listeners);
        listener(self);
    }

    /// Wait until the session is closed.
    pub async fn closed(&self) {
        let mut rx = self.closed_tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Cancelled as soon as a close has been requested.
    pub(crate) fn close_requested(&self) -> &CancellationToken {
        &self.close_requested
    }

    /// Transition to closed: stop accepting writes, run the close listeners
    /// once, then wake every `closed()` waiter.
    pub(crate) fn mark_closed(self: &Arc<Self>) {
        self.closing.store(true, Ordering::Release);
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.close_outbound();
        self.close_requested.cancel();

        let listeners = lock(&self.close_listeners).take().unwrap_or_default();
        for listener in listeners {
            listener(self);
        }
        self.closed_tx.send_replace(true);
    }

    #[cfg(test)]
    pub(crate) fn close_listener_count(&self) -> usize {
        lock(&self.close_listeners).as_ref().map_or(0, Vec::len)
    }

    /// Drop the write queue's sender so the writer drains and stops.
    pub(crate) fn close_outbound(&self) {
        if let Some(transport) = &self.transport {
            lock(&transport.outbound).take();
        }
    }

    /// Write a line to the peer.
    ///
    /// The line passes through the pipeline's write path: the write is
    /// logged, then handed to the ordered dispatch lane or straight to the
    /// session writer. Writes on a closing session are dropped.
    pub fn write(self: &Arc<Self>, message: impl Into<String>) {
        let message = message.into();
        if self.is_closing() {
            debug!(session = self.id, "dropping write on closing session");
            return;
        }
        match &self.transport {
            Some(transport) => transport.pipeline.submit_write(self, message),
            None => debug!(session = self.id, "dropping write on detached session"),
        }
    }

    /// Queue a line on the session writer. `None` once the writer is gone.
    pub(crate) fn enqueue(&self, message: String) -> Option<oneshot::Receiver<io::Result<()>>> {
        let transport = self.transport.as_ref()?;
        let outbound = lock(&transport.outbound);
        let sender = outbound.as_ref()?;
        let (ack, done) = oneshot::channel();
        sender.send(Outbound { message, ack }).ok()?;
        Some(done)
    }

    pub(crate) fn notify_created(self: &Arc<Self>) {
        if let Some(t) = &self.transport {
            t.pipeline.fire(self, Event::Created);
            t.handler.session_created(self);
        }
    }

    pub(crate) fn notify_opened(self: &Arc<Self>) {
        if let Some(t) = &self.transport {
            t.pipeline.fire(self, Event::Opened);
            t.handler.session_opened(self);
        }
    }

    pub(crate) fn notify_closed(self: &Arc<Self>) {
        if let Some(t) = &self.transport {
            t.pipeline.fire(self, Event::Closed);
            t.handler.session_closed(self);
        }
    }

    pub(crate) fn notify_idle(self: &Arc<Self>, status: IdleStatus) {
        if let Some(t) = &self.transport {
            t.pipeline.fire(self, Event::Idle(status));
            t.handler.session_idle(self, status);
        }
    }

    pub(crate) fn notify_received(self: &Arc<Self>, message: &str) {
        if let Some(t) = &self.transport {
            t.pipeline.fire(self, Event::Received(message));
            t.handler.message_received(self, message);
        }
    }

    pub(crate) fn notify_sent(self: &Arc<Self>, message: &str) {
        if let Some(t) = &self.transport {
            t.pipeline.fire(self, Event::Sent(message));
            t.handler.message_sent(self, message);
        }
    }

    pub(crate) fn notify_exception(self: &Arc<Self>, error: &io::Error) {
        if let Some(t) = &self.transport {
            t.pipeline.fire(self, Event::Exception(error));
            t.handler.exception_caught(self, error);
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("local_addr", &self.local_addr)
            .field("remote_addr", &self.remote_addr)
            .field("closing", &self.is_closing())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_detached_close_runs_listeners_once() {
        let session = Session::detached(None, None);
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        session.on_close(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        session.close();
        session.close();
        session.closed().await;

        assert!(session.is_closing());
        assert!(session.is_closed());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_on_close_after_close_runs_immediately() {
        let session = Session::detached(None, None);
        session.close();

        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        session.on_close(move |s| {
            assert!(s.is_closed());
            flag.store(true, Ordering::SeqCst);
        });
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_session_ids_are_unique() {
        let a = Session::detached(None, None);
        let b = Session::detached(None, None);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_write_on_detached_session_is_dropped() {
        let session = Session::detached(None, None);
        session.write("ignored");
        assert!(session.enqueue("ignored".to_string()).is_none());
    }
}
