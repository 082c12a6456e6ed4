//! Per-connection driver
//!
//! Frames a connected socket with the pipeline's codec and runs two tasks:
//! a reader that turns frames into session events, and a single writer that
//! serializes every outbound line. The reader owns the teardown.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error};

use crate::codec::TextLineCodec;
use crate::handler::{IdleStatus, IoHandler};
use crate::pipeline::Pipeline;
use crate::session::{lock, Outbound, Session};

/// Live sessions of one listener.
#[derive(Default)]
pub(crate) struct SessionRegistry {
    sessions: Mutex<HashMap<u64, Arc<Session>>>,
}

impl SessionRegistry {
    fn insert(&self, session: &Arc<Session>) {
        lock(&self.sessions).insert(session.id(), Arc::clone(session));
    }

    fn remove(&self, id: u64) {
        lock(&self.sessions).remove(&id);
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.sessions).len()
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<Session>> {
        lock(&self.sessions).values().cloned().collect()
    }
}

enum Inbound {
    Line(String),
    Idle,
    Failed(io::Error),
    Eof,
}

/// Start driving `stream`. Fires `created` and `opened` before returning.
pub(crate) fn spawn(
    stream: TcpStream,
    pipeline: Arc<Pipeline>,
    handler: Arc<dyn IoHandler>,
    registry: Option<Arc<SessionRegistry>>,
) -> io::Result<Arc<Session>> {
    let local_addr = stream.local_addr()?;
    let remote_addr = stream.peer_addr()?;
    let codec = pipeline.codec().clone();
    let idle_timeout = pipeline.config().pipeline.idle_timeout;

    let (session, outbound) = Session::attached(local_addr, remote_addr, pipeline, handler);
    if let Some(registry) = &registry {
        registry.insert(&session);
    }
    session.notify_created();

    let (read_half, write_half) = stream.into_split();
    let writer = tokio::spawn(write_loop(
        Arc::clone(&session),
        FramedWrite::new(write_half, codec.clone()),
        outbound,
    ));

    session.notify_opened();

    tokio::spawn(read_loop(
        Arc::clone(&session),
        FramedRead::new(read_half, codec),
        idle_timeout,
        writer,
        registry,
    ));

    Ok(session)
}

async fn next_inbound(
    reader: &mut FramedRead<OwnedReadHalf, TextLineCodec>,
    idle_timeout: Option<Duration>,
) -> Inbound {
    let next = match idle_timeout {
        Some(idle) => match tokio::time::timeout(idle, reader.next()).await {
            Ok(next) => next,
            Err(_) => return Inbound::Idle,
        },
        None => reader.next().await,
    };
    match next {
        Some(Ok(line)) => Inbound::Line(line),
        Some(Err(e)) => Inbound::Failed(e),
        None => Inbound::Eof,
    }
}

async fn read_loop(
    session: Arc<Session>,
    mut reader: FramedRead<OwnedReadHalf, TextLineCodec>,
    idle_timeout: Option<Duration>,
    writer: JoinHandle<()>,
    registry: Option<Arc<SessionRegistry>>,
) {
    let close_requested = session.close_requested().clone();

    loop {
        let inbound = tokio::select! {
            _ = close_requested.cancelled() => break,
            inbound = next_inbound(&mut reader, idle_timeout) => inbound,
        };
        match inbound {
            Inbound::Line(line) => session.notify_received(&line),
            Inbound::Idle => session.notify_idle(IdleStatus::ReaderIdle),
            Inbound::Failed(e) => {
                session.notify_exception(&e);
                break;
            }
            Inbound::Eof => {
                debug!(session = session.id(), "peer closed the connection");
                break;
            }
        }
    }

    // Let queued lines drain before the socket goes away.
    session.close_outbound();
    if let Err(e) = writer.await {
        if e.is_panic() {
            error!(session = session.id(), "session writer panicked");
        }
    }

    session.notify_closed();
    session.mark_closed();
    if let Some(registry) = registry {
        registry.remove(session.id());
    }
}

async fn write_loop(
    session: Arc<Session>,
    mut writer: FramedWrite<OwnedWriteHalf, TextLineCodec>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(Outbound { message, ack }) = outbound.recv().await {
        match writer.send(message).await {
            Ok(()) => {
                let _ = ack.send(Ok(()));
            }
            // Oversized line: rejected by the encoder, nothing was written.
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => {
                let _ = ack.send(Err(e));
            }
            Err(e) => {
                debug!(session = session.id(), error = %e, "write failed");
                let _ = ack.send(Err(e));
                session.close();
                return;
            }
        }
    }
}
