//! Per-role processing pipelines
//!
//! A [`Pipeline`] is an ordered list of stages (codec, then optional logging,
//! then optional ordered dispatch) fixed at build time and shared by every
//! session of one acceptor or connector. Events are fanned out to the stages
//! in that order, then to the session's [`IoHandler`](crate::IoHandler).

pub mod builder;
pub mod dispatch;
pub mod logging;

pub use builder::PipelineBuilder;
pub use dispatch::DispatchLane;
pub use logging::{abbreviate, LoggingStage, TRUNCATION_MARKER};

use std::fmt;
use std::io;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::debug;

use crate::codec::TextLineCodec;
use crate::config::Config;
use crate::handler::IdleStatus;
use crate::session::Session;

/// Which side of a connection a pipeline serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Acceptor,
    Connector,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Acceptor => f.write_str("acceptor"),
            Self::Connector => f.write_str("connector"),
        }
    }
}

/// A session event as seen by pipeline stages.
#[derive(Debug, Clone, Copy)]
pub enum Event<'a> {
    Created,
    Opened,
    Closed,
    Idle(IdleStatus),
    Exception(&'a io::Error),
    Received(&'a str),
    Sent(&'a str),
    /// A write was submitted, before it is dispatched.
    Write(&'a str),
    CloseRequested,
}

/// One pipeline stage.
#[derive(Debug)]
pub enum Stage {
    Codec(TextLineCodec),
    Logging(LoggingStage),
    OrderedDispatch(Arc<DispatchLane>),
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Codec(_) => "codec",
            Self::Logging(_) => "logging",
            Self::OrderedDispatch(_) => "ordered-dispatch",
        }
    }
}

/// The fixed stage list shared by every session of one builder.
#[derive(Debug)]
pub struct Pipeline {
    role: Role,
    /// Framing for every session; also the first stage.
    codec: TextLineCodec,
    stages: Vec<Stage>,
    config: Config,
}

impl Pipeline {
    pub(crate) fn new(
        role: Role,
        codec: TextLineCodec,
        logging: Option<LoggingStage>,
        lane: Option<Arc<DispatchLane>>,
        config: Config,
    ) -> Self {
        let mut stages = vec![Stage::Codec(codec.clone())];
        stages.extend(logging.map(Stage::Logging));
        stages.extend(lane.map(Stage::OrderedDispatch));
        Self {
            role,
            codec,
            stages,
            config,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(Stage::name).collect()
    }

    /// The configuration snapshot taken when the pipeline was built.
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn codec(&self) -> &TextLineCodec {
        &self.codec
    }

    pub fn dispatch_lane(&self) -> Option<&Arc<DispatchLane>> {
        self.stages.iter().find_map(|stage| match stage {
            Stage::OrderedDispatch(lane) => Some(lane),
            _ => None,
        })
    }

    /// Pass an event through every stage, in order.
    pub fn fire(&self, session: &Session, event: Event<'_>) {
        for stage in &self.stages {
            if let Stage::Logging(logging) = stage {
                logging.observe(session, &event);
            }
        }
    }

    /// Hand a line to the write path: log it as submitted, then deliver it
    /// through the ordered dispatch lane, or directly when there is none.
    pub fn submit_write(&self, session: &Arc<Session>, message: String) {
        self.fire(session, Event::Write(&message));

        match self.dispatch_lane() {
            Some(lane) => {
                let session = Arc::clone(session);
                lane.submit(async move {
                    if let Some(done) = session.enqueue(message.clone()) {
                        complete_write(&session, &message, done).await;
                    } else {
                        debug!(session = session.id(), "write discarded: session writer is gone");
                    }
                });
            }
            None => {
                let Some(done) = session.enqueue(message.clone()) else {
                    debug!(session = session.id(), "write discarded: session writer is gone");
                    return;
                };
                match Handle::try_current() {
                    Ok(handle) => {
                        let session = Arc::clone(session);
                        handle.spawn(async move {
                            complete_write(&session, &message, done).await;
                        });
                    }
                    Err(e) => debug!(error = %e, "no runtime to await write completion"),
                }
            }
        }
    }
}

async fn complete_write(
    session: &Arc<Session>,
    message: &str,
    done: oneshot::Receiver<io::Result<()>>,
) {
    match done.await {
        Ok(Ok(())) => session.notify_sent(message),
        Ok(Err(e)) => session.notify_exception(&e),
        Err(_) => debug!(session = session.id(), "write dropped: session closed"),
    }
}
