//! connkit
//!
//! Connection-scoped tasks, auto-disconnect and ordered line pipelines for
//! Tokio TCP services.
//!
//! Sessions come from an [`Acceptor`] or [`Connector`], each built once per
//! role from a [`Config`]. Every session of a role shares one [`Pipeline`]
//! (codec, logging, ordered dispatch). Work tied to a session's lifetime is
//! bound with [`TaskScheduler::bind`] and is cancelled when the session
//! closes; [`AutoDisconnect`] is the built-in example.

pub mod codec;
pub mod config;
pub mod error;
pub mod fault;
pub mod handler;
pub mod pipeline;
pub mod session;
pub mod shutdown;
pub mod task;
pub mod transport;

pub use codec::{LineDelimiter, TextLineCodec};
pub use config::{Config, ConfigManager};
pub use error::{Error, Result};
pub use handler::{IdleStatus, IoHandler, NoopHandler};
pub use pipeline::{DispatchLane, Pipeline, PipelineBuilder, Role};
pub use session::Session;
pub use shutdown::ShutdownCoordinator;
pub use task::{AutoDisconnect, ScopedTask, TaskContext, TaskHandle, TaskScheduler};
pub use transport::{
    Acceptor, AcceptorBuilder, ConnectHelper, Connector, ConnectorBuilder, Listener,
};
