//! Accepting side

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::driver::{self, SessionRegistry};
use super::socket;
use crate::config::Config;
use crate::error::Result;
use crate::fault;
use crate::handler::IoHandler;
use crate::pipeline::{Pipeline, PipelineBuilder, Role};
use crate::session::lock;

const LISTEN_BACKLOG: u32 = 1024;

/// Builds the acceptor pipeline once and hands out the same [`Acceptor`].
pub struct AcceptorBuilder {
    pipeline: PipelineBuilder,
    acceptor: Mutex<Option<Arc<Acceptor>>>,
}

impl AcceptorBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            pipeline: PipelineBuilder::new(Role::Acceptor, config),
            acceptor: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &Config {
        self.pipeline.config()
    }

    /// Has no effect once [`build`](Self::build) has succeeded.
    pub fn config_mut(&mut self) -> &mut Config {
        self.pipeline.config_mut()
    }

    pub fn pipeline_builder(&self) -> &PipelineBuilder {
        &self.pipeline
    }

    pub fn build(&self) -> Result<Arc<Acceptor>> {
        let mut acceptor = lock(&self.acceptor);
        if let Some(acceptor) = acceptor.as_ref() {
            return Ok(Arc::clone(acceptor));
        }
        let built = Arc::new(Acceptor {
            pipeline: self.pipeline.build()?,
        });
        *acceptor = Some(Arc::clone(&built));
        Ok(built)
    }
}

/// Binds listeners whose sessions share one pipeline.
pub struct Acceptor {
    pipeline: Arc<Pipeline>,
}

impl Acceptor {
    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// Bind `addr` and start accepting. Address reuse is off, so binding a
    /// port that is already taken fails here.
    pub async fn bind(&self, addr: SocketAddr, handler: Arc<dyn IoHandler>) -> Result<Listener> {
        info!("Binding TCP listener to {}", addr);
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(false)?;
        socket.bind(addr)?;
        let listener = socket.listen(LISTEN_BACKLOG)?;
        let local_addr = listener.local_addr()?;
        info!("Successfully bound to {}", local_addr);

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let registry = Arc::new(SessionRegistry::default());
        let task = tokio::spawn(accept_loop(
            listener,
            shutdown_rx,
            Arc::clone(&self.pipeline),
            handler,
            Arc::clone(&registry),
        ));

        Ok(Listener {
            local_addr,
            shutdown_tx,
            registry,
            task: tokio::sync::Mutex::new(Some(task)),
        })
    }
}

async fn accept_loop(
    listener: TcpListener,
    mut shutdown_rx: broadcast::Receiver<()>,
    pipeline: Arc<Pipeline>,
    handler: Arc<dyn IoHandler>,
    registry: Arc<SessionRegistry>,
) {
    info!("Starting connection acceptance loop");

    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, addr)) => {
                        debug!("Accepted connection from {}", addr);
                        socket::apply_stream_options(&stream, Role::Acceptor, &pipeline.config().socket);
                        if let Err(e) = driver::spawn(
                            stream,
                            Arc::clone(&pipeline),
                            Arc::clone(&handler),
                            Some(Arc::clone(&registry)),
                        ) {
                            fault::report("starting accepted session", &e);
                        }
                    }
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                        fault::report("accepting connection", &e);
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Received shutdown signal, stopping connection acceptance");
                break;
            }
        }
    }
}

/// A bound, accepting listener.
pub struct Listener {
    local_addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    registry: Arc<SessionRegistry>,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Listener {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Sessions accepted by this listener that are still open.
    pub fn sessions(&self) -> usize {
        self.registry.len()
    }

    /// Stop accepting and close every session this listener accepted.
    pub async fn unbind(&self) {
        let _ = self.shutdown_tx.send(());
        if let Some(task) = self.task.lock().await.take() {
            let _ = task.await;
            info!("Listener on {} unbound", self.local_addr);
        }
        for session in self.registry.snapshot() {
            session.close();
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}
