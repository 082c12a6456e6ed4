//! Connecting side

use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};

use tokio::net::TcpSocket;
use tracing::{debug, info, warn};

use super::driver;
use super::socket;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::handler::IoHandler;
use crate::pipeline::{Pipeline, PipelineBuilder, Role};
use crate::session::{lock, Session};

/// Builds the connector pipeline once and hands out the same [`Connector`].
pub struct ConnectorBuilder {
    pipeline: PipelineBuilder,
    connector: Mutex<Option<Arc<Connector>>>,
}

impl ConnectorBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            pipeline: PipelineBuilder::new(Role::Connector, config),
            connector: Mutex::new(None),
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

    pub fn build(&self) -> Result<Arc<Connector>> {
        let mut connector = lock(&self.connector);
        if let Some(connector) = connector.as_ref() {
            return Ok(Arc::clone(connector));
        }
        let built = Arc::new(Connector {
            pipeline: self.pipeline.build()?,
        });
        *connector = Some(Arc::clone(&built));
        Ok(built)
    }
}

/// Opens outbound connections whose sessions share one pipeline.
pub struct Connector {
    pipeline: Arc<Pipeline>,
}

impl Connector {
    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// Connect to `remote`, optionally from `local`, waiting at most the
    /// configured connect timeout.
    ///
    /// # Errors
    ///
    /// [`Error::ConnectTimeout`] if the timeout elapses, [`Error::Io`] if the
    /// connection is refused or the local bind fails.
    pub async fn connect(
        &self,
        remote: SocketAddr,
        local: Option<SocketAddr>,
        handler: Arc<dyn IoHandler>,
    ) -> Result<Arc<Session>> {
        let config = self.pipeline.config();
        let socket = if remote.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket::apply_pre_connect(&socket, &config.socket);
        if let Some(local) = local {
            socket.bind(local)?;
        }

        let timeout = config.pipeline.connect_timeout;
        let stream = tokio::time::timeout(timeout, socket.connect(remote))
            .await
            .map_err(|_| Error::ConnectTimeout {
                addr: remote,
                timeout,
            })??;
        debug!("Connected to {}", remote);

        socket::apply_stream_options(&stream, Role::Connector, &config.socket);
        let session = driver::spawn(stream, Arc::clone(&self.pipeline), handler, None)?;
        Ok(session)
    }
}

/// Connects to named servers, logging progress and swallowing failures.
pub struct ConnectHelper {
    connector: Arc<Connector>,
    handler: Arc<dyn IoHandler>,
}

impl ConnectHelper {
    pub fn new(connector: Arc<Connector>, handler: Arc<dyn IoHandler>) -> Self {
        Self { connector, handler }
    }

    /// `None` when the connection could not be established; the reason is
    /// logged.
    pub async fn connect_to(&self, server_name: &str, ip: IpAddr, port: u16) -> Option<Arc<Session>> {
        let remote = SocketAddr::new(ip, port);
        info!("Connecting to {} at {}...", server_name, remote);
        match self
            .connector
            .connect(remote, None, Arc::clone(&self.handler))
            .await
        {
            Ok(session) => {
                info!("Connected to {} at {}", server_name, remote);
                Some(session)
            }
            Err(e) => {
                warn!("Failed to connect to {} at {}: {}", server_name, remote, e);
                None
            }
        }
    }
}
