//! TCP transport
//!
//! Acceptors and connectors turn sockets into [`Session`](crate::Session)s
//! driven through their role's pipeline.

pub mod acceptor;
pub mod connector;
mod driver;
pub mod socket;

pub use acceptor::{Acceptor, AcceptorBuilder, Listener};
pub use connector::{ConnectHelper, Connector, ConnectorBuilder};
pub use socket::{platform_defaults, PlatformDefaults};
