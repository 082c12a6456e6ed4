//! Socket options
//!
//! Buffer sizes and no-delay default to whatever the platform gives a fresh
//! TCP socket. Option failures on live connections are reported to the fault
//! monitor and never abort the connection.

use std::io;
use std::sync::OnceLock;

use socket2::{Domain, Protocol, SockRef, Socket, Type};
use tokio::net::{TcpSocket, TcpStream};
use tracing::debug;

use crate::config::SocketConfig;
use crate::fault;
use crate::pipeline::Role;

/// Option values of an unconnected platform TCP socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformDefaults {
    pub recv_buffer_size: usize,
    pub send_buffer_size: usize,
    pub tcp_no_delay: bool,
}

const FALLBACK: PlatformDefaults = PlatformDefaults {
    recv_buffer_size: 1024,
    send_buffer_size: 1024,
    tcp_no_delay: false,
};

/// Probed once per process.
pub fn platform_defaults() -> PlatformDefaults {
    static DEFAULTS: OnceLock<PlatformDefaults> = OnceLock::new();
    *DEFAULTS.get_or_init(|| match probe() {
        Ok(defaults) => {
            debug!(?defaults, "probed platform socket defaults");
            defaults
        }
        Err(e) => {
            fault::report("probing platform socket defaults", &e);
            FALLBACK
        }
    })
}

fn probe() -> io::Result<PlatformDefaults> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    Ok(PlatformDefaults {
        recv_buffer_size: socket.recv_buffer_size()?,
        send_buffer_size: socket.send_buffer_size()?,
        tcp_no_delay: socket.nodelay()?,
    })
}

fn report(result: io::Result<()>, context: &str) {
    if let Err(e) = result {
        fault::report(context, &e);
    }
}

/// Options set on a connector socket before it connects.
pub(crate) fn apply_pre_connect(socket: &TcpSocket, config: &SocketConfig) {
    report(
        socket.set_reuseaddr(config.reuse_address),
        "setting SO_REUSEADDR",
    );
    report(
        socket.set_recv_buffer_size(clamp_u32(config.recv_buffer_size)),
        "setting SO_RCVBUF",
    );
}

/// Options set on every established connection.
pub(crate) fn apply_stream_options(stream: &TcpStream, role: Role, config: &SocketConfig) {
    let sock = SockRef::from(stream);
    report(sock.set_keepalive(config.keep_alive), "setting SO_KEEPALIVE");
    report(sock.set_linger(config.linger), "setting SO_LINGER");
    if role == Role::Acceptor {
        report(
            sock.set_send_buffer_size(config.send_buffer_size),
            "setting SO_SNDBUF",
        );
    }
    report(stream.set_nodelay(config.tcp_no_delay), "setting TCP_NODELAY");
}

fn clamp_u32(size: usize) -> u32 {
    u32::try_from(size).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_defaults_are_stable() {
        let first = platform_defaults();
        let second = platform_defaults();
        assert_eq!(first, second);
        assert!(first.recv_buffer_size > 0);
        assert!(first.send_buffer_size > 0);
    }
}
