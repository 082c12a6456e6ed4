//! Address helpers for log lines and diagnostics

use std::net::IpAddr;

use super::Session;

const UNKNOWN_PEER: &str = "[/: -1]";

impl Session {
    /// Remote IP as text, or `""` when unknown.
    pub fn remote_ip(&self) -> String {
        self.remote_addr
            .map(|addr| addr.ip().to_string())
            .unwrap_or_default()
    }

    pub fn remote_port(&self) -> Option<u16> {
        self.remote_addr.map(|addr| addr.port())
    }

    /// Local IPv4 address as text, or `""` for IPv6 or an unknown address.
    pub fn local_ip(&self) -> String {
        match self.local_addr.map(|addr| addr.ip()) {
            Some(IpAddr::V4(ip)) => ip.to_string(),
            _ => String::new(),
        }
    }

    pub fn local_port(&self) -> Option<u16> {
        self.local_addr.map(|addr| addr.port())
    }

    /// `[/ip: port]` prefix used by every session log line.
    ///
    /// Cached once the remote address is known.
    pub fn peer_label(&self) -> &str {
        match self.remote_addr {
            Some(addr) => self
                .peer_label
                .get_or_init(|| format!("[/{}: {}]", addr.ip(), addr.port())),
            None => UNKNOWN_PEER,
        }
    }

    /// `ip: port` of the remote end.
    pub fn peer_pair(&self) -> String {
        match self.remote_addr {
            Some(addr) => format!("{}: {}", addr.ip(), addr.port()),
            None => ": -1".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    #[test]
    fn test_known_addresses() {
        let local: SocketAddr = "10.0.0.1:9123".parse().unwrap();
        let remote: SocketAddr = "192.168.1.20:50000".parse().unwrap();
        let session = Session::detached(Some(local), Some(remote));

        assert_eq!(session.remote_ip(), "192.168.1.20");
        assert_eq!(session.remote_port(), Some(50000));
        assert_eq!(session.local_ip(), "10.0.0.1");
        assert_eq!(session.local_port(), Some(9123));
        assert_eq!(session.peer_label(), "[/192.168.1.20: 50000]");
        assert_eq!(session.peer_pair(), "192.168.1.20: 50000");
    }

    #[test]
    fn test_unknown_addresses() {
        let local: SocketAddr = "[::1]:9123".parse().unwrap();
        let session = Session::detached(Some(local), None);

        assert_eq!(session.remote_ip(), "");
        assert_eq!(session.remote_port(), None);
        assert_eq!(session.local_ip(), "");
        assert_eq!(session.peer_label(), "[/: -1]");
    }
}
