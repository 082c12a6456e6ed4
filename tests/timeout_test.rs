//! Tests for connect timeouts and connection failures

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use connkit::{Config, ConnectHelper, ConnectorBuilder, Error, NoopHandler};
use tokio::net::TcpListener;
use tokio::time::Duration;

/// A loopback port with nothing listening on it.
async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

#[tokio::test]
async fn test_refused_connection_is_an_io_error() {
    let connector = ConnectorBuilder::new(Config::default()).build().unwrap();
    let addr = SocketAddr::from(([127, 0, 0, 1], closed_port().await));

    let err = connector
        .connect(addr, None, Arc::new(NoopHandler))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Io(_)));
}

#[tokio::test]
async fn test_connect_is_bounded_by_timeout() {
    let mut config = Config::default();
    config.pipeline.connect_timeout = Duration::from_millis(200);
    let connector = ConnectorBuilder::new(config).build().unwrap();

    // Non-routable; either times out or fails fast when there is no route.
    let addr: SocketAddr = "10.255.255.1:9".parse().unwrap();
    let started = Instant::now();
    let err = connector
        .connect(addr, None, Arc::new(NoopHandler))
        .await
        .unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(2));
    match err {
        Error::ConnectTimeout { addr: failed, timeout } => {
            assert_eq!(failed, addr);
            assert_eq!(timeout, Duration::from_millis(200));
        }
        Error::Io(_) => {}
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_connect_helper_returns_none_on_failure() {
    let connector = ConnectorBuilder::new(Config::default()).build().unwrap();
    let helper = ConnectHelper::new(connector, Arc::new(NoopHandler));

    let port = closed_port().await;
    let session = helper
        .connect_to("nowhere", IpAddr::V4(Ipv4Addr::LOCALHOST), port)
        .await;
    assert!(session.is_none());
}

#[tokio::test]
async fn test_connect_helper_returns_session_on_success() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let accept = tokio::spawn(async move { listener.accept().await.map(|(stream, _)| stream) });

    let connector = ConnectorBuilder::new(Config::default()).build().unwrap();
    let helper = ConnectHelper::new(connector, Arc::new(NoopHandler));
    let session = helper
        .connect_to("local", IpAddr::V4(Ipv4Addr::LOCALHOST), port)
        .await
        .expect("connected");

    assert_eq!(session.remote_port(), Some(port));
    assert_eq!(session.remote_ip(), "127.0.0.1");
    assert_eq!(session.peer_label(), format!("[/127.0.0.1: {port}]"));
    tokio_test::assert_ok!(accept.await.unwrap());
    session.close();
}
