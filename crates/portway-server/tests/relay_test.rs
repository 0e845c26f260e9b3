//! End-to-end tests for the relay server.
//!
//! These cover the full flow: accept, backend dial, pre-dial buffering,
//! bidirectional relay, TLS termination, and forceful shutdown, with event
//! assertions through a channel sink.

use std::{
    io::{Read, Write},
    net::{SocketAddr, TcpListener},
    sync::Arc,
    thread,
    time::Duration,
};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc::UnboundedReceiver;

use portway_server::{
    ChannelSink, CloseReason, ErrorKind, Relay, RelayConfig, RelayError, RelayEvent,
};

// ============================================================================
// Test Helpers
// ============================================================================

/// A TCP server that echoes back whatever it receives.
struct MockEchoServer {
    addr: SocketAddr,
    _handle: thread::JoinHandle<()>,
}

impl MockEchoServer {
    fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = thread::spawn(move || {
            for mut stream in listener.incoming().flatten() {
                thread::spawn(move || {
                    let mut buf = [0u8; 4096];
                    loop {
                        match stream.read(&mut buf) {
                            Ok(0) => break,
                            Ok(n) => {
                                if stream.write_all(&buf[..n]).is_err() {
                                    break;
                                }
                            }
                            Err(_) => break,
                        }
                    }
                });
            }
        });

        Self {
            addr,
            _handle: handle,
        }
    }
}

/// A TCP server that expects `PING`, answers `PONG`, and half-closes.
/// Handling is delayed so client data outruns the backend's readiness.
struct MockPingPongServer {
    addr: SocketAddr,
    _handle: thread::JoinHandle<()>,
}

impl MockPingPongServer {
    fn start(delay: Duration) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = thread::spawn(move || {
            for mut stream in listener.incoming().flatten() {
                thread::spawn(move || {
                    thread::sleep(delay);
                    let mut buf = [0u8; 4];
                    if stream.read_exact(&mut buf).is_err() {
                        return;
                    }
                    assert_eq!(&buf, b"PING");
                    let _ = stream.write_all(b"PONG");
                    let _ = stream.shutdown(std::net::Shutdown::Write);
                });
            }
        });

        Self {
            addr,
            _handle: handle,
        }
    }
}

fn test_config(target: SocketAddr) -> RelayConfig {
    let toml_str = format!(
        r#"
port = 0

[target]
host = "{}"
port = {}
"#,
        target.ip(),
        target.port()
    );
    toml::from_str(&toml_str).unwrap()
}

/// A local port with nothing listening on it.
fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn next_event(rx: &mut UnboundedReceiver<RelayEvent>) -> RelayEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event stream ended")
}

async fn expect_listening(rx: &mut UnboundedReceiver<RelayEvent>) -> u16 {
    match next_event(rx).await {
        RelayEvent::Listening { port } => port,
        other => panic!("expected listening event, got {:?}", other),
    }
}

/// Active-pair removal runs just after the close event; give it a moment.
async fn wait_pairs_drained(relay: &Relay) {
    for _ in 0..100 {
        if relay.active_pairs() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("pairs were not removed from active tracking");
}

// ============================================================================
// Tests
// ============================================================================

/// Bytes flow both ways unmodified through the relay.
#[tokio::test]
async fn relay_roundtrip() {
    let echo = MockEchoServer::start();
    let (sink, mut rx) = ChannelSink::new();
    let relay = Relay::new(test_config(echo.addr), sink).unwrap();

    relay.start().await.unwrap();
    let port = expect_listening(&mut rx).await;

    let mut client = tokio::net::TcpStream::connect(("127.0.0.1", port))
        .await
        .unwrap();
    client.write_all(b"hello through the relay").await.unwrap();

    let mut buf = [0u8; 23];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"hello through the relay");

    drop(client);

    match next_event(&mut rx).await {
        RelayEvent::Close {
            reason,
            sent,
            received,
            ..
        } => {
            assert_eq!(reason, CloseReason::Normal);
            assert_eq!(sent, 23);
            assert_eq!(received, 23);
        }
        other => panic!("expected close event, got {:?}", other),
    }
    wait_pairs_drained(&relay).await;

    relay.stop().await;
}

/// Client data sent before the backend is ready is delivered intact once
/// the backend comes up, and the reply makes it back.
#[tokio::test]
async fn early_client_data_reaches_backend() {
    let backend = MockPingPongServer::start(Duration::from_millis(50));
    let (sink, mut rx) = ChannelSink::new();
    let relay = Relay::new(test_config(backend.addr), sink).unwrap();

    relay.start().await.unwrap();
    let port = expect_listening(&mut rx).await;

    let mut client = tokio::net::TcpStream::connect(("127.0.0.1", port))
        .await
        .unwrap();
    // Sent before the backend has begun handling the connection.
    client.write_all(b"PING").await.unwrap();

    let mut buf = [0u8; 4];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"PONG");

    drop(client);

    match next_event(&mut rx).await {
        RelayEvent::Close {
            reason,
            sent,
            received,
            ..
        } => {
            assert_eq!(reason, CloseReason::Normal);
            assert_eq!(sent, 4);
            assert_eq!(received, 4);
        }
        other => panic!("expected close event, got {:?}", other),
    }
    wait_pairs_drained(&relay).await;

    relay.stop().await;
}

/// A dead backend terminates only the affected pair: one error, one close,
/// front closed without any data forwarded.
#[tokio::test]
async fn backend_unreachable_closes_front() {
    let target: SocketAddr = format!("127.0.0.1:{}", free_port()).parse().unwrap();
    let (sink, mut rx) = ChannelSink::new();
    let relay = Relay::new(test_config(target), sink).unwrap();

    relay.start().await.unwrap();
    let port = expect_listening(&mut rx).await;

    let mut client = tokio::net::TcpStream::connect(("127.0.0.1", port))
        .await
        .unwrap();
    let _ = client.write_all(b"PING").await;

    match next_event(&mut rx).await {
        RelayEvent::Error { kind, message, .. } => {
            assert_eq!(kind, ErrorKind::BackendUnreachable);
            assert!(message.contains(&target.to_string()), "message: {message}");
        }
        other => panic!("expected error event, got {:?}", other),
    }
    match next_event(&mut rx).await {
        RelayEvent::Close { reason, sent, .. } => {
            assert_eq!(reason, CloseReason::Error(ErrorKind::BackendUnreachable));
            assert_eq!(sent, 0);
        }
        other => panic!("expected close event, got {:?}", other),
    }

    // The relay closed the front leg.
    let mut buf = [0u8; 8];
    let n = tokio::time::timeout(Duration::from_secs(5), client.read(&mut buf))
        .await
        .expect("read timed out")
        .unwrap_or(0);
    assert_eq!(n, 0);

    wait_pairs_drained(&relay).await;
    relay.stop().await;
}

/// `stop()` forcibly tears down live pairs, each reporting close exactly
/// once, and a second `stop()` is a silent no-op.
#[tokio::test]
async fn stop_is_forceful_and_idempotent() {
    let echo = MockEchoServer::start();
    let (sink, mut rx) = ChannelSink::new();
    let relay = Relay::new(test_config(echo.addr), sink).unwrap();

    relay.start().await.unwrap();
    let port = expect_listening(&mut rx).await;

    // Two live pairs with verified traffic.
    let mut clients = Vec::new();
    for i in 0..2u8 {
        let mut client = tokio::net::TcpStream::connect(("127.0.0.1", port))
            .await
            .unwrap();
        client.write_all(&[i]).await.unwrap();
        let mut buf = [0u8; 1];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf[0], i);
        clients.push(client);
    }
    assert_eq!(relay.active_pairs(), 2);

    relay.stop().await;

    let mut close_count = 0;
    loop {
        match next_event(&mut rx).await {
            RelayEvent::Close { reason, .. } => {
                assert_eq!(reason, CloseReason::Shutdown);
                close_count += 1;
            }
            RelayEvent::Stopped { .. } => break,
            other => panic!("unexpected event: {:?}", other),
        }
    }
    assert_eq!(close_count, 2);
    assert_eq!(relay.active_pairs(), 0);

    // Both fronts were force-closed.
    for mut client in clients {
        let mut buf = [0u8; 8];
        let n = tokio::time::timeout(Duration::from_secs(5), client.read(&mut buf))
            .await
            .expect("read timed out")
            .unwrap_or(0);
        assert_eq!(n, 0);
    }

    // Second stop: no second stopped event, no errors.
    relay.stop().await;
    assert!(rx.try_recv().is_err());
}

/// `start()` while serving is a no-op; one listening event, stable port.
#[tokio::test]
async fn start_is_idempotent() {
    let echo = MockEchoServer::start();
    let (sink, mut rx) = ChannelSink::new();
    let relay = Relay::new(test_config(echo.addr), sink).unwrap();

    relay.start().await.unwrap();
    let port = expect_listening(&mut rx).await;

    relay.start().await.unwrap();
    assert_eq!(relay.local_port().await, Some(port));
    assert!(rx.try_recv().is_err());

    relay.stop().await;
}

/// Stopping a relay that was never started is a no-op.
#[tokio::test]
async fn stop_without_start_is_noop() {
    let (sink, mut rx) = ChannelSink::new();
    let relay = Relay::new(test_config("127.0.0.1:9".parse().unwrap()), sink).unwrap();

    relay.stop().await;
    assert!(rx.try_recv().is_err());
}

/// An occupied port is fatal to `start()` and reported both ways.
#[tokio::test]
async fn bind_error_propagates() {
    let occupied = TcpListener::bind("0.0.0.0:0").unwrap();
    let port = occupied.local_addr().unwrap().port();

    let mut config = test_config("127.0.0.1:9".parse().unwrap());
    config.port = port;

    let (sink, mut rx) = ChannelSink::new();
    let relay = Relay::new(config, sink).unwrap();

    match relay.start().await {
        Err(RelayError::Bind(_)) => {}
        other => panic!("expected bind error, got {:?}", other.err()),
    }
    match next_event(&mut rx).await {
        RelayEvent::Error { kind, .. } => assert_eq!(kind, ErrorKind::Bind),
        other => panic!("expected error event, got {:?}", other),
    }
    assert_eq!(relay.local_port().await, None);
}

// ============================================================================
// TLS Termination
// ============================================================================

/// Generate a self-signed certificate for 127.0.0.1/localhost.
/// Returns (cert_pem, key_pem, cert_der).
fn generate_test_certs() -> (String, String, Vec<u8>) {
    use rcgen::{CertificateParams, KeyPair, PKCS_ECDSA_P256_SHA256};

    let key_pair = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256).unwrap();
    let mut params = CertificateParams::default();
    params.subject_alt_names = vec![
        rcgen::SanType::DnsName("localhost".try_into().unwrap()),
        rcgen::SanType::IpAddress(std::net::IpAddr::V4(std::net::Ipv4Addr::new(127, 0, 0, 1))),
    ];
    let cert = params.self_signed(&key_pair).unwrap();

    (cert.pem(), key_pair.serialize_pem(), cert.der().to_vec())
}

/// Bytes flow through a TLS-terminated listener to a plain TCP backend.
#[tokio::test]
async fn tls_termination_roundtrip() {
    use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName};
    use tokio_rustls::rustls::{ClientConfig, RootCertStore};
    use tokio_rustls::TlsConnector;

    let (cert_pem, key_pem, cert_der) = generate_test_certs();

    let temp_dir = tempfile::Builder::new()
        .prefix("portway-tls-test-")
        .tempdir()
        .unwrap();
    let cert_path = temp_dir.path().join("cert.pem");
    let key_path = temp_dir.path().join("key.pem");
    std::fs::write(&cert_path, &cert_pem).unwrap();
    std::fs::write(&key_path, &key_pem).unwrap();

    let echo = MockEchoServer::start();
    let toml_str = format!(
        r#"
port = 0
transport = "tls"

[target]
host = "{}"
port = {}

[tls]
cert = "{}"
key = "{}"
"#,
        echo.addr.ip(),
        echo.addr.port(),
        cert_path.display(),
        key_path.display()
    );
    let config: RelayConfig = toml::from_str(&toml_str).unwrap();

    let (sink, mut rx) = ChannelSink::new();
    let relay = Relay::new(config, sink).unwrap();
    relay.start().await.unwrap();
    let port = expect_listening(&mut rx).await;

    // Client trusts exactly the test certificate.
    let mut root_store = RootCertStore::empty();
    root_store.add(CertificateDer::from(cert_der)).unwrap();
    let client_config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(client_config));

    let tcp = tokio::net::TcpStream::connect(("127.0.0.1", port))
        .await
        .unwrap();
    let server_name = ServerName::try_from("localhost").unwrap();
    let mut tls = connector.connect(server_name, tcp).await.unwrap();

    tls.write_all(b"over tls").await.unwrap();
    tls.flush().await.unwrap();

    let mut buf = [0u8; 8];
    tls.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"over tls");

    // Send close_notify so the relay sees a clean EOF rather than a
    // truncated TLS stream.
    tls.shutdown().await.unwrap();
    drop(tls);
    match next_event(&mut rx).await {
        RelayEvent::Close { reason, .. } => assert_eq!(reason, CloseReason::Normal),
        other => panic!("expected close event, got {:?}", other),
    }

    relay.stop().await;
    match next_event(&mut rx).await {
        RelayEvent::Stopped { port: stopped } => assert_eq!(stopped, port),
        other => panic!("expected stopped event, got {:?}", other),
    }
}
