//! End-to-end tests over a real loopback socket.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use httpsvr::{Config, Error, Method, Request, Server};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};

mod common;
use common::capture_logs;

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

/// A client that trusts only the self-signed `localhost` fixture.
fn tls_connector() -> TlsConnector {
    let pem = std::fs::read(fixture("cert.pem")).unwrap();
    let mut roots = RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut pem.as_slice()) {
        roots.add(cert.unwrap()).unwrap();
    }
    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

async fn send(addr: std::net::SocketAddr, raw: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(raw.as_bytes()).await.unwrap();
    let mut out = Vec::new();
    stream.read_to_end(&mut out).await.unwrap();
    String::from_utf8_lossy(&out).into_owned()
}

#[tokio::test]
async fn test_serves_and_shuts_down_gracefully() {
    let mut server = Server::with_config(Config::default().metric_reset(None));
    server.add_handler(Method::GET, "/match/:id", |req: Request| async move {
        format!("id={} q1={}", req.param("id").unwrap_or_default(), req.query("q1"))
    });
    let metrics = std::sync::Arc::clone(server.metrics());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop, stopped) = oneshot::channel::<()>();
    let serving = tokio::spawn(server.serve_with_shutdown(listener, async {
        let _ = stopped.await;
    }));

    let response = send(
        addr,
        "GET /match/119?q1=lan&q2=dt HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");
    assert!(response.contains("x-request-id: "), "{response}");
    assert!(response.ends_with("id=119 q1=lan"), "{response}");

    let response = send(addr, "GET /nope HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 404 Not Found"), "{response}");

    stop.send(()).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), serving).await.unwrap().unwrap();
    assert!(result.is_ok());

    let snapshot = metrics.snapshot();
    assert!(snapshot.iter().any(|m| m.key == "/match/:id_GET" && m.count == 1));
    assert!(snapshot.iter().any(|m| m.key == "/nope_GET" && m.count == 1));
}

#[tokio::test]
async fn test_slow_body_gets_408_and_is_logged_and_counted() {
    let (logs, _guard) = capture_logs();

    let config = Config::default().read_timeout(Duration::from_millis(100)).metric_reset(None);
    let mut server = Server::with_config(config);
    server.add_handler(Method::POST, "/upload", |req: Request| async move { req.body().len().to_string() });
    let metrics = Arc::clone(server.metrics());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop, stopped) = oneshot::channel::<()>();
    let serving = tokio::spawn(server.serve_with_shutdown(listener, async {
        let _ = stopped.await;
    }));

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"POST /upload HTTP/1.1\r\nHost: localhost\r\nContent-Length: 10\r\nConnection: close\r\n\r\nabc")
        .await
        .unwrap();
    let mut out = Vec::new();
    let read = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut out)).await;
    assert!(read.is_ok());
    let response = String::from_utf8_lossy(&out);
    assert!(response.starts_with("HTTP/1.1 408"), "{response}");

    let id = response
        .lines()
        .find_map(|l| l.strip_prefix("x-request-id: "))
        .expect("408 carries a request id")
        .to_owned();
    let tagged = logs.lines_containing(&format!("request_id={id}"));
    assert!(tagged.iter().any(|l| l.contains("request body read timed out")), "{}", logs.contents());
    assert!(tagged.iter().any(|l| l.contains("http responded") && l.contains("status=408")));

    let snapshot = metrics.snapshot();
    assert!(snapshot.iter().any(|m| m.key == "/upload_POST" && m.count == 1), "{snapshot:?}");

    drop(stream);
    stop.send(()).unwrap();
    let _ = tokio::time::timeout(Duration::from_secs(5), serving).await;
}

#[tokio::test]
async fn test_zero_read_timeouts_wait_for_slow_clients() {
    let config = Config::default()
        .read_header_timeout(Duration::ZERO)
        .read_timeout(Duration::ZERO)
        .metric_reset(None);
    let mut server = Server::with_config(config);
    server.add_handler(Method::POST, "/upload", |req: Request| async move { req.body().len().to_string() });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop, stopped) = oneshot::channel::<()>();
    let serving = tokio::spawn(server.serve_with_shutdown(listener, async {
        let _ = stopped.await;
    }));

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"POST /upload HTTP/1.1\r\nHost: localhost\r\nContent-Length: 10\r\nConnection: close\r\n\r\nabc")
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    stream.write_all(b"defghij").await.unwrap();

    let mut out = Vec::new();
    let read = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut out)).await;
    assert!(read.is_ok());
    let response = String::from_utf8_lossy(&out);
    assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");
    assert!(response.ends_with("10"), "{response}");

    stop.send(()).unwrap();
    let _ = tokio::time::timeout(Duration::from_secs(5), serving).await;
}

#[tokio::test]
async fn test_tls_handshake_and_plaintext_rejection() {
    let (logs, _guard) = capture_logs();

    let mut server = Server::with_config(Config::default().metric_reset(None));
    server.add_handler(Method::GET, "/secure", |_req: Request| async { "sealed" });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop, stopped) = oneshot::channel::<()>();
    let serving = tokio::spawn(server.serve_tls_with_shutdown(
        listener,
        fixture("cert.pem"),
        fixture("key.pem"),
        async {
            let _ = stopped.await;
        },
    ));

    let tcp = TcpStream::connect(addr).await.unwrap();
    let domain = ServerName::try_from("localhost").unwrap();
    let mut tls = tls_connector().connect(domain, tcp).await.unwrap();
    tls.write_all(b"GET /secure HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut out = Vec::new();
    let _ = tokio::time::timeout(Duration::from_secs(5), tls.read_to_end(&mut out)).await;
    let response = String::from_utf8_lossy(&out);
    assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");
    assert!(response.ends_with("sealed"), "{response}");

    // Plain HTTP on the TLS port: the handshake fails and the connection is
    // dropped without an HTTP answer.
    let mut plain = TcpStream::connect(addr).await.unwrap();
    plain.write_all(b"GET /secure HTTP/1.1\r\nHost: localhost\r\n\r\n").await.unwrap();
    let mut out = Vec::new();
    let _ = tokio::time::timeout(Duration::from_secs(5), plain.read_to_end(&mut out)).await;
    let response = String::from_utf8_lossy(&out);
    assert!(!response.starts_with("HTTP/"), "{response}");
    assert_eq!(logs.lines_containing("tls handshake failed").len(), 1, "{}", logs.contents());

    stop.send(()).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), serving).await.unwrap().unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_bind_failures_are_surfaced() {
    let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = taken.local_addr().unwrap().to_string();

    let err = Server::new().listen_and_serve(&addr).await.unwrap_err();
    assert!(matches!(err, Error::Bind { .. }), "{err}");

    let err = Server::new().listen_and_serve("not an address").await.unwrap_err();
    assert!(matches!(err, Error::InvalidAddress(_)), "{err}");
}

#[tokio::test]
async fn test_missing_tls_material_is_fatal() {
    let err = Server::new()
        .listen_and_serve_tls("127.0.0.1:0", "/missing/cert.pem", "/missing/key.pem")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Tls(_)), "{err}");
}
