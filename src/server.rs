//! The server facade: registration, the `/__metric` endpoint, and the
//! listener loop.
//!
//! # Lifecycle
//!
//! 1. Build a [`Server`] and register handlers. Each one is wrapped with the
//!    logging and metrics layers on the way in, so the table only ever holds
//!    instrumented handlers.
//! 2. Call one of the `listen_and_serve*` methods. The server is consumed:
//!    configuration and routes are fixed from here on.
//! 3. The call returns after a graceful shutdown (SIGTERM or Ctrl-C, then
//!    every in-flight connection finishing), or immediately with an error if
//!    the address cannot be bound.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use http::{Method, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{error, info, warn};

use crate::config::{Config, limit, listen_addr};
use crate::error::Error;
use crate::handler::Handler;
use crate::metrics::{self, MetricStore, RouteKey};
use crate::middleware::Layers;
use crate::request::{Request, RequestId};
use crate::response::Response;
use crate::router::Router;
use crate::tls;

/// Path of the built-in metrics report.
pub const METRIC_PATH: &str = "/__metric";

/// An HTTP server with per-route metrics and correlated request logging.
///
/// ```rust,no_run
/// use httpsvr::{Method, Request, Server};
///
/// #[tokio::main]
/// async fn main() -> Result<(), httpsvr::Error> {
///     let mut server = Server::new();
///     server.add_handler(Method::GET, "/match/:id", get_match);
///     server.listen_and_serve(":8000").await
/// }
///
/// async fn get_match(req: Request) -> String {
///     format!("match {}", req.param("id").unwrap_or_default())
/// }
/// ```
pub struct Server {
    config: Config,
    router: Router,
    layers: Layers,
    metrics: Arc<MetricStore>,
}

impl Server {
    /// Logging and metrics on, metrics reset daily, default timeouts.
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// A server with explicit configuration. `GET /__metric` is registered
    /// when metrics are enabled.
    pub fn with_config(config: Config) -> Self {
        let metrics = Arc::new(MetricStore::new());
        let layers = Layers {
            logging: config.logging,
            metrics: config.metrics.then(|| Arc::clone(&metrics)),
            deadline: limit(config.write_timeout),
        };
        let router = Router::new(layers.unrouted(not_found.into_endpoint()));

        let mut server = Self { config, router, layers, metrics };
        if server.config.metrics {
            let report = metric_report(Arc::clone(&server.metrics));
            server.add_handler(Method::GET, METRIC_PATH, report);
        }
        server
    }

    /// Registers `handler` for `method` + `path`, wrapped with the enabled
    /// logging and metrics layers.
    ///
    /// Registering the same method and path twice keeps the first handler;
    /// the rejected one is reported in the log and nothing else happens.
    pub fn add_handler(&mut self, method: Method, path: &str, handler: impl Handler) -> &mut Self {
        let key = RouteKey::new(&method, path);
        let wrapped = self.layers.route(key, handler.into_endpoint());
        if let Err(e) = self.router.insert(method.clone(), path, wrapped) {
            warn!(%method, path, error = %e, "route not registered");
        }
        self
    }

    /// Replaces the default `404 page not found` response for requests no
    /// route matches. The handler is wrapped like any other, with metrics
    /// keyed by the requested path.
    pub fn add_handler_not_found(&mut self, handler: impl Handler) -> &mut Self {
        let wrapped = self.layers.unrouted(handler.into_endpoint());
        self.router.set_not_found(wrapped);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The live metric store. Clone the `Arc` to read or reset it while the
    /// server runs.
    pub fn metrics(&self) -> &Arc<MetricStore> {
        &self.metrics
    }

    /// Runs one request through routing and the middleware chain without a
    /// socket.
    pub async fn respond(&self, req: http::Request<Bytes>, remote_addr: SocketAddr) -> Response {
        let mut req = Request::new(req, remote_addr);
        let (handler, params) = self.router.lookup(req.method(), req.path());
        req.params = params;
        handler.call(req).await
    }

    /// Binds `addr` and serves until shutdown. `:8000` means all interfaces.
    pub async fn listen_and_serve(self, addr: &str) -> Result<(), Error> {
        let listener = bind(addr).await?;
        self.serve(listener).await
    }

    /// [`listen_and_serve`](Self::listen_and_serve) on [`Config::addr`].
    pub async fn listen_and_serve_configured(self) -> Result<(), Error> {
        let addr = self.config.addr.clone();
        self.listen_and_serve(&addr).await
    }

    /// Like [`listen_and_serve`](Self::listen_and_serve), speaking TLS with
    /// the given PEM certificate chain and private key.
    pub async fn listen_and_serve_tls(
        self,
        addr: &str,
        cert_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
    ) -> Result<(), Error> {
        let acceptor = tls::load_acceptor(cert_path.as_ref(), key_path.as_ref())?;
        let listener = bind(addr).await?;
        self.run(listener, Some(acceptor), shutdown_signal()).await
    }

    /// TLS on an already-bound listener until `shutdown` resolves.
    pub async fn serve_tls_with_shutdown<F>(
        self,
        listener: TcpListener,
        cert_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
        shutdown: F,
    ) -> Result<(), Error>
    where
        F: Future<Output = ()> + Send,
    {
        let acceptor = tls::load_acceptor(cert_path.as_ref(), key_path.as_ref())?;
        self.run(listener, Some(acceptor), shutdown).await
    }

    /// Serves on an already-bound listener until SIGTERM or Ctrl-C.
    pub async fn serve(self, listener: TcpListener) -> Result<(), Error> {
        self.run(listener, None, shutdown_signal()).await
    }

    /// Serves on an already-bound listener until `shutdown` resolves.
    pub async fn serve_with_shutdown<F>(self, listener: TcpListener, shutdown: F) -> Result<(), Error>
    where
        F: Future<Output = ()> + Send,
    {
        self.run(listener, None, shutdown).await
    }

    async fn run<F>(
        self,
        listener: TcpListener,
        tls: Option<TlsAcceptor>,
        shutdown: F,
    ) -> Result<(), Error>
    where
        F: Future<Output = ()> + Send,
    {
        let local_addr = listener.local_addr()?;

        let reset_task = match (self.config.metrics, self.config.metric_reset) {
            (true, Some(schedule)) => {
                Some(metrics::spawn_periodic_reset(Arc::clone(&self.metrics), schedule))
            }
            _ => None,
        };

        let server = Arc::new(self);
        info!(addr = %local_addr, tls = tls.is_some(), "httpsvr listening");

        let mut tasks = tokio::task::JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                // Checked first so a shutdown stops accepting immediately,
                // even with connections queued.
                biased;

                () = &mut shutdown => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let server = Arc::clone(&server);
                    let tls = tls.clone();
                    tasks.spawn(async move {
                        match tls {
                            None => serve_connection(server, stream, remote_addr).await,
                            Some(acceptor) => match acceptor.accept(stream).await {
                                Ok(stream) => serve_connection(server, stream, remote_addr).await,
                                Err(e) => warn!(peer = %remote_addr, "tls handshake failed: {e}"),
                            },
                        }
                    });
                }

                // Reap finished connection tasks so the set stays small on
                // long-running servers.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        while tasks.join_next().await.is_some() {}

        if let Some(task) = reset_task {
            task.abort();
        }
        info!("httpsvr stopped");
        Ok(())
    }

    /// Reads the body under the read timeout, then dispatches. A body that
    /// cannot be read is answered through the unrouted layers, so it is still
    /// logged and counted under the requested path.
    async fn handle(&self, req: hyper::Request<Incoming>, remote_addr: SocketAddr) -> Response {
        let (parts, body) = req.into_parts();
        let collected = match limit(self.config.read_timeout) {
            Some(timeout) => tokio::time::timeout(timeout, body.collect()).await.ok(),
            None => Some(body.collect().await),
        };
        let (status, reason) = match collected {
            Some(Ok(collected)) => {
                let req = http::Request::from_parts(parts, collected.to_bytes());
                return self.respond(req, remote_addr).await;
            }
            Some(Err(e)) => (StatusCode::BAD_REQUEST, format!("reading request body: {e}")),
            None => (StatusCode::REQUEST_TIMEOUT, "request body read timed out".to_owned()),
        };

        let rejected = self.layers.unrouted(body_rejected(status, reason).into_endpoint());
        let req = Request::new(http::Request::from_parts(parts, Bytes::new()), remote_addr);
        rejected.call(req).await
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

// ── Connections ───────────────────────────────────────────────────────────────

async fn bind(addr: &str) -> Result<TcpListener, Error> {
    let addr = listen_addr(addr);
    TcpListener::bind(addr.as_str()).await.map_err(|source| {
        if source.kind() == std::io::ErrorKind::InvalidInput {
            Error::InvalidAddress(addr.clone())
        } else {
            Error::Bind { addr: addr.clone(), source }
        }
    })
}

/// Drives one connection (plain or TLS) to completion. HTTP/1.1 and HTTP/2
/// are both accepted, whichever the client speaks.
async fn serve_connection<I>(server: Arc<Server>, io: I, remote_addr: SocketAddr)
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let header_timeout = server.config.read_header_timeout;

    // Called once per request on the connection.
    let svc = service_fn(move |req| {
        let server = Arc::clone(&server);
        async move {
            let response = server.handle(req, remote_addr).await;
            Ok::<http::Response<Full<Bytes>>, Infallible>(response.into_inner())
        }
    });

    let mut builder = ConnBuilder::new(TokioExecutor::new());
    if let Some(timeout) = limit(header_timeout) {
        builder
            .http1()
            .timer(TokioTimer::new())
            .header_read_timeout(timeout);
    }

    if let Err(e) = builder.serve_connection(TokioIo::new(io), svc).await {
        error!(peer = %remote_addr, "connection error: {e}");
    }
}

/// Resolves on SIGTERM (Kubernetes, systemd) or SIGINT (Ctrl-C).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("cannot listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("cannot listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c  => {}
        () = sigterm => {}
    }
}

// ── Built-in handlers ─────────────────────────────────────────────────────────

async fn not_found(_req: Request) -> Response {
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .text("404 page not found")
}

fn body_rejected(status: StatusCode, reason: String) -> impl Handler {
    move |req: Request| {
        warn!(
            request_id = %req.request_id().map_or("-", RequestId::as_str),
            peer = %req.remote_addr(),
            path = %req.path(),
            "{reason}"
        );
        async move { status }
    }
}

/// `GET /__metric`: the ranked snapshot as indented JSON.
fn metric_report(store: Arc<MetricStore>) -> impl Handler {
    move |_req: Request| {
        let snapshot = store.snapshot();
        async move {
            match serde_json::to_vec_pretty(&snapshot) {
                Ok(body) => Response::json(body),
                Err(e) => Response::builder()
                    .status(StatusCode::INTERNAL_SERVER_ERROR)
                    .text(e.to_string()),
            }
        }
    }
}
