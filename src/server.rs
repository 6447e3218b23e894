//! HTTP server, per-request pipeline, and graceful shutdown.
//!
//! # One request, start to finish
//!
//! ```text
//! hyper connection task
//!   └─ App::handle
//!        read body → resolve client ip → route lookup (or not-found)
//!        └─ Recovery::contain           ← panics and recorded errors stop here
//!             └─ [timeout]
//!                  └─ user layers → route handler
//! ```
//!
//! Every request gets a response. Nothing raised inside a handler reaches
//! the connection task, let alone the accept loop.
//!
//! # Graceful shutdown
//!
//! On SIGTERM or Ctrl-C the server stops accepting, lets every in-flight
//! connection finish, then returns from [`Server::serve`].

use std::collections::HashMap;
use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::api;
use crate::config::ServerConfig;
use crate::dispatcher::Dispatcher;
use crate::envelope::Message;
use crate::error::Error;
use crate::handler::{self, BoxedEndpoint};
use crate::middleware::recovery::{Fault, Recovery, Reporter};
use crate::middleware::{BoxedMiddleware, Next};
use crate::proxy::TrustedProxies;
use crate::request::Request;
use crate::response::Response;
use crate::router::Router;
use crate::tls::TlsConfig;

/// Client-visible text when a request outlives [`Server::request_timeout`].
pub const TIMED_OUT: &str = "request timed out";

/// The HTTP server and its setup.
///
/// Every setup call happens before [`serve`](Server::serve).
///
/// ```rust,no_run
/// use tsu_rpc::{Dispatcher, Router, Server};
///
/// # async fn run() -> Result<(), tsu_rpc::Error> {
/// Server::bind("0.0.0.0:8080")?
///     .trusted_proxies(["10.0.0.0/8"])?
///     .error_reporter(|fault| eprintln!("{fault}"))
///     .serve(Router::new(), Dispatcher::new())
///     .await
/// # }
/// ```
pub struct Server {
    addr: SocketAddr,
    tls: Option<TlsConfig>,
    proxies: TrustedProxies,
    reporter: Option<Reporter>,
    timeout: Option<Duration>,
}

impl Server {
    /// Configures the address to listen on, e.g. `"0.0.0.0:8080"`.
    pub fn bind(addr: &str) -> Result<Self, Error> {
        let addr = addr.parse().map_err(|_| Error::InvalidAddress(addr.to_owned()))?;
        Ok(Self {
            addr,
            tls: None,
            proxies: TrustedProxies::default(),
            reporter: None,
            timeout: None,
        })
    }

    /// A server set up from [`ServerConfig`]: address, TLS, trusted proxies
    /// and request timeout.
    pub fn from_config(cfg: &ServerConfig) -> Result<Self, Error> {
        let mut server = Self::bind(&cfg.addr())?
            .tls(cfg.tls())?
            .trusted_proxies(&cfg.trusted_proxies)?;
        server.timeout = cfg.request_timeout();
        Ok(server)
    }

    /// Terminates TLS with the given certificate and key. A disabled config
    /// leaves the server on plain HTTP; an enabled one missing either path
    /// is rejected here. The files themselves are read when serving starts.
    pub fn tls(mut self, cfg: TlsConfig) -> Result<Self, Error> {
        cfg.validate()?;
        self.tls = cfg.enabled.then_some(cfg);
        Ok(self)
    }

    /// Believe `X-Forwarded-For` from these addresses or networks. An empty
    /// list trusts nobody, which is also the default.
    pub fn trusted_proxies<I, S>(mut self, entries: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.proxies = TrustedProxies::parse(entries)?;
        Ok(self)
    }

    /// Receives every contained panic and every error recorded on a response.
    pub fn error_reporter(mut self, reporter: impl Fn(&Fault) + Send + Sync + 'static) -> Self {
        self.reporter = Some(Arc::new(reporter));
        self
    }

    /// Answers 504 when a request takes longer than `timeout`.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Builds the request pipeline without listening.
    ///
    /// Adds `GET /ping` and `POST /api` to `router`.
    ///
    /// # Panics
    ///
    /// Panics if `router` already has routes for `/ping` or `/api`.
    pub fn app(&self, router: Router, dispatcher: Dispatcher) -> App {
        let dispatcher = Arc::new(dispatcher);
        let mut router = router
            .get(api::PING_PATH, api::ping)
            .post(api::API_PATH, move |req: Request| api::call(Arc::clone(&dispatcher), req));

        App {
            inner: Arc::new(AppInner {
                layers: router.take_layers(),
                router,
                not_found: handler::endpoint(api::not_found),
                recovery: Recovery::new(self.reporter.clone()),
                proxies: self.proxies.clone(),
                timeout: self.timeout,
            }),
        }
    }

    /// Binds, serves until SIGTERM or Ctrl-C, then drains.
    pub async fn serve(self, router: Router, dispatcher: Dispatcher) -> Result<(), Error> {
        let listener = TcpListener::bind(self.addr).await?;
        self.serve_with_shutdown(listener, router, dispatcher, shutdown_signal()).await
    }

    /// Serves on an already bound `listener` until `shutdown` resolves, then
    /// drains in-flight connections.
    pub async fn serve_with_shutdown(
        self,
        listener: TcpListener,
        router: Router,
        dispatcher: Dispatcher,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), Error> {
        let acceptor = self.tls.as_ref().map(TlsConfig::acceptor).transpose()?;
        let app = self.app(router, dispatcher);

        info!(addr = %listener.local_addr()?, tls = acceptor.is_some(), "tsu-rpc listening");

        let mut tasks = tokio::task::JoinSet::new();
        let (drain_tx, drain_rx) = watch::channel(false);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                // Shutdown first, so a signal stops accepting even with a
                // backlog of pending connections.
                biased;

                () = &mut shutdown => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    drain_tx.send_replace(true);
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

                    let app = app.clone();
                    let acceptor = acceptor.clone();
                    let drain = drain_rx.clone();
                    tasks.spawn(async move {
                        match acceptor {
                            Some(acceptor) => match acceptor.accept(stream).await {
                                Ok(tls) => serve_connection(TokioIo::new(tls), app, remote_addr, drain).await,
                                Err(e) => warn!(peer = %remote_addr, "tls handshake failed: {e}"),
                            },
                            None => serve_connection(TokioIo::new(stream), app, remote_addr, drain).await,
                        }
                    });
                }

                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        while tasks.join_next().await.is_some() {}

        info!("tsu-rpc stopped");
        Ok(())
    }
}

/// Serves one connection until the peer closes it or, once `drain` flips,
/// until its in-flight request is answered. Idle keep-alive connections
/// close right away on drain.
async fn serve_connection<I>(io: I, app: App, remote_addr: SocketAddr, mut drain: watch::Receiver<bool>)
where
    I: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
{
    // Called once per request on the connection.
    let svc = service_fn(move |req| {
        let app = app.clone();
        async move { Ok::<_, Infallible>(app.handle(req, remote_addr).await) }
    });

    let builder = ConnBuilder::new(TokioExecutor::new());
    let conn = builder.serve_connection(io, svc);
    tokio::pin!(conn);

    let mut draining = false;
    loop {
        tokio::select! {
            res = conn.as_mut() => {
                if let Err(e) = res {
                    error!(peer = %remote_addr, "connection error: {e}");
                }
                break;
            }
            _ = drain.wait_for(|on| *on), if !draining => {
                draining = true;
                conn.as_mut().graceful_shutdown();
            }
        }
    }
}

// ── Request pipeline ─────────────────────────────────────────────────────────

/// The complete request pipeline, cheap to clone.
///
/// [`Server`] drives one per listener. It can also be driven directly, which
/// is how the tests exercise it without a socket.
#[derive(Clone)]
pub struct App {
    inner: Arc<AppInner>,
}

struct AppInner {
    router: Router,
    layers: Arc<[BoxedMiddleware]>,
    not_found: BoxedEndpoint,
    recovery: Recovery,
    proxies: TrustedProxies,
    timeout: Option<Duration>,
}

impl App {
    /// Produces the response for one request from `remote_addr`.
    pub async fn handle<B>(&self, req: http::Request<B>, remote_addr: SocketAddr) -> http::Response<Full<Bytes>>
    where
        B: hyper::body::Body,
        B::Error: fmt::Display,
    {
        let inner = &self.inner;
        let (parts, body) = req.into_parts();
        let path = parts.uri.path().to_owned();

        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                let res = Response::builder()
                    .status(StatusCode::BAD_REQUEST)
                    .message(&Message::error("read body"))
                    .record_error(format!("read body from {remote_addr}: {e}"));
                return inner.recovery.contain(&path, std::future::ready(res)).await.into_inner();
            }
        };

        let mut req = Request::new(parts, body);
        req.client_ip = Some(inner.proxies.client_ip(remote_addr.ip(), req.header("x-forwarded-for")));
        req.templates = inner.router.templates().cloned();

        let (endpoint, params) = inner.router
            .lookup(&req.method, &req.path)
            .unwrap_or_else(|| (Arc::clone(&inner.not_found), HashMap::new()));
        req.params = params;

        let chain = Next::new(Arc::clone(&inner.layers), endpoint).run(req);
        let timeout = inner.timeout;
        let timed = async move {
            match timeout {
                Some(limit) => tokio::time::timeout(limit, chain)
                    .await
                    .unwrap_or_else(|_| timed_out(limit)),
                None => chain.await,
            }
        };

        inner.recovery.contain(&path, timed).await.into_inner()
    }
}

fn timed_out(limit: Duration) -> Response {
    Response::builder()
        .status(StatusCode::GATEWAY_TIMEOUT)
        .message(&Message::error(TIMED_OUT))
        .record_error(format!("request exceeded {limit:?}"))
}

// ── Shutdown signal ──────────────────────────────────────────────────────────

/// Resolves on the first SIGTERM or SIGINT (Ctrl-C). On Windows only Ctrl-C
/// is available. A signal that cannot be installed is logged and ignored.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
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

#[cfg(test)]
mod tests {
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::task::{Context, Poll};

    use super::*;

    #[test]
    fn bind_rejects_bad_addresses() {
        assert!(matches!(Server::bind("localhost"), Err(Error::InvalidAddress(_))));
        assert!(Server::bind("127.0.0.1:0").is_ok());
    }

    #[test]
    fn disabled_tls_is_a_no_op() {
        let server = Server::bind("127.0.0.1:0").unwrap().tls(TlsConfig::default()).unwrap();
        assert!(server.tls.is_none());
    }

    #[test]
    fn enabled_tls_without_paths_fails_setup() {
        let cfg = TlsConfig { enabled: true, ..Default::default() };
        assert!(Server::bind("127.0.0.1:0").unwrap().tls(cfg).is_err());
    }

    #[test]
    fn from_config_applies_every_setting() {
        let cfg = ServerConfig {
            host: "127.0.0.1".to_owned(),
            port: 0,
            request_timeout_secs: 3,
            trusted_proxies: vec!["10.0.0.0/8".to_owned()],
            ..Default::default()
        };
        let server = Server::from_config(&cfg).unwrap();
        assert_eq!(server.addr, "127.0.0.1:0".parse().unwrap());
        assert_eq!(server.timeout, Some(Duration::from_secs(3)));
        assert!(!server.proxies.is_empty());
        assert!(server.tls.is_none());
    }

    struct BrokenBody;

    impl hyper::body::Body for BrokenBody {
        type Data = Bytes;
        type Error = std::io::Error;

        fn poll_frame(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<Option<Result<hyper::body::Frame<Bytes>, Self::Error>>> {
            Poll::Ready(Some(Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "peer went away"))))
        }
    }

    #[tokio::test]
    async fn unreadable_bodies_are_400_and_reported() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let app = Server::bind("127.0.0.1:0")
            .unwrap()
            .error_reporter(move |fault: &Fault| sink.lock().unwrap().push(fault.clone()))
            .app(Router::new(), Dispatcher::new());

        let req = http::Request::post("/api").body(BrokenBody).unwrap();
        let res = app.handle(req, "127.0.0.1:9".parse().unwrap()).await;

        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].path(), "/api");
        assert!(seen[0].message().contains("peer went away"));
    }

    #[tokio::test]
    async fn slow_requests_time_out() {
        let router = Router::new().get("/slow", |_req: Request| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            "late"
        });
        let app = Server::bind("127.0.0.1:0")
            .unwrap()
            .request_timeout(Duration::from_millis(20))
            .app(router, Dispatcher::new());

        let req = http::Request::get("/slow").body(Full::new(Bytes::new())).unwrap();
        let res = app.handle(req, "127.0.0.1:9".parse().unwrap()).await;
        assert_eq!(res.status(), StatusCode::GATEWAY_TIMEOUT);
    }
}
