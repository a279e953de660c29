//! HTTP server setup and the connection event dispatcher.
//!
//! # Responsibilities
//! - Bind the local listener (optionally TLS) and the tunnel endpoint
//! - Own the server context threaded through every handler
//! - Serve each accepted connection and route requests: registered
//!   endpoints first, then static files or a 404 fallback
//! - Act on deferred restarts when a connection reaches the closed state

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Router};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use tokio::net::TcpStream;
use tokio_rustls::TlsAcceptor;
use tower::ServiceExt;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use url::Url;

use crate::config::acl::glob_match;
use crate::config::schema::RoVars;
use crate::config::{ConfigStore, DeviceConfig};
use crate::http::registry::EndpointRegistry;
use crate::lifecycle::connectivity::ConnectivityMonitor;
use crate::lifecycle::gate::ReconnectGate;
use crate::lifecycle::restart::{RestartCoordinator, SystemRestart};
use crate::net::connection::ConnectionTracker;
use crate::net::listener::{ConnectionPermit, Listener, ListenerError};
use crate::net::tls::{self, TlsError};
use crate::net::tunnel::{self, TunnelClient, TunnelError};

/// Error type for server bootstrap.
///
/// A local bind failure and a tunnel bind failure are distinct values; each
/// aborts startup only because the corresponding listener would be
/// inoperative.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error(transparent)]
    Tunnel(#[from] TunnelError),
}

/// Explicitly-owned server state, threaded through every handler.
pub struct ServerContext {
    /// The live, in-memory effective configuration.
    pub config: Arc<DeviceConfig>,

    /// Persisted-configuration collaborator.
    pub store: ConfigStore,

    /// Deferred restart coordinator.
    pub restart: RestartCoordinator,

    started_at: Instant,
}

pub type Ctx = Arc<ServerContext>;

impl ServerContext {
    pub fn new(
        config: DeviceConfig,
        store: ConfigStore,
        restarter: Arc<dyn SystemRestart>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            store,
            restart: RestartCoordinator::new(restarter),
            started_at: Instant::now(),
        }
    }

    /// Read-only diagnostic variables.
    pub fn ro_vars(&self) -> RoVars {
        RoVars {
            fw_version: env!("CARGO_PKG_VERSION"),
            fw_id: option_env!("DEVICE_CONSOLE_BUILD_ID")
                .unwrap_or("local")
                .to_string(),
            arch: std::env::consts::ARCH,
            device_id: self.config.device.id.clone(),
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }
}

struct LocalSurface {
    listener: Listener,
    tls: Option<TlsAcceptor>,
}

struct TunnelSurface {
    url: Url,
    gate: Arc<ReconnectGate>,
    gate_task: Option<tokio::task::JoinHandle<()>>,
}

/// The management server: both listener surfaces plus the endpoint registry.
pub struct ManagementServer {
    ctx: Ctx,
    registry: EndpointRegistry<Ctx>,
    local: LocalSurface,
    tunnel: Option<TunnelSurface>,
    tracker: ConnectionTracker,
}

impl ManagementServer {
    /// Read the bind configuration and bring up the listener surfaces.
    ///
    /// Returns `Ok(None)` when the server is disabled by configuration;
    /// a missing listen address is not an error. Endpoints must be
    /// registered after this call, before [`run`](Self::run).
    pub async fn bind(
        config: DeviceConfig,
        store: ConfigStore,
        restarter: Arc<dyn SystemRestart>,
        monitor: Option<&ConnectivityMonitor>,
    ) -> Result<Option<Self>, ServerError> {
        if !config.http.enable {
            tracing::info!("HTTP server disabled");
            return Ok(None);
        }
        let Some(listen_addr) = config.http.listen_addr.clone().filter(|a| !a.is_empty()) else {
            tracing::warn!("HTTP server disabled, listening address is empty");
            return Ok(None);
        };

        let listener = Listener::bind(&listen_addr, config.http.max_connections)
            .await
            .map_err(|err| {
                tracing::error!(addr = %listen_addr, error = %err, "Error binding local listener");
                err
            })?;
        let tls_acceptor = match &config.http.tls {
            Some(tls_cfg) => Some(tls::build_acceptor(tls_cfg).map_err(|err| {
                tracing::error!(error = %err, "TLS setup failed");
                err
            })?),
            None => None,
        };
        tracing::info!(
            addr = %listen_addr,
            tls = tls_acceptor.is_some(),
            "HTTP server started"
        );

        let mut registry = EndpointRegistry::new();
        registry.add_surface("local");

        let tunnel = if config.http.tunnel.enable {
            if config.tunnel_credentials_present() {
                let url = tunnel::tunnel_address(&config.device, &config.http.tunnel.addr)
                    .map_err(|err| {
                        tracing::error!(error = %err, "Error binding tunnel listener");
                        err
                    })?;
                let (gate, gate_task) = match monitor {
                    Some(monitor) => {
                        // WiFi is not ready yet; keep the tunnel from
                        // redialing until the connectivity manager reports
                        // an acquired IP.
                        let gate = Arc::new(ReconnectGate::suppressed());
                        let task = ReconnectGate::drive(gate.clone(), monitor.subscribe());
                        (gate, Some(task))
                    }
                    None => (Arc::new(ReconnectGate::open()), None),
                };
                registry.add_surface("tunnel");
                tracing::info!(
                    relay = url.host_str().unwrap_or("?"),
                    "Tunneled HTTP server started"
                );
                Some(TunnelSurface {
                    url,
                    gate,
                    gate_task,
                })
            } else {
                tracing::warn!("Tunnel enabled but device id/password are not set");
                None
            }
        } else {
            None
        };

        let ctx = Arc::new(ServerContext::new(config, store, restarter));

        Ok(Some(Self {
            ctx,
            registry,
            local: LocalSurface {
                listener,
                tls: tls_acceptor,
            },
            tunnel,
            tracker: ConnectionTracker::new(),
        }))
    }

    /// The endpoint registry, for registrations between bind and run.
    pub fn registry(&mut self) -> &mut EndpointRegistry<Ctx> {
        &mut self.registry
    }

    /// Shared server context.
    pub fn context(&self) -> Ctx {
        self.ctx.clone()
    }

    /// Local address the listener is bound to.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local.listener.local_addr().ok()
    }

    /// Run the server until a shutdown signal arrives.
    pub async fn run(self) -> Result<(), ServerError> {
        let Self {
            ctx,
            registry,
            local,
            tunnel,
            tracker,
        } = self;
        let mut routers: HashMap<&'static str, Router<Ctx>> =
            registry.finalize().into_iter().collect();

        let mut tunnel_task = None;
        let mut gate_task = None;
        if let Some(surface) = tunnel {
            let router = finish_router(routers.remove("tunnel").unwrap_or_default(), &ctx);
            let client = TunnelClient::new(
                surface.url,
                router,
                surface.gate,
                ctx.restart.clone(),
                tracker.clone(),
                ctx.config.http.tunnel.reconnect_base_ms,
                ctx.config.http.tunnel.reconnect_max_ms,
            );
            tunnel_task = Some(tokio::spawn(client.run()));
            gate_task = surface.gate_task;
        }

        let local_router = finish_router(routers.remove("local").unwrap_or_default(), &ctx);
        let LocalSurface { listener, tls } = local;

        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer, permit)) => serve_connection(
                            stream,
                            peer,
                            permit,
                            local_router.clone(),
                            tls.clone(),
                            ctx.restart.clone(),
                            &tracker,
                        ),
                        Err(err) => {
                            tracing::error!(error = %err, "Accept failed");
                        }
                    }
                }
                _ = &mut shutdown => break,
            }
        }

        if let Some(task) = tunnel_task {
            task.abort();
        }
        if let Some(task) = gate_task {
            task.abort();
        }
        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Attach the fallback and tracing to a surface router and freeze it.
fn finish_router(router: Router<Ctx>, ctx: &Ctx) -> Router {
    router
        .fallback(fallback_handler)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx.clone())
}

/// Serve one accepted connection on its own task.
///
/// When the serve future completes, the transport has taken every queued
/// response byte for this connection. Only then is a deferred restart
/// allowed to fire.
fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    permit: ConnectionPermit,
    router: Router,
    tls: Option<TlsAcceptor>,
    restart: RestartCoordinator,
    tracker: &ConnectionTracker,
) {
    let conn = tracker.track();
    tracing::info!(conn = %conn.id(), peer = %peer, "HTTP connection accepted");

    tokio::spawn(async move {
        let router = router.layer(Extension(conn.id()));
        let service = hyper::service::service_fn(
            move |request: hyper::Request<hyper::body::Incoming>| {
                router.clone().oneshot(request.map(Body::new))
            },
        );

        match tls {
            Some(acceptor) => match acceptor.accept(stream).await {
                Ok(tls_stream) => {
                    if let Err(err) = auto::Builder::new(TokioExecutor::new())
                        .serve_connection_with_upgrades(TokioIo::new(tls_stream), service)
                        .await
                    {
                        tracing::debug!(conn = %conn.id(), error = %err, "Connection error");
                    }
                }
                Err(err) => {
                    tracing::debug!(conn = %conn.id(), error = %err, "TLS handshake failed");
                }
            },
            None => {
                if let Err(err) = auto::Builder::new(TokioExecutor::new())
                    .serve_connection_with_upgrades(TokioIo::new(stream), service)
                    .await
                {
                    tracing::debug!(conn = %conn.id(), error = %err, "Connection error");
                }
            }
        }

        drop(permit);
        restart.on_connection_closed(conn.id());
    });
}

/// Fallback for requests no registered endpoint matched: static files when a
/// document root is configured, 404 otherwise. The file server manages its
/// own close semantics, so no connection-close header is forced here.
async fn fallback_handler(State(ctx): State<Ctx>, request: Request) -> Response {
    let path = request.uri().path().to_string();
    let Some(root) = ctx.config.http.document_root.clone() else {
        return (StatusCode::NOT_FOUND, "Not Found").into_response();
    };
    // The file server only answers reads; anything else (including multipart
    // posts with no matching registration) is a 404.
    if request.method() != axum::http::Method::GET && request.method() != axum::http::Method::HEAD {
        return (StatusCode::NOT_FOUND, "Not Found").into_response();
    }

    if let Some(pattern) = &ctx.config.http.hidden_files {
        let name = path.rsplit('/').next().unwrap_or("");
        if glob_match(pattern, name) || glob_match(pattern, path.trim_start_matches('/')) {
            tracing::debug!(%path, "Hidden path requested");
            return (StatusCode::NOT_FOUND, "Not Found").into_response();
        }
    }

    match ServeDir::new(&root).oneshot(request).await {
        Ok(response) => response.map(Body::new).into_response(),
        Err(err) => match err {},
    }
}

/// Wait for shutdown signal (Ctrl+C).
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct NoopRestart;

    impl SystemRestart for NoopRestart {
        fn restart(&self, _delay: Duration) {}
    }

    fn test_ctx(config: DeviceConfig, dir: &std::path::Path) -> Ctx {
        Arc::new(ServerContext::new(
            config,
            ConfigStore::new(dir.join("conf.json")),
            Arc::new(NoopRestart),
        ))
    }

    async fn fetch(router: Router, uri: &str) -> (StatusCode, String) {
        let response = router
            .oneshot(
                axum::http::Request::builder()
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        (status, String::from_utf8_lossy(&body).into_owned())
    }

    #[tokio::test]
    async fn fallback_is_404_without_document_root() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_ctx(DeviceConfig::default(), dir.path());
        let router = finish_router(Router::new(), &ctx);

        let (status, _) = fetch(router, "/anything").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn fallback_serves_files_from_document_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.txt"), "hello device").unwrap();

        let mut config = DeviceConfig::default();
        config.http.document_root = Some(dir.path().display().to_string());
        let ctx = test_ctx(config, dir.path());
        let router = finish_router(Router::new(), &ctx);

        let (status, body) = fetch(router, "/index.txt").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "hello device");
    }

    #[tokio::test]
    async fn hidden_files_are_not_served() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("secrets.key"), "sssh").unwrap();

        let mut config = DeviceConfig::default();
        config.http.document_root = Some(dir.path().display().to_string());
        config.http.hidden_files = Some("*.key".to_string());
        let ctx = test_ctx(config, dir.path());
        let router = finish_router(Router::new(), &ctx);

        let (status, _) = fetch(router, "/secrets.key").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn ro_vars_reports_device_identity() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = DeviceConfig::default();
        config.device.id = "dev9".into();
        let ctx = test_ctx(config, dir.path());

        let vars = ctx.ro_vars();
        assert_eq!(vars.device_id, "dev9");
        assert_eq!(vars.fw_version, env!("CARGO_PKG_VERSION"));
    }
}
