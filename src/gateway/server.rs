//! Fault-injecting server

use std::convert::Infallible;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::server::graceful::GracefulShutdown;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::task::JoinSet;
use tower::util::BoxCloneService;
use tower::{Layer, ServiceExt};
use tracing::{debug, info, warn};

use super::proxy::Upstream;
use super::router::{AppState, create_router};
use crate::config::Config;
use crate::error::{BoxError, is_aborted};
use crate::fault::{FaultLayer, RandomSource};
use crate::{Error, Result};

/// The fully assembled request pipeline: fault layers around the router
pub type Pipeline = BoxCloneService<Request<Incoming>, Response<Body>, BoxError>;

/// Pause after an accept error that is not tied to a single connection (e.g. EMFILE)
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Pipeline error as handed to hyper; [`is_aborted`] sees through it
#[derive(Debug, Error)]
#[error("{0}")]
struct ConnError(#[source] BoxError);

/// Fault-injecting HTTP server
pub struct FaultServer {
    /// Configuration
    config: Config,
    /// Fault layers, outermost first
    layers: Vec<FaultLayer>,
}

impl FaultServer {
    /// Create a server from validated configuration
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let source = config
            .seed
            .map_or_else(RandomSource::shared, |seed| Arc::new(RandomSource::seeded(seed)));

        let layers = config
            .faults
            .iter()
            .map(|f| {
                Ok(FaultLayer::new(f.to_fault()?, f.ratio).with_source(Arc::clone(&source)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { config, layers })
    }

    /// Fault layers, outermost first
    #[must_use]
    pub fn layers(&self) -> &[FaultLayer] {
        &self.layers
    }

    /// Build the pipeline: the downstream router wrapped in every fault layer
    pub fn pipeline(&self) -> Result<Pipeline> {
        let server = &self.config.server;
        let upstream = server
            .upstream
            .as_deref()
            .map(|url| Upstream::new(url, server.request_timeout, server.max_body_size))
            .transpose()?;

        let router = create_router(Arc::new(AppState { upstream }));
        let router = ServiceExt::<Request<Incoming>>::map_err(router, |e: Infallible| -> BoxError {
            match e {}
        });
        let mut pipeline: Pipeline = BoxCloneService::new(router);

        // Innermost first, so the first configured fault ends up outermost.
        for layer in self.layers.iter().rev() {
            pipeline = BoxCloneService::new(layer.layer(pipeline));
        }

        Ok(pipeline)
    }

    /// Bind the configured address and serve until Ctrl+C / SIGTERM
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let listener = TcpListener::bind(addr).await?;
        self.serve(listener, shutdown_signal()).await
    }

    /// Serve connections from `listener` until `shutdown` resolves.
    ///
    /// Each connection runs in its own task. A request that hits an abort
    /// fault tears down only its own connection.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let pipeline = self.pipeline()?;
        self.log_banner(listener.local_addr()?);

        let builder = auto::Builder::new(TokioExecutor::new());
        let graceful = GracefulShutdown::new();
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            handle_accept_error(&e).await;
                            continue;
                        }
                    };

                    let pipeline = pipeline.clone();
                    let service = service_fn(move |request: Request<Incoming>| {
                        let pipeline = pipeline.clone();
                        async move { pipeline.oneshot(request).await.map_err(ConnError) }
                    });
                    let conn = builder
                        .serve_connection(TokioIo::new(stream), service)
                        .into_owned();
                    let conn = graceful.watch(conn);

                    connections.spawn(async move {
                        if let Err(e) = conn.await {
                            if is_aborted(&*e) {
                                debug!(peer = %peer, "Connection aborted by fault injection");
                            } else {
                                warn!(peer = %peer, error = %e, "Connection error");
                            }
                        }
                    });
                }
                () = &mut shutdown => break,
            }

            // Reap finished connection tasks
            while connections.try_join_next().is_some() {}
        }

        // Idle keep-alive connections close at once; busy ones finish their
        // in-flight request first.
        info!(
            connections = connections.len(),
            "Stopped accepting, draining connections"
        );
        let drained =
            tokio::time::timeout(self.config.server.shutdown_timeout, graceful.shutdown()).await;

        if drained.is_err() {
            warn!(
                remaining = connections.len(),
                "Shutdown timeout elapsed, closing remaining connections"
            );
            connections.abort_all();
        }
        while connections.join_next().await.is_some() {}

        Ok(())
    }

    fn log_banner(&self, addr: SocketAddr) {
        info!("============================================================");
        info!("FAULT INJECTOR v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(address = %addr, "Listening");

        match &self.config.server.upstream {
            Some(upstream) => info!(upstream = %upstream, "Proxying to upstream"),
            None => info!("No upstream configured, echoing requests"),
        }

        if self.config.seed.is_some() {
            info!(seed = ?self.config.seed, "Fault decisions are seeded");
        }

        if self.layers.is_empty() {
            warn!("No faults configured - requests pass through untouched");
        } else {
            info!("Fault stack (outermost first):");
            for (i, layer) in self.layers.iter().enumerate() {
                info!("  {}. {} ratio={}", i + 1, layer.fault(), layer.ratio());
            }
        }
        info!("============================================================");
    }
}

/// Log an accept error, backing off unless it only concerns one connection
async fn handle_accept_error(e: &io::Error) {
    if is_connection_error(e) {
        debug!(error = %e, "Connection failed during accept");
        return;
    }
    warn!(error = %e, "Failed to accept connection");
    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
}

fn is_connection_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
    )
}

/// Shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::Fault;

    #[test]
    fn test_layers_follow_config_order() {
        let config = Config::from_yaml_str(
            "seed: 1\nfaults:\n  - kind: delay\n    ratio: 0.5\n    duration: 10ms\n  - kind: abort\n    ratio: 0.25\n",
        )
        .unwrap();
        let server = FaultServer::new(config).unwrap();

        let layers = server.layers();
        assert_eq!(layers.len(), 2);
        assert_eq!(layers[0].fault(), &Fault::delay(std::time::Duration::from_millis(10)));
        assert_eq!(layers[1].fault(), &Fault::abort());
        assert_eq!(layers[1].ratio(), 0.25);
    }

    #[tokio::test]
    async fn test_accept_error_backoff() {
        let start = std::time::Instant::now();
        handle_accept_error(&io::Error::from(io::ErrorKind::ConnectionReset)).await;
        assert!(start.elapsed() < ACCEPT_ERROR_BACKOFF);

        let start = std::time::Instant::now();
        handle_accept_error(&io::Error::other("too many open files")).await;
        assert!(start.elapsed() >= ACCEPT_ERROR_BACKOFF);
    }

    #[test]
    fn test_conn_error_keeps_abort_visible() {
        let err: BoxError = Box::new(ConnError(Box::new(crate::Aborted)));
        assert!(is_aborted(&*err));
        let err: BoxError = Box::new(ConnError("reset".into()));
        assert!(!is_aborted(&*err));
    }

    #[test]
    fn test_bad_upstream_fails_pipeline() {
        let mut config = Config::default();
        config.server.upstream = Some("localhost:8080".to_string());
        let server = FaultServer::new(config).unwrap();
        assert!(server.pipeline().is_err());
    }
}
