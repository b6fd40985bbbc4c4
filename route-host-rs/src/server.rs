//! Embedded HTTP server.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use axum::routing::MethodRouter;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use crate::error::{Result, RouteHostError};
use crate::routes::{Route, RouteHost, RouteMethod};

struct Running {
    addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<std::io::Result<()>>,
}

/// Serves a fixed set of routes, started and stopped on demand
pub struct Webserver {
    name: &'static str,
    router: Router,
    routes: Vec<(RouteMethod, String)>,
    running: Mutex<Option<Running>>,
}

impl Webserver {
    /// Registers `routes` against `state`.
    ///
    /// Routes sharing a path are merged; the same method and path twice is
    /// an error.
    pub fn new<S>(state: Arc<S>, routes: Vec<Route<S>>) -> Result<Self>
    where
        S: Send + Sync + 'static,
    {
        let mut seen = HashSet::new();
        let mut by_path: Vec<(String, MethodRouter<Arc<S>>)> = Vec::new();
        let mut registered = Vec::with_capacity(routes.len());

        for route in routes {
            if !route.path.starts_with('/') {
                return Err(RouteHostError::InvalidPath(route.path));
            }
            if !seen.insert((route.method, route.path.clone())) {
                return Err(RouteHostError::DuplicateRoute {
                    method: route.method.to_string(),
                    path: route.path,
                });
            }
            registered.push((route.method, route.path.clone()));

            match by_path.iter().position(|(path, _)| *path == route.path) {
                Some(i) => {
                    let (path, existing) = by_path.remove(i);
                    by_path.insert(i, (path, existing.merge(route.handler)));
                }
                None => by_path.push((route.path, route.handler)),
            }
        }

        let router = by_path
            .into_iter()
            .fold(Router::new(), |router, (path, handler)| router.route(&path, handler))
            .with_state(state);

        Ok(Self {
            name: std::any::type_name::<S>(),
            router,
            routes: registered,
            running: Mutex::new(None),
        })
    }

    /// Builds a server from the routes `host` declares
    pub fn for_host<H: RouteHost>(host: Arc<H>) -> Result<Self> {
        Self::new(host, H::routes())
    }

    /// Registered method and path pairs, in declaration order
    pub fn routes(&self) -> &[(RouteMethod, String)] {
        &self.routes
    }

    /// Binds `host:port` and serves in the background.
    ///
    /// Port 0 picks a free port; the bound address is returned.
    pub async fn start(&self, host: &str, port: u16) -> Result<SocketAddr> {
        let mut running = self.running.lock().await;
        if let Some(current) = running.as_ref() {
            return Err(RouteHostError::AlreadyRunning(current.addr));
        }

        debug!(server = self.name, host, port, "Starting webserver");
        let bind_error = |source| RouteHostError::Bind { addr: format!("{}:{}", host, port), source };
        let listener = TcpListener::bind((host, port)).await.map_err(bind_error)?;
        let addr = listener.local_addr().map_err(bind_error)?;

        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        let router = self.router.clone();
        let task = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move { signal.cancelled().await })
                .await
        });

        info!(server = self.name, %addr, routes = self.routes.len(), "Webserver listening");
        *running = Some(Running { addr, shutdown, task });
        Ok(addr)
    }

    /// Address the server is bound to while running
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|r| r.addr)
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Stops the server and waits for in-flight requests. No-op when idle.
    pub async fn close(&self) -> Result<()> {
        let Some(running) = self.running.lock().await.take() else {
            return Ok(());
        };

        debug!(server = self.name, addr = %running.addr, "Closing webserver");
        running.shutdown.cancel();

        match running.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                error!(server = self.name, error = %e, "Webserver exited with an error");
                Err(RouteHostError::Task(e.to_string()))
            }
            Err(e) => Err(RouteHostError::Task(e.to_string())),
        }
    }
}
