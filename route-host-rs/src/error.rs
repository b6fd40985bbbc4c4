use std::net::SocketAddr;
use thiserror::Error;

pub type Result<T, E = RouteHostError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum RouteHostError {
    /// Auto-start was requested without a port; carries a usage hint
    #[error("{0}")]
    MissingPort(String),

    #[error("route path {0:?} must start with '/'")]
    InvalidPath(String),

    #[error("route {method} {path} is registered more than once")]
    DuplicateRoute { method: String, path: String },

    #[error("webserver is already running on {0}")]
    AlreadyRunning(SocketAddr),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("webserver task failed: {0}")]
    Task(String),
}
