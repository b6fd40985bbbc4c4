//! Route declarations.
//!
//! A [`Route`] pairs an HTTP method and path with an axum handler taking the
//! host's shared state. Hosts list their routes by implementing
//! [`RouteHost`]; the webserver collects them when it is built.

use std::fmt;
use std::sync::Arc;
use axum::handler::Handler;
use axum::routing::{on, MethodFilter, MethodRouter};
use serde::{Serialize, Deserialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl RouteMethod {
    fn filter(self) -> MethodFilter {
        match self {
            RouteMethod::Get => MethodFilter::GET,
            RouteMethod::Post => MethodFilter::POST,
            RouteMethod::Put => MethodFilter::PUT,
            RouteMethod::Patch => MethodFilter::PATCH,
            RouteMethod::Delete => MethodFilter::DELETE,
        }
    }
}

impl fmt::Display for RouteMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RouteMethod::Get => "GET",
            RouteMethod::Post => "POST",
            RouteMethod::Put => "PUT",
            RouteMethod::Patch => "PATCH",
            RouteMethod::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// One handler bound to a method and path
pub struct Route<S> {
    pub(crate) method: RouteMethod,
    pub(crate) path: String,
    pub(crate) handler: MethodRouter<Arc<S>>,
}

impl<S> Route<S> {
    pub fn method(&self) -> RouteMethod {
        self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl<S> fmt::Debug for Route<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("path", &self.path)
            .finish()
    }
}

/// Declares a route. Handlers extract the host with `State<Arc<S>>`.
pub fn route<S, H, T>(method: RouteMethod, path: &str, handler: H) -> Route<S>
where
    S: Send + Sync + 'static,
    H: Handler<T, Arc<S>>,
    T: 'static,
{
    Route {
        method,
        path: path.to_string(),
        handler: on(method.filter(), handler),
    }
}

/// An object that serves its own routes
pub trait RouteHost: Send + Sync + Sized + 'static {
    fn routes() -> Vec<Route<Self>>;
}
