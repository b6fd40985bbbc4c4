//! # Route Host
//!
//! Lets a long-lived object serve a handful of HTTP endpoints next to its
//! main job. The object declares its routes with [`route`], a [`Webserver`]
//! registers them at construction, and a [`WebserverComponent`] starts and
//! stops the server with the object's own lifecycle.
//!
//! ```no_run
//! use std::sync::Arc;
//! use axum::extract::State;
//! use route_host::{route, Route, RouteHost, RouteMethod, Webserver, WebserverComponent, WebserverConfig};
//!
//! struct Stats { servers: u64 }
//!
//! async fn stats(State(stats): State<Arc<Stats>>) -> String {
//!     stats.servers.to_string()
//! }
//!
//! impl RouteHost for Stats {
//!     fn routes() -> Vec<Route<Self>> {
//!         vec![route(RouteMethod::Get, "/stats", stats)]
//!     }
//! }
//!
//! # async fn run() -> route_host::Result<()> {
//! let server = Webserver::for_host(Arc::new(Stats { servers: 1 }))?;
//! let component = WebserverComponent::new("Stats", WebserverConfig::with_port(8080), server)?;
//! component.load().await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod routes;
pub mod server;
pub mod component;

pub use error::{Result, RouteHostError};
pub use routes::{route, Route, RouteHost, RouteMethod};
pub use server::Webserver;
pub use component::{WebserverComponent, WebserverConfig};
