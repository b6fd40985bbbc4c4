//! Lifecycle glue: a webserver that starts when its owner loads and stops
//! when it unloads.

use std::net::SocketAddr;
use serde::{Serialize, Deserialize};
use tracing::debug;
use crate::error::{Result, RouteHostError};
use crate::server::Webserver;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebserverConfig {
    pub host: String,
    /// Required when `auto_start` is set
    pub port: Option<u16>,
    /// Start the server on [`WebserverComponent::load`]
    pub auto_start: bool,
}

impl Default for WebserverConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: None,
            auto_start: true,
        }
    }
}

impl WebserverConfig {
    pub fn with_port(port: u16) -> Self {
        Self { port: Some(port), ..Self::default() }
    }

    /// Rejects `auto_start` without a port, with a hint on how to fix it
    pub fn validate(&self, name: &str) -> Result<()> {
        if self.auto_start && self.port.is_none() {
            return Err(RouteHostError::MissingPort(format!(
                "A port must be provided when auto_start is enabled for {name}. Either:\n\
                 \n    WebserverConfig {{ port: Some(8080), ..Default::default() }}\n\
                 \nor disable auto_start and call `server().start(host, port)` yourself:\n\
                 \n    WebserverConfig {{ auto_start: false, ..Default::default() }}\n"
            )));
        }
        Ok(())
    }
}

/// A [`Webserver`] bound to its owner's load/unload lifecycle
pub struct WebserverComponent {
    name: String,
    config: WebserverConfig,
    server: Webserver,
}

impl WebserverComponent {
    pub fn new<N: Into<String>>(name: N, config: WebserverConfig, server: Webserver) -> Result<Self> {
        let name = name.into();
        config.validate(&name)?;
        Ok(Self { name, config, server })
    }

    /// Starts the server if `auto_start` is set; returns the bound address
    pub async fn load(&self) -> Result<Option<SocketAddr>> {
        if !self.config.auto_start {
            debug!(component = %self.name, "auto_start disabled; not starting webserver");
            return Ok(None);
        }
        // validated in `new`
        let port = self.config.port.unwrap_or_default();
        self.server.start(&self.config.host, port).await.map(Some)
    }

    pub async fn unload(&self) -> Result<()> {
        self.server.close().await
    }

    pub fn config(&self) -> &WebserverConfig {
        &self.config
    }

    pub fn server(&self) -> &Webserver {
        &self.server
    }
}
