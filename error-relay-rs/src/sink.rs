//! # Webhook Sink
//!
//! The transport half of delivery. [`ErrorSink`] is the seam the scheduler
//! calls; [`WebhookSink`] posts rendered reports to a chat webhook.

use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use serde::{Serialize, Deserialize};
use tokio::sync::OnceCell;
use tracing::{debug, info};
use url::Url;
use crate::aggregator::FailureSignature;
use crate::context::ContextPacket;
use crate::formatter::{render_report, EntityResolver, FormatSettings, WebhookMessage};
use crate::logging::log_failure;
use crate::sanitization::redact_webhook_token;
use crate::settings::RelayConfig;
use crate::types::{Error, ErrorKind, Result};

/// Destination of released failures
#[async_trait]
pub trait ErrorSink: Send + Sync {
    /// Delivers one occurrence of `signature`. Errors are not retried.
    async fn send(&self, signature: &FailureSignature, packet: &ContextPacket) -> Result<()>;
}

/// A webhook known only by its URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookHandle {
    base: String,
    id: String,
    token: String,
}

impl WebhookHandle {
    /// Parses `{base}/webhooks/{id}/{token}`
    pub fn parse(webhook_url: &str) -> Result<Self> {
        let url = Url::parse(webhook_url).map_err(|e| {
            Error::configuration(format!("invalid webhook URL: {}", e))
                .context("url", redact_webhook_token(webhook_url))
        })?;

        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();

        let position = segments.iter().position(|s| *s == "webhooks");
        let (id, token) = match position.map(|i| (segments.get(i + 1), segments.get(i + 2))) {
            Some((Some(id), Some(token))) if id.chars().all(|c| c.is_ascii_digit()) => (*id, *token),
            _ => {
                return Err(Error::configuration("webhook URL must look like .../webhooks/{id}/{token}")
                    .context("url", redact_webhook_token(webhook_url)))
            }
        };

        let prefix = segments[..position.unwrap_or(0)].join("/");
        let origin = url.origin().ascii_serialization();
        let base = if prefix.is_empty() { origin } else { format!("{}/{}", origin, prefix) };

        Ok(Self { base, id: id.to_string(), token: token.to_string() })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// URL of the webhook resource, with the token
    pub fn url(&self) -> String {
        format!("{}/webhooks/{}/{}", self.base, self.id, self.token)
    }
}

/// The webhook record the platform returns once the handle is resolved
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolvedWebhook {
    pub id: String,
    pub name: Option<String>,
    pub channel_id: Option<String>,
    pub guild_id: Option<String>,
}

/// Posts rendered reports to a chat webhook
pub struct WebhookSink {
    client: reqwest::Client,
    handle: WebhookHandle,
    resolved: OnceCell<ResolvedWebhook>,
    resolver: Arc<dyn EntityResolver>,
    settings: FormatSettings,
}

impl WebhookSink {
    pub fn new(config: &RelayConfig, resolver: Arc<dyn EntityResolver>) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")));
        if let Some(secs) = config.http_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder.build().map_err(|e| {
            Error::new(ErrorKind::Initialization, format!("Failed to create HTTP client: {}", e)).cause(e)
        })?;

        Ok(Self {
            client,
            handle: WebhookHandle::parse(&config.webhook_url)?,
            resolved: OnceCell::new(),
            resolver,
            settings: config.format_settings(),
        })
    }

    /// Fetches the full webhook record on first use; cached afterwards
    pub async fn resolve(&self) -> Result<&ResolvedWebhook> {
        self.resolved
            .get_or_try_init(|| async {
                debug!(webhook_id = %self.handle.id(), "Resolving partial webhook");
                let resolved: ResolvedWebhook = self
                    .client
                    .get(self.handle.url())
                    .send()
                    .await?
                    .error_for_status()?
                    .json()
                    .await?;
                info!(
                    webhook_id = %resolved.id,
                    name = ?resolved.name,
                    channel_id = ?resolved.channel_id,
                    "Webhook resolved"
                );
                Ok::<_, Error>(resolved)
            })
            .await
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.initialized()
    }

    async fn execute(&self, message: &WebhookMessage) -> Result<()> {
        self.client
            .post(self.handle.url())
            .query(&[("wait", "true")])
            .json(message)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl ErrorSink for WebhookSink {
    async fn send(&self, signature: &FailureSignature, packet: &ContextPacket) -> Result<()> {
        log_failure(signature, packet);

        self.resolve().await?;

        let messages = render_report(signature, packet, self.resolver.as_ref(), &self.settings);
        debug!(packet_id = %packet.id, messages = messages.len(), "Sending error report");

        for message in &messages {
            self.execute(message).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use wiremock::{Mock, MockServer, ResponseTemplate};
    use wiremock::matchers::{method, path, query_param};
    use crate::context::{extract, CommandContext, CommandRef, OriginContext};
    use crate::failure::Failure;
    use crate::formatter::NoopResolver;

    async fn mock_webhook(server: &MockServer, executions: u64) {
        Mock::given(method("GET"))
            .and(path("/api/webhooks/123/tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "123",
                "name": "errors",
                "channel_id": "555",
                "guild_id": "777",
                "token": "tok"
            })))
            .expect(1)
            .mount(server)
            .await;

        Mock::given(method("POST"))
            .and(path("/api/webhooks/123/tok"))
            .and(query_param("wait", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "1" })))
            .expect(executions)
            .mount(server)
            .await;
    }

    fn sink_for(server: &MockServer) -> WebhookSink {
        let config = RelayConfig::new(format!("{}/api/webhooks/123/tok", server.uri()));
        WebhookSink::new(&config, Arc::new(NoopResolver::default())).unwrap()
    }

    fn packet_with_guild(guild_id: u64) -> ContextPacket {
        let ctx = OriginContext::Command(CommandContext {
            author_id: 1,
            guild_id: Some(guild_id),
            channel_id: 2,
            command: Some(CommandRef::new("ping")),
            message_created_at: None,
        });
        extract(Failure::message("RuntimeError", "pong failed"), Some(&ctx), Utc::now())
    }

    #[test]
    fn test_parse_handle() {
        let handle = WebhookHandle::parse("https://discord.com/api/webhooks/123456/s3cr3t-token").unwrap();
        assert_eq!(handle.id(), "123456");
        assert_eq!(handle.url(), "https://discord.com/api/webhooks/123456/s3cr3t-token");

        let bare = WebhookHandle::parse("http://127.0.0.1:8080/webhooks/9/t").unwrap();
        assert_eq!(bare.url(), "http://127.0.0.1:8080/webhooks/9/t");
    }

    #[test]
    fn test_parse_rejects_malformed_urls() {
        for url in ["not a url", "https://discord.com/api/channels/1", "https://discord.com/api/webhooks/abc/t"] {
            let err = WebhookHandle::parse(url).unwrap_err();
            assert_eq!(err.kind, ErrorKind::Configuration, "{}", url);
            assert!(err.message.is_ascii(), "{}", err.message);
        }
    }

    #[tokio::test]
    async fn test_send_resolves_once_and_posts_report() {
        let server = MockServer::start().await;
        mock_webhook(&server, 2).await;
        let sink = sink_for(&server);
        let sig = FailureSignature::from_normalized("RuntimeError: pong failed\n");

        assert!(!sink.is_resolved());
        sink.send(&sig, &packet_with_guild(777)).await.unwrap();
        sink.send(&sig, &packet_with_guild(777)).await.unwrap();
        assert!(sink.is_resolved());
        assert_eq!(sink.resolve().await.unwrap().name.as_deref(), Some("errors"));
    }

    #[tokio::test]
    async fn test_unknown_guild_still_delivers_without_guild_line() {
        let server = MockServer::start().await;
        mock_webhook(&server, 1).await;
        let sink = sink_for(&server);
        let sig = FailureSignature::from_normalized("RuntimeError: pong failed\n");

        sink.send(&sig, &packet_with_guild(424242)).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let post = requests.iter().find(|r| r.method.to_string() == "POST").unwrap();
        let body: WebhookMessage = serde_json::from_slice(&post.body).unwrap();
        let metadata = &body.embeds[0].fields[0].value;

        assert!(!metadata.contains("**Guild**"));
        assert!(metadata.contains("**Command**: ping"));
        assert_eq!(body.embeds[0].description.as_deref(), Some("```rs\nRuntimeError: pong failed\n```"));
        assert!(body.content.is_none());
    }

    #[tokio::test]
    async fn test_long_trace_is_split_across_calls() {
        let server = MockServer::start().await;
        // 1 primary + 12 overflow chunks -> 3 execute calls
        mock_webhook(&server, 3).await;
        let sink = sink_for(&server);
        let sig = FailureSignature::from_normalized("z".repeat(13 * 1991));

        sink.send(&sig, &packet_with_guild(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_rate_limited_response_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "123" })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({ "retry_after": 1.5 })))
            .mount(&server)
            .await;
        let sink = sink_for(&server);

        let err = sink
            .send(&FailureSignature::from_normalized("E: x\n"), &packet_with_guild(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::RateLimited);
    }

    #[tokio::test]
    async fn test_resolution_failure_propagates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let sink = sink_for(&server);

        let err = sink
            .send(&FailureSignature::from_normalized("E: x\n"), &packet_with_guild(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Sink);
        assert!(!sink.is_resolved());
    }

    #[tokio::test]
    async fn test_failed_request_does_not_leak_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let config = RelayConfig::new(format!("{}/api/webhooks/123/SUPERSECRETTOKEN", server.uri()));
        let sink = WebhookSink::new(&config, Arc::new(NoopResolver::default())).unwrap();

        let err = sink
            .send(&FailureSignature::from_normalized("E: x\n"), &packet_with_guild(1))
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::Sink);
        assert!(!err.to_string().contains("SUPERSECRETTOKEN"), "{}", err);
        assert!(!format!("{:?}", err).contains("SUPERSECRETTOKEN"));
        let source = std::error::Error::source(&err).map(|s| s.to_string()).unwrap_or_default();
        assert!(!source.contains("SUPERSECRETTOKEN"), "{}", source);
    }
}
