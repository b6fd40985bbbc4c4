//! # Error Relay
//!
//! [`ErrorRelay`] ties the pipeline together: a failure is turned into a
//! context packet, recorded under its signature, then handed to the
//! delivery scheduler.

use std::error::Error as StdError;
use std::sync::Arc;
use tracing::info;
use crate::aggregator::{ErrorStore, FailureSignature};
use crate::clock::Clock;
use crate::context::{extract, OriginContext};
use crate::failure::Failure;
use crate::formatter::EntityResolver;
use crate::scheduler::DeliveryScheduler;
use crate::settings::RelayConfig;
use crate::sink::{ErrorSink, WebhookSink};
use crate::types::Result;

/// Records failures and relays them to a sink at a bounded rate
pub struct ErrorRelay {
    config: RelayConfig,
    store: ErrorStore,
    scheduler: DeliveryScheduler,
    sink: Arc<dyn ErrorSink>,
    clock: Clock,
}

impl ErrorRelay {
    /// Builds a relay that delivers to the configured webhook
    pub fn new(config: RelayConfig, resolver: Arc<dyn EntityResolver>) -> Result<Self> {
        config.validate()?;
        let sink = Arc::new(WebhookSink::new(&config, resolver)?);
        Ok(Self::with_sink(config, sink))
    }

    /// Builds a relay around an arbitrary sink
    pub fn with_sink(config: RelayConfig, sink: Arc<dyn ErrorSink>) -> Self {
        let clock = Clock::new();
        Self {
            scheduler: DeliveryScheduler::new(config.cooldown(), clock),
            store: ErrorStore::new(),
            config,
            sink,
            clock,
        }
    }

    /// Records `failure` and submits it for delivery.
    ///
    /// The occurrence is recorded before delivery starts, so it is kept even
    /// when the sink fails. Sink errors are returned to the caller.
    pub async fn record_and_submit(&self, failure: Failure, origin: Option<OriginContext>) -> Result<()> {
        info!(error = %failure, "Adding error to log");

        let packet = Arc::new(extract(failure, origin.as_ref(), self.clock.now()));
        let signature = FailureSignature::of(&packet.failure);

        self.store.record(signature.clone(), Arc::clone(&packet));
        self.scheduler.submit(&signature, &packet, self.sink.as_ref()).await
    }

    pub async fn report_error<E>(&self, error: E, origin: Option<OriginContext>) -> Result<()>
    where
        E: StdError + Send + Sync + 'static,
    {
        self.record_and_submit(Failure::new(error), origin).await
    }

    pub async fn report_anyhow(&self, error: anyhow::Error, origin: Option<OriginContext>) -> Result<()> {
        self.record_and_submit(Failure::from_anyhow(error), origin).await
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn store(&self) -> &ErrorStore {
        &self.store
    }

    pub fn scheduler(&self) -> &DeliveryScheduler {
        &self.scheduler
    }

    /// Cancels pending cooldown waits; waiting reports are not delivered
    pub fn shutdown(&self) {
        info!(
            signatures = self.store.signature_count(),
            occurrences = self.store.occurrence_count(),
            "Shutting down error relay"
        );
        self.scheduler.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_test::assert_ok;
    use crate::context::{InteractionContext, Origin, CommandRef};
    use crate::formatter::NoopResolver;
    use crate::testing::RecordingSink;
    use crate::types::ErrorKind;

    fn relay_with_sink() -> (Arc<ErrorRelay>, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::new(Clock::new()));
        let relay = ErrorRelay::with_sink(
            RelayConfig::new("https://discord.com/api/webhooks/1/t"),
            sink.clone() as Arc<dyn ErrorSink>,
        );
        (Arc::new(relay), sink)
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let err = ErrorRelay::new(RelayConfig::default(), Arc::new(NoopResolver::default()))
            .err()
            .unwrap();
        assert_eq!(err.kind, ErrorKind::Configuration);
    }

    #[tokio::test(start_paused = true)]
    async fn test_identical_failures_share_a_signature() {
        let (relay, sink) = relay_with_sink();

        for _ in 0..3 {
            relay
                .record_and_submit(Failure::message("IndexError", "list index out of range"), None)
                .await
                .unwrap();
        }
        relay.record_and_submit(Failure::message("KeyError", "'prefix'"), None).await.unwrap();

        assert_eq!(relay.store().signature_count(), 2);
        assert_eq!(relay.store().occurrence_count(), 4);
        assert_eq!(sink.deliveries().len(), 4);

        let times = sink.times();
        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= chrono::Duration::seconds(5));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_context_flows_into_packet() {
        let (relay, sink) = relay_with_sink();
        let origin = OriginContext::Interaction(InteractionContext {
            user_id: 77,
            guild_id: Some(1),
            channel_id: Some(2),
            origin: Some(Origin::Command(CommandRef::new("remind me"))),
            message_created_at: None,
        });

        assert_ok!(relay.report_anyhow(anyhow::anyhow!("reminder store unavailable"), Some(origin)).await);

        let delivery = &sink.deliveries()[0];
        assert_eq!(delivery.packet.actor, Some(77));
        assert_eq!(delivery.packet.origin, Some(Origin::Command(CommandRef::new("remind me"))));
        assert_eq!(delivery.packet.failure.message_text(), "reminder store unavailable");
    }

    #[tokio::test(start_paused = true)]
    async fn test_sink_failure_keeps_occurrence() {
        let (relay, sink) = relay_with_sink();
        sink.fail_sends(true);

        let err = relay
            .report_error(std::io::Error::new(std::io::ErrorKind::Other, "socket closed"), None)
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::Transport);
        assert_eq!(relay.store().occurrence_count(), 1);
        assert!(sink.deliveries().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_queued_reports() {
        let (relay, sink) = relay_with_sink();
        relay.record_and_submit(Failure::message("E", "first"), None).await.unwrap();

        let queued = {
            let relay = Arc::clone(&relay);
            tokio::spawn(async move { relay.record_and_submit(Failure::message("E", "second"), None).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        relay.shutdown();

        assert!(queued.await.unwrap().unwrap_err().is_cancelled());
        assert_eq!(sink.deliveries().len(), 1);
        assert_eq!(relay.store().occurrence_count(), 2);
    }
}
