//! # Delivery Scheduler
//!
//! Serializes every delivery to the sink behind one lock and keeps at least
//! `cooldown` between consecutive sends. The lock is held across the
//! cooldown wait and the transport call, so a burst of N failures turns into
//! N deliveries spaced one cooldown apart.

use std::sync::Arc;
use std::time::Duration;
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use crate::aggregator::FailureSignature;
use crate::clock::Clock;
use crate::context::ContextPacket;
use crate::sink::ErrorSink;
use crate::types::{Error, Result};

/// Default spacing between two deliveries
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(5);

/// Most recent delivery; only touched while the lock is held
#[derive(Debug, Default)]
pub struct DeliveryCursor {
    pub last_sent_at: Option<DateTime<Utc>>,
    /// Monotonic instant of the same delivery
    pub last_sent_instant: Option<Instant>,
}

impl DeliveryCursor {
    fn mark(&mut self, at: DateTime<Utc>) {
        self.last_sent_at = Some(at);
        self.last_sent_instant = Some(Instant::now());
    }
}

#[derive(Debug)]
pub struct DeliveryScheduler {
    cooldown: chrono::Duration,
    cursor: Mutex<DeliveryCursor>,
    clock: Clock,
    shutdown: CancellationToken,
}

impl DeliveryScheduler {
    pub fn new(cooldown: Duration, clock: Clock) -> Self {
        Self {
            cooldown: chrono::Duration::from_std(cooldown).unwrap_or_else(|_| chrono::Duration::seconds(5)),
            cursor: Mutex::new(DeliveryCursor::default()),
            clock,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown.to_std().unwrap_or(DEFAULT_COOLDOWN)
    }

    /// How long a packet stamped `packet_time` must wait after `last_sent_at`.
    ///
    /// Packets older than the last delivery wait one full cooldown.
    pub fn wait_for(&self, last_sent_at: DateTime<Utc>, packet_time: DateTime<Utc>) -> Option<Duration> {
        let elapsed = (packet_time - last_sent_at).max(chrono::Duration::zero());
        if elapsed > self.cooldown {
            return None;
        }
        Some((self.cooldown - elapsed).to_std().unwrap_or_default())
    }

    /// Delivers `packet` through `sink`, waiting out the cooldown first if needed.
    ///
    /// Transport errors are returned unchanged. If [`shutdown`](Self::shutdown)
    /// fires during the wait, the packet is not delivered and
    /// `ErrorKind::Cancelled` is returned.
    pub async fn submit(
        &self,
        signature: &FailureSignature,
        packet: &Arc<ContextPacket>,
        sink: &dyn ErrorSink,
    ) -> Result<()> {
        let mut cursor = self.cursor.lock().await;

        if let Some(wait) = self.pending_wait(&cursor, packet.time) {
            debug!(
                packet_id = %packet.id,
                wait_secs = wait.as_secs_f64(),
                "Waiting before releasing error"
            );
            histogram!("error_relay.cooldown_wait_seconds", wait.as_secs_f64());

            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    warn!(packet_id = %packet.id, "Shutdown during cooldown; error not released");
                    counter!("error_relay.deferred", 1);
                    return Err(Error::cancelled("delivery cancelled during cooldown wait")
                        .context("packet_id", packet.id.to_string()));
                }
                _ = tokio::time::sleep(wait) => {}
            }
        }

        cursor.mark(self.clock.now());

        match sink.send(signature, packet).await {
            Ok(()) => {
                counter!("error_relay.delivered", 1);
                Ok(())
            }
            Err(e) => {
                counter!("error_relay.delivery_failed", 1);
                Err(e)
            }
        }
    }

    // Packet times come from the host and may be skewed against our clock,
    // so the monotonic time since the last send bounds the wait from below.
    fn pending_wait(&self, cursor: &DeliveryCursor, packet_time: DateTime<Utc>) -> Option<Duration> {
        let by_packet_time = cursor
            .last_sent_at
            .and_then(|last| self.wait_for(last, packet_time))
            .unwrap_or_default();
        let by_monotonic = cursor
            .last_sent_instant
            .map(|last| self.cooldown().saturating_sub(last.elapsed()))
            .unwrap_or_default();

        Some(by_packet_time.max(by_monotonic)).filter(|wait| !wait.is_zero())
    }

    /// Time of the most recent delivery, if any
    pub async fn last_sent_at(&self) -> Option<DateTime<Utc>> {
        self.cursor.lock().await.last_sent_at
    }

    /// Cancels every current and future cooldown wait
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::extract;
    use crate::failure::Failure;
    use crate::testing::RecordingSink;
    use crate::types::ErrorKind;

    fn packet_at(time: DateTime<Utc>, message: &str) -> (FailureSignature, Arc<ContextPacket>) {
        let failure = Failure::message("TestError", message);
        let sig = FailureSignature::of(&failure);
        (sig, Arc::new(extract(failure, None, time)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_submit_is_immediate() {
        let clock = Clock::new();
        let scheduler = DeliveryScheduler::new(DEFAULT_COOLDOWN, clock);
        let sink = RecordingSink::new(clock);

        let start = clock.now();
        let (sig, packet) = packet_at(start, "first");
        scheduler.submit(&sig, &packet, &sink).await.unwrap();

        assert_eq!(sink.times(), vec![start]);
        assert_eq!(scheduler.last_sent_at().await, Some(start));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_error_one_second_later_waits_full_cooldown() {
        let clock = Clock::new();
        let scheduler = DeliveryScheduler::new(Duration::from_secs(5), clock);
        let sink = RecordingSink::new(clock);

        let (sig, first) = packet_at(clock.now(), "first");
        scheduler.submit(&sig, &first, &sink).await.unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        let (sig, second) = packet_at(clock.now(), "second");
        scheduler.submit(&sig, &second, &sink).await.unwrap();

        let times = sink.times();
        assert_eq!(times.len(), 2);
        assert_eq!(times[1] - times[0], chrono::Duration::seconds(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_after_cooldown_is_immediate() {
        let clock = Clock::new();
        let scheduler = DeliveryScheduler::new(Duration::from_secs(5), clock);
        let sink = RecordingSink::new(clock);

        let (sig, first) = packet_at(clock.now(), "first");
        scheduler.submit(&sig, &first, &sink).await.unwrap();

        tokio::time::sleep(Duration::from_secs(6)).await;
        let submitted_at = clock.now();
        let (sig, second) = packet_at(submitted_at, "second");
        scheduler.submit(&sig, &second, &sink).await.unwrap();

        assert_eq!(sink.times()[1], submitted_at);
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_is_spaced_by_cooldown_and_fully_delivered() {
        let clock = Clock::new();
        let scheduler = DeliveryScheduler::new(Duration::from_secs(5), clock);
        let sink = RecordingSink::new(clock);
        let burst_time = clock.now();

        let packets: Vec<_> = (0..6).map(|i| packet_at(burst_time, &format!("burst {}", i))).collect();
        let results = futures::future::join_all(
            packets.iter().map(|(sig, packet)| scheduler.submit(sig, packet, &sink)),
        )
        .await;

        assert!(results.iter().all(|r| r.is_ok()));
        let times = sink.times();
        assert_eq!(times.len(), 6);
        for pair in times.windows(2) {
            assert_eq!(pair[1] - pair[0], chrono::Duration::seconds(5));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_packets_stamped_ahead_of_clock_are_still_spaced() {
        let clock = Clock::new();
        let scheduler = DeliveryScheduler::new(Duration::from_secs(5), clock);
        let sink = RecordingSink::new(clock);
        let skew = chrono::Duration::seconds(30);

        let submits = (0..3u64).map(|i| {
            let scheduler = &scheduler;
            let sink = &sink;
            async move {
                tokio::time::sleep(Duration::from_millis(100 * i)).await;
                let (sig, packet) = packet_at(clock.now() + skew, &format!("skewed {}", i));
                scheduler.submit(&sig, &packet, sink).await
            }
        });
        let results = futures::future::join_all(submits).await;

        assert!(results.iter().all(|r| r.is_ok()));
        let times = sink.times();
        assert_eq!(times.len(), 3);
        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= chrono::Duration::seconds(5), "{:?}", times);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_packets_stamped_behind_clock_wait_full_cooldown() {
        let clock = Clock::new();
        let scheduler = DeliveryScheduler::new(Duration::from_secs(5), clock);
        let sink = RecordingSink::new(clock);

        let (sig, first) = packet_at(clock.now(), "first");
        scheduler.submit(&sig, &first, &sink).await.unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;
        let (sig, stale) = packet_at(clock.now() - chrono::Duration::seconds(60), "stale");
        scheduler.submit(&sig, &stale, &sink).await.unwrap();

        let times = sink.times();
        assert_eq!(times[1] - times[0], chrono::Duration::seconds(7));
    }

    #[test]
    fn test_wait_for() {
        let clock = Clock::new();
        let scheduler = DeliveryScheduler::new(Duration::from_secs(5), clock);
        let last = Utc::now();

        assert_eq!(scheduler.wait_for(last, last + chrono::Duration::seconds(1)), Some(Duration::from_secs(4)));
        assert_eq!(scheduler.wait_for(last, last - chrono::Duration::seconds(3)), Some(Duration::from_secs(5)));
        assert_eq!(scheduler.wait_for(last, last + chrono::Duration::seconds(6)), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_propagates() {
        let clock = Clock::new();
        let scheduler = DeliveryScheduler::new(DEFAULT_COOLDOWN, clock);
        let sink = RecordingSink::new(clock);
        sink.fail_sends(true);

        let (sig, packet) = packet_at(clock.now(), "lost");
        let err = scheduler.submit(&sig, &packet, &sink).await.unwrap_err();

        assert_eq!(err.kind, ErrorKind::Transport);
        assert!(scheduler.last_sent_at().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_wait_releases_lock() {
        let clock = Clock::new();
        let scheduler = Arc::new(DeliveryScheduler::new(Duration::from_secs(5), clock));
        let sink = Arc::new(RecordingSink::new(clock));

        let (sig, first) = packet_at(clock.now(), "first");
        scheduler.submit(&sig, &first, sink.as_ref()).await.unwrap();

        let waiting = {
            let scheduler = Arc::clone(&scheduler);
            let sink = Arc::clone(&sink);
            let (sig, second) = packet_at(clock.now(), "second");
            tokio::spawn(async move { scheduler.submit(&sig, &second, sink.as_ref()).await })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        scheduler.shutdown();

        let err = waiting.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(sink.times().len(), 1);
        // Lock is free again
        assert!(scheduler.last_sent_at().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_aborted_submit_releases_lock() {
        let clock = Clock::new();
        let scheduler = Arc::new(DeliveryScheduler::new(Duration::from_secs(5), clock));
        let sink = Arc::new(RecordingSink::new(clock));

        let (sig, first) = packet_at(clock.now(), "first");
        scheduler.submit(&sig, &first, sink.as_ref()).await.unwrap();

        let waiting = {
            let scheduler = Arc::clone(&scheduler);
            let sink = Arc::clone(&sink);
            let (sig, second) = packet_at(clock.now(), "second");
            tokio::spawn(async move { scheduler.submit(&sig, &second, sink.as_ref()).await })
        };

        tokio::time::sleep(Duration::from_secs(2)).await;
        waiting.abort();
        assert!(waiting.await.unwrap_err().is_cancelled());

        let (sig, third) = packet_at(clock.now(), "third");
        scheduler.submit(&sig, &third, sink.as_ref()).await.unwrap();
        assert_eq!(sink.times().len(), 2);
    }
}
