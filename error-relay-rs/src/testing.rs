//! Test doubles shared by the unit tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crate::aggregator::FailureSignature;
use crate::clock::Clock;
use crate::context::ContextPacket;
use crate::sink::ErrorSink;
use crate::types::{Error, ErrorKind, Result};

#[derive(Debug, Clone)]
pub struct Delivery {
    pub signature: FailureSignature,
    pub packet: ContextPacket,
    pub sent_at: DateTime<Utc>,
}

/// Sink that records every send with the clock time it happened at
pub struct RecordingSink {
    clock: Clock,
    deliveries: Mutex<Vec<Delivery>>,
    fail: AtomicBool,
}

impl RecordingSink {
    pub fn new(clock: Clock) -> Self {
        Self {
            clock,
            deliveries: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }

    /// Makes every following send fail with a transport error
    pub fn fail_sends(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().unwrap().clone()
    }

    pub fn times(&self) -> Vec<DateTime<Utc>> {
        self.deliveries().into_iter().map(|d| d.sent_at).collect()
    }
}

#[async_trait]
impl ErrorSink for RecordingSink {
    async fn send(&self, signature: &FailureSignature, packet: &ContextPacket) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::new(ErrorKind::Transport, "connection reset by peer"));
        }
        self.deliveries.lock().unwrap().push(Delivery {
            signature: signature.clone(),
            packet: packet.clone(),
            sent_at: self.clock.now(),
        });
        Ok(())
    }
}
