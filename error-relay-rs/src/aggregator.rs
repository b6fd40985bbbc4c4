//! # Signature Store
//!
//! Groups every recorded occurrence under the normalized trace it produced.
//! Entries are append-only and kept for the lifetime of the process; this is
//! a low-volume diagnostic path and growth is bounded only by how many
//! distinct failures a service produces.

use std::fmt;
use std::sync::Arc;
use dashmap::DashMap;
use metrics::{counter, gauge};
use crate::context::ContextPacket;
use crate::failure::Failure;
use crate::sanitization::normalize_trace;

/// Normalized trace text used as the dedup key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FailureSignature(String);

impl FailureSignature {
    /// Renders `failure` and normalizes the working directory out of it
    pub fn of(failure: &Failure) -> Self {
        Self(normalize_trace(&failure.render()))
    }

    /// Wraps text that is already normalized
    pub fn from_normalized<S: Into<String>>(text: S) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FailureSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Signature → ordered occurrences
#[derive(Debug, Default)]
pub struct ErrorStore {
    entries: DashMap<FailureSignature, Vec<Arc<ContextPacket>>>,
}

impl ErrorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `packet` under `signature`, creating the list if absent
    pub fn record(&self, signature: FailureSignature, packet: Arc<ContextPacket>) {
        // The shard guard is dropped before this returns; never held across an await.
        self.entries.entry(signature).or_default().push(packet);

        counter!("error_relay.recorded", 1);
        gauge!("error_relay.signatures", self.entries.len() as f64);
    }

    /// Occurrences recorded for `signature`, oldest first
    pub fn occurrences(&self, signature: &FailureSignature) -> Vec<Arc<ContextPacket>> {
        self.entries
            .get(signature)
            .map(|list| list.value().clone())
            .unwrap_or_default()
    }

    pub fn signatures(&self) -> Vec<FailureSignature> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    pub fn signature_count(&self) -> usize {
        self.entries.len()
    }

    pub fn occurrence_count(&self) -> usize {
        self.entries.iter().map(|e| e.value().len()).sum()
    }
}
