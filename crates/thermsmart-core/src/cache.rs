//! Short-lived cache for the last command-response payload.
//!
//! The sensor answers one `0xD2` command with all of its fields, so a single
//! payload serves every accessor until it expires. Expiry is lazy: an entry
//! is dropped on the first lookup after its time-to-live has passed.

use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;

/// A payload together with the instant it was received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedPayload {
    bytes: Bytes,
    loaded_at: Instant,
}

impl CachedPayload {
    /// Wrap a payload received now.
    pub fn new(bytes: Bytes) -> Self {
        Self {
            bytes,
            loaded_at: Instant::now(),
        }
    }

    /// The cached payload.
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// When the payload was received.
    pub fn loaded_at(&self) -> Instant {
        self.loaded_at
    }

    /// Time elapsed since the payload was received.
    pub fn age(&self) -> Duration {
        self.loaded_at.elapsed()
    }

    /// Whether the payload is still within `ttl`. An entry exactly `ttl` old
    /// is still fresh.
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.age() <= ttl
    }
}

/// Holds at most one payload with a fixed time-to-live.
#[derive(Debug, Clone)]
pub struct PayloadCache {
    ttl: Duration,
    entry: Option<CachedPayload>,
}

impl PayloadCache {
    /// Create an empty cache.
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, entry: None }
    }

    /// The configured time-to-live.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Return the payload if it is still fresh, dropping it otherwise.
    pub fn get(&mut self) -> Option<Bytes> {
        let ttl = self.ttl;
        if self.entry.as_ref().is_some_and(|entry| !entry.is_fresh(ttl)) {
            self.entry = None;
        }
        self.entry.as_ref().map(|entry| entry.bytes.clone())
    }

    /// Peek at the entry without expiring it.
    pub fn entry(&self) -> Option<&CachedPayload> {
        self.entry.as_ref()
    }

    /// Store a freshly received payload, replacing any previous one.
    pub fn store(&mut self, bytes: Bytes) {
        self.entry = Some(CachedPayload::new(bytes));
    }

    /// Drop the entry regardless of age.
    pub fn clear(&mut self) {
        self.entry = None;
    }
}
