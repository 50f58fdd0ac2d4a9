//! Failure history of relay endpoints
//!
//! Remembers how often a connection to an `address:port` failed so that the
//! responder stops wasting its connect budget on relays that keep failing.
//! The history is keyed by endpoint rather than by session because the same
//! broken relay tends to be offered again in later sessions.
//!
//! Records expire by absolute age (measured from the latest failure),
//! independent of how often they are read. When the history grows past its
//! capacity the least recently used record is dropped, after expired records
//! have been purged.
//!
//! A single long-lived instance is shared by every negotiation of a process;
//! build it once and hand out `Arc<FailureHistory>`.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crate::config::NegotiationConfig;

/// One endpoint's failure record
#[derive(Debug, Clone)]
struct FailureRecord {
    /// Number of failures since the record was created
    count: u32,

    /// Time of the latest failure (expiry is measured from here)
    last_failure_at: Instant,

    /// Access tick for LRU ordering
    last_access: u64,
}

impl FailureRecord {
    fn is_expired(&self, now: Instant, lifetime: Duration) -> bool {
        now.duration_since(self.last_failure_at) >= lifetime
    }
}

/// Bounded, time-expiring `endpoint -> failure count` map
///
/// Safe for concurrent use; lookups and updates of different endpoints do
/// not contend on a single lock.
pub struct FailureHistory {
    /// Failure records keyed by `address:port`
    records: DashMap<String, FailureRecord>,

    /// Monotonic access clock
    clock: AtomicU64,

    /// Capacity
    max_size: AtomicUsize,

    /// Record lifetime in milliseconds
    lifetime_ms: AtomicU64,
}

impl FailureHistory {
    /// Create a history with the given capacity and record lifetime
    #[must_use]
    pub fn new(max_size: usize, lifetime: Duration) -> Self {
        Self {
            records: DashMap::new(),
            clock: AtomicU64::new(0),
            max_size: AtomicUsize::new(max_size.max(1)),
            lifetime_ms: AtomicU64::new(lifetime.as_millis() as u64),
        }
    }

    /// Create a history sized by the blacklist settings of `config`
    #[must_use]
    pub fn from_config(config: &NegotiationConfig) -> Self {
        Self::new(config.blacklist_max_size, config.blacklist_lifetime)
    }

    /// Change capacity and lifetime at runtime
    ///
    /// Shrinking the capacity evicts immediately.
    pub fn set_limits(&self, max_size: usize, lifetime: Duration) {
        self.max_size.store(max_size.max(1), Ordering::Relaxed);
        self.lifetime_ms
            .store(lifetime.as_millis() as u64, Ordering::Relaxed);
        self.evict_overflow();
    }

    /// Record one failure for `key` and return the new count
    pub fn record_failure(&self, key: &str) -> u32 {
        let now = Instant::now();
        let lifetime = self.lifetime();
        let tick = self.tick();

        let count = {
            let mut record = self
                .records
                .entry(key.to_string())
                .or_insert_with(|| FailureRecord {
                    count: 0,
                    last_failure_at: now,
                    last_access: tick,
                });

            // An expired record that was never purged starts over
            if record.is_expired(now, lifetime) {
                record.count = 0;
            }
            record.count = record.count.saturating_add(1);
            record.last_failure_at = now;
            record.last_access = tick;
            record.count
        };

        tracing::debug!("Relay {} failure count now {}", key, count);

        self.evict_overflow();
        count
    }

    /// Number of recorded failures for `key`; 0 if absent or expired
    pub fn failure_count(&self, key: &str) -> u32 {
        let now = Instant::now();
        let lifetime = self.lifetime();

        match self.records.get_mut(key) {
            None => return 0,
            Some(mut record) => {
                if !record.is_expired(now, lifetime) {
                    record.last_access = self.tick();
                    return record.count;
                }
            }
        }

        self.records
            .remove_if(key, |_, record| record.is_expired(now, lifetime));
        0
    }

    /// Whether `key` has reached `threshold` failures (0 never blacklists)
    pub fn is_blacklisted(&self, key: &str, threshold: u32) -> bool {
        threshold > 0 && self.failure_count(key) >= threshold
    }

    /// Number of records currently held (expired ones included until purged)
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the history holds no records
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Forget every record
    pub fn clear(&self) {
        self.records.clear();
    }

    fn lifetime(&self) -> Duration {
        Duration::from_millis(self.lifetime_ms.load(Ordering::Relaxed))
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    /// Drop expired records, then least recently used ones, until within capacity
    fn evict_overflow(&self) {
        let max_size = self.max_size.load(Ordering::Relaxed);
        if self.records.len() <= max_size {
            return;
        }

        let now = Instant::now();
        let lifetime = self.lifetime();
        self.records
            .retain(|_, record| !record.is_expired(now, lifetime));

        while self.records.len() > max_size {
            let oldest = self
                .records
                .iter()
                .min_by_key(|entry| entry.value().last_access)
                .map(|entry| entry.key().clone());

            match oldest {
                Some(key) => {
                    tracing::trace!("Evicting relay {} from failure history", key);
                    self.records.remove(&key);
                }
                None => break,
            }
        }
    }
}

impl Default for FailureHistory {
    fn default() -> Self {
        Self::from_config(&NegotiationConfig::default())
    }
}

impl std::fmt::Debug for FailureHistory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailureHistory")
            .field("records", &self.records.len())
            .field("max_size", &self.max_size.load(Ordering::Relaxed))
            .field("lifetime", &self.lifetime())
            .finish()
    }
}
