//! Metrics Registry
//!
//! Counters for request, hit, miss and byte volumes, plus a `host` scope the
//! cache backend fills with counters of its own. All counters are atomics, so
//! workers increment them without taking a lock; only registering a new host
//! counter goes through the scope's RwLock.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

/// A monotonically updated integer counter
#[derive(Debug, Default)]
pub struct Counter(AtomicI64);

impl Counter {
    pub fn new() -> Self {
        Self(AtomicI64::new(0))
    }

    #[inline]
    pub fn add(&self, delta: i64) {
        self.0.fetch_add(delta, Ordering::Relaxed);
    }

    #[inline]
    pub fn incr(&self) {
        self.add(1);
    }

    #[inline]
    pub fn get(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Named counters registered by a cache backend
#[derive(Debug, Default)]
pub struct MetricsScope {
    counters: RwLock<BTreeMap<String, Arc<Counter>>>,
}

impl MetricsScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the counter registered under `name`, creating it if needed
    pub fn counter(&self, name: &str) -> Arc<Counter> {
        if let Some(counter) = self.counters.read().get(name) {
            return Arc::clone(counter);
        }
        let mut counters = self.counters.write();
        Arc::clone(counters.entry(name.to_string()).or_default())
    }

    /// Current values of every registered counter
    pub fn values(&self) -> BTreeMap<String, i64> {
        self.counters
            .read()
            .iter()
            .map(|(name, counter)| (name.clone(), counter.get()))
            .collect()
    }
}

/// Server-side counters
#[derive(Debug, Default)]
pub struct Metrics {
    pub get_requests: Counter,
    pub get_hits: Counter,
    pub get_hit_bytes: Counter,
    pub get_misses: Counter,
    pub get_errors: Counter,
    pub put_requests: Counter,
    pub put_bytes: Counter,
    pub put_errors: Counter,

    /// Backend-defined sub-scope
    pub host: MetricsScope,
}

/// Point-in-time view of all counters, ready for export
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub server: BTreeMap<String, i64>,
    pub host: BTreeMap<String, i64>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let server = [
            ("get_requests", &self.get_requests),
            ("get_hits", &self.get_hits),
            ("get_hit_bytes", &self.get_hit_bytes),
            ("get_misses", &self.get_misses),
            ("get_errors", &self.get_errors),
            ("put_requests", &self.put_requests),
            ("put_bytes", &self.put_bytes),
            ("put_errors", &self.put_errors),
        ]
        .into_iter()
        .map(|(name, counter)| (name.to_string(), counter.get()))
        .collect();

        MetricsSnapshot {
            server,
            host: self.host.values(),
        }
    }
}
