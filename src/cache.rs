// SPDX-License-Identifier: MIT
//! Time-indexed map with periodic reaping.
//!
//! Entries logically expire `expiration` after their last update; `fetch`
//! enforces that predicate on every read, so correctness never depends on
//! the reaper. The reaper is memory hygiene: a background task that rebuilds
//! the map every `expiration` interval, dropping dead entries.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::trace;

struct Entry<V> {
    value: V,
    timestamp: Instant,
}

/// TTL cache keyed by string (canonical URLs in practice).
///
/// Clone-cheap: clones share the underlying map and reaper.
pub struct TtlCache<V> {
    entries: Arc<Mutex<HashMap<String, Entry<V>>>>,
    expiration: Duration,
    reaper: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl<V> Clone for TtlCache<V> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            expiration: self.expiration,
            reaper: Arc::clone(&self.reaper),
        }
    }
}

impl<V: Clone + Send + 'static> TtlCache<V> {
    pub fn new(expiration: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            expiration,
            reaper: Arc::new(Mutex::new(None)),
        }
    }

    /// Return the value for `key` if it has not expired yet.
    pub async fn fetch(&self, key: &str) -> Option<V> {
        let entries = self.entries.lock().await;
        let entry = entries.get(key)?;
        if entry.timestamp.elapsed() < self.expiration {
            Some(entry.value.clone())
        } else {
            None
        }
    }

    /// Insert or refresh `key`, stamping it with the current time.
    pub async fn update(&self, key: impl Into<String>, value: V) {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.into(),
            Entry {
                value,
                timestamp: Instant::now(),
            },
        );
    }

    /// Start the reaper task. Idempotent — a running reaper is left alone.
    pub async fn enable(&self) {
        let mut reaper = self.reaper.lock().await;
        if reaper.is_some() {
            return;
        }
        let entries = Arc::clone(&self.entries);
        let expiration = self.expiration;
        *reaper = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(expiration);
            ticker.tick().await; // first tick completes immediately
            loop {
                ticker.tick().await;
                let mut entries = entries.lock().await;
                let before = entries.len();
                entries.retain(|_, entry| entry.timestamp.elapsed() < expiration);
                trace!(reaped = before - entries.len(), kept = entries.len(), "cache sweep");
            }
        }));
    }

    /// Stop the reaper task, if running.
    pub async fn disable(&self) {
        if let Some(handle) = self.reaper.lock().await.take() {
            handle.abort();
        }
    }

    /// Number of physically present entries, expired or not.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}
