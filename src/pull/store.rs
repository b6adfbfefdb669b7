//! Concurrent keyed stores for pull state
//!
//! `ProcessStore` is the single source of truth for "is a pull currently
//! active for this admission token". `ActivePulls` is the trust marker
//! map the authorization gate consults. Both are only ever touched
//! through the operations below; the maps themselves stay private.

use std::collections::HashMap;

use tokio::sync::RwLock;

use super::handle::{ActivePull, PullHandle};

/// Registry of running transcoder subprocesses, keyed by admission token.
///
/// Thread-safe via `RwLock`. Mutations from per-pull monitor tasks, the
/// change-feed loop, and shutdown interleave freely; correctness relies
/// on insert-if-absent registration and idempotent unregistration rather
/// than external locking.
pub struct ProcessStore {
    pulls: RwLock<HashMap<String, PullHandle>>,
}

impl ProcessStore {
    pub fn new() -> Self {
        Self {
            pulls: RwLock::new(HashMap::new()),
        }
    }

    /// Register a handle for a token.
    ///
    /// Returns `false` without replacing anything if the token already
    /// has a handle; a second start for a running token is a no-op.
    pub async fn register(&self, token: &str, handle: PullHandle) -> bool {
        let mut pulls = self.pulls.write().await;

        if pulls.contains_key(token) {
            return false;
        }

        tracing::debug!(stream = %handle.stream_name, "pull registered");
        pulls.insert(token.to_string(), handle);
        true
    }

    /// Look up the handle for a token.
    pub async fn lookup(&self, token: &str) -> Option<PullHandle> {
        self.pulls.read().await.get(token).cloned()
    }

    /// Remove a token's handle.
    ///
    /// Safe to call for tokens that were never registered or were already
    /// removed; returns whether a handle was actually present.
    pub async fn unregister(&self, token: &str) -> bool {
        let removed = self.pulls.write().await.remove(token);

        if let Some(ref handle) = removed {
            tracing::debug!(stream = %handle.stream_name, "pull unregistered");
        }

        removed.is_some()
    }

    /// Remove and return every registered handle (shutdown drain).
    pub async fn drain(&self) -> Vec<PullHandle> {
        self.pulls.write().await.drain().map(|(_, h)| h).collect()
    }

    /// Number of active pulls.
    pub async fn len(&self) -> usize {
        self.pulls.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.pulls.read().await.is_empty()
    }
}

impl Default for ProcessStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Trust markers for supervisor-initiated pulls, keyed by stream name.
pub struct ActivePulls {
    streams: RwLock<HashMap<String, ActivePull>>,
}

impl ActivePulls {
    pub fn new() -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
        }
    }

    pub async fn insert(&self, pull: ActivePull) {
        self.streams
            .write()
            .await
            .insert(pull.stream_name.clone(), pull);
    }

    pub async fn get(&self, stream_name: &str) -> Option<ActivePull> {
        self.streams.read().await.get(stream_name).cloned()
    }

    pub async fn contains(&self, stream_name: &str) -> bool {
        self.streams.read().await.contains_key(stream_name)
    }

    /// Remove a marker; a no-op for unknown names.
    pub async fn remove(&self, stream_name: &str) -> bool {
        self.streams.write().await.remove(stream_name).is_some()
    }

    pub async fn len(&self) -> usize {
        self.streams.read().await.len()
    }
}

impl Default for ActivePulls {
    fn default() -> Self {
        Self::new()
    }
}
