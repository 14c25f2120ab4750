//! DashMap Binding Repository
//!
//! Implements BindingRepository using DashMap for lock-free concurrent access.

use crate::domain::entities::{Binding, ClientKey};
use crate::domain::ports::BindingRepository;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// DashMap-backed binding repository.
///
/// Uses DashMap for lock-free concurrent access to bindings.
/// Supports periodic garbage collection of expired bindings.
pub struct DashMapBindingRepository {
    bindings: Arc<DashMap<ClientKey, Binding>>,
}

impl DashMapBindingRepository {
    /// Create a new repository.
    pub fn new() -> Self {
        Self {
            bindings: Arc::new(DashMap::new()),
        }
    }

    /// Start the background garbage collection task.
    ///
    /// Removes bindings that have not been seen within the TTL.
    pub fn start_gc(&self, ttl: Duration, interval: Duration) {
        let bindings = self.bindings.clone();

        tokio::spawn(async move {
            loop {
                let now = Instant::now();
                let mut to_remove = Vec::new();

                for entry in bindings.iter() {
                    if now.duration_since(entry.value().last_seen) > ttl {
                        to_remove.push(entry.key().clone());
                    }
                }

                let removed_count = to_remove.len();
                for key in to_remove {
                    bindings.remove(&key);
                }

                if removed_count > 0 {
                    tracing::debug!("binding GC removed {} expired entries", removed_count);
                }

                tokio::time::sleep(interval).await;
            }
        });
    }

    /// Get the underlying DashMap (for advanced use cases).
    #[allow(dead_code)]
    pub fn inner(&self) -> &Arc<DashMap<ClientKey, Binding>> {
        &self.bindings
    }
}

impl Default for DashMapBindingRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BindingRepository for DashMapBindingRepository {
    async fn get(&self, key: &ClientKey) -> Option<Binding> {
        self.bindings.get(key).map(|e| e.value().clone())
    }

    async fn set(&self, key: ClientKey, binding: Binding) {
        self.bindings.insert(key, binding);
    }

    async fn remove(&self, key: &ClientKey) {
        self.bindings.remove(key);
    }

    async fn touch(&self, key: &ClientKey) {
        if let Some(mut entry) = self.bindings.get_mut(key) {
            entry.last_seen = Instant::now();
        }
    }

    async fn cleanup_expired(&self, ttl: Duration) -> usize {
        let now = Instant::now();
        let mut to_remove = Vec::new();

        for entry in self.bindings.iter() {
            if now.duration_since(entry.value().last_seen) > ttl {
                to_remove.push(entry.key().clone());
            }
        }

        let count = to_remove.len();
        for key in to_remove {
            self.bindings.remove(&key);
        }

        count
    }

    async fn count(&self) -> usize {
        self.bindings.len()
    }
}
