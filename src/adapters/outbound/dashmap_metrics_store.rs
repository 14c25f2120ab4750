//! DashMap Metrics Store
//!
//! Implements MetricsStore using DashMap for lock-free concurrent access.

use crate::domain::ports::MetricsStore;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Metrics for a single backend.
#[derive(Debug)]
pub struct BackendMetrics {
    /// Current number of active connections
    pub current_conns: AtomicUsize,
    /// Last recorded round-trip time in milliseconds
    pub last_rtt_ms: AtomicU64,
}

impl BackendMetrics {
    fn new() -> Self {
        Self {
            current_conns: AtomicUsize::new(0),
            last_rtt_ms: AtomicU64::new(0),
        }
    }
}

impl Default for BackendMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// DashMap-backed metrics store.
///
/// Uses DashMap for lock-free concurrent access to metrics.
/// Each backend has its own metrics entry.
pub struct DashMapMetricsStore {
    metrics: DashMap<String, BackendMetrics>,
}

impl DashMapMetricsStore {
    /// Create a new metrics store.
    pub fn new() -> Self {
        Self {
            metrics: DashMap::new(),
        }
    }

    /// Get all backend IDs with metrics.
    #[allow(dead_code)]
    pub fn backend_ids(&self) -> Vec<String> {
        self.metrics.iter().map(|e| e.key().clone()).collect()
    }

    /// Get metrics for a specific backend (for debugging).
    #[allow(dead_code)]
    pub fn get_metrics(&self, backend_id: &str) -> Option<(usize, u64)> {
        self.metrics.get(backend_id).map(|m| {
            (
                m.current_conns.load(Ordering::Relaxed),
                m.last_rtt_ms.load(Ordering::Relaxed),
            )
        })
    }
}

impl Default for DashMapMetricsStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsStore for DashMapMetricsStore {
    fn get_connection_count(&self, backend_id: &str) -> usize {
        self.metrics
            .get(backend_id)
            .map(|m| m.current_conns.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn increment_connections(&self, backend_id: &str) {
        self.metrics
            .entry(backend_id.to_string())
            .or_default()
            .current_conns
            .fetch_add(1, Ordering::Relaxed);
    }

    fn decrement_connections(&self, backend_id: &str) {
        if let Some(m) = self.metrics.get(backend_id) {
            // Use compare_exchange loop to prevent underflow
            let mut current = m.current_conns.load(Ordering::Relaxed);
            while current > 0 {
                match m.current_conns.compare_exchange_weak(
                    current,
                    current - 1,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => break,
                    Err(c) => current = c,
                }
            }
        }
    }

    fn record_rtt(&self, backend_id: &str, rtt_ms: u64) {
        self.metrics
            .entry(backend_id.to_string())
            .or_default()
            .last_rtt_ms
            .store(rtt_ms, Ordering::Relaxed);
    }

    fn get_last_rtt(&self, backend_id: &str) -> Option<u64> {
        self.metrics
            .get(backend_id)
            .map(|m| m.last_rtt_ms.load(Ordering::Relaxed))
    }
}
