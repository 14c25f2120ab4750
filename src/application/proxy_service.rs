//! Proxy Service - Main application use case
//!
//! Orchestrates the proxy logic: resolving backends, managing bindings,
//! and recording metrics. This is the primary interface for the inbound adapter.

use crate::domain::entities::{Backend, Binding, ClientKey, GeoInfo};
use crate::domain::ports::{BackendRepository, BindingRepository, GeoResolver, MetricsStore};
use crate::domain::services::LoadBalancer;
use crate::domain::value_objects::RegionCode;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

/// Proxy service - main application use case.
///
/// This service orchestrates the proxy logic:
/// 1. Resolves the best backend for a client
/// 2. Manages client-to-backend bindings (session affinity)
/// 3. Records connection metrics
pub struct ProxyService {
    backend_repo: Arc<dyn BackendRepository>,
    binding_repo: Arc<dyn BindingRepository>,
    geo_resolver: Option<Arc<dyn GeoResolver>>,
    metrics: Arc<dyn MetricsStore>,
    local_region: RegionCode,
}

impl ProxyService {
    /// Create a new proxy service.
    pub fn new(
        backend_repo: Arc<dyn BackendRepository>,
        binding_repo: Arc<dyn BindingRepository>,
        geo_resolver: Option<Arc<dyn GeoResolver>>,
        metrics: Arc<dyn MetricsStore>,
        local_region: RegionCode,
    ) -> Self {
        Self {
            backend_repo,
            binding_repo,
            geo_resolver,
            metrics,
            local_region,
        }
    }

    /// Resolve the best backend for a client IP.
    ///
    /// This is the main entry point for routing decisions. It:
    /// 1. Checks for existing binding (session affinity)
    /// 2. If no binding, uses load balancer to select best backend
    /// 3. Creates a new binding for the client
    ///
    /// # Arguments
    /// * `client_ip` - The client's IP address
    ///
    /// # Returns
    /// The selected backend, or None if no backends are available
    #[allow(dead_code)]
    pub async fn resolve_backend(&self, client_ip: IpAddr) -> Option<Backend> {
        let client_key = ClientKey::new(client_ip);

        // 1. Check for existing binding
        if let Some(binding) = self.binding_repo.get(&client_key).await {
            // Update last_seen
            self.binding_repo.touch(&client_key).await;

            // Verify backend is still healthy
            if let Some(backend) = self.backend_repo.get_by_id(&binding.backend_id).await {
                if backend.healthy {
                    tracing::debug!(
                        "using existing binding for {} -> {}",
                        client_ip,
                        backend.id
                    );
                    return Some(backend);
                }
            }

            // Backend unhealthy or gone - remove stale binding
            self.binding_repo.remove(&client_key).await;
            tracing::debug!("removed stale binding for {}", client_ip);
        }

        // 2. Resolve client geo location
        let client_geo = self.resolve_geo(client_ip);

        // 3. Get healthy backends
        let backends = self.backend_repo.get_healthy().await;
        if backends.is_empty() {
            tracing::warn!("no healthy backends available");
            return None;
        }

        // 4. Use load balancer to pick best backend
        let metrics = self.metrics.clone();
        let backend = LoadBalancer::pick_backend(
            &backends,
            &self.local_region,
            client_geo.as_ref(),
            |id| metrics.get_connection_count(id),
        )?;

        // 5. Create binding for session affinity
        self.binding_repo
            .set(client_key, Binding::new(backend.id.clone()))
            .await;

        tracing::debug!(
            "new binding for {} -> {} (geo: {:?})",
            client_ip,
            backend.id,
            client_geo
        );

        Some(backend)
    }

    /// Resolve the best backend using a specific GeoInfo.
    ///
    /// This is useful when the caller has already resolved the geo info
    /// (e.g., from a public IP lookup for localhost connections).
    pub async fn resolve_backend_with_geo(
        &self,
        client_ip: IpAddr,
        client_geo: Option<GeoInfo>,
    ) -> Option<Backend> {
        let client_key = ClientKey::new(client_ip);

        // Check for existing binding first
        if let Some(binding) = self.binding_repo.get(&client_key).await {
            self.binding_repo.touch(&client_key).await;
            if let Some(backend) = self.backend_repo.get_by_id(&binding.backend_id).await {
                if backend.healthy {
                    return Some(backend);
                }
            }
            self.binding_repo.remove(&client_key).await;
        }

        // Get healthy backends
        let backends = self.backend_repo.get_healthy().await;
        if backends.is_empty() {
            return None;
        }

        // Use load balancer with provided geo
        let metrics = self.metrics.clone();
        let backend = LoadBalancer::pick_backend(
            &backends,
            &self.local_region,
            client_geo.as_ref(),
            |id| metrics.get_connection_count(id),
        )?;

        // Create binding
        self.binding_repo
            .set(client_key, Binding::new(backend.id.clone()))
            .await;

        Some(backend)
    }

    /// Clear the binding for a client.
    ///
    /// Useful when detecting VPN changes or other scenarios
    /// where the binding should be invalidated.
    pub async fn clear_binding(&self, client_ip: IpAddr) {
        let client_key = ClientKey::new(client_ip);
        self.binding_repo.remove(&client_key).await;
    }

    /// Resolve geographic information for an IP address.
    pub fn resolve_geo(&self, ip: IpAddr) -> Option<GeoInfo> {
        self.geo_resolver.as_ref().and_then(|g| g.resolve(ip))
    }

    /// Record the start of a connection to a backend.
    pub fn record_connection_start(&self, backend_id: &str) {
        self.metrics.increment_connections(backend_id);
    }

    /// Record the end of a connection to a backend.
    pub fn record_connection_end(&self, backend_id: &str) {
        self.metrics.decrement_connections(backend_id);
    }

    /// Record the round-trip time for connecting to a backend.
    pub fn record_rtt(&self, backend_id: &str, rtt_ms: u64) {
        self.metrics.record_rtt(backend_id, rtt_ms);
    }

    /// Get the current connection count for a backend.
    #[allow(dead_code)]
    pub fn get_connection_count(&self, backend_id: &str) -> usize {
        self.metrics.get_connection_count(backend_id)
    }

    /// Get the local region for this proxy.
    #[allow(dead_code)]
    pub fn local_region(&self) -> &RegionCode {
        &self.local_region
    }

    /// Run periodic cleanup of expired bindings.
    #[allow(dead_code)]
    pub async fn run_binding_cleanup(&self, ttl: Duration, interval: Duration) {
        loop {
            let removed = self.binding_repo.cleanup_expired(ttl).await;
            if removed > 0 {
                tracing::debug!("cleaned up {} expired bindings", removed);
            }
            tokio::time::sleep(interval).await;
        }
    }
}
