//! Auto-Discovery API Server
//!
//! HTTP API for backends to register themselves and send heartbeats.
//! Enables dynamic backend discovery without manual routing.db updates.

use crate::domain::entities::Backend;
use crate::domain::value_objects::RegionCode;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Registration request from a backend.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub id: String,
    pub app: String,
    pub region: String,
    #[serde(default)]
    pub country: Option<String>,
    pub ip: String,
    pub port: u16,
    #[serde(default = "default_weight")]
    pub weight: u8,
    #[serde(default = "default_soft_limit")]
    pub soft_limit: u32,
    #[serde(default = "default_hard_limit")]
    pub hard_limit: u32,
}

fn default_weight() -> u8 {
    2
}
fn default_soft_limit() -> u32 {
    100
}
fn default_hard_limit() -> u32 {
    150
}

/// Registration response.
#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub id: String,
    pub registered: bool,
    pub message: String,
}

/// Backend status response.
#[derive(Debug, Serialize)]
pub struct BackendStatus {
    pub id: String,
    pub app: String,
    pub region: String,
    pub ip: String,
    pub port: u16,
    pub healthy: bool,
    pub last_heartbeat_secs: u64,
    pub registered_secs: u64,
}

/// List of backends response.
#[derive(Debug, Serialize)]
pub struct BackendsListResponse {
    pub backends: Vec<BackendStatus>,
    pub total: usize,
}

/// Health response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub registered_backends: usize,
}

/// Registered backend with metadata.
#[derive(Debug, Clone)]
pub struct RegisteredBackend {
    pub backend: Backend,
    pub registered_at: Instant,
    pub last_heartbeat: Instant,
}

/// API Server state.
#[derive(Clone)]
pub struct ApiState {
    /// Registered backends (id -> backend)
    pub backends: Arc<DashMap<String, RegisteredBackend>>,
    /// Heartbeat TTL - backends removed after this time without heartbeat
    pub heartbeat_ttl: Duration,
}

impl ApiState {
    pub fn new(heartbeat_ttl_secs: u64) -> Self {
        Self {
            backends: Arc::new(DashMap::new()),
            heartbeat_ttl: Duration::from_secs(heartbeat_ttl_secs),
        }
    }

    /// Get all healthy backends.
    #[allow(dead_code)]
    pub fn get_healthy_backends(&self) -> Vec<Backend> {
        let now = Instant::now();
        self.backends
            .iter()
            .filter(|entry| now.duration_since(entry.last_heartbeat) < self.heartbeat_ttl)
            .map(|entry| {
                let mut backend = entry.backend.clone();
                backend.healthy = true;
                backend
            })
            .collect()
    }

    /// Get all backends (including unhealthy).
    pub fn get_all_backends(&self) -> Vec<BackendStatus> {
        let now = Instant::now();
        self.backends
            .iter()
            .map(|entry| {
                let healthy =
                    now.duration_since(entry.last_heartbeat) < self.heartbeat_ttl;
                BackendStatus {
                    id: entry.backend.id.clone(),
                    app: entry.backend.app.clone(),
                    region: entry.backend.region.as_str().to_string(),
                    ip: entry.backend.wg_ip.clone(),
                    port: entry.backend.port,
                    healthy,
                    last_heartbeat_secs: now.duration_since(entry.last_heartbeat).as_secs(),
                    registered_secs: now.duration_since(entry.registered_at).as_secs(),
                }
            })
            .collect()
    }

    /// Register or update a backend.
    pub fn register(&self, req: RegisterRequest) -> RegisteredBackend {
        let now = Instant::now();
        let region = RegionCode::from_str(&req.region);
        // Use provided country or derive from region
        let country = req.country.unwrap_or_else(|| region.default_country().to_string());
        let backend = Backend {
            id: req.id.clone(),
            app: req.app,
            region,
            country,
            wg_ip: req.ip,
            port: req.port,
            healthy: true,
            weight: req.weight,
            soft_limit: req.soft_limit,
            hard_limit: req.hard_limit,
        };

        let registered = RegisteredBackend {
            backend,
            registered_at: now,
            last_heartbeat: now,
        };

        self.backends.insert(req.id.clone(), registered.clone());
        registered
    }

    /// Update heartbeat for a backend.
    pub fn heartbeat(&self, id: &str) -> bool {
        if let Some(mut entry) = self.backends.get_mut(id) {
            entry.last_heartbeat = Instant::now();
            true
        } else {
            false
        }
    }

    /// Deregister a backend.
    pub fn deregister(&self, id: &str) -> bool {
        self.backends.remove(id).is_some()
    }

    /// Cleanup expired backends.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = self
            .backends
            .iter()
            .filter(|entry| now.duration_since(entry.last_heartbeat) >= self.heartbeat_ttl)
            .map(|entry| entry.key().clone())
            .collect();

        let count = expired.len();
        for id in expired {
            self.backends.remove(&id);
            tracing::info!("removed expired backend: {}", id);
        }
        count
    }
}

/// API Server for Auto-Discovery.
pub struct ApiServer {
    listen_addr: String,
    state: ApiState,
}

impl ApiServer {
    pub fn new(listen_addr: String, heartbeat_ttl_secs: u64) -> Self {
        Self {
            listen_addr,
            state: ApiState::new(heartbeat_ttl_secs),
        }
    }

    /// Get shared state for use by other components.
    #[allow(dead_code)]
    pub fn state(&self) -> ApiState {
        self.state.clone()
    }

    /// Run the API server.
    ///
    /// The final Ok(()) is excluded from coverage since axum::serve runs forever.
    #[cfg_attr(coverage_nightly, coverage(off))]
    pub async fn run(&self) -> anyhow::Result<()> {
        let app = Router::new()
            // Health endpoint
            .route("/health", get(health_handler))
            // Backend registration
            .route("/api/v1/register", post(register_handler))
            // Heartbeat
            .route("/api/v1/heartbeat/:id", post(heartbeat_handler))
            // Deregister
            .route("/api/v1/backends/:id", delete(deregister_handler))
            // List backends
            .route("/api/v1/backends", get(list_backends_handler))
            // Get specific backend
            .route("/api/v1/backends/:id", get(get_backend_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone());

        let listener = TcpListener::bind(&self.listen_addr).await?;
        tracing::info!("Auto-Discovery API listening on {}", self.listen_addr);

        axum::serve(listener, app).await?;
        Ok(())
    }

    /// Start background cleanup task.
    pub fn start_cleanup_task(&self, interval_secs: u64) {
        let state = self.state.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
            loop {
                interval.tick().await;
                let removed = state.cleanup_expired();
                if removed > 0 {
                    tracing::debug!("cleanup: removed {} expired backends", removed);
                }
            }
        });
    }
}

// Handler functions

async fn health_handler(State(state): State<ApiState>) -> impl IntoResponse {
    let response = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        registered_backends: state.backends.len(),
    };
    Json(response)
}

async fn register_handler(
    State(state): State<ApiState>,
    Json(req): Json<RegisterRequest>,
) -> impl IntoResponse {
    let id = req.id.clone();
    let _registered = state.register(req);

    tracing::info!("registered backend: {}", id);

    let response = RegisterResponse {
        id,
        registered: true,
        message: "Backend registered successfully".to_string(),
    };
    (StatusCode::CREATED, Json(response))
}

async fn heartbeat_handler(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if state.heartbeat(&id) {
        tracing::debug!("heartbeat from: {}", id);
        (
            StatusCode::OK,
            Json(serde_json::json!({
                "id": id,
                "status": "ok"
            })),
        )
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({
                "id": id,
                "error": "backend not registered"
            })),
        )
    }
}

async fn deregister_handler(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if state.deregister(&id) {
        tracing::info!("deregistered backend: {}", id);
        (
            StatusCode::OK,
            Json(serde_json::json!({
                "id": id,
                "deregistered": true
            })),
        )
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({
                "id": id,
                "error": "backend not found"
            })),
        )
    }
}

async fn list_backends_handler(State(state): State<ApiState>) -> impl IntoResponse {
    let backends = state.get_all_backends();
    let total = backends.len();
    Json(BackendsListResponse { backends, total })
}

async fn get_backend_handler(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let now = Instant::now();
    if let Some(entry) = state.backends.get(&id) {
        let healthy =
            now.duration_since(entry.last_heartbeat) < state.heartbeat_ttl;
        let status = BackendStatus {
            id: entry.backend.id.clone(),
            app: entry.backend.app.clone(),
            region: entry.backend.region.as_str().to_string(),
            ip: entry.backend.wg_ip.clone(),
            port: entry.backend.port,
            healthy,
            last_heartbeat_secs: now.duration_since(entry.last_heartbeat).as_secs(),
            registered_secs: now.duration_since(entry.registered_at).as_secs(),
        };
        (StatusCode::OK, Json(serde_json::to_value(status).unwrap()))
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({
                "error": "backend not found"
            })),
        )
    }
}
