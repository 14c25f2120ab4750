//! Corrosion Backend Repository
//!
//! Implements BackendRepository using Corrosion's HTTP API for distributed SQLite.
//! Corrosion provides gossip-based replication across multiple nodes.
//!
//! See: https://github.com/superfly/corrosion

use crate::domain::entities::Backend;
use crate::domain::ports::BackendRepository;
use crate::domain::value_objects::RegionCode;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{sleep, Duration};

/// Response from Corrosion's query API.
#[derive(Debug, Deserialize)]
struct CorrosionQueryResponse {
    #[allow(dead_code)]
    columns: Vec<String>,
    rows: Vec<Vec<serde_json::Value>>,
}

/// Response from Corrosion's transaction API.
#[derive(Debug, Deserialize)]
struct CorrosionTransactionResponse {
    #[allow(dead_code)]
    results: Vec<TransactionResult>,
    #[allow(dead_code)]
    time: f64,
}

#[derive(Debug, Deserialize)]
struct TransactionResult {
    #[allow(dead_code)]
    rows_affected: i64,
    #[allow(dead_code)]
    time: f64,
}

/// Request body for Corrosion subscriptions.
/// Note: Subscriptions are planned for future implementation.
#[derive(Debug, Serialize)]
#[allow(dead_code)]
struct SubscriptionRequest {
    /// SQL query to subscribe to
    sql: String,
}

/// Configuration for Corrosion connection.
#[derive(Debug, Clone)]
pub struct CorrosionConfig {
    /// Base URL for Corrosion HTTP API (e.g., "http://localhost:8080")
    pub api_url: String,
    /// Polling interval in seconds (used as fallback if subscriptions fail)
    pub poll_interval_secs: u64,
}

impl Default for CorrosionConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8080".to_string(),
            poll_interval_secs: 5,
        }
    }
}

/// Corrosion-backed backend repository.
///
/// Uses Corrosion's HTTP API to query the distributed SQLite database.
/// Changes made on any node propagate to all nodes via gossip protocol.
pub struct CorrosionBackendRepository {
    config: CorrosionConfig,
    client: reqwest::Client,
    backends: Arc<RwLock<Vec<Backend>>>,
    version: Arc<AtomicU64>,
}

impl CorrosionBackendRepository {
    /// Create a new Corrosion repository with the given configuration.
    pub fn new(config: CorrosionConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            backends: Arc::new(RwLock::new(Vec::new())),
            version: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start the background sync task.
    ///
    /// This spawns a Tokio task that periodically polls Corrosion for backend updates.
    /// In production, this could be replaced with HTTP streaming subscriptions.
    pub fn start_sync(&self) {
        let api_url = self.config.api_url.clone();
        let poll_interval = self.config.poll_interval_secs;
        let backends = self.backends.clone();
        let version = self.version.clone();
        let client = self.client.clone();

        tokio::spawn(async move {
            loop {
                match Self::fetch_backends(&client, &api_url).await {
                    Ok(new_backends) => {
                        let count = new_backends.len();
                        {
                            let mut guard = backends.write().await;
                            *guard = new_backends;
                        }
                        let new_version = version.fetch_add(1, Ordering::SeqCst) + 1;
                        tracing::info!(
                            "corrosion sync ok, version={} backends={}",
                            new_version,
                            count
                        );
                    }
                    Err(e) => {
                        tracing::error!("corrosion sync error: {:?}", e);
                    }
                }

                sleep(Duration::from_secs(poll_interval)).await;
            }
        });
    }

    /// Fetch backends from Corrosion's query API.
    async fn fetch_backends(
        client: &reqwest::Client,
        api_url: &str,
    ) -> anyhow::Result<Vec<Backend>> {
        let query = "SELECT id, app, region, country, wg_ip, port, healthy, weight, soft_limit, hard_limit \
                     FROM backends \
                     WHERE deleted IS NULL OR deleted = 0";

        let url = format!("{}/v1/queries", api_url);
        let response = client
            .post(&url)
            .header("content-type", "application/json")
            .body(format!("[\"{}\"]", query.replace('"', "\\\"")))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Corrosion query failed: {} - {}", status, body);
        }

        let data: CorrosionQueryResponse = response.json().await?;
        let backends = Self::parse_backends(data)?;

        Ok(backends)
    }

    /// Parse Corrosion query response into Backend entities.
    fn parse_backends(response: CorrosionQueryResponse) -> anyhow::Result<Vec<Backend>> {
        let mut backends = Vec::new();

        for row in response.rows {
            if row.len() < 10 {
                continue;
            }

            let backend = Backend {
                id: row[0].as_str().unwrap_or_default().to_string(),
                app: row[1].as_str().unwrap_or_default().to_string(),
                region: RegionCode::from_str(row[2].as_str().unwrap_or("us")),
                country: row[3].as_str().unwrap_or("US").to_string(),
                wg_ip: row[4].as_str().unwrap_or_default().to_string(),
                port: row[5].as_i64().unwrap_or(8080) as u16,
                healthy: row[6].as_i64().unwrap_or(0) != 0,
                weight: row[7].as_i64().unwrap_or(1) as u8,
                soft_limit: row[8].as_i64().unwrap_or(100) as u32,
                hard_limit: row[9].as_i64().unwrap_or(150) as u32,
            };

            backends.push(backend);
        }

        Ok(backends)
    }

    /// Execute a transaction on Corrosion (write operation).
    ///
    /// Changes are propagated to all nodes in the cluster via gossip.
    #[allow(dead_code)]
    pub async fn execute_transaction(&self, statements: Vec<String>) -> anyhow::Result<()> {
        let url = format!("{}/v1/transactions", self.config.api_url);

        let body = serde_json::to_string(&statements)?;

        let response = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Corrosion transaction failed: {} - {}", status, body);
        }

        let _result: CorrosionTransactionResponse = response.json().await?;
        Ok(())
    }

    /// Register a backend in Corrosion (for Auto-Discovery integration).
    #[allow(dead_code)]
    pub async fn register_backend(&self, backend: &Backend) -> anyhow::Result<()> {
        let sql = format!(
            "INSERT OR REPLACE INTO backends (id, app, region, country, wg_ip, port, healthy, weight, soft_limit, hard_limit, deleted) \
             VALUES ('{}', '{}', '{}', '{}', '{}', {}, {}, {}, {}, {}, 0)",
            backend.id,
            backend.app,
            backend.region.as_str(),
            backend.country,
            backend.wg_ip,
            backend.port,
            if backend.healthy { 1 } else { 0 },
            backend.weight,
            backend.soft_limit,
            backend.hard_limit
        );

        self.execute_transaction(vec![sql]).await
    }

    /// Mark a backend as deleted in Corrosion.
    #[allow(dead_code)]
    pub async fn deregister_backend(&self, id: &str) -> anyhow::Result<()> {
        let sql = format!("UPDATE backends SET deleted = 1 WHERE id = '{}'", id);
        self.execute_transaction(vec![sql]).await
    }

    /// Update backend health status.
    #[allow(dead_code)]
    pub async fn update_health(&self, id: &str, healthy: bool) -> anyhow::Result<()> {
        let sql = format!(
            "UPDATE backends SET healthy = {} WHERE id = '{}'",
            if healthy { 1 } else { 0 },
            id
        );
        self.execute_transaction(vec![sql]).await
    }
}

#[async_trait]
impl BackendRepository for CorrosionBackendRepository {
    async fn get_all(&self) -> Vec<Backend> {
        self.backends.read().await.clone()
    }

    async fn get_by_id(&self, id: &str) -> Option<Backend> {
        self.backends
            .read()
            .await
            .iter()
            .find(|b| b.id == id)
            .cloned()
    }

    async fn get_healthy(&self) -> Vec<Backend> {
        self.backends
            .read()
            .await
            .iter()
            .filter(|b| b.healthy)
            .cloned()
            .collect()
    }

    async fn get_version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }
}
