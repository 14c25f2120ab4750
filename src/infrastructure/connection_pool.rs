//! Connection Pool
//!
//! Maintains persistent connections to backends for reduced latency.

use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;

/// Connection pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum connections per backend
    pub max_connections: usize,
    /// Minimum idle connections to maintain
    pub min_idle: usize,
    /// Maximum time a connection can be idle
    pub idle_timeout: Duration,
    /// Maximum connection lifetime
    pub max_lifetime: Duration,
    /// Connection timeout
    pub connect_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_idle: 2,
            idle_timeout: Duration::from_secs(300),
            max_lifetime: Duration::from_secs(3600),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// A pooled connection.
pub struct PooledConnection {
    /// The underlying TCP stream
    pub stream: TcpStream,
    /// When this connection was created
    created_at: Instant,
    /// When this connection was last used
    last_used: Instant,
    /// Backend ID this connection belongs to
    backend_id: String,
}

impl PooledConnection {
    fn new(stream: TcpStream, backend_id: String) -> Self {
        let now = Instant::now();
        Self {
            stream,
            created_at: now,
            last_used: now,
            backend_id,
        }
    }

    /// Check if this connection has exceeded its lifetime.
    pub fn is_expired(&self, max_lifetime: Duration) -> bool {
        self.created_at.elapsed() > max_lifetime
    }

    /// Check if this connection has been idle too long.
    pub fn is_idle_expired(&self, idle_timeout: Duration) -> bool {
        self.last_used.elapsed() > idle_timeout
    }

    /// Touch the connection to update last_used.
    pub fn touch(&mut self) {
        self.last_used = Instant::now();
    }
}

/// Per-backend connection pool.
struct BackendPool {
    /// Available connections
    connections: Mutex<VecDeque<PooledConnection>>,
    /// Number of connections currently in use
    in_use: AtomicUsize,
    /// Backend address
    addr: String,
}

impl BackendPool {
    fn new(addr: String) -> Self {
        Self {
            connections: Mutex::new(VecDeque::new()),
            in_use: AtomicUsize::new(0),
            addr,
        }
    }

    /// Get total connections (idle + in_use).
    fn total_connections(&self) -> usize {
        // Note: this is approximate due to async nature
        self.in_use.load(Ordering::Relaxed)
    }
}

/// Connection pool manager.
///
/// Maintains pools of persistent connections to backends.
pub struct ConnectionPool {
    config: PoolConfig,
    /// Per-backend pools
    pools: DashMap<String, Arc<BackendPool>>,
}

impl ConnectionPool {
    /// Create a new connection pool.
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            pools: DashMap::new(),
        }
    }

    /// Get or create a pool for a backend.
    fn get_or_create_pool(&self, backend_id: &str, addr: &str) -> Arc<BackendPool> {
        self.pools
            .entry(backend_id.to_string())
            .or_insert_with(|| Arc::new(BackendPool::new(addr.to_string())))
            .clone()
    }

    /// Acquire a connection from the pool or create a new one.
    pub async fn acquire(&self, backend_id: &str, addr: &str) -> Result<PooledConnection, PoolError> {
        let pool = self.get_or_create_pool(backend_id, addr);

        // Try to get an existing connection
        {
            let mut connections = pool.connections.lock().await;
            while let Some(mut conn) = connections.pop_front() {
                // Check if connection is still valid
                if conn.is_expired(self.config.max_lifetime) {
                    tracing::debug!("discarding expired connection to {}", backend_id);
                    let _ = conn.stream.shutdown().await;
                    continue;
                }
                if conn.is_idle_expired(self.config.idle_timeout) {
                    tracing::debug!("discarding idle connection to {}", backend_id);
                    let _ = conn.stream.shutdown().await;
                    continue;
                }

                // Connection is valid
                conn.touch();
                pool.in_use.fetch_add(1, Ordering::Relaxed);
                return Ok(conn);
            }
        }

        // Check if we can create a new connection
        let current = pool.total_connections();
        if current >= self.config.max_connections {
            return Err(PoolError::PoolExhausted);
        }

        // Create new connection
        let stream = match tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect(addr),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(PoolError::ConnectError(e.to_string())),
            Err(_) => return Err(PoolError::ConnectTimeout),
        };

        pool.in_use.fetch_add(1, Ordering::Relaxed);
        Ok(PooledConnection::new(stream, backend_id.to_string()))
    }

    /// Release a connection back to the pool.
    pub async fn release(&self, mut conn: PooledConnection) {
        let backend_id = conn.backend_id.clone();

        if let Some(pool) = self.pools.get(&backend_id) {
            pool.in_use.fetch_sub(1, Ordering::Relaxed);

            // Check if connection is still valid
            if conn.is_expired(self.config.max_lifetime) {
                let _ = conn.stream.shutdown().await;
                return;
            }

            conn.touch();

            let mut connections = pool.connections.lock().await;
            if connections.len() < self.config.max_connections {
                connections.push_back(conn);
            } else {
                // Pool is full, close connection
                drop(conn);
            }
        }
    }

    /// Discard a connection (don't return to pool).
    pub async fn discard(&self, mut conn: PooledConnection) {
        let backend_id = conn.backend_id.clone();

        if let Some(pool) = self.pools.get(&backend_id) {
            pool.in_use.fetch_sub(1, Ordering::Relaxed);
        }

        let _ = conn.stream.shutdown().await;
    }

    /// Get pool statistics for a backend.
    pub async fn stats(&self, backend_id: &str) -> Option<PoolStats> {
        self.pools.get(backend_id).map(|pool| {
            PoolStats {
                in_use: pool.in_use.load(Ordering::Relaxed),
                addr: pool.addr.clone(),
            }
        })
    }

    /// Get all pool statistics.
    pub async fn all_stats(&self) -> Vec<(String, PoolStats)> {
        self.pools
            .iter()
            .map(|entry| {
                (
                    entry.key().clone(),
                    PoolStats {
                        in_use: entry.in_use.load(Ordering::Relaxed),
                        addr: entry.addr.clone(),
                    },
                )
            })
            .collect()
    }

    /// Start periodic cleanup of idle connections.
    #[cfg_attr(coverage_nightly, coverage(off))]
    pub fn start_cleanup(&self, interval: Duration)
    where
        Self: 'static,
    {
        let pools = self.pools.clone();
        let config = self.config.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);

            loop {
                ticker.tick().await;

                for entry in pools.iter() {
                    let pool = entry.value();
                    let mut connections = pool.connections.lock().await;
                    let before = connections.len();

                    connections.retain(|conn| {
                        !conn.is_idle_expired(config.idle_timeout)
                            && !conn.is_expired(config.max_lifetime)
                    });

                    let removed = before - connections.len();
                    if removed > 0 {
                        tracing::debug!(
                            "pool cleanup for {}: removed {} idle connections",
                            entry.key(),
                            removed
                        );
                    }
                }
            }
        });
    }

    /// Clear all pools.
    pub async fn clear(&self) {
        for entry in self.pools.iter() {
            let mut connections = entry.connections.lock().await;
            for mut conn in connections.drain(..) {
                let _ = conn.stream.shutdown().await;
            }
        }
        self.pools.clear();
    }
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

/// Pool statistics.
#[derive(Debug, Clone)]
pub struct PoolStats {
    /// Connections currently in use
    pub in_use: usize,
    /// Backend address
    pub addr: String,
}

/// Pool errors.
#[derive(Debug, Clone, PartialEq)]
pub enum PoolError {
    /// Pool has no available connections
    PoolExhausted,
    /// Connection failed
    ConnectError(String),
    /// Connection timed out
    ConnectTimeout,
}

impl std::fmt::Display for PoolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolError::PoolExhausted => write!(f, "connection pool exhausted"),
            PoolError::ConnectError(e) => write!(f, "connection error: {}", e),
            PoolError::ConnectTimeout => write!(f, "connection timeout"),
        }
    }
}

impl std::error::Error for PoolError {}
