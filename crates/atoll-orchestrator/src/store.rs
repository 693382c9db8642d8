//! The network definition store.
//!
//! Network records live in the hosting platform's relational database; the
//! orchestrator only reads bootstrap configuration and writes back
//! activation state. The store is a narrow collaborator so tests can run
//! against an in-memory double.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors from the network store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No record for the requested network name.
    #[error("no network named '{0}' found")]
    NotFound(String),

    /// SQL layer failure, surfaced unchanged.
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),
}

/// A hosted network's database record.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct NetworkRecord {
    /// Database primary key.
    pub id: i32,

    /// Unique network name.
    pub name: String,

    /// Public API endpoint, set while the network is active.
    pub api_url: String,

    /// Private-swarm key material.
    pub swarm_key: String,

    /// When the network was last brought up; cleared on tear-down.
    pub activated_at: Option<DateTime<Utc>>,

    /// Initial dial addresses for peer discovery.
    pub bootstrap_peers: Vec<String>,
}

/// Read/write access to network definitions.
#[async_trait]
pub trait NetworkStore: Send + Sync {
    /// Loads a network record by name.
    async fn get_by_name(&self, name: &str) -> StoreResult<NetworkRecord>;

    /// Records a successful bring-up.
    async fn mark_activated(
        &self,
        name: &str,
        api_url: &str,
        swarm_key: &str,
        activated_at: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Clears activation state after tear-down.
    async fn mark_deactivated(&self, name: &str) -> StoreResult<()>;
}

/// [`NetworkStore`] over Postgres.
pub struct PgNetworkStore {
    pool: PgPool,
}

impl PgNetworkStore {
    /// Connects to the database at `url`.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new().max_connections(5).connect(url).await?;
        Ok(Self { pool })
    }

    /// Wraps an existing pool.
    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NetworkStore for PgNetworkStore {
    async fn get_by_name(&self, name: &str) -> StoreResult<NetworkRecord> {
        sqlx::query_as::<_, NetworkRecord>(
            "SELECT id, name, api_url, swarm_key, activated_at, bootstrap_peers
             FROM hosted_networks WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    async fn mark_activated(
        &self,
        name: &str,
        api_url: &str,
        swarm_key: &str,
        activated_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE hosted_networks
             SET api_url = $2, swarm_key = $3, activated_at = $4
             WHERE name = $1",
        )
        .bind(name)
        .bind(api_url)
        .bind(swarm_key)
        .bind(activated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(name.to_string()));
        }
        Ok(())
    }

    async fn mark_deactivated(&self, name: &str) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE hosted_networks
             SET api_url = '', activated_at = NULL
             WHERE name = $1",
        )
        .bind(name)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(name.to_string()));
        }
        Ok(())
    }
}
