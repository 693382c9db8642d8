//! Test double for the network store.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::store::{NetworkRecord, NetworkStore, StoreError, StoreResult};

/// In-memory [`NetworkStore`] recording activation updates.
#[derive(Default)]
pub struct MockNetworkStore {
    records: Mutex<HashMap<String, NetworkRecord>>,

    /// Recorded `mark_activated` calls as (name, api_url).
    pub activated: Mutex<Vec<(String, String)>>,

    /// Recorded `mark_deactivated` calls.
    pub deactivated: Mutex<Vec<String>>,

    /// When set, every update fails with a database error.
    pub fail_updates: Mutex<bool>,
}

impl MockNetworkStore {
    /// Creates a store holding the given records.
    pub fn with_records(records: Vec<NetworkRecord>) -> Self {
        Self {
            records: Mutex::new(
                records
                    .into_iter()
                    .map(|r| (r.name.clone(), r))
                    .collect(),
            ),
            ..Self::default()
        }
    }

    /// A minimal usable record for tests.
    pub fn record(name: &str, swarm_key: &str, bootstrap_peers: Vec<String>) -> NetworkRecord {
        NetworkRecord {
            id: 1,
            name: name.to_string(),
            api_url: String::new(),
            swarm_key: swarm_key.to_string(),
            activated_at: None,
            bootstrap_peers,
        }
    }
}

#[async_trait]
impl NetworkStore for MockNetworkStore {
    async fn get_by_name(&self, name: &str) -> StoreResult<NetworkRecord> {
        self.records
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    async fn mark_activated(
        &self,
        name: &str,
        api_url: &str,
        swarm_key: &str,
        activated_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        if *self.fail_updates.lock().unwrap() {
            return Err(StoreError::Database(sqlx::Error::PoolClosed));
        }

        let mut records = self.records.lock().unwrap();
        let record = records
            .get_mut(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        record.api_url = api_url.to_string();
        record.swarm_key = swarm_key.to_string();
        record.activated_at = Some(activated_at);

        self.activated
            .lock()
            .unwrap()
            .push((name.to_string(), api_url.to_string()));
        Ok(())
    }

    async fn mark_deactivated(&self, name: &str) -> StoreResult<()> {
        if *self.fail_updates.lock().unwrap() {
            return Err(StoreError::Database(sqlx::Error::PoolClosed));
        }

        let mut records = self.records.lock().unwrap();
        let record = records
            .get_mut(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        record.api_url.clear();
        record.activated_at = None;

        self.deactivated.lock().unwrap().push(name.to_string());
        Ok(())
    }
}
