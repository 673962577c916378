//! In-Memory Replica
//!
//! Ordered map of physical records. Used for tests, demos and as the
//! `memory` replica kind in configuration.

use std::collections::BTreeMap;
use tokio::sync::RwLock;

use super::{Replica, ReplicaResult};
use crate::error::ReplicaError;
use crate::record::Record;

/// Type alias for the (partition key, physical row key) index
type RowMap = BTreeMap<(String, String), Record>;

/// Replica backed by an in-process ordered map
pub struct MemoryReplica {
    name: String,
    rows: RwLock<RowMap>,
}

impl MemoryReplica {
    /// Create an empty replica
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rows: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of physical records held
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    /// Check if the replica holds no records
    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    fn stamp(mut record: Record) -> Record {
        record.timestamp = Some(chrono::Utc::now());
        record
    }
}

#[async_trait::async_trait]
impl Replica for MemoryReplica {
    fn name(&self) -> &str {
        &self.name
    }

    async fn top_two(
        &self,
        partition_key: &str,
        lower: &str,
        upper: &str,
    ) -> ReplicaResult<Vec<Record>> {
        let rows = self.rows.read().await;
        let start = (partition_key.to_string(), lower.to_string());
        let end = (partition_key.to_string(), upper.to_string());

        Ok(rows
            .range(start..=end)
            .take(2)
            .map(|(_, record)| record.clone())
            .collect())
    }

    async fn insert(&self, record: Record) -> ReplicaResult<Record> {
        let mut rows = self.rows.write().await;
        let key = (record.partition_key.clone(), record.row_key.clone());
        if rows.contains_key(&key) {
            return Err(ReplicaError::Conflict { row_key: record.row_key });
        }

        let record = Self::stamp(record);
        rows.insert(key, record.clone());
        Ok(record)
    }

    async fn insert_or_replace(&self, record: Record) -> ReplicaResult<Record> {
        let mut rows = self.rows.write().await;
        let key = (record.partition_key.clone(), record.row_key.clone());

        let record = Self::stamp(record);
        rows.insert(key, record.clone());
        Ok(record)
    }

    async fn get(&self, partition_key: &str, row_key: &str) -> ReplicaResult<Option<Record>> {
        let rows = self.rows.read().await;
        Ok(rows
            .get(&(partition_key.to_string(), row_key.to_string()))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;
    use crate::record::TransactionId;
    use crate::version::{self, STARTING_VERSION};

    fn record(pk: &str, rk: &str, version: i64) -> Record {
        Record::for_write(&Entity::new(pk, rk), version, false, TransactionId::new())
    }

    #[tokio::test]
    async fn test_insert_conflicts_on_existing_row() {
        let replica = MemoryReplica::new("mem");
        let first = replica.insert(record("pk", "rk", STARTING_VERSION)).await.unwrap();
        assert!(first.timestamp.is_some());

        let err = replica
            .insert(record("pk", "rk", STARTING_VERSION))
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        // Unconditional overwrite replaces the row
        let replacement = record("pk", "rk", STARTING_VERSION);
        let txn = replacement.transaction_id();
        replica.insert_or_replace(replacement).await.unwrap();
        let stored = replica.get("pk", "rk_8888888888888888888").await.unwrap().unwrap();
        assert_eq!(stored.transaction_id(), txn);
        assert_eq!(replica.len().await, 1);
    }

    #[tokio::test]
    async fn test_top_two_returns_latest_versions() {
        let replica = MemoryReplica::new("mem");
        for i in 0..4 {
            replica.insert(record("pk", "rk", STARTING_VERSION - i)).await.unwrap();
        }
        // Neighbouring keys and partitions must not leak into the range
        replica.insert(record("pk", "rj", STARTING_VERSION)).await.unwrap();
        replica.insert(record("other", "rk", STARTING_VERSION)).await.unwrap();

        let (lower, upper) = version::key_range("rk");
        let rows = replica.top_two("pk", &lower, &upper).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].version(), STARTING_VERSION - 3);
        assert_eq!(rows[1].version(), STARTING_VERSION - 2);

        let (lower, upper) = version::key_range("missing");
        assert!(replica.top_two("pk", &lower, &upper).await.unwrap().is_empty());
        assert_eq!(replica.len().await, 6);
    }
}
