//! Quorum Table
//!
//! Caller-facing facade over a set of replicas. Validates requests at the
//! boundary, runs them through the quorum engine and sanitizes the results.

use std::sync::Arc;

use crate::entity::Entity;
use crate::error::{Error, Result};
use crate::quorum::{resolver, writer, ReplicaSet, WriteKind};
use crate::record::{is_reserved, Record, RESERVED_PREFIX};
use crate::replica::{Replica, ReplicaResult};
use crate::sanitize::{sanitize, sanitize_write};
use crate::version;

/// Minimum number of replicas a table accepts
pub const MIN_REPLICAS: usize = 3;

/// Single-entity operation
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Insert(Entity),
    Replace(Entity),
    Merge(Entity),
    InsertOrReplace(Entity),
    InsertOrMerge(Entity),
    Delete(Entity),
    Retrieve { partition_key: String, row_key: String },
}

impl Operation {
    pub fn retrieve(partition_key: impl Into<String>, row_key: impl Into<String>) -> Self {
        Operation::Retrieve {
            partition_key: partition_key.into(),
            row_key: row_key.into(),
        }
    }

    /// Build the write operation of `kind`
    pub fn write(kind: WriteKind, entity: Entity) -> Self {
        match kind {
            WriteKind::Insert => Operation::Insert(entity),
            WriteKind::Replace => Operation::Replace(entity),
            WriteKind::Merge => Operation::Merge(entity),
            WriteKind::InsertOrReplace => Operation::InsertOrReplace(entity),
            WriteKind::InsertOrMerge => Operation::InsertOrMerge(entity),
            WriteKind::Delete => Operation::Delete(entity),
        }
    }

    /// Write kind and entity, `None` for a retrieve
    pub fn into_write(self) -> Option<(WriteKind, Entity)> {
        match self {
            Operation::Insert(e) => Some((WriteKind::Insert, e)),
            Operation::Replace(e) => Some((WriteKind::Replace, e)),
            Operation::Merge(e) => Some((WriteKind::Merge, e)),
            Operation::InsertOrReplace(e) => Some((WriteKind::InsertOrReplace, e)),
            Operation::InsertOrMerge(e) => Some((WriteKind::InsertOrMerge, e)),
            Operation::Delete(e) => Some((WriteKind::Delete, e)),
            Operation::Retrieve { .. } => None,
        }
    }
}

/// Raw rows of one replica, as returned by [`QuorumTable::inspect`]
#[derive(Debug)]
pub struct ReplicaView {
    pub replica: String,
    pub rows: ReplicaResult<Vec<Record>>,
}

/// Table replicated over a quorum of independent replicas
#[derive(Clone)]
pub struct QuorumTable {
    replicas: ReplicaSet,
}

impl QuorumTable {
    /// Create a table over `replicas`; at least [`MIN_REPLICAS`] are required
    pub fn new(replicas: Vec<Arc<dyn Replica>>) -> Result<Self> {
        if replicas.len() < MIN_REPLICAS {
            return Err(Error::Config(format!(
                "at least {} replicas are required, got {}",
                MIN_REPLICAS,
                replicas.len()
            )));
        }

        let replicas = ReplicaSet::new(replicas);
        tracing::info!(
            "Quorum table over {} replicas (quorum {})",
            replicas.len(),
            replicas.quorum()
        );
        Ok(Self { replicas })
    }

    pub fn replica_count(&self) -> usize {
        self.replicas.len()
    }

    pub fn quorum(&self) -> usize {
        self.replicas.quorum()
    }

    pub fn replica_names(&self) -> Vec<String> {
        self.replicas.iter().map(|r| r.name().to_string()).collect()
    }

    /// Insert a new entity; fails with [`Error::AlreadyExists`] on a live row
    pub async fn insert(&self, entity: Entity) -> Result<Entity> {
        self.write(WriteKind::Insert, entity).await
    }

    /// Replace an existing entity; requires a matching ETag
    pub async fn replace(&self, entity: Entity) -> Result<Entity> {
        self.write(WriteKind::Replace, entity).await
    }

    /// Merge properties into an existing entity; requires a matching ETag
    pub async fn merge(&self, entity: Entity) -> Result<Entity> {
        self.write(WriteKind::Merge, entity).await
    }

    pub async fn insert_or_replace(&self, entity: Entity) -> Result<Entity> {
        self.write(WriteKind::InsertOrReplace, entity).await
    }

    pub async fn insert_or_merge(&self, entity: Entity) -> Result<Entity> {
        self.write(WriteKind::InsertOrMerge, entity).await
    }

    /// Delete an existing entity; requires a matching ETag
    ///
    /// The returned entity carries no ETag.
    pub async fn delete(&self, entity: Entity) -> Result<Entity> {
        self.write(WriteKind::Delete, entity).await
    }

    /// Current value of a key, `None` if it does not exist or was deleted
    pub async fn retrieve(&self, partition_key: &str, row_key: &str) -> Result<Option<Entity>> {
        Ok(self
            .retrieve_raw(partition_key, row_key)
            .await?
            .map(|record| sanitize(&record)))
    }

    /// Current physical record of a key, metadata included
    pub async fn retrieve_raw(&self, partition_key: &str, row_key: &str) -> Result<Option<Record>> {
        let consensus = resolver::resolve(&self.replicas, partition_key, row_key).await?;
        Ok(consensus.filter(|record| !record.is_deleted()))
    }

    /// Run a write of any kind
    pub async fn write(&self, kind: WriteKind, entity: Entity) -> Result<Entity> {
        validate_properties(&entity)?;
        let record = writer::write(&self.replicas, &entity, kind).await?;
        Ok(sanitize_write(&record, kind))
    }

    /// Dispatch an [`Operation`]; only a retrieve can return `None`
    pub async fn execute(&self, operation: Operation) -> Result<Option<Entity>> {
        match operation {
            Operation::Retrieve { partition_key, row_key } => {
                self.retrieve(&partition_key, &row_key).await
            }
            write => match write.into_write() {
                Some((kind, entity)) => self.write(kind, entity).await.map(Some),
                None => Err(Error::Internal("retrieve dispatched as write".into())),
            },
        }
    }

    /// Top two physical rows of a key on every replica, without consensus
    pub async fn inspect(&self, partition_key: &str, row_key: &str) -> Vec<ReplicaView> {
        let (lower, upper) = version::key_range(row_key);
        let reads = self.replicas.iter().map(|replica| {
            let (lower, upper) = (&lower, &upper);
            async move {
                ReplicaView {
                    replica: replica.name().to_string(),
                    rows: replica.top_two(partition_key, lower, upper).await,
                }
            }
        });
        futures::future::join_all(reads).await
    }
}

/// Reject properties that would shadow record metadata
fn validate_properties(entity: &Entity) -> Result<()> {
    match entity.properties.keys().find(|name| is_reserved(name)) {
        Some(name) => Err(Error::Validation(format!(
            "property {:?} uses the reserved prefix {}",
            name, RESERVED_PREFIX
        ))),
        None => Ok(()),
    }
}
