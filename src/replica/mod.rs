//! Replica Module
//!
//! A replica is one independent, possibly unreliable row store holding a copy
//! of every record. The quorum engine only ever talks to replicas through the
//! [`Replica`] trait.

mod memory;
mod sqlite;
pub mod chaos;

pub use memory::MemoryReplica;
pub use sqlite::SqliteReplica;
pub use chaos::{FailingReplica, LatentReplica, ReadOnlyReplica};

use crate::error::ReplicaError;
use crate::record::Record;

/// Result type for replica calls
pub type ReplicaResult<T> = std::result::Result<T, ReplicaError>;

/// Storage primitives a backing row store must provide
#[async_trait::async_trait]
pub trait Replica: Send + Sync {
    /// Replica name, used in logs and failure reports
    fn name(&self) -> &str;

    /// Return at most the first two records of a partition whose row keys lie
    /// in `lower..=upper`, ascending by row key
    ///
    /// Implementations must not return fewer than two records when more
    /// exist in the range.
    async fn top_two(
        &self,
        partition_key: &str,
        lower: &str,
        upper: &str,
    ) -> ReplicaResult<Vec<Record>>;

    /// Store a new record; fails with [`ReplicaError::Conflict`] when a record
    /// with the same physical row key already exists
    async fn insert(&self, record: Record) -> ReplicaResult<Record>;

    /// Store a record, overwriting any existing one unconditionally
    async fn insert_or_replace(&self, record: Record) -> ReplicaResult<Record>;

    /// Point read of a physical row
    async fn get(&self, partition_key: &str, row_key: &str) -> ReplicaResult<Option<Record>>;
}
