//! Test helpers shared by the quorum and table tests

use std::sync::Arc;
use std::time::Duration;

use crate::entity::Entity;
use crate::record::{Record, TransactionId};
use crate::replica::{MemoryReplica, Replica};
use crate::version::{self, STARTING_VERSION};

/// Fresh in-memory replicas named `replica-0`, `replica-1`, ...
pub fn memory_replicas(count: usize) -> Vec<Arc<MemoryReplica>> {
    (0..count)
        .map(|i| Arc::new(MemoryReplica::new(format!("replica-{}", i))))
        .collect()
}

pub fn as_dyn(replicas: &[Arc<MemoryReplica>]) -> Vec<Arc<dyn Replica>> {
    replicas
        .iter()
        .map(|r| Arc::clone(r) as Arc<dyn Replica>)
        .collect()
}

/// Entity with a unique key and a couple of properties
pub fn random_entity() -> Entity {
    Entity::new(uuid::Uuid::new_v4().to_string(), uuid::Uuid::new_v4().to_string())
        .with_property("name", "wolf")
        .with_property("payload", uuid::Uuid::new_v4().to_string())
}

/// Version number of the `n`th write of an entity, starting at 1
pub fn nth_version(n: i64) -> i64 {
    STARTING_VERSION + 1 - n
}

/// A record as the `n`th write of `entity` would have produced it, with its
/// own transaction and distinct payload
pub fn fake_record(entity: &Entity, n: i64) -> Record {
    let entity = entity
        .clone()
        .with_property("payload", uuid::Uuid::new_v4().to_string());
    Record::for_write(&entity, nth_version(n), false, TransactionId::new())
}

/// Top-two view of a key on a single replica
pub async fn rows_of(replica: &MemoryReplica, entity: &Entity) -> Vec<Record> {
    let (lower, upper) = version::key_range(&entity.row_key);
    replica
        .top_two(&entity.partition_key, &lower, &upper)
        .await
        .unwrap()
}

/// Poll `check` until it holds or two seconds pass
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
