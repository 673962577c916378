//! Fault-Injection Replicas
//!
//! Wrappers that make a replica fail, slow down or refuse writes. They are
//! used by the test-suite and can be enabled per replica in configuration to
//! rehearse degraded deployments.

use std::sync::Arc;
use std::time::Duration;
use rand::Rng;

use super::{Replica, ReplicaResult};
use crate::error::ReplicaError;
use crate::record::Record;

/// Replica whose every call fails with the same error
pub struct FailingReplica {
    name: String,
    error: ReplicaError,
}

impl FailingReplica {
    pub fn new(name: impl Into<String>, error: ReplicaError) -> Self {
        Self {
            name: name.into(),
            error,
        }
    }

    /// Failing replica that reports itself as unreachable
    pub fn unavailable(name: impl Into<String>) -> Self {
        let name = name.into();
        let error = ReplicaError::Unavailable(format!("{} is unreachable", name));
        Self::new(name, error)
    }
}

#[async_trait::async_trait]
impl Replica for FailingReplica {
    fn name(&self) -> &str {
        &self.name
    }

    async fn top_two(&self, _: &str, _: &str, _: &str) -> ReplicaResult<Vec<Record>> {
        Err(self.error.clone())
    }

    async fn insert(&self, _: Record) -> ReplicaResult<Record> {
        Err(self.error.clone())
    }

    async fn insert_or_replace(&self, _: Record) -> ReplicaResult<Record> {
        Err(self.error.clone())
    }

    async fn get(&self, _: &str, _: &str) -> ReplicaResult<Option<Record>> {
        Err(self.error.clone())
    }
}

/// Replica that delays every call before delegating
pub struct LatentReplica {
    inner: Arc<dyn Replica>,
    latency: Duration,
    jitter: Duration,
}

impl LatentReplica {
    pub fn new(inner: Arc<dyn Replica>, latency: Duration) -> Self {
        Self {
            inner,
            latency,
            jitter: Duration::ZERO,
        }
    }

    /// Add up to `jitter` of uniformly random extra delay per call
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    fn next_delay(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.latency;
        }
        let extra = rand::thread_rng().gen_range(0..=self.jitter.as_micros() as u64);
        self.latency + Duration::from_micros(extra)
    }

    async fn delay(&self) {
        let delay = self.next_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait::async_trait]
impl Replica for LatentReplica {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn top_two(
        &self,
        partition_key: &str,
        lower: &str,
        upper: &str,
    ) -> ReplicaResult<Vec<Record>> {
        self.delay().await;
        self.inner.top_two(partition_key, lower, upper).await
    }

    async fn insert(&self, record: Record) -> ReplicaResult<Record> {
        self.delay().await;
        self.inner.insert(record).await
    }

    async fn insert_or_replace(&self, record: Record) -> ReplicaResult<Record> {
        self.delay().await;
        self.inner.insert_or_replace(record).await
    }

    async fn get(&self, partition_key: &str, row_key: &str) -> ReplicaResult<Option<Record>> {
        self.delay().await;
        self.inner.get(partition_key, row_key).await
    }
}

/// Replica that serves reads but rejects every write
pub struct ReadOnlyReplica {
    inner: Arc<dyn Replica>,
    error: ReplicaError,
}

impl ReadOnlyReplica {
    pub fn new(inner: Arc<dyn Replica>, error: ReplicaError) -> Self {
        Self { inner, error }
    }
}

#[async_trait::async_trait]
impl Replica for ReadOnlyReplica {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn top_two(
        &self,
        partition_key: &str,
        lower: &str,
        upper: &str,
    ) -> ReplicaResult<Vec<Record>> {
        self.inner.top_two(partition_key, lower, upper).await
    }

    async fn insert(&self, _: Record) -> ReplicaResult<Record> {
        Err(self.error.clone())
    }

    async fn insert_or_replace(&self, _: Record) -> ReplicaResult<Record> {
        Err(self.error.clone())
    }

    async fn get(&self, partition_key: &str, row_key: &str) -> ReplicaResult<Option<Record>> {
        self.inner.get(partition_key, row_key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;
    use crate::record::TransactionId;
    use crate::replica::MemoryReplica;
    use crate::version::{self, STARTING_VERSION};

    fn record() -> Record {
        Record::for_write(&Entity::new("pk", "rk"), STARTING_VERSION, false, TransactionId::new())
    }

    #[tokio::test]
    async fn test_failing_replica() {
        let replica = FailingReplica::unavailable("down");
        assert_eq!(replica.name(), "down");
        assert!(matches!(
            replica.insert(record()).await,
            Err(ReplicaError::Unavailable(_))
        ));
        assert!(replica.top_two("pk", "a", "z").await.is_err());
    }

    #[tokio::test]
    async fn test_latent_replica_delays() {
        let inner: Arc<dyn Replica> = Arc::new(MemoryReplica::new("slow"));
        let replica = LatentReplica::new(inner, Duration::from_millis(30))
            .with_jitter(Duration::from_millis(5));

        let start = std::time::Instant::now();
        replica.insert(record()).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert_eq!(replica.name(), "slow");
    }

    #[tokio::test]
    async fn test_read_only_replica() {
        let inner = Arc::new(MemoryReplica::new("ro"));
        inner.insert(record()).await.unwrap();

        let replica = ReadOnlyReplica::new(
            inner.clone(),
            ReplicaError::Storage("read-only".into()),
        );
        let (lower, upper) = version::key_range("rk");
        assert_eq!(replica.top_two("pk", &lower, &upper).await.unwrap().len(), 1);
        assert!(replica.insert_or_replace(record()).await.is_err());
        assert_eq!(inner.len().await, 1);
    }
}
