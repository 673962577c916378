//! Quorum Read Resolver
//!
//! Decides the current record of a logical key. Every replica is asked for
//! the two newest physical rows of the key and responses are tallied in
//! completion order:
//!
//! - a quorum of failures fails the read
//! - a quorum of newest rows sharing one transaction is the consensus
//! - a quorum of replicas with no row means the key does not exist
//!
//! When none of these fire, the full tally of every replica decides (final
//! consensus). A found consensus schedules read repair in the background.

use crate::error::{Error, ReplicaFailure, Result};
use crate::record::Record;
use crate::version;

use super::repair;
use super::{quorum_groups, Candidate, FanOut, ReplicaSet};

/// Responses observed so far by one read
#[derive(Default)]
struct Tally {
    failures: Vec<ReplicaFailure>,
    succeeded: usize,
    /// Newest row of every replica that has one
    latest: Vec<Candidate>,
    /// Up to two rows of every replica
    all: Vec<Candidate>,
}

impl Tally {
    fn record_rows(&mut self, replica: usize, rows: Vec<Record>) {
        self.succeeded += 1;
        for (position, record) in rows.into_iter().take(2).enumerate() {
            if position == 0 {
                self.latest.push(Candidate { replica, record: record.clone() });
            }
            self.all.push(Candidate { replica, record });
        }
    }
}

/// Outcome of the early phase
enum Early {
    Found(Record),
    NotFound,
    Undecided,
}

/// Resolve the consensus record of a key, tombstones included
///
/// Returns `Ok(None)` when a quorum agrees the key has never been written.
pub async fn resolve(
    replicas: &ReplicaSet,
    partition_key: &str,
    row_key: &str,
) -> Result<Option<Record>> {
    let (lower, upper) = version::key_range(row_key);
    let (pk, rk) = (partition_key.to_string(), row_key.to_string());

    let mut fanout = FanOut::issue(replicas, |replica| {
        let (pk, rk) = (pk.clone(), rk.clone());
        let (lower, upper) = (lower.clone(), upper.clone());
        async move {
            // Longer keys such as `<rk>_5x` sort inside the range too
            replica.top_two(&pk, &lower, &upper).await.map(|rows| {
                rows.into_iter()
                    .filter(|record| record.logical_row_key() == rk)
                    .collect::<Vec<_>>()
            })
        }
    });
    let mut tally = Tally::default();

    let consensus = match early_consensus(replicas, &mut fanout, &mut tally).await? {
        Early::Found(record) => {
            tracing::debug!(
                "Early consensus for {}/{} at version {}",
                partition_key,
                row_key,
                record.version()
            );
            Some(record)
        }
        Early::NotFound => {
            tracing::debug!("Quorum holds no row for {}/{}", partition_key, row_key);
            return Ok(None);
        }
        Early::Undecided => final_consensus(replicas, &tally)?,
    };

    if let Some(record) = &consensus {
        repair::spawn_read_repair(replicas.clone(), fanout, tally.all, record.clone());
    }

    Ok(consensus)
}

/// Consume responses until a quorum decides or every replica has answered
async fn early_consensus(
    replicas: &ReplicaSet,
    fanout: &mut FanOut<Vec<Record>>,
    tally: &mut Tally,
) -> Result<Early> {
    let quorum = replicas.quorum();

    while let Some((index, response)) = fanout.next().await {
        match response {
            Err(error) => {
                tracing::debug!("Read from replica {} failed: {}", replicas.name(index), error);
                tally.failures.push(ReplicaFailure {
                    replica: replicas.name(index).to_string(),
                    error,
                });
                if tally.failures.len() >= quorum {
                    return Err(Error::QuorumFailure(std::mem::take(&mut tally.failures)));
                }
            }
            Ok(rows) => {
                tally.record_rows(index, rows);
                if tally.succeeded < quorum {
                    continue;
                }

                if tally.latest.len() >= quorum {
                    if let Some(record) = quorum_groups(&tally.latest, quorum).first() {
                        return Ok(Early::Found((*record).clone()));
                    }
                }
                if tally.succeeded - tally.latest.len() >= quorum {
                    return Ok(Early::NotFound);
                }
            }
        }
    }

    Ok(Early::Undecided)
}

/// Decide from the complete tally of all replicas
fn final_consensus(replicas: &ReplicaSet, tally: &Tally) -> Result<Option<Record>> {
    if !tally.failures.is_empty() {
        tracing::debug!(
            "No consensus with {} of {} replicas failing",
            tally.failures.len(),
            replicas.len()
        );
        return Err(Error::NoQuorumConsensus);
    }
    if tally.all.is_empty() {
        return Ok(None);
    }

    // Smaller version numbers are newer
    let committed = quorum_groups(&tally.all, replicas.quorum())
        .into_iter()
        .min_by_key(|record| record.version());

    match committed {
        Some(record) => {
            let all_newer = tally
                .latest
                .iter()
                .all(|c| c.record.version() < record.version());
            if !all_newer {
                return Ok(Some(record.clone()));
            }
        }
        None if tally.latest.len() < replicas.len() => return Ok(None),
        None => {}
    }

    // Every replica holds an uncommitted newest row: first writer wins
    Ok(tally
        .latest
        .iter()
        .min_by_key(|c| c.record.timestamp)
        .map(|c| c.record.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use crate::error::ReplicaError;
    use crate::replica::{FailingReplica, LatentReplica, MemoryReplica, Replica};
    use crate::testing::{as_dyn, fake_record, memory_replicas, random_entity};

    async fn put(replicas: &[&Arc<MemoryReplica>], record: &Record) {
        for replica in replicas {
            replica.insert(record.clone()).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_empty_key_is_not_found() {
        let replicas = memory_replicas(3);
        let set = ReplicaSet::new(as_dyn(&replicas));
        let entity = random_entity();

        let resolved = resolve(&set, &entity.partition_key, &entity.row_key).await.unwrap();
        assert!(resolved.is_none());
    }

    #[tokio::test]
    async fn test_single_copy_is_not_found() {
        // 0-0-1
        let replicas = memory_replicas(3);
        let set = ReplicaSet::new(as_dyn(&replicas));
        let entity = random_entity();
        put(&[&replicas[0]], &fake_record(&entity, 1)).await;

        let resolved = resolve(&set, &entity.partition_key, &entity.row_key).await.unwrap();
        assert!(resolved.is_none());
    }

    #[tokio::test]
    async fn test_quorum_copy_is_found() {
        // 0-1-1
        let replicas = memory_replicas(3);
        let set = ReplicaSet::new(as_dyn(&replicas));
        let entity = random_entity();
        let v1 = fake_record(&entity, 1);
        put(&[&replicas[0], &replicas[1]], &v1).await;

        let resolved = resolve(&set, &entity.partition_key, &entity.row_key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.transaction_id(), v1.transaction_id());
        assert_eq!(resolved.properties, v1.properties);
    }

    #[tokio::test]
    async fn test_multiple_versions() {
        // 1-1-1
        // 2-2-2
        let replicas = memory_replicas(3);
        let set = ReplicaSet::new(as_dyn(&replicas));
        let entity = random_entity();
        let (v1, v2) = (fake_record(&entity, 1), fake_record(&entity, 2));
        put(&[&replicas[0], &replicas[1], &replicas[2]], &v1).await;
        put(&[&replicas[0], &replicas[1], &replicas[2]], &v2).await;

        let resolved = resolve(&set, &entity.partition_key, &entity.row_key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.transaction_id(), v2.transaction_id());
    }

    #[tokio::test]
    async fn test_latest_version_is_quorum() {
        // 1-1-1
        // 2-2
        let replicas = memory_replicas(3);
        let set = ReplicaSet::new(as_dyn(&replicas));
        let entity = random_entity();
        let (v1, v2) = (fake_record(&entity, 1), fake_record(&entity, 2));
        put(&[&replicas[0], &replicas[1], &replicas[2]], &v1).await;
        put(&[&replicas[0], &replicas[1]], &v2).await;

        let resolved = resolve(&set, &entity.partition_key, &entity.row_key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.transaction_id(), v2.transaction_id());
    }

    #[tokio::test]
    async fn test_latest_is_not_quorum() {
        // 1-1-1
        // 2
        let replicas = memory_replicas(3);
        let set = ReplicaSet::new(as_dyn(&replicas));
        let entity = random_entity();
        let (v1, v2) = (fake_record(&entity, 1), fake_record(&entity, 2));
        put(&[&replicas[0], &replicas[1], &replicas[2]], &v1).await;
        put(&[&replicas[0]], &v2).await;

        let resolved = resolve(&set, &entity.partition_key, &entity.row_key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.transaction_id(), v1.transaction_id());
    }

    #[tokio::test]
    async fn test_all_latest_differ() {
        // 1-1-1
        //   2-2
        // 3-3
        // 4
        let replicas = memory_replicas(3);
        let set = ReplicaSet::new(as_dyn(&replicas));
        let entity = random_entity();
        let v1 = fake_record(&entity, 1);
        let v2 = fake_record(&entity, 2);
        let v3 = fake_record(&entity, 3);
        let v4 = fake_record(&entity, 4);
        put(&[&replicas[0], &replicas[1], &replicas[2]], &v1).await;
        put(&[&replicas[1], &replicas[2]], &v2).await;
        put(&[&replicas[0], &replicas[1]], &v3).await;
        put(&[&replicas[0]], &v4).await;

        let resolved = resolve(&set, &entity.partition_key, &entity.row_key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.transaction_id(), v3.transaction_id());
    }

    #[tokio::test]
    async fn test_ignores_longer_row_keys_in_range() {
        let replicas = memory_replicas(3);
        let set = ReplicaSet::new(as_dyn(&replicas));
        let neighbour = crate::entity::Entity::new("pk", "k_5x");
        let record = fake_record(&neighbour, 1);
        put(&[&replicas[0], &replicas[1], &replicas[2]], &record).await;

        assert!(resolve(&set, "pk", "k").await.unwrap().is_none());
        assert!(resolve(&set, "pk", "k_5x").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_uncommitted_first_writes_pick_earliest() {
        let replicas = memory_replicas(3);
        let set = ReplicaSet::new(as_dyn(&replicas));
        let entity = random_entity();

        let mut first = None;
        for replica in &replicas {
            let record = fake_record(&entity, 1);
            first.get_or_insert(record.transaction_id());
            replica.insert(record).await.unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let resolved = resolve(&set, &entity.partition_key, &entity.row_key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(Some(resolved.transaction_id()), first);
    }

    #[tokio::test]
    async fn test_uncommitted_with_failing_replica_is_undecidable() {
        let replicas = memory_replicas(2);
        let mut set = as_dyn(&replicas);
        set.push(Arc::new(FailingReplica::unavailable("down")));
        let set = ReplicaSet::new(set);
        let entity = random_entity();
        put(&[&replicas[0]], &fake_record(&entity, 1)).await;
        put(&[&replicas[1]], &fake_record(&entity, 1)).await;

        let err = resolve(&set, &entity.partition_key, &entity.row_key)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoQuorumConsensus));
    }

    #[tokio::test]
    async fn test_quorum_failure_collects_causes() {
        let replicas = memory_replicas(1);
        let mut set = as_dyn(&replicas);
        set.push(Arc::new(FailingReplica::new(
            "web",
            ReplicaError::Unavailable("connection reset".into()),
        )));
        set.push(Arc::new(FailingReplica::new(
            "socket",
            ReplicaError::Storage("broken pipe".into()),
        )));
        let set = ReplicaSet::new(set);

        let err = resolve(&set, "pk", "rk").await.unwrap_err();
        let mut causes: Vec<_> = err
            .replica_failures()
            .iter()
            .map(|f| f.replica.clone())
            .collect();
        causes.sort();
        assert_eq!(causes, vec!["socket".to_string(), "web".to_string()]);
    }

    #[tokio::test]
    async fn test_one_failure_is_tolerated() {
        let replicas = memory_replicas(2);
        let mut set = as_dyn(&replicas);
        set.insert(0, Arc::new(FailingReplica::unavailable("down")));
        let set = ReplicaSet::new(set);
        let entity = random_entity();
        let v1 = fake_record(&entity, 1);
        put(&[&replicas[0], &replicas[1]], &v1).await;

        let resolved = resolve(&set, &entity.partition_key, &entity.row_key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.transaction_id(), v1.transaction_id());
        assert!(resolve(&set, "pk", "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_quorum_failure_with_five_replicas() {
        let replicas = memory_replicas(3);
        let mut set = as_dyn(&replicas);
        set.push(Arc::new(FailingReplica::unavailable("d")));
        set.push(Arc::new(FailingReplica::unavailable("e")));
        let set = ReplicaSet::new(set);
        assert_eq!(set.quorum(), 3);
        assert!(resolve(&set, "pk", "rk").await.unwrap().is_none());

        let replicas = memory_replicas(2);
        let mut set = as_dyn(&replicas);
        for name in ["c", "d", "e"] {
            set.push(Arc::new(FailingReplica::unavailable(name)));
        }
        let set = ReplicaSet::new(set);
        let err = resolve(&set, "pk", "rk").await.unwrap_err();
        assert_eq!(err.replica_failures().len(), 3);
    }

    #[tokio::test]
    async fn test_slow_replica_does_not_delay() {
        let delay = Duration::from_millis(500);
        let replicas = memory_replicas(3);
        let mut set = as_dyn(&replicas);
        set[0] = Arc::new(LatentReplica::new(Arc::clone(&set[0]), delay));
        let set = ReplicaSet::new(set);

        let start = std::time::Instant::now();
        assert!(resolve(&set, "pk", "rk").await.unwrap().is_none());
        assert!(start.elapsed() < delay);
    }

    #[tokio::test]
    async fn test_two_slow_replicas_delay() {
        let delay = Duration::from_millis(100);
        let replicas = memory_replicas(3);
        let slow: Vec<Arc<dyn Replica>> = as_dyn(&replicas)
            .into_iter()
            .enumerate()
            .map(|(i, r)| {
                if i < 2 {
                    Arc::new(LatentReplica::new(r, delay)) as Arc<dyn Replica>
                } else {
                    r
                }
            })
            .collect();
        let set = ReplicaSet::new(slow);

        let start = std::time::Instant::now();
        assert!(resolve(&set, "pk", "rk").await.unwrap().is_none());
        assert!(start.elapsed() >= delay);
    }

    #[tokio::test]
    async fn test_failures_return_without_waiting_for_slow_replica() {
        let delay = Duration::from_millis(500);
        let replicas = memory_replicas(1);
        let slow: Arc<dyn Replica> = Arc::new(LatentReplica::new(
            Arc::clone(&replicas[0]) as Arc<dyn Replica>,
            delay,
        ));
        let set = ReplicaSet::new(vec![
            Arc::new(FailingReplica::unavailable("a")),
            Arc::new(FailingReplica::unavailable("b")),
            slow,
        ]);

        let start = std::time::Instant::now();
        assert!(matches!(
            resolve(&set, "pk", "rk").await,
            Err(Error::QuorumFailure(_))
        ));
        assert!(start.elapsed() < delay);
    }
}
