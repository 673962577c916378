//! Read Repair
//!
//! Self-healing driven by reads. Once a read has decided a consensus record,
//! a background task waits for the replicas that had not answered yet and
//! force-writes the consensus record into every replica whose rows do not
//! carry its transaction.

use std::sync::Arc;

use crate::record::Record;
use crate::replica::{Replica, ReplicaResult};

use super::{Candidate, FanOut, ReplicaSet};

/// Run read repair on a detached task; failures are only logged
pub fn spawn_read_repair(
    replicas: ReplicaSet,
    fanout: FanOut<Vec<Record>>,
    candidates: Vec<Candidate>,
    consensus: Record,
) {
    tokio::spawn(async move {
        read_repair(&replicas, fanout, candidates, &consensus).await;
    });
}

/// Drain outstanding reads, then rewrite `consensus` into replicas lacking it
///
/// Returns the number of replicas that were rewritten.
pub async fn read_repair(
    replicas: &ReplicaSet,
    mut fanout: FanOut<Vec<Record>>,
    mut candidates: Vec<Candidate>,
    consensus: &Record,
) -> usize {
    while let Some((index, response)) = fanout.next().await {
        match response {
            Ok(rows) => candidates.extend(
                rows.into_iter()
                    .take(2)
                    .map(|record| Candidate { replica: index, record }),
            ),
            Err(e) => {
                tracing::debug!("Read repair skipping answer of {}: {}", replicas.name(index), e);
            }
        }
    }

    let txn = consensus.transaction_id();
    let mut holds = vec![false; replicas.len()];
    for candidate in &candidates {
        if candidate.record.transaction_id() == txn {
            holds[candidate.replica] = true;
        }
    }

    let mut repaired = 0;
    for (index, _) in holds.iter().enumerate().filter(|(_, held)| !**held) {
        match force_write(replicas.get(index), consensus.clone()).await {
            Ok(()) => {
                tracing::info!(
                    "Repaired {}/{} on replica {}",
                    consensus.partition_key,
                    consensus.row_key,
                    replicas.name(index)
                );
                repaired += 1;
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to repair {}/{} on replica {}: {}",
                    consensus.partition_key,
                    consensus.row_key,
                    replicas.name(index),
                    e
                );
            }
        }
    }

    repaired
}

/// Unconditionally store `record`, treating a conflict as success
///
/// A conflict means another task is writing the same physical row.
pub async fn force_write(replica: &Arc<dyn Replica>, record: Record) -> ReplicaResult<()> {
    match replica.insert_or_replace(record).await {
        Ok(_) => Ok(()),
        Err(e) if e.is_conflict() => {
            tracing::debug!("Concurrent repair on replica {}: {}", replica.name(), e);
            Ok(())
        }
        Err(e) => Err(e),
    }
}
