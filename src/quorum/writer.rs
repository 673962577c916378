//! Write Coordinator
//!
//! Every write appends a new physical row one version below the current
//! consensus. Rows are only ever created with a plain insert, so two writers
//! that computed the same version race at the storage layer and at most one
//! of them can reach a quorum.

use serde::{Deserialize, Serialize};

use crate::entity::{ETag, Entity};
use crate::error::{Error, ReplicaError, ReplicaFailure, Result};
use crate::record::{Record, TransactionId};
use crate::version::{SMALLEST_VERSION, STARTING_VERSION};

use super::repair::force_write;
use super::resolver;
use super::{FanOut, ReplicaSet};

/// Kind of single-entity write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteKind {
    Insert,
    Replace,
    Merge,
    InsertOrReplace,
    InsertOrMerge,
    Delete,
}

impl WriteKind {
    /// Whether the write needs a live row and a matching ETag
    pub fn requires_existing(&self) -> bool {
        matches!(self, WriteKind::Replace | WriteKind::Merge | WriteKind::Delete)
    }

    /// Whether unmentioned properties are carried over from the current row
    pub fn merges(&self) -> bool {
        matches!(self, WriteKind::Merge | WriteKind::InsertOrMerge)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WriteKind::Insert => "insert",
            WriteKind::Replace => "replace",
            WriteKind::Merge => "merge",
            WriteKind::InsertOrReplace => "insert_or_replace",
            WriteKind::InsertOrMerge => "insert_or_merge",
            WriteKind::Delete => "delete",
        }
    }
}

impl std::fmt::Display for WriteKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WriteKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "insert" => Ok(WriteKind::Insert),
            "replace" => Ok(WriteKind::Replace),
            "merge" => Ok(WriteKind::Merge),
            "insert_or_replace" | "upsert" => Ok(WriteKind::InsertOrReplace),
            "insert_or_merge" => Ok(WriteKind::InsertOrMerge),
            "delete" => Ok(WriteKind::Delete),
            other => Err(Error::Validation(format!("unknown write kind {:?}", other))),
        }
    }
}

/// Write `entity` and return the committed physical record
pub async fn write(replicas: &ReplicaSet, entity: &Entity, kind: WriteKind) -> Result<Record> {
    let transaction_id = TransactionId::new();
    let record = prepare(replicas, entity, kind, transaction_id).await?;
    tracing::debug!(
        "{} {}/{} at version {} (txn {})",
        kind,
        entity.partition_key,
        entity.row_key,
        record.version(),
        transaction_id
    );

    let failures = match insert_quorum(replicas, record).await {
        Ok(committed) => return Ok(committed),
        Err(failures) => failures,
    };

    if !failures.iter().all(|f| f.error.is_conflict()) {
        return Err(Error::QuorumFailure(failures));
    }

    // A conflict may hide our own partially applied insert; check who won
    tracing::debug!(
        "{} of {}/{} lost on conflicts, re-reading",
        kind,
        entity.partition_key,
        entity.row_key
    );
    match resolver::resolve(replicas, &entity.partition_key, &entity.row_key).await? {
        Some(consensus) if consensus.transaction_id() == transaction_id => Ok(consensus),
        _ => Err(Error::QuorumFailure(failures)),
    }
}

/// Read the current state, validate the write against it and build the row
async fn prepare(
    replicas: &ReplicaSet,
    entity: &Entity,
    kind: WriteKind,
    transaction_id: TransactionId,
) -> Result<Record> {
    let consensus =
        resolver::resolve(replicas, &entity.partition_key, &entity.row_key).await?;
    let live = consensus.as_ref().filter(|record| !record.is_deleted());
    validate(kind, entity.etag, live)?;

    let version = match &consensus {
        Some(current) => current.version() - 1,
        None => STARTING_VERSION,
    };
    if version < SMALLEST_VERSION {
        return Err(Error::Internal(format!(
            "version space of {}/{} is exhausted",
            entity.partition_key, entity.row_key
        )));
    }

    let mut record = Record::for_write(entity, version, kind == WriteKind::Delete, transaction_id);
    if kind.merges() {
        if let Some(current) = live {
            for (name, value) in &current.properties {
                record
                    .properties
                    .entry(name.clone())
                    .or_insert_with(|| value.clone());
            }
        }
    }

    Ok(record)
}

/// Check a write of `kind` against the live consensus row
fn validate(kind: WriteKind, etag: Option<ETag>, live: Option<&Record>) -> Result<()> {
    match live {
        Some(_) if kind == WriteKind::Insert => Err(Error::AlreadyExists),
        Some(current) if kind.requires_existing() => match etag {
            Some(tag) if tag.matches(current.version()) => Ok(()),
            _ => Err(Error::ETagMismatch),
        },
        None if kind.requires_existing() => Err(Error::NotFound),
        _ => Ok(()),
    }
}

/// Insert `record` on every replica and wait for a quorum either way
///
/// Outstanding inserts are never cancelled; they finish on a background
/// task.
async fn insert_quorum(
    replicas: &ReplicaSet,
    record: Record,
) -> std::result::Result<Record, Vec<ReplicaFailure>> {
    let quorum = replicas.quorum();
    let mut fanout = FanOut::issue(replicas, |replica| {
        let record = record.clone();
        async move { replica.insert(record).await }
    });

    let mut committed = None;
    let mut successes = 0;
    let mut failures: Vec<(usize, ReplicaError)> = Vec::new();

    while let Some((index, response)) = fanout.next().await {
        match response {
            Ok(stored) => {
                successes += 1;
                committed.get_or_insert(stored);
                if successes >= quorum {
                    break;
                }
            }
            Err(error) => {
                tracing::debug!("Insert on replica {} failed: {}", replicas.name(index), error);
                failures.push((index, error));
                if failures.len() >= quorum {
                    break;
                }
            }
        }
    }

    match committed {
        Some(winner) if successes >= quorum => {
            let set = replicas.clone();
            let fixed = winner.clone();
            tokio::spawn(async move { fix_up_conflicts(&set, fanout, failures, &fixed).await });
            Ok(winner)
        }
        _ => {
            let set = replicas.clone();
            let row_key = record.row_key.clone();
            tokio::spawn(async move { drain(&set, fanout, &row_key).await });
            Err(failures
                .into_iter()
                .map(|(index, error)| ReplicaFailure {
                    replica: replicas.name(index).to_string(),
                    error,
                })
                .collect())
        }
    }
}

/// Finish a committed write: force the winner into replicas that lost a
/// conflict, leave other failures to read repair
async fn fix_up_conflicts(
    replicas: &ReplicaSet,
    mut fanout: FanOut<Record>,
    mut failures: Vec<(usize, ReplicaError)>,
    winner: &Record,
) {
    while let Some((index, response)) = fanout.next().await {
        if let Err(error) = response {
            failures.push((index, error));
        }
    }

    for (index, error) in failures {
        if !error.is_conflict() {
            tracing::debug!(
                "Replica {} missed {}: {}",
                replicas.name(index),
                winner.row_key,
                error
            );
            continue;
        }

        match force_write(replicas.get(index), winner.clone()).await {
            Ok(()) => {
                tracing::info!("Fixed up {} on replica {}", winner.row_key, replicas.name(index))
            }
            Err(e) => tracing::warn!(
                "Failed to fix up {} on replica {}: {}",
                winner.row_key,
                replicas.name(index),
                e
            ),
        }
    }
}

/// Let the inserts of a failed write finish and log how they ended
async fn drain(replicas: &ReplicaSet, mut fanout: FanOut<Record>, row_key: &str) {
    while let Some((index, response)) = fanout.next().await {
        match response {
            Ok(_) => tracing::debug!(
                "Replica {} stored {} after the write had failed",
                replicas.name(index),
                row_key
            ),
            Err(e) => {
                tracing::debug!("Replica {} rejected {}: {}", replicas.name(index), row_key, e)
            }
        }
    }
}
