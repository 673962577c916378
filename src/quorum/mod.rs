//! Quorum Module
//!
//! Consensus and repair engine. Every operation fans a call out to all
//! replicas at once and decides from responses in completion order, so a
//! slow replica never delays an operation a quorum can already decide.
//!
//! - [`resolver`]: decides the current record of a key from the top two
//!   rows of every replica
//! - [`repair`]: rewrites the decided record into replicas lacking it
//! - [`writer`]: versioned write protocol on top of the resolver

pub mod resolver;
pub mod repair;
pub mod writer;

use std::future::Future;
use std::sync::Arc;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;

use crate::record::Record;
use crate::replica::{Replica, ReplicaResult};

pub use writer::WriteKind;

/// Minimum number of agreeing replicas out of `replicas`
pub fn quorum_size(replicas: usize) -> usize {
    replicas / 2 + 1
}

/// The replicas an operation fans out to
#[derive(Clone)]
pub struct ReplicaSet {
    replicas: Arc<[Arc<dyn Replica>]>,
    quorum: usize,
}

impl ReplicaSet {
    pub fn new(replicas: Vec<Arc<dyn Replica>>) -> Self {
        let quorum = quorum_size(replicas.len());
        Self {
            replicas: replicas.into(),
            quorum,
        }
    }

    pub fn len(&self) -> usize {
        self.replicas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replicas.is_empty()
    }

    pub fn quorum(&self) -> usize {
        self.quorum
    }

    pub fn get(&self, index: usize) -> &Arc<dyn Replica> {
        &self.replicas[index]
    }

    pub fn name(&self, index: usize) -> &str {
        self.replicas[index].name()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Replica>> {
        self.replicas.iter()
    }
}

/// A row observed on a specific replica
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Index of the owning replica in the [`ReplicaSet`]
    pub replica: usize,
    pub record: Record,
}

/// Type alias for one replica's answer, tagged with the replica index
type Response<T> = (usize, ReplicaResult<T>);

/// Outstanding responses of one operation, one slot per replica
///
/// Owned by a single operation; when the operation returns early the
/// remaining slots are moved into a background task.
pub struct FanOut<T> {
    pending: FuturesUnordered<BoxFuture<'static, Response<T>>>,
}

impl<T: Send + 'static> FanOut<T> {
    /// Issue `call` against every replica concurrently
    pub fn issue<F, Fut>(replicas: &ReplicaSet, call: F) -> Self
    where
        F: Fn(Arc<dyn Replica>) -> Fut,
        Fut: Future<Output = ReplicaResult<T>> + Send + 'static,
    {
        let pending = FuturesUnordered::new();
        for (index, replica) in replicas.iter().enumerate() {
            let fut = call(Arc::clone(replica));
            pending.push(async move { (index, fut.await) }.boxed());
        }
        Self { pending }
    }

    /// Wait for the next replica to answer
    pub async fn next(&mut self) -> Option<Response<T>> {
        self.pending.next().await
    }

    /// Number of replicas that have not answered yet
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}

/// Group candidates by transaction id and return the first record of every
/// group with at least `quorum` members, in order of first appearance
pub(crate) fn quorum_groups(candidates: &[Candidate], quorum: usize) -> Vec<&Record> {
    let mut groups: Vec<(&Record, usize)> = Vec::new();
    for candidate in candidates {
        let txn = candidate.record.transaction_id();
        match groups.iter_mut().find(|(first, _)| first.transaction_id() == txn) {
            Some((_, count)) => *count += 1,
            None => groups.push((&candidate.record, 1)),
        }
    }

    groups
        .into_iter()
        .filter(|(_, count)| *count >= quorum)
        .map(|(record, _)| record)
        .collect()
}
