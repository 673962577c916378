//! WolfTable - Quorum-Replicated Row Store
//!
//! A highly-available key/row store layered over N independent, possibly
//! unreliable replicas. Every logical row is stored as a series of immutable
//! physical versions, and reads and writes are decided by a majority of
//! replicas.
//!
//! # Architecture
//!
//! There is no leader and no locking. Every operation fans out to all
//! replicas concurrently and decides from the responses in completion order,
//! so a single slow or failed replica never blocks a quorum. Versions
//! strictly decrease with every write, which makes them double as an
//! optimistic-concurrency token and as a compare-and-swap slot at the
//! storage layer.
//!
//! # Features
//!
//! - Insert, replace, merge, upsert and delete with ETag checks
//! - Early consensus from the fastest quorum of replicas
//! - Read repair of divergent replicas as a side effect of reads
//! - SQLite and in-memory replicas, with latency and failure injection
//! - HTTP API and CLI

pub mod config;
pub mod error;
pub mod version;
pub mod entity;
pub mod record;
pub mod replica;
pub mod quorum;
pub mod sanitize;
pub mod table;
pub mod api;

#[cfg(test)]
pub(crate) mod testing;

pub use config::WolfTableConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::WolfTableConfig;
    pub use crate::entity::{ETag, Entity, Properties, Value};
    pub use crate::error::{Error, Result};
    pub use crate::quorum::WriteKind;
    pub use crate::record::Record;
    pub use crate::replica::{MemoryReplica, Replica, SqliteReplica};
    pub use crate::table::{Operation, QuorumTable};
}
