//! Physical Records
//!
//! What a replica actually stores: one immutable row per version of a
//! logical entity, keyed by `<row key>_<version>` and carrying the metadata
//! the quorum engine needs to decide which version is current.

use serde::{Deserialize, Serialize};

use crate::entity::{Entity, Properties, Value};
use crate::error::{Error, Result};
use crate::version::{self, Version};

/// Prefix reserved for metadata properties
pub const RESERVED_PREFIX: &str = "WolfTable";

pub const PROPERTY_SCHEMA_VERSION: &str = "WolfTableSchemaVersion";
pub const PROPERTY_IS_DELETED: &str = "WolfTableIsDeleted";
pub const PROPERTY_TRANSACTION_ID: &str = "WolfTableTransactionId";
pub const PROPERTY_ENTITY_VERSION: &str = "WolfTableEntityVersion";

/// Current record schema version
pub const SCHEMA_VERSION: &str = "2024-06";

/// Identifier minted once per write attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionId(pub uuid::Uuid);

impl TransactionId {
    /// Mint a fresh transaction identifier
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Metadata attached to every physical record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMeta {
    pub schema_version: String,
    pub transaction_id: TransactionId,
    pub version: Version,
    pub is_deleted: bool,
}

/// A versioned row as stored in a replica
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub partition_key: String,
    /// Physical row key, `<logical row key>_<version>`
    pub row_key: String,
    /// Caller properties only; metadata lives in `meta`
    pub properties: Properties,
    pub meta: RecordMeta,
    /// Commit time assigned by the replica, `None` until written
    #[serde(default)]
    pub timestamp: Option<chrono::DateTime<chrono::Utc>>,
}

impl Record {
    /// Build the physical record for a new version of an entity
    pub fn for_write(
        entity: &Entity,
        version: Version,
        is_deleted: bool,
        transaction_id: TransactionId,
    ) -> Self {
        Self {
            partition_key: entity.partition_key.clone(),
            row_key: version::encode(&entity.row_key, version),
            properties: entity.properties.clone(),
            meta: RecordMeta {
                schema_version: SCHEMA_VERSION.to_string(),
                transaction_id,
                version,
                is_deleted,
            },
            timestamp: None,
        }
    }

    pub fn version(&self) -> Version {
        self.meta.version
    }

    pub fn transaction_id(&self) -> TransactionId {
        self.meta.transaction_id
    }

    pub fn is_deleted(&self) -> bool {
        self.meta.is_deleted
    }

    /// Logical row key this record is a version of
    pub fn logical_row_key(&self) -> &str {
        version::decode(&self.row_key)
    }

    /// Flatten into a single property bag with metadata under reserved names
    pub fn to_property_bag(&self) -> Properties {
        let mut bag = self.properties.clone();
        bag.insert(
            PROPERTY_SCHEMA_VERSION.to_string(),
            Value::String(self.meta.schema_version.clone()),
        );
        bag.insert(PROPERTY_IS_DELETED.to_string(), Value::Bool(self.meta.is_deleted));
        bag.insert(
            PROPERTY_TRANSACTION_ID.to_string(),
            Value::String(self.meta.transaction_id.to_string()),
        );
        bag.insert(PROPERTY_ENTITY_VERSION.to_string(), Value::Int64(self.meta.version));
        bag
    }

    /// Rebuild a record from a flattened property bag
    pub fn from_property_bag(
        partition_key: String,
        row_key: String,
        mut bag: Properties,
        timestamp: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<Self> {
        let corrupt = |what: &str| {
            Error::Validation(format!("record {}/{} has invalid {}", partition_key, row_key, what))
        };

        let schema_version = match bag.remove(PROPERTY_SCHEMA_VERSION) {
            Some(Value::String(s)) => s,
            _ => return Err(corrupt(PROPERTY_SCHEMA_VERSION)),
        };
        let is_deleted = match bag.remove(PROPERTY_IS_DELETED) {
            Some(Value::Bool(b)) => b,
            _ => return Err(corrupt(PROPERTY_IS_DELETED)),
        };
        let transaction_id = match bag.remove(PROPERTY_TRANSACTION_ID) {
            Some(Value::String(s)) => s
                .parse::<uuid::Uuid>()
                .map(TransactionId)
                .map_err(|_| corrupt(PROPERTY_TRANSACTION_ID))?,
            _ => return Err(corrupt(PROPERTY_TRANSACTION_ID)),
        };
        let version = match bag.remove(PROPERTY_ENTITY_VERSION) {
            Some(Value::Int64(v)) => v,
            _ => return Err(corrupt(PROPERTY_ENTITY_VERSION)),
        };

        // Drop anything else under the reserved prefix (future schema fields)
        bag.retain(|name, _| !is_reserved(name));

        Ok(Self {
            partition_key,
            row_key,
            properties: bag,
            meta: RecordMeta {
                schema_version,
                transaction_id,
                version,
                is_deleted,
            },
            timestamp,
        })
    }
}

/// Check whether a property name is reserved for metadata
pub fn is_reserved(name: &str) -> bool {
    name.starts_with(RESERVED_PREFIX)
}
