//! Entity Sanitizer
//!
//! Turns stored physical records back into caller-visible entities.

use crate::entity::{ETag, Entity};
use crate::quorum::WriteKind;
use crate::record::{is_reserved, Record};

/// Logical view of a record with its version as ETag
pub fn sanitize(record: &Record) -> Entity {
    Entity {
        partition_key: record.partition_key.clone(),
        row_key: record.logical_row_key().to_string(),
        etag: Some(ETag::Version(record.version())),
        properties: record
            .properties
            .iter()
            .filter(|(name, _)| !is_reserved(name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect(),
    }
}

/// Logical view of the record committed by a write of `kind`
///
/// A delete has no current version to hand out, so its ETag is cleared.
pub fn sanitize_write(record: &Record, kind: WriteKind) -> Entity {
    let mut entity = sanitize(record);
    if kind == WriteKind::Delete {
        entity.etag = None;
    }
    entity
}
