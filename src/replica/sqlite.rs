//! SQLite Replica
//!
//! Durable replica backed by an embedded SQLite database. Records are stored
//! as a JSON property bag with the metadata flattened under reserved names.

use std::path::Path;
use std::sync::{Arc, Mutex};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};

use super::{Replica, ReplicaResult};
use crate::entity::Properties;
use crate::error::{ReplicaError, Result};
use crate::record::Record;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS records (
    partition_key TEXT NOT NULL,
    row_key TEXT NOT NULL,
    properties TEXT NOT NULL,
    committed_at TEXT NOT NULL,
    PRIMARY KEY (partition_key, row_key)
);
"#;

/// Replica stored in a SQLite database file
pub struct SqliteReplica {
    name: String,
    conn: Arc<Mutex<Connection>>,
}

impl SqliteReplica {
    /// Create or open a replica database at `path`
    pub fn open(name: impl Into<String>, path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        Self::init(name.into(), conn)
    }

    /// Create a replica backed by a private in-memory database
    pub fn open_in_memory(name: impl Into<String>) -> Result<Self> {
        Self::init(name.into(), Connection::open_in_memory()?)
    }

    fn init(name: String, conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        tracing::debug!("Opened SQLite replica {}", name);
        Ok(Self {
            name,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a blocking closure against the connection on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> ReplicaResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> ReplicaResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| ReplicaError::Storage("connection lock poisoned".into()))?;
            f(&conn)
        })
        .await
        .map_err(|e| ReplicaError::Storage(format!("blocking task failed: {}", e)))?
    }

    fn write(conn: &Connection, sql: &str, record: &mut Record) -> ReplicaResult<()> {
        let now = chrono::Utc::now();
        let bag = serde_json::to_string(&record.to_property_bag())
            .map_err(|e| ReplicaError::Storage(e.to_string()))?;

        conn.execute(
            sql,
            params![record.partition_key, record.row_key, bag, now.to_rfc3339()],
        )
        .map_err(|e| {
            if is_constraint_violation(&e) {
                ReplicaError::Conflict { row_key: record.row_key.clone() }
            } else {
                e.into()
            }
        })?;
        record.timestamp = Some(now);
        Ok(())
    }

    fn decode_row(
        partition_key: String,
        row_key: String,
        bag: String,
        committed_at: String,
    ) -> ReplicaResult<Record> {
        let bag: Properties =
            serde_json::from_str(&bag).map_err(|e| ReplicaError::Storage(e.to_string()))?;
        let timestamp = chrono::DateTime::parse_from_rfc3339(&committed_at)
            .map_err(|e| ReplicaError::Storage(e.to_string()))?
            .with_timezone(&chrono::Utc);

        Record::from_property_bag(partition_key, row_key, bag, Some(timestamp))
            .map_err(|e| ReplicaError::Storage(e.to_string()))
    }
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation
    )
}

#[async_trait::async_trait]
impl Replica for SqliteReplica {
    fn name(&self) -> &str {
        &self.name
    }

    async fn top_two(
        &self,
        partition_key: &str,
        lower: &str,
        upper: &str,
    ) -> ReplicaResult<Vec<Record>> {
        let (pk, lower, upper) = (partition_key.to_string(), lower.to_string(), upper.to_string());

        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT row_key, properties, committed_at FROM records
                WHERE partition_key = ?1 AND row_key >= ?2 AND row_key <= ?3
                ORDER BY row_key ASC
                LIMIT 2
                "#,
            )?;

            let rows = stmt
                .query_map(params![pk, lower, upper], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(|(row_key, bag, committed_at)| {
                    Self::decode_row(pk.clone(), row_key, bag, committed_at)
                })
                .collect()
        })
        .await
    }

    async fn insert(&self, record: Record) -> ReplicaResult<Record> {
        self.with_conn(move |conn| {
            let mut record = record;
            let sql = "INSERT INTO records (partition_key, row_key, properties, committed_at) \
                       VALUES (?1, ?2, ?3, ?4)";
            Self::write(conn, sql, &mut record)?;
            Ok(record)
        })
        .await
    }

    async fn insert_or_replace(&self, record: Record) -> ReplicaResult<Record> {
        self.with_conn(move |conn| {
            let mut record = record;
            let sql = "INSERT OR REPLACE INTO records \
                       (partition_key, row_key, properties, committed_at) \
                       VALUES (?1, ?2, ?3, ?4)";
            Self::write(conn, sql, &mut record)?;
            Ok(record)
        })
        .await
    }

    async fn get(&self, partition_key: &str, row_key: &str) -> ReplicaResult<Option<Record>> {
        let (pk, rk) = (partition_key.to_string(), row_key.to_string());

        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT properties, committed_at FROM records \
                     WHERE partition_key = ?1 AND row_key = ?2",
                    params![pk, rk],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
                )
                .optional()?;

            row.map(|(bag, committed_at)| {
                Self::decode_row(pk.clone(), rk.clone(), bag, committed_at)
            })
                .transpose()
        })
        .await
    }
}
