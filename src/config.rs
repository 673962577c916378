//! WolfTable Configuration
//!
//! This module provides configuration structures for a WolfTable node:
//! the replicas the table is spread over, the HTTP API and logging.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::quorum::quorum_size;
use crate::replica::{LatentReplica, MemoryReplica, Replica, SqliteReplica};
use crate::table::{QuorumTable, MIN_REPLICAS};

/// Main WolfTable configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WolfTableConfig {
    /// Replicas holding a copy of every record
    pub replicas: Vec<ReplicaConfig>,

    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Storage backend of a replica
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicaKind {
    /// Embedded SQLite database file
    Sqlite,
    /// Volatile in-process map
    Memory,
}

/// A single replica
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaConfig {
    /// Unique replica name
    pub name: String,

    /// Storage backend
    pub kind: ReplicaKind,

    /// Database file (sqlite only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Injected latency per call in milliseconds
    #[serde(default)]
    pub latency_ms: u64,

    /// Upper bound of random extra latency per call in milliseconds
    #[serde(default)]
    pub jitter_ms: u64,
}

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Enable HTTP API
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Address to bind API server
    #[serde(default = "default_api_address")]
    pub bind_address: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_true() -> bool {
    true
}

fn default_api_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: default_api_address(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl ReplicaConfig {
    /// Injected latency as Duration
    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }

    /// Injected jitter as Duration
    pub fn jitter(&self) -> Duration {
        Duration::from_millis(self.jitter_ms)
    }

    /// Open the replica this entry describes
    pub fn open(&self) -> crate::Result<Arc<dyn Replica>> {
        let replica: Arc<dyn Replica> = match self.kind {
            ReplicaKind::Memory => Arc::new(MemoryReplica::new(self.name.clone())),
            ReplicaKind::Sqlite => {
                let path = self.path.as_ref().ok_or_else(|| {
                    crate::Error::Config(format!("replica {} needs a path", self.name))
                })?;
                Arc::new(SqliteReplica::open(self.name.clone(), path)?)
            }
        };

        if self.latency_ms == 0 && self.jitter_ms == 0 {
            return Ok(replica);
        }

        tracing::warn!(
            "Replica {} runs with injected latency {} ms (+{} ms jitter)",
            self.name,
            self.latency_ms,
            self.jitter_ms
        );
        Ok(Arc::new(
            LatentReplica::new(replica, self.latency()).with_jitter(self.jitter()),
        ))
    }
}

impl WolfTableConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: WolfTableConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: WolfTableConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Starter configuration with three SQLite replicas under `data_dir`
    pub fn example(data_dir: &std::path::Path) -> Self {
        let replicas = ["east", "west", "north"]
            .iter()
            .map(|name| ReplicaConfig {
                name: name.to_string(),
                kind: ReplicaKind::Sqlite,
                path: Some(data_dir.join(format!("{}.db", name))),
                latency_ms: 0,
                jitter_ms: 0,
            })
            .collect();

        Self {
            replicas,
            api: ApiConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Render as TOML
    pub fn to_toml(&self) -> crate::Result<String> {
        toml::to_string_pretty(self).map_err(|e| crate::Error::Config(e.to_string()))
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.replicas.len() < MIN_REPLICAS {
            return Err(crate::Error::Config(format!(
                "at least {} replicas are required, got {}",
                MIN_REPLICAS,
                self.replicas.len()
            )));
        }

        let mut names = HashSet::new();
        for replica in &self.replicas {
            if replica.name.is_empty() {
                return Err(crate::Error::Config("replica name cannot be empty".into()));
            }
            if !names.insert(replica.name.as_str()) {
                return Err(crate::Error::Config(format!(
                    "duplicate replica name {}",
                    replica.name
                )));
            }
            if replica.kind == ReplicaKind::Sqlite
                && replica.path.as_ref().map_or(true, |p| p.as_os_str().is_empty())
            {
                return Err(crate::Error::Config(format!(
                    "replica {} needs a path",
                    replica.name
                )));
            }
        }

        if self.api.enabled && self.api.bind_address.is_empty() {
            return Err(crate::Error::Config("api.bind_address cannot be empty".into()));
        }

        Ok(())
    }

    /// Calculate quorum size
    pub fn quorum_size(&self) -> usize {
        quorum_size(self.replicas.len())
    }

    /// Open every replica in configuration order
    pub fn build_replicas(&self) -> crate::Result<Vec<Arc<dyn Replica>>> {
        self.replicas.iter().map(ReplicaConfig::open).collect()
    }

    /// Open the replicas and build the table over them
    pub fn open_table(&self) -> crate::Result<QuorumTable> {
        QuorumTable::new(self.build_replicas()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let toml = r#"
[[replicas]]
name = "east"
kind = "sqlite"
path = "/var/lib/wolftable/east.db"

[[replicas]]
name = "west"
kind = "memory"
latency_ms = 20
jitter_ms = 5

[[replicas]]
name = "north"
kind = "memory"

[api]
bind_address = "127.0.0.1:9000"
"#;

        let config = WolfTableConfig::from_str(toml).unwrap();
        assert_eq!(config.replicas.len(), 3);
        assert_eq!(config.replicas[0].kind, ReplicaKind::Sqlite);
        assert_eq!(config.replicas[1].latency(), Duration::from_millis(20));
        assert!(config.api.enabled);
        assert_eq!(config.api.bind_address, "127.0.0.1:9000");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.quorum_size(), 2); // 3 replicas, quorum = 2
    }

    #[test]
    fn test_validation() {
        let two = r#"
[[replicas]]
name = "a"
kind = "memory"

[[replicas]]
name = "b"
kind = "memory"
"#;
        assert!(matches!(WolfTableConfig::from_str(two), Err(crate::Error::Config(_))));

        let duplicate = format!("{}\n[[replicas]]\nname = \"a\"\nkind = \"memory\"\n", two);
        let err = WolfTableConfig::from_str(&duplicate).unwrap_err();
        assert!(err.to_string().contains("duplicate"));

        let no_path = format!("{}\n[[replicas]]\nname = \"c\"\nkind = \"sqlite\"\n", two);
        let err = WolfTableConfig::from_str(&no_path).unwrap_err();
        assert!(err.to_string().contains("needs a path"));

        let bad_kind = format!("{}\n[[replicas]]\nname = \"c\"\nkind = \"postgres\"\n", two);
        assert!(matches!(
            WolfTableConfig::from_str(&bad_kind),
            Err(crate::Error::ConfigParse(_))
        ));
    }

    #[test]
    fn test_example_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let config = WolfTableConfig::example(dir.path());
        let rendered = config.to_toml().unwrap();

        let parsed = WolfTableConfig::from_str(&rendered).unwrap();
        assert_eq!(parsed.replicas.len(), 3);
        assert_eq!(parsed.replicas[2].path, Some(dir.path().join("north.db")));
    }

    #[tokio::test]
    async fn test_open_table() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = WolfTableConfig::example(dir.path());
        config.replicas[1].kind = ReplicaKind::Memory;
        config.replicas[2].latency_ms = 1;

        let table = config.open_table().unwrap();
        assert_eq!(table.replica_names(), vec!["east", "west", "north"]);

        let entity = crate::entity::Entity::new("pk", "rk").with_property("n", 1i64);
        table.insert(entity.clone()).await.unwrap();
        let read = table.retrieve("pk", "rk").await.unwrap().unwrap();
        assert!(read.same_content(&entity));
        assert!(dir.path().join("east.db").exists());
    }
}
