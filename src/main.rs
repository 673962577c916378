//! WolfTable - Quorum-Replicated Row Store
//!
//! Command-line front end: serves the HTTP API and runs single operations
//! against the replicas named in the configuration file.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wolftable::api::HttpServer;
use wolftable::config::{ReplicaKind, WolfTableConfig};
use wolftable::entity::{ETag, Entity, Value};
use wolftable::error::{Error, Result};
use wolftable::quorum::WriteKind;
use wolftable::version;

/// WolfTable - Quorum-Replicated Row Store
#[derive(Parser)]
#[command(name = "wolftable")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "wolftable.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "wolftable.toml")]
        output: PathBuf,

        /// Directory for the replica databases
        #[arg(long, default_value = "/var/lib/wolftable")]
        data_dir: PathBuf,
    },

    /// Validate configuration file
    Validate,

    /// Show replica set information
    Info,

    /// Serve the HTTP API
    Serve,

    /// Read an entity
    Get {
        partition_key: String,
        row_key: String,
    },

    /// Write an entity
    Put {
        partition_key: String,
        row_key: String,

        /// insert, replace, merge, insert-or-replace, insert-or-merge
        #[arg(short, long, default_value = "insert-or-replace")]
        mode: String,

        /// Expected ETag ("*" matches any version)
        #[arg(short, long)]
        etag: Option<String>,

        /// Property as name=value or name:type=value
        #[arg(short = 'p', long = "property")]
        properties: Vec<String>,
    },

    /// Delete an entity
    Delete {
        partition_key: String,
        row_key: String,

        /// Expected ETag ("*" matches any version)
        #[arg(short, long)]
        etag: String,
    },

    /// Show the raw rows every replica holds for a key
    Inspect {
        partition_key: String,
        row_key: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(&cli.log_level);

    match cli.command {
        Commands::Init { output, data_dir } => {
            run_init(output, data_dir)
        }
        Commands::Validate => {
            run_validate(cli.config)
        }
        Commands::Info => {
            run_info(cli.config)
        }
        Commands::Serve => {
            run_serve(cli.config).await
        }
        Commands::Get { partition_key, row_key } => {
            run_get(cli.config, partition_key, row_key).await
        }
        Commands::Put { partition_key, row_key, mode, etag, properties } => {
            run_put(cli.config, partition_key, row_key, mode, etag, properties).await
        }
        Commands::Delete { partition_key, row_key, etag } => {
            run_delete(cli.config, partition_key, row_key, etag).await
        }
        Commands::Inspect { partition_key, row_key } => {
            run_inspect(cli.config, partition_key, row_key).await
        }
    }
}

/// Initialize logging
fn init_logging(level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Serve the HTTP API until Ctrl-C
async fn run_serve(config_path: PathBuf) -> Result<()> {
    tracing::info!("Starting WolfTable...");

    let config = match WolfTableConfig::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to load configuration from {:?}: {}", config_path, e);
            tracing::error!("Please check that the config file exists and is valid TOML");
            return Err(e);
        }
    };
    tracing::info!(
        "Loaded configuration with {} replicas (quorum {})",
        config.replicas.len(),
        config.quorum_size()
    );

    let table = config.open_table()?;
    let server = HttpServer::new(config.api.clone(), table);

    server
        .start(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
                return;
            }
            tracing::info!("Shutdown signal received");
        })
        .await?;

    tracing::info!("WolfTable stopped");
    Ok(())
}

/// Read one entity
async fn run_get(config_path: PathBuf, partition_key: String, row_key: String) -> Result<()> {
    let table = WolfTableConfig::from_file(&config_path)?.open_table()?;

    match table.retrieve(&partition_key, &row_key).await? {
        Some(entity) => println!("{}", serde_json::to_string_pretty(&entity)?),
        None => {
            eprintln!("✗ {}/{} not found", partition_key, row_key);
            return Err(Error::NotFound);
        }
    }
    Ok(())
}

/// Write one entity
async fn run_put(
    config_path: PathBuf,
    partition_key: String,
    row_key: String,
    mode: String,
    etag: Option<String>,
    properties: Vec<String>,
) -> Result<()> {
    let kind: WriteKind = mode.parse()?;
    if kind == WriteKind::Delete {
        return Err(Error::Validation("use the delete command to delete".into()));
    }

    let mut entity = Entity::new(partition_key, row_key);
    for property in &properties {
        let (name, value) = parse_property(property)?;
        entity.properties.insert(name, value);
    }
    if let Some(etag) = etag {
        entity.etag = Some(etag.parse::<ETag>()?);
    }

    let table = WolfTableConfig::from_file(&config_path)?.open_table()?;
    let written = table.write(kind, entity).await?;
    println!("{}", serde_json::to_string_pretty(&written)?);
    Ok(())
}

/// Delete one entity
async fn run_delete(
    config_path: PathBuf,
    partition_key: String,
    row_key: String,
    etag: String,
) -> Result<()> {
    let entity = Entity::new(partition_key, row_key).with_etag(etag.parse()?);

    let table = WolfTableConfig::from_file(&config_path)?.open_table()?;
    table.delete(entity.clone()).await?;
    println!("✓ Deleted {}/{}", entity.partition_key, entity.row_key);
    Ok(())
}

/// Show every replica's raw rows for a key
async fn run_inspect(config_path: PathBuf, partition_key: String, row_key: String) -> Result<()> {
    let table = WolfTableConfig::from_file(&config_path)?.open_table()?;

    println!("Replica rows for {}/{}", partition_key, row_key);
    println!("==========================");
    for view in table.inspect(&partition_key, &row_key).await {
        println!();
        println!("{}:", view.replica);
        match view.rows {
            Ok(rows) if rows.is_empty() => println!("  (no rows)"),
            Ok(rows) => {
                for record in rows {
                    let version = version::parse_version(&record.row_key)
                        .map(|v| v.to_string())
                        .unwrap_or_else(|| "?".into());
                    println!(
                        "  {}  version={}  txn={}  deleted={}  at={}",
                        record.row_key,
                        version,
                        record.transaction_id(),
                        record.is_deleted(),
                        record
                            .timestamp
                            .map(|t| t.to_rfc3339())
                            .unwrap_or_else(|| "-".into())
                    );
                }
            }
            Err(e) => println!("  error: {}", e),
        }
    }
    Ok(())
}

/// Parse `name=value` (string) or `name:type=value`
fn parse_property(arg: &str) -> Result<(String, Value)> {
    let (key, raw) = arg
        .split_once('=')
        .ok_or_else(|| Error::Validation(format!("property {:?} is not name=value", arg)))?;

    let (name, value) = match key.split_once(':') {
        Some((name, kind)) => (name, Value::parse_typed(kind, raw)?),
        None => (key, Value::String(raw.to_string())),
    };
    if name.is_empty() {
        return Err(Error::Validation(format!("property {:?} has no name", arg)));
    }

    Ok((name.to_string(), value))
}

/// Initialize a new configuration file
fn run_init(output: PathBuf, data_dir: PathBuf) -> Result<()> {
    let config = WolfTableConfig::example(&data_dir);
    let config_content = format!(
        "# WolfTable Configuration\n# Generated configuration file\n\n{}",
        config.to_toml()?
    );

    std::fs::write(&output, config_content)?;
    println!("Configuration file created: {}", output.display());
    println!("\nEdit the file to configure your replicas.");
    println!("Then start with: wolftable serve --config {}", output.display());

    Ok(())
}

/// Validate configuration
fn run_validate(config_path: PathBuf) -> Result<()> {
    match WolfTableConfig::from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Replicas: {}", config.replicas.len());
            println!("  Quorum Size: {}", config.quorum_size());
            let api = if config.api.enabled {
                config.api.bind_address.as_str()
            } else {
                "disabled"
            };
            println!("  API: {}", api);
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e)
        }
    }
}

/// Show replica set information
fn run_info(config_path: PathBuf) -> Result<()> {
    let config = WolfTableConfig::from_file(&config_path)?;

    println!("WolfTable Information");
    println!("=====================");
    println!();
    println!("Replicas:");
    for replica in &config.replicas {
        let location = match (replica.kind, &replica.path) {
            (ReplicaKind::Sqlite, Some(path)) => format!("sqlite {}", path.display()),
            (ReplicaKind::Sqlite, None) => "sqlite (no path)".to_string(),
            (ReplicaKind::Memory, _) => "memory".to_string(),
        };
        println!("  {:<16}{}", replica.name, location);
        if replica.latency_ms > 0 || replica.jitter_ms > 0 {
            println!(
                "  {:<16}latency {} ms + {} ms jitter",
                "", replica.latency_ms, replica.jitter_ms
            );
        }
    }
    println!();
    println!("Quorum Size:      {}", config.quorum_size());
    let api_state = if config.api.enabled { "enabled" } else { "disabled" };
    println!("API:              {} ({})", config.api.bind_address, api_state);
    println!("Log Level:        {}", config.logging.level);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_property() {
        assert_eq!(
            parse_property("name=wolf").unwrap(),
            ("name".to_string(), Value::from("wolf"))
        );
        assert_eq!(
            parse_property("age:i32=7").unwrap(),
            ("age".to_string(), Value::Int32(7))
        );
        assert_eq!(
            parse_property("query=a=b").unwrap(),
            ("query".to_string(), Value::from("a=b"))
        );
        assert!(parse_property("novalue").is_err());
        assert!(parse_property("=x").is_err());
        assert!(parse_property("n:i32=x").is_err());
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from([
            "wolftable", "put", "pk", "rk", "--mode", "merge", "--etag", "*",
            "-p", "a=1", "-p", "b:bool=true",
        ])
        .unwrap();
        match cli.command {
            Commands::Put { mode, etag, properties, .. } => {
                assert_eq!(mode, "merge");
                assert_eq!(etag.as_deref(), Some("*"));
                assert_eq!(properties.len(), 2);
            }
            _ => panic!("expected put"),
        }
    }
}
