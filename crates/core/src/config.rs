//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// PostgreSQL SSL mode configuration.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PgSslMode {
    /// Disable SSL/TLS entirely.
    Disable,
    /// Prefer SSL/TLS but allow unencrypted connections (default).
    #[default]
    Prefer,
    /// Require SSL/TLS for all connections.
    Require,
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database (recommended for testing and small deployments only).
    Sqlite {
        /// Database file path.
        path: PathBuf,
        /// Query timeout in seconds. Advisory only: slow queries are logged,
        /// not cancelled.
        #[serde(default = "default_sqlite_query_timeout_secs")]
        query_timeout_secs: Option<u64>,
    },
    /// PostgreSQL database.
    Postgres {
        /// Connection URL. Takes precedence over the individual fields.
        url: Option<String>,
        host: Option<String>,
        #[serde(default = "default_pg_port")]
        port: Option<u16>,
        username: Option<String>,
        /// WARNING: Prefer CANON_METADATA__PASSWORD over storing it in config.
        password: Option<String>,
        database: Option<String>,
        ssl_mode: Option<PgSslMode>,
        /// Maximum connections in each pool.
        #[serde(default = "default_max_connections")]
        max_connections: u32,
        /// Statement timeout in milliseconds.
        #[serde(default = "default_statement_timeout_ms")]
        statement_timeout_ms: Option<u64>,
        /// Read replica used for certificate and host-software diff reads.
        /// Falls back to the primary when unset.
        #[serde(default)]
        replica_url: Option<String>,
    },
}

fn default_max_connections() -> u32 {
    10
}

fn default_pg_port() -> Option<u16> {
    Some(5432)
}

fn default_statement_timeout_ms() -> Option<u64> {
    Some(60_000)
}

fn default_sqlite_query_timeout_secs() -> Option<u64> {
    Some(600)
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/canon.db"),
            query_timeout_secs: default_sqlite_query_timeout_secs(),
        }
    }
}

impl MetadataConfig {
    /// Validate metadata configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            MetadataConfig::Sqlite { .. } => Ok(()),
            MetadataConfig::Postgres {
                url,
                host,
                database,
                max_connections,
                ..
            } => {
                if *max_connections == 0 {
                    return Err("metadata.max_connections must be at least 1".to_string());
                }
                match (url.as_ref(), host.as_ref(), database.as_ref()) {
                    (Some(_), _, _) => Ok(()),
                    (None, Some(_), Some(_)) => Ok(()),
                    (None, None, _) => Err(
                        "postgres config requires either 'url' or 'host' + 'database'".to_string(),
                    ),
                    (None, Some(_), None) => Err(
                        "postgres config requires 'database' when using individual fields"
                            .to_string(),
                    ),
                }
            }
        }
    }
}

/// Reconciliation tuning: transaction retries and aggregate batching.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReconcileConfig {
    /// Attempts after the first one for retryable database errors.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Backoff before the first retry; doubles on each attempt.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Upper bound for a single backoff.
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// Rows per upsert statement when writing aggregate counts.
    #[serde(default = "default_count_batch_size")]
    pub count_batch_size: usize,
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    50
}

fn default_retry_max_delay_ms() -> u64 {
    2000
}

fn default_count_batch_size() -> usize {
    100
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            count_batch_size: default_count_batch_size(),
        }
    }
}

impl ReconcileConfig {
    pub fn retry_base_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.retry_max_delay_ms)
    }

    /// Validate reconcile configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.count_batch_size == 0 {
            return Err("reconcile.count_batch_size cannot be 0".to_string());
        }
        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            return Err(format!(
                "reconcile.retry_base_delay_ms ({}) exceeds retry_max_delay_ms ({})",
                self.retry_base_delay_ms, self.retry_max_delay_ms
            ));
        }
        Ok(())
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Metadata store configuration.
    #[serde(default)]
    pub metadata: MetadataConfig,
    /// Reconciliation tuning.
    #[serde(default)]
    pub reconcile: ReconcileConfig,
}

impl AppConfig {
    /// Create a test configuration backed by a SQLite file at `path`.
    ///
    /// **For testing only.** Retries use short delays.
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            metadata: MetadataConfig::Sqlite {
                path: path.into(),
                query_timeout_secs: None,
            },
            reconcile: ReconcileConfig {
                retry_base_delay_ms: 1,
                retry_max_delay_ms: 10,
                ..ReconcileConfig::default()
            },
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        self.metadata.validate()?;
        self.reconcile.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconcile_config_defaults() {
        let config = ReconcileConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_base_delay_ms, 50);
        assert_eq!(config.retry_max_delay_ms, 2000);
        assert_eq!(config.count_batch_size, 100);
    }

    #[test]
    fn test_reconcile_config_deserialize_partial() {
        let json = r#"{"max_retries": 5}"#;
        let config: ReconcileConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.max_retries, 5);
        assert_eq!(
            config.count_batch_size, 100,
            "count_batch_size should default when not specified"
        );
    }

    #[test]
    fn test_reconcile_config_rejects_zero_batch() {
        let config = ReconcileConfig {
            count_batch_size: 0,
            ..ReconcileConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reconcile_config_rejects_inverted_delays() {
        let config = ReconcileConfig {
            retry_base_delay_ms: 5000,
            retry_max_delay_ms: 100,
            ..ReconcileConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_app_config_defaults_to_sqlite() {
        let config: AppConfig = serde_json::from_str("{}").unwrap();
        assert!(matches!(config.metadata, MetadataConfig::Sqlite { .. }));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_postgres_config_replica_url_is_optional() {
        let json = r#"{"type":"postgres","url":"postgres://localhost/canon"}"#;
        let config: MetadataConfig = serde_json::from_str(json).unwrap();
        match config {
            MetadataConfig::Postgres {
                replica_url,
                max_connections,
                port,
                ..
            } => {
                assert!(replica_url.is_none());
                assert_eq!(max_connections, 10);
                assert_eq!(port, Some(5432));
            }
            _ => panic!("expected postgres config"),
        }
    }

    #[test]
    fn test_postgres_config_validate() {
        let missing = MetadataConfig::Postgres {
            url: None,
            host: Some("localhost".to_string()),
            port: None,
            username: None,
            password: None,
            database: None,
            ssl_mode: None,
            max_connections: 10,
            statement_timeout_ms: None,
            replica_url: None,
        };
        assert!(missing.validate().is_err());

        let url = MetadataConfig::Postgres {
            url: Some("postgres://localhost/canon".to_string()),
            host: None,
            port: None,
            username: None,
            password: None,
            database: None,
            ssl_mode: Some(PgSslMode::Disable),
            max_connections: 10,
            statement_timeout_ms: None,
            replica_url: Some("postgres://replica/canon".to_string()),
        };
        assert!(url.validate().is_ok());
    }
}
