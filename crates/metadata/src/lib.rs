//! Metadata store abstraction and implementations for canon.
//!
//! This crate owns the software catalog and per-host inventory state:
//! - Canonical titles and the software rows linked to them
//! - Host software and host certificate reconciliation
//! - Operating systems, CVE metadata and vulnerability links
//! - Denormalized host counts and the listings built on them

pub mod error;
pub mod models;
pub mod postgres;
pub mod reconcile;
pub mod repos;
pub mod retry;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use postgres::PostgresStore;
pub use retry::RetryPolicy;
pub use store::{MetadataStore, SqliteStore};

use canon_core::config::{MetadataConfig, ReconcileConfig};
use std::sync::Arc;

/// Create a metadata store from configuration.
pub async fn from_config(
    config: &MetadataConfig,
    reconcile: &ReconcileConfig,
) -> MetadataResult<Arc<dyn MetadataStore>> {
    match config {
        MetadataConfig::Sqlite {
            path,
            query_timeout_secs,
        } => {
            let store = SqliteStore::new(path, *query_timeout_secs)
                .await?
                .with_reconcile_config(reconcile);
            Ok(Arc::new(store) as Arc<dyn MetadataStore>)
        }
        MetadataConfig::Postgres {
            url,
            host,
            port,
            username,
            password,
            database,
            ssl_mode,
            max_connections,
            statement_timeout_ms,
            replica_url,
        } => {
            let store = if let Some(url) = url {
                // URL takes precedence over the individual fields
                tracing::info!("Connecting to PostgreSQL using connection URL");
                PostgresStore::from_url(url, *max_connections, *statement_timeout_ms).await?
            } else if let (Some(host), Some(database)) = (host.as_ref(), database.as_ref()) {
                PostgresStore::from_params(
                    host,
                    port.unwrap_or(5432),
                    username.as_deref(),
                    password.as_deref(),
                    database,
                    *ssl_mode,
                    *max_connections,
                    *statement_timeout_ms,
                )
                .await?
            } else {
                return Err(MetadataError::Config(
                    "postgres config requires either 'url' or 'host' + 'database'".to_string(),
                ));
            };
            let store = match replica_url {
                Some(replica) => {
                    store
                        .with_replica(replica, *max_connections, *statement_timeout_ms)
                        .await?
                }
                None => store,
            };
            Ok(Arc::new(store.with_reconcile_config(reconcile)) as Arc<dyn MetadataStore>)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canon_core::config::MetadataConfig;

    #[tokio::test]
    async fn test_from_config_sqlite() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("nested").join("metadata.db");
        let config = MetadataConfig::Sqlite {
            path: db_path.clone(),
            query_timeout_secs: None,
        };

        let store = from_config(&config, &ReconcileConfig::default())
            .await
            .unwrap();
        store.health_check().await.unwrap();
        assert!(db_path.exists());
    }

    #[tokio::test]
    async fn test_from_config_postgres_requires_url_or_host() {
        let config = MetadataConfig::Postgres {
            url: None,
            host: None,
            port: Some(5432),
            username: None,
            password: None,
            database: Some("canon".to_string()),
            ssl_mode: None,
            max_connections: 1,
            statement_timeout_ms: None,
            replica_url: None,
        };

        let err = match from_config(&config, &ReconcileConfig::default()).await {
            Ok(_) => panic!("expected a configuration error"),
            Err(e) => e,
        };
        assert!(matches!(err, MetadataError::Config(_)));
    }

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::new(temp_dir.path().join("canon.db"), None)
            .await
            .unwrap();
        store.migrate().await.unwrap();
        store.migrate().await.unwrap();
    }
}
