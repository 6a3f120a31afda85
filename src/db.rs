//! Database persistence for snapshots
//!
//! Optional write-through backing for the in-memory snapshot store. Each
//! snapshot is kept as one JSONB row; annotations live in their own column
//! so attaching a note never rewrites the payload.

use crate::config::DatabaseConfig;
use crate::error::AppError;
use crate::snapshot::models::{Snapshot, SnapshotId};
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use tokio_postgres::types::Json;
use tokio_postgres::NoTls;
use tracing::{debug, info};

const CREATE_SNAPSHOTS_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS health_snapshots (
        id BIGINT PRIMARY KEY,
        captured_at TIMESTAMPTZ NOT NULL UNIQUE,
        payload JSONB NOT NULL,
        annotation TEXT
    )";

const INSERT_SNAPSHOT: &str =
    "INSERT INTO health_snapshots (id, captured_at, payload) VALUES ($1, $2, $3)";

const DELETE_SNAPSHOT: &str = "DELETE FROM health_snapshots WHERE id = $1";

const UPDATE_ANNOTATION: &str = "UPDATE health_snapshots SET annotation = $2 WHERE id = $1";

const LOAD_SNAPSHOTS: &str =
    "SELECT payload, annotation FROM health_snapshots ORDER BY captured_at ASC";

/// Snapshot row loaded at startup
pub struct StoredSnapshot {
    pub snapshot: Snapshot,
    pub annotation: Option<String>,
}

/// Postgres-backed snapshot repository
pub struct SnapshotRepository {
    pool: Pool,
}

impl SnapshotRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Create the pool described by `config` and verify it answers.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, AppError> {
        let mut cfg = Config::new();
        cfg.host = Some(config.host.clone());
        cfg.port = Some(config.port);
        cfg.user = Some(config.user.clone());
        cfg.password = Some(config.password.clone());
        cfg.dbname = Some(config.database.clone());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        cfg.pool = Some(deadpool_postgres::PoolConfig::new(config.max_pool_size));

        let pool = if config.require_tls {
            let certs = rustls_native_certs::load_native_certs();
            let mut root_store = rustls::RootCertStore::empty();
            for cert in certs.certs {
                root_store.add(cert).ok();
            }

            let tls_config = rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth();

            let tls = tokio_postgres_rustls::MakeRustlsConnect::new(tls_config);
            cfg.create_pool(Some(Runtime::Tokio1), tls)
        } else {
            cfg.create_pool(Some(Runtime::Tokio1), NoTls)
        }
        .map_err(|e| AppError::StoreUnavailable(format!("Failed to create pool: {}", e)))?;

        let client = pool.get().await?;
        client.query_one("SELECT 1", &[]).await?;
        info!(
            "✅ Snapshot database reachable at {}:{} (TLS: {})",
            config.host, config.port, config.require_tls
        );

        Ok(Self::new(pool))
    }

    pub async fn init_schema(&self) -> Result<(), AppError> {
        let client = self.pool.get().await?;
        client.execute(CREATE_SNAPSHOTS_TABLE, &[]).await?;
        debug!("health_snapshots table ready");
        Ok(())
    }

    pub async fn load_all(&self) -> Result<Vec<StoredSnapshot>, AppError> {
        let client = self.pool.get().await?;
        let rows = client.query(LOAD_SNAPSHOTS, &[]).await?;

        rows.into_iter()
            .map(|row| {
                let Json(snapshot): Json<Snapshot> = row
                    .try_get(0)
                    .map_err(|e| AppError::Internal(format!("Unreadable snapshot row: {}", e)))?;
                Ok(StoredSnapshot {
                    snapshot,
                    annotation: row.try_get(1)?,
                })
            })
            .collect()
    }

    pub async fn insert(&self, snapshot: &Snapshot) -> Result<(), AppError> {
        let client = self.pool.get().await?;
        client
            .execute(
                INSERT_SNAPSHOT,
                &[&to_db_id(snapshot.id), &snapshot.timestamp, &Json(snapshot)],
            )
            .await?;
        Ok(())
    }

    /// Swap `old` for `snapshot` in one transaction so a failed insert
    /// keeps the old row.
    pub async fn replace(&self, old: SnapshotId, snapshot: &Snapshot) -> Result<(), AppError> {
        let mut client = self.pool.get().await?;
        let transaction = client.transaction().await?;
        transaction.execute(DELETE_SNAPSHOT, &[&to_db_id(old)]).await?;
        transaction
            .execute(
                INSERT_SNAPSHOT,
                &[&to_db_id(snapshot.id), &snapshot.timestamp, &Json(snapshot)],
            )
            .await?;
        transaction.commit().await?;
        debug!("Replaced snapshot row {} with {}", old, snapshot.id);
        Ok(())
    }

    pub async fn delete(&self, id: SnapshotId) -> Result<(), AppError> {
        let client = self.pool.get().await?;
        client.execute(DELETE_SNAPSHOT, &[&to_db_id(id)]).await?;
        Ok(())
    }

    pub async fn set_annotation(&self, id: SnapshotId, note: Option<&str>) -> Result<(), AppError> {
        let client = self.pool.get().await?;
        client.execute(UPDATE_ANNOTATION, &[&to_db_id(id), &note]).await?;
        Ok(())
    }
}

fn to_db_id(id: SnapshotId) -> i64 {
    id.0 as i64
}
