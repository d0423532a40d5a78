//! Postgres backend
//!
//! Adapter over `tokio-postgres` through a `deadpool` pool. One pooled
//! connection is checked out for the lifetime of the backend so the test
//! transaction and the statements inside it share a session.

use crate::backend::{BackendFamily, SchemaBackend};
use crate::config::PostgresConfig;
use crate::error::{SyncError, SyncResult};
use crate::model::{ColumnDef, ObjectDefinition, ObjectKind, SyncDirection, SyncLogEntry};
use crate::statement::SqlDialect;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Config, ManagerConfig, RecyclingMethod, Runtime};
use tokio::sync::Mutex;
use tokio_postgres::NoTls;
use tracing::{debug, info};

const CREATE_SYNC_LOG: &str = "CREATE TABLE IF NOT EXISTS sync_log (
    id BIGSERIAL PRIMARY KEY,
    object_type TEXT NOT NULL,
    object_name TEXT NOT NULL,
    action TEXT NOT NULL,
    source_code_hash TEXT NOT NULL,
    sync_direction TEXT NOT NULL,
    original_state TEXT,
    new_state TEXT NOT NULL,
    rollback_action TEXT NOT NULL,
    \"timestamp\" TIMESTAMPTZ NOT NULL DEFAULT now()
)";

pub struct PostgresBackend {
    name: String,
    client: Mutex<deadpool_postgres::Object>,
}

impl PostgresBackend {
    /// Connect and verify the session with a probe query.
    pub async fn connect(name: impl Into<String>, config: &PostgresConfig) -> SyncResult<Self> {
        let name = name.into();
        let resolved = config.resolve()?;

        let mut cfg = Config::new();
        cfg.host = Some(resolved.host.clone());
        cfg.port = Some(resolved.port);
        cfg.user = Some(resolved.user.clone());
        cfg.password = Some(resolved.password.clone());
        cfg.dbname = Some(resolved.database.clone());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        cfg.pool = Some(deadpool_postgres::PoolConfig::new(resolved.max_pool_size));

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| SyncError::Connection(format!("failed to create pool: {e}")))?;

        let client = pool
            .get()
            .await
            .map_err(|e| SyncError::Connection(format!("failed to connect to {name}: {e}")))?;
        client
            .query_one("SELECT 1", &[])
            .await
            .map_err(|e| SyncError::Connection(format!("connection probe failed: {e}")))?;

        info!(
            backend = %name,
            host = %resolved.host,
            database = %resolved.database,
            "postgres backend connected"
        );
        Ok(Self {
            name,
            client: Mutex::new(client),
        })
    }
}

/// The introspected body from `pg_views` is the bare SELECT; re-wrap it so
/// the stored definition is an executable statement.
fn wrap_view_definition(name: &str, body: &str) -> String {
    format!(
        "CREATE OR REPLACE VIEW \"{}\" AS\n{}",
        name.replace('"', "\"\""),
        body.trim()
    )
}

#[async_trait]
impl SchemaBackend for PostgresBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn family(&self) -> BackendFamily {
        BackendFamily::Relational
    }

    fn dialect(&self) -> SqlDialect {
        SqlDialect::Postgres
    }

    async fn list_objects(&self, kind: ObjectKind) -> SyncResult<Vec<String>> {
        let client = self.client.lock().await;
        let rows = match kind {
            // The engine's own log table is never a sync candidate.
            ObjectKind::Table => {
                client
                    .query(
                        "SELECT table_name FROM information_schema.tables
                         WHERE table_schema = 'public'
                           AND table_type = 'BASE TABLE'
                           AND table_name <> 'sync_log'
                         ORDER BY table_name",
                        &[],
                    )
                    .await?
            }
            ObjectKind::View => {
                client
                    .query(
                        "SELECT viewname FROM pg_views
                         WHERE schemaname = 'public'
                         ORDER BY viewname",
                        &[],
                    )
                    .await?
            }
            ObjectKind::Procedure => {
                client
                    .query(
                        "SELECT p.proname FROM pg_proc p
                         JOIN pg_namespace n ON n.oid = p.pronamespace
                         WHERE n.nspname = 'public'
                         ORDER BY p.proname",
                        &[],
                    )
                    .await?
            }
        };
        Ok(rows.iter().map(|r| r.get(0)).collect())
    }

    async fn get_definition(&self, kind: ObjectKind, name: &str) -> SyncResult<ObjectDefinition> {
        let client = self.client.lock().await;
        match kind {
            ObjectKind::Table => {
                let rows = client
                    .query(
                        "SELECT column_name, data_type FROM information_schema.columns
                         WHERE table_schema = 'public' AND table_name = $1
                         ORDER BY ordinal_position",
                        &[&name],
                    )
                    .await?;
                if rows.is_empty() {
                    return Err(SyncError::NotFound(format!("table {name} does not exist")));
                }
                let columns = rows
                    .iter()
                    .map(|r| ColumnDef::new(r.get::<_, String>(0), r.get::<_, String>(1)))
                    .collect();
                Ok(ObjectDefinition::table(columns))
            }
            ObjectKind::View => {
                let row = client
                    .query_opt(
                        "SELECT definition FROM pg_views
                         WHERE schemaname = 'public' AND viewname = $1",
                        &[&name],
                    )
                    .await?
                    .ok_or_else(|| SyncError::NotFound(format!("view {name} does not exist")))?;
                Ok(ObjectDefinition::text(wrap_view_definition(
                    name,
                    row.get::<_, String>(0).as_str(),
                )))
            }
            ObjectKind::Procedure => {
                let row = client
                    .query_opt(
                        "SELECT pg_get_functiondef(p.oid) FROM pg_proc p
                         JOIN pg_namespace n ON n.oid = p.pronamespace
                         WHERE n.nspname = 'public' AND p.proname = $1
                         LIMIT 1",
                        &[&name],
                    )
                    .await?
                    .ok_or_else(|| {
                        SyncError::NotFound(format!("procedure {name} does not exist"))
                    })?;
                Ok(ObjectDefinition::text(row.get::<_, String>(0)))
            }
        }
    }

    async fn object_exists(&self, kind: ObjectKind, name: &str) -> SyncResult<bool> {
        let client = self.client.lock().await;
        let row = match kind {
            ObjectKind::Table => {
                client
                    .query_one(
                        "SELECT EXISTS (
                             SELECT 1 FROM information_schema.tables
                             WHERE table_schema = 'public'
                               AND table_type = 'BASE TABLE'
                               AND table_name = $1
                         )",
                        &[&name],
                    )
                    .await?
            }
            ObjectKind::View => {
                client
                    .query_one(
                        "SELECT EXISTS (
                             SELECT 1 FROM pg_views
                             WHERE schemaname = 'public' AND viewname = $1
                         )",
                        &[&name],
                    )
                    .await?
            }
            ObjectKind::Procedure => {
                client
                    .query_one(
                        "SELECT EXISTS (
                             SELECT 1 FROM pg_proc p
                             JOIN pg_namespace n ON n.oid = p.pronamespace
                             WHERE n.nspname = 'public' AND p.proname = $1
                         )",
                        &[&name],
                    )
                    .await?
            }
        };
        Ok(row.get(0))
    }

    async fn execute(&self, statement: &str) -> SyncResult<()> {
        let client = self.client.lock().await;
        debug!(backend = %self.name, "executing: {statement}");
        client
            .batch_execute(statement)
            .await
            .map_err(|e| SyncError::Execution(e.to_string()))
    }

    async fn begin_test_transaction(&self) -> SyncResult<()> {
        let client = self.client.lock().await;
        client.batch_execute("BEGIN").await?;
        Ok(())
    }

    async fn rollback_test_transaction(&self) -> SyncResult<()> {
        let client = self.client.lock().await;
        client.batch_execute("ROLLBACK").await?;
        Ok(())
    }

    async fn ensure_log_storage(&self) -> SyncResult<()> {
        let client = self.client.lock().await;
        client.batch_execute(CREATE_SYNC_LOG).await?;
        Ok(())
    }

    async fn append_log_entry(&self, entry: &SyncLogEntry) -> SyncResult<()> {
        let client = self.client.lock().await;
        client
            .execute(
                "INSERT INTO sync_log
                     (object_type, object_name, action, source_code_hash,
                      sync_direction, original_state, new_state, rollback_action,
                      \"timestamp\")
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
                &[
                    &entry.object_type.as_str(),
                    &entry.object_name,
                    &entry.action.as_str(),
                    &entry.source_code_hash,
                    &entry.sync_direction.as_str(),
                    &entry.original_state,
                    &entry.new_state,
                    &entry.rollback_action,
                    &entry.timestamp,
                ],
            )
            .await?;
        Ok(())
    }

    async fn latest_log_entry(
        &self,
        kind: ObjectKind,
        name: &str,
    ) -> SyncResult<Option<SyncLogEntry>> {
        let client = self.client.lock().await;
        let row = client
            .query_opt(
                "SELECT object_type, object_name, action, source_code_hash,
                        sync_direction, original_state, new_state, rollback_action,
                        \"timestamp\"
                 FROM sync_log
                 WHERE object_type = $1 AND object_name = $2
                 ORDER BY \"timestamp\" DESC, id DESC
                 LIMIT 1",
                &[&kind.as_str(), &name],
            )
            .await?;

        row.map(|row| {
            let direction = match row.get::<_, String>("sync_direction").as_str() {
                "source_to_target" => SyncDirection::SourceToTarget,
                other => {
                    return Err(SyncError::Execution(format!(
                        "unknown sync direction '{other}' in sync_log"
                    )))
                }
            };
            Ok(SyncLogEntry {
                object_type: row.get::<_, String>("object_type").parse()?,
                object_name: row.get("object_name"),
                action: row.get::<_, String>("action").parse()?,
                source_code_hash: row.get("source_code_hash"),
                sync_direction: direction,
                original_state: row.get("original_state"),
                new_state: row.get("new_state"),
                rollback_action: row.get("rollback_action"),
                timestamp: row.get::<_, DateTime<Utc>>("timestamp"),
            })
        })
        .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_view_definition_is_rewrapped_as_executable_ddl() {
        let wrapped = wrap_view_definition("v_active", " SELECT id FROM orders WHERE active;");
        assert_eq!(
            wrapped,
            "CREATE OR REPLACE VIEW \"v_active\" AS\nSELECT id FROM orders WHERE active;"
        );
    }

    #[test]
    fn test_log_ddl_mentions_every_entry_field() {
        for column in [
            "object_type",
            "object_name",
            "action",
            "source_code_hash",
            "sync_direction",
            "original_state",
            "new_state",
            "rollback_action",
            "timestamp",
        ] {
            assert!(CREATE_SYNC_LOG.contains(column), "missing {column}");
        }
    }
}
