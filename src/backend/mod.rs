//! Backend capability layer
//!
//! One [`SchemaBackend`] implementation per supported database family
//! exposes introspection, DDL execution, transaction primitives for the test
//! gate, and sync log storage. Operations a family cannot express return
//! [`SyncError::Unsupported`](crate::error::SyncError::Unsupported) rather
//! than silently doing nothing.

pub mod memory;
pub mod postgres;

use crate::config::TargetEntry;
use crate::error::{SyncError, SyncResult};
use crate::model::{ObjectDefinition, ObjectKind, SyncLogEntry};
use crate::statement::SqlDialect;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Broad family of a backend, determining which object kinds it can express.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendFamily {
    Relational,
    DocumentStore,
    GraphStore,
}

impl BackendFamily {
    /// Whether this family has a meaningful notion of the given object kind.
    /// Document and graph stores synchronize collections/node shapes through
    /// the table surface but have no views or stored procedures.
    pub fn supports(&self, kind: ObjectKind) -> bool {
        match self {
            BackendFamily::Relational => true,
            BackendFamily::DocumentStore | BackendFamily::GraphStore => {
                kind == ObjectKind::Table
            }
        }
    }
}

/// Per-product adapter consumed by the engine, for the source as well as
/// every target. The source side is only ever read.
///
/// All operations within one backend run serially on a single logical
/// connection; the test transaction primitives are not safe to interleave
/// with concurrent statements on the same connection.
#[async_trait]
pub trait SchemaBackend: Send + Sync {
    /// Label used in reports and log lines.
    fn name(&self) -> &str;

    fn family(&self) -> BackendFamily;

    fn dialect(&self) -> SqlDialect;

    /// Names of all objects of a kind. Re-querying is safe.
    async fn list_objects(&self, kind: ObjectKind) -> SyncResult<Vec<String>>;

    /// Fresh definition snapshot; `NotFound` if the object is absent.
    async fn get_definition(&self, kind: ObjectKind, name: &str) -> SyncResult<ObjectDefinition>;

    async fn object_exists(&self, kind: ObjectKind, name: &str) -> SyncResult<bool>;

    /// Apply a DDL statement permanently.
    async fn execute(&self, statement: &str) -> SyncResult<()>;

    /// Open the transaction used by the test gate.
    async fn begin_test_transaction(&self) -> SyncResult<()>;

    /// Discard everything executed since [`begin_test_transaction`].
    ///
    /// [`begin_test_transaction`]: SchemaBackend::begin_test_transaction
    async fn rollback_test_transaction(&self) -> SyncResult<()>;

    /// Create the `sync_log` storage if absent.
    async fn ensure_log_storage(&self) -> SyncResult<()>;

    async fn append_log_entry(&self, entry: &SyncLogEntry) -> SyncResult<()>;

    /// Entry with the maximum timestamp for `(kind, name)`, ties broken by
    /// insertion order (most recently appended wins), or `None`.
    async fn latest_log_entry(
        &self,
        kind: ObjectKind,
        name: &str,
    ) -> SyncResult<Option<SyncLogEntry>>;
}

/// Resolve one configuration entry into a connected backend instance.
pub async fn connect(entry: &TargetEntry) -> SyncResult<Arc<dyn SchemaBackend>> {
    match entry.backend_type.as_str() {
        "postgres" | "postgresql" => {
            let config = serde_json::from_value(entry.config.clone())
                .map_err(|e| SyncError::Config(format!("invalid postgres config: {e}")))?;
            let backend = postgres::PostgresBackend::connect(entry.label(), &config).await?;
            Ok(Arc::new(backend))
        }
        "memory" => {
            let config: memory::MemoryConfig = serde_json::from_value(entry.config.clone())
                .map_err(|e| SyncError::Config(format!("invalid memory config: {e}")))?;
            Ok(Arc::new(memory::MemoryBackend::new(
                entry.label(),
                config.family,
            )))
        }
        other => Err(SyncError::Config(format!(
            "unsupported backend type: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_support_matrix() {
        assert!(BackendFamily::Relational.supports(ObjectKind::Procedure));
        assert!(BackendFamily::DocumentStore.supports(ObjectKind::Table));
        assert!(!BackendFamily::DocumentStore.supports(ObjectKind::View));
        assert!(!BackendFamily::GraphStore.supports(ObjectKind::Procedure));
    }
}
