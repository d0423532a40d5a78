//! Action log
//!
//! Append-only record of executed changes. Each target database exclusively
//! owns its own log; the engine never merges log state across targets, and
//! never mutates or deletes entries it wrote.

use crate::backend::SchemaBackend;
use crate::error::{SyncError, SyncResult};
use crate::model::{ObjectKind, SyncLogEntry};
use tracing::{debug, error};

/// Append/lookup facade over a backend's `sync_log` storage.
pub struct ActionLog;

impl ActionLog {
    /// Append one entry. Never fails silently: any storage failure after a
    /// successful apply means the mutation is permanently unrollback-able,
    /// so it is remapped to the distinct `LogWrite` error class and logged
    /// at error severity.
    pub async fn append(backend: &dyn SchemaBackend, entry: &SyncLogEntry) -> SyncResult<()> {
        match backend.append_log_entry(entry).await {
            Ok(()) => {
                debug!(
                    backend = backend.name(),
                    object = %entry.object_name,
                    action = %entry.action,
                    "sync log entry appended"
                );
                Ok(())
            }
            Err(e) => {
                error!(
                    backend = backend.name(),
                    object = %entry.object_name,
                    "failed to append sync log entry; change cannot be rolled back: {e}"
                );
                Err(SyncError::LogWrite(e.to_string()))
            }
        }
    }

    /// Entry with the maximum timestamp for `(kind, name)`, ties broken by
    /// insertion order, or `None` if the object has no history.
    pub async fn latest(
        backend: &dyn SchemaBackend,
        kind: ObjectKind,
        name: &str,
    ) -> SyncResult<Option<SyncLogEntry>> {
        backend.latest_log_entry(kind, name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::backend::BackendFamily;
    use crate::model::{SyncAction, SyncDirection};
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn entry(name: &str, action: SyncAction, secs: i64) -> SyncLogEntry {
        SyncLogEntry {
            object_type: ObjectKind::Table,
            object_name: name.to_string(),
            action,
            source_code_hash: "deadbeef".to_string(),
            sync_direction: SyncDirection::SourceToTarget,
            original_state: None,
            new_state: "CREATE TABLE \"orders\" ();".to_string(),
            rollback_action: "DROP TABLE IF EXISTS \"orders\";".to_string(),
            timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_latest_picks_maximum_timestamp() {
        let backend = MemoryBackend::new("t1", BackendFamily::Relational);
        ActionLog::append(&backend, &entry("orders", SyncAction::Create, 100))
            .await
            .unwrap();
        ActionLog::append(&backend, &entry("orders", SyncAction::Alter, 200))
            .await
            .unwrap();
        ActionLog::append(&backend, &entry("orders", SyncAction::Sync, 150))
            .await
            .unwrap();

        let latest = ActionLog::latest(&backend, ObjectKind::Table, "orders")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.action, SyncAction::Alter);
    }

    #[tokio::test]
    async fn test_latest_breaks_timestamp_ties_by_insertion_order() {
        let backend = MemoryBackend::new("t1", BackendFamily::Relational);
        ActionLog::append(&backend, &entry("orders", SyncAction::Create, 100))
            .await
            .unwrap();
        ActionLog::append(&backend, &entry("orders", SyncAction::Sync, 100))
            .await
            .unwrap();

        let latest = ActionLog::latest(&backend, ObjectKind::Table, "orders")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.action, SyncAction::Sync);
    }

    #[tokio::test]
    async fn test_latest_is_scoped_to_identity() {
        let backend = MemoryBackend::new("t1", BackendFamily::Relational);
        ActionLog::append(&backend, &entry("orders", SyncAction::Create, 100))
            .await
            .unwrap();

        assert!(ActionLog::latest(&backend, ObjectKind::Table, "customers")
            .await
            .unwrap()
            .is_none());
        assert!(ActionLog::latest(&backend, ObjectKind::View, "orders")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_append_failure_is_a_log_write_error() {
        let backend = MemoryBackend::new("t1", BackendFamily::Relational);
        backend.fail_log_appends(true);

        let err = ActionLog::append(&backend, &entry("orders", SyncAction::Create, 100))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::LogWrite(_)));
    }
}
