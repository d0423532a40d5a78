//! Sync orchestrator
//!
//! Drives a full run: per object kind, per source object, discover both
//! definitions, diff, validate the candidate through the test gate, apply,
//! and append to the target's sync log. Targets run in parallel and fail
//! independently; objects within one target run serially over its single
//! logical connection.

use crate::backend::SchemaBackend;
use crate::diff::{DiffEngine, DiffOptions, DiffOutcome, PlannedChange};
use crate::error::{SyncError, SyncResult};
use crate::gate::TestGate;
use crate::log::ActionLog;
use crate::model::{ObjectDefinition, ObjectKind, SyncAction, SyncDirection, SyncLogEntry};
use crate::report::{ObjectOutcome, ObjectStatus, RunReport, TargetReport};
use crate::statement::StatementBuilder;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Operation selectors for one run. All off by default; a run with nothing
/// selected does nothing.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncOptions {
    pub sync_all_tables: bool,
    pub sync_all_views: bool,
    pub sync_all_procedures: bool,
    /// Generate incremental ALTERs for existing tables.
    pub alter_sync: bool,
    /// Create source objects that are absent on the target.
    pub create_on_target: bool,
}

impl SyncOptions {
    pub fn includes(&self, kind: ObjectKind) -> bool {
        match kind {
            ObjectKind::Table => self.sync_all_tables,
            ObjectKind::View => self.sync_all_views,
            ObjectKind::Procedure => self.sync_all_procedures,
        }
    }

    fn diff_options(&self) -> DiffOptions {
        DiffOptions {
            alter_sync: self.alter_sync,
            create_on_target: self.create_on_target,
        }
    }
}

/// One engine run over a read-only source and any number of targets.
pub struct SyncOrchestrator {
    options: SyncOptions,
    cancelled: Arc<AtomicBool>,
}

impl SyncOrchestrator {
    pub fn new(options: SyncOptions) -> Self {
        Self {
            options,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request cancellation. Takes effect between objects: the in-flight
    /// object finishes (or fails) normally, nothing is interrupted mid-apply.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Handle for cancelling from another task.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    /// Run every selected pass against every target. Target reports come
    /// back in configuration order regardless of completion order.
    pub async fn run(
        &self,
        source: Arc<dyn SchemaBackend>,
        targets: Vec<Arc<dyn SchemaBackend>>,
    ) -> RunReport {
        let mut handles = Vec::with_capacity(targets.len());
        for target in targets {
            let source = Arc::clone(&source);
            let options = self.options;
            let cancelled = Arc::clone(&self.cancelled);
            let label = target.name().to_string();
            let handle = tokio::spawn(async move {
                Self::run_target(source, target, options, cancelled).await
            });
            handles.push((label, handle));
        }

        let mut reports = Vec::with_capacity(handles.len());
        for (label, handle) in handles {
            match handle.await {
                Ok(report) => reports.push(report),
                Err(e) => reports.push(TargetReport {
                    target: label,
                    outcomes: Vec::new(),
                    aborted: Some(format!("target task failed: {e}")),
                    started_at: Utc::now(),
                    finished_at: Utc::now(),
                }),
            }
        }
        RunReport { targets: reports }
    }

    async fn run_target(
        source: Arc<dyn SchemaBackend>,
        target: Arc<dyn SchemaBackend>,
        options: SyncOptions,
        cancelled: Arc<AtomicBool>,
    ) -> TargetReport {
        let started_at = Utc::now();
        let mut outcomes = Vec::new();
        let mut aborted = None;

        info!(target = target.name(), "starting sync pass");

        if let Err(e) = target.ensure_log_storage().await {
            warn!(target = target.name(), "cannot prepare sync log storage: {e}");
            return TargetReport {
                target: target.name().to_string(),
                outcomes,
                aborted: Some(format!("sync log storage unavailable: {e}")),
                started_at,
                finished_at: Utc::now(),
            };
        }

        let builder = StatementBuilder::new(target.dialect());

        'pass: for kind in ObjectKind::ALL {
            if !options.includes(kind) {
                continue;
            }
            // A source family without this kind has nothing to offer.
            if !source.family().supports(kind) {
                continue;
            }
            if !target.family().supports(kind) {
                outcomes.push(
                    ObjectOutcome::new(kind, "*", ObjectStatus::Unsupported).with_detail(format!(
                        "{:?} targets have no notion of {kind}s",
                        target.family()
                    )),
                );
                continue;
            }

            let names = match source.list_objects(kind).await {
                Ok(names) => names,
                Err(e) => {
                    aborted = Some(format!("cannot list source {kind}s: {e}"));
                    break 'pass;
                }
            };

            for name in names {
                if cancelled.load(Ordering::SeqCst) {
                    aborted = Some("sync cancelled".to_string());
                    break 'pass;
                }
                match Self::sync_object(&*source, &*target, &builder, &options, kind, &name).await
                {
                    Ok(outcome) => outcomes.push(outcome),
                    // Only losing the backend is fatal for this target;
                    // every other failure stays scoped to the object it hit
                    // and the pass moves on.
                    Err(e @ SyncError::Connection(_)) => {
                        aborted = Some(format!("backend failure on {kind} {name}: {e}"));
                        break 'pass;
                    }
                    Err(e) => {
                        warn!(
                            target = target.name(),
                            object = %name,
                            "skipping {kind}: {e}"
                        );
                        let status = match e {
                            SyncError::Unsupported(_) => ObjectStatus::Unsupported,
                            _ => ObjectStatus::ExecutionFailed,
                        };
                        outcomes.push(
                            ObjectOutcome::new(kind, name.as_str(), status)
                                .with_detail(e.to_string()),
                        );
                    }
                }
            }
        }

        let report = TargetReport {
            target: target.name().to_string(),
            outcomes,
            aborted,
            started_at,
            finished_at: Utc::now(),
        };
        info!(
            target = target.name(),
            changes = report.changes_applied(),
            failures = report.failures(),
            aborted = report.aborted.is_some(),
            "sync pass finished"
        );
        report
    }

    /// Discover, diff, validate, apply and log one object. `Err` here means
    /// a backend failure outside the per-change handling; the caller decides
    /// whether it is fatal for the target.
    async fn sync_object(
        source: &dyn SchemaBackend,
        target: &dyn SchemaBackend,
        builder: &StatementBuilder,
        options: &SyncOptions,
        kind: ObjectKind,
        name: &str,
    ) -> SyncResult<ObjectOutcome> {
        let source_def = source.get_definition(kind, name).await?;
        let target_def = if target.object_exists(kind, name).await? {
            Some(target.get_definition(kind, name).await?)
        } else {
            None
        };

        match DiffEngine::diff(
            kind,
            name,
            &source_def,
            target_def.as_ref(),
            &options.diff_options(),
        ) {
            DiffOutcome::UpToDate => Ok(ObjectOutcome::new(kind, name, ObjectStatus::UpToDate)),
            DiffOutcome::MissingOnTarget => Ok(ObjectOutcome::new(
                kind,
                name,
                ObjectStatus::MissingOnTarget,
            )
            .with_detail("absent on target and createOnTarget is not set")),
            DiffOutcome::AlterSuppressed(columns) => {
                let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
                Ok(
                    ObjectOutcome::new(kind, name, ObjectStatus::AlterSuppressed).with_detail(
                        format!(
                            "columns missing on target but alterSync is not set: {}",
                            names.join(", ")
                        ),
                    ),
                )
            }
            DiffOutcome::Planned(changes) => {
                Self::apply_changes(target, builder, kind, name, &source_def, changes).await
            }
        }
    }

    async fn apply_changes(
        target: &dyn SchemaBackend,
        builder: &StatementBuilder,
        kind: ObjectKind,
        name: &str,
        source_def: &ObjectDefinition,
        changes: Vec<PlannedChange>,
    ) -> SyncResult<ObjectOutcome> {
        let total = changes.len();
        let mut applied = 0usize;
        let mut last_action = None;

        for change in changes {
            let candidate = builder.render(&change.change);

            if !TestGate::validate(target, &candidate).await? {
                return Ok(
                    ObjectOutcome::new(kind, name, ObjectStatus::ValidationFailed).with_detail(
                        format!("rejected by test transaction ({applied}/{total} changes applied): {candidate}"),
                    ),
                );
            }

            if let Err(e) = target.execute(&candidate).await {
                warn!(
                    target = target.name(),
                    object = name,
                    "apply failed after validation passed: {e}"
                );
                return Ok(
                    ObjectOutcome::new(kind, name, ObjectStatus::ExecutionFailed).with_detail(
                        format!("apply failed ({applied}/{total} changes applied): {e}"),
                    ),
                );
            }

            let entry = SyncLogEntry {
                object_type: kind,
                object_name: name.to_string(),
                action: change.action,
                source_code_hash: source_def.checksum(),
                sync_direction: SyncDirection::SourceToTarget,
                original_state: change
                    .original_state
                    .as_ref()
                    .map(|def| builder.render_definition(name, def)),
                new_state: candidate.clone(),
                rollback_action: builder.render(&change.rollback),
                timestamp: Utc::now(),
            };
            if let Err(e) = ActionLog::append(target, &entry).await {
                // The change itself is committed; only its history is lost.
                return Ok(
                    ObjectOutcome::new(kind, name, ObjectStatus::LogWriteFailed)
                        .with_detail(e.to_string()),
                );
            }

            applied += 1;
            last_action = Some(change.action);
            info!(
                target = target.name(),
                object = name,
                action = %change.action,
                "change applied"
            );
        }

        let status = match last_action {
            Some(SyncAction::Create) => ObjectStatus::Created,
            Some(SyncAction::Alter) => ObjectStatus::Altered,
            Some(SyncAction::Sync) => ObjectStatus::Synced,
            None => ObjectStatus::UpToDate,
        };
        Ok(ObjectOutcome::new(kind, name, status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::backend::BackendFamily;
    use crate::model::ColumnDef;
    use pretty_assertions::assert_eq;

    fn relational(name: &str) -> Arc<MemoryBackend> {
        Arc::new(MemoryBackend::new(name, BackendFamily::Relational))
    }

    fn all_tables() -> SyncOptions {
        SyncOptions {
            sync_all_tables: true,
            alter_sync: true,
            create_on_target: true,
            ..Default::default()
        }
    }

    fn single_outcome(report: &RunReport) -> &ObjectOutcome {
        assert_eq!(report.targets.len(), 1);
        assert_eq!(report.targets[0].outcomes.len(), 1);
        &report.targets[0].outcomes[0]
    }

    #[tokio::test]
    async fn test_creates_missing_table_and_logs_it() {
        let source = relational("source");
        source.seed_table(
            "orders",
            vec![ColumnDef::new("id", "int"), ColumnDef::new("total", "decimal")],
        );
        let target = relational("t1");

        let orchestrator = SyncOrchestrator::new(all_tables());
        let report = orchestrator
            .run(source.clone(), vec![target.clone()])
            .await;

        assert_eq!(single_outcome(&report).status, ObjectStatus::Created);
        assert_eq!(
            target
                .get_definition(ObjectKind::Table, "orders")
                .await
                .unwrap(),
            ObjectDefinition::table(vec![
                ColumnDef::new("id", "int"),
                ColumnDef::new("total", "decimal"),
            ])
        );

        let entries = target.log_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, SyncAction::Create);
        assert_eq!(entries[0].original_state, None);
        assert_eq!(
            entries[0].rollback_action,
            "DROP TABLE IF EXISTS \"orders\";"
        );
    }

    #[tokio::test]
    async fn test_second_run_is_a_noop() {
        let source = relational("source");
        source.seed_table("orders", vec![ColumnDef::new("id", "int")]);
        let target = relational("t1");

        let orchestrator = SyncOrchestrator::new(all_tables());
        orchestrator.run(source.clone(), vec![target.clone()]).await;
        let report = orchestrator.run(source, vec![target.clone()]).await;

        assert_eq!(single_outcome(&report).status, ObjectStatus::UpToDate);
        // No second log entry either.
        assert_eq!(target.log_entries().len(), 1);
    }

    #[tokio::test]
    async fn test_alters_existing_table_one_column_at_a_time() {
        let source = relational("source");
        source.seed_table(
            "orders",
            vec![
                ColumnDef::new("id", "int"),
                ColumnDef::new("status", "varchar"),
                ColumnDef::new("total", "decimal"),
            ],
        );
        let target = relational("t1");
        target.seed_table("orders", vec![ColumnDef::new("id", "int")]);

        let report = SyncOrchestrator::new(all_tables())
            .run(source, vec![target.clone()])
            .await;

        assert_eq!(single_outcome(&report).status, ObjectStatus::Altered);
        let entries = target.log_entries();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.action == SyncAction::Alter));
        assert_eq!(
            entries[0].rollback_action,
            "ALTER TABLE \"orders\" DROP COLUMN \"status\";"
        );
        // Pre-change target state is recorded per step, each including the
        // columns the previous steps added.
        assert!(entries[0]
            .original_state
            .as_deref()
            .unwrap()
            .contains("\"id\" int"));
        assert!(!entries[0]
            .original_state
            .as_deref()
            .unwrap()
            .contains("\"status\""));
        assert!(entries[1]
            .original_state
            .as_deref()
            .unwrap()
            .contains("\"status\" varchar"));
    }

    #[tokio::test]
    async fn test_missing_table_without_create_flag_is_reported_not_created() {
        let source = relational("source");
        source.seed_table("orders", vec![ColumnDef::new("id", "int")]);
        let target = relational("t1");

        let options = SyncOptions {
            sync_all_tables: true,
            alter_sync: true,
            ..Default::default()
        };
        let report = SyncOrchestrator::new(options)
            .run(source, vec![target.clone()])
            .await;

        assert_eq!(
            single_outcome(&report).status,
            ObjectStatus::MissingOnTarget
        );
        assert!(!target
            .object_exists(ObjectKind::Table, "orders")
            .await
            .unwrap());
        assert!(target.log_entries().is_empty());
    }

    #[tokio::test]
    async fn test_suppressed_alter_reports_the_missing_columns() {
        let source = relational("source");
        source.seed_table(
            "orders",
            vec![ColumnDef::new("id", "int"), ColumnDef::new("status", "varchar")],
        );
        let target = relational("t1");
        target.seed_table("orders", vec![ColumnDef::new("id", "int")]);

        let options = SyncOptions {
            sync_all_tables: true,
            ..Default::default()
        };
        let report = SyncOrchestrator::new(options)
            .run(source, vec![target.clone()])
            .await;

        let outcome = single_outcome(&report);
        assert_eq!(outcome.status, ObjectStatus::AlterSuppressed);
        assert!(outcome.detail.as_deref().unwrap().contains("status"));
        assert!(target.log_entries().is_empty());
    }

    #[tokio::test]
    async fn test_target_only_columns_survive_every_run() {
        let source = relational("source");
        source.seed_table("orders", vec![ColumnDef::new("id", "int")]);
        let target = relational("t1");
        target.seed_table(
            "orders",
            vec![ColumnDef::new("id", "int"), ColumnDef::new("legacy_flag", "boolean")],
        );

        let report = SyncOrchestrator::new(all_tables())
            .run(source, vec![target.clone()])
            .await;

        assert_eq!(single_outcome(&report).status, ObjectStatus::UpToDate);
        let def = target
            .get_definition(ObjectKind::Table, "orders")
            .await
            .unwrap();
        assert!(def.column_map().contains_key("legacy_flag"));
    }

    #[tokio::test]
    async fn test_differing_view_is_replaced_with_source_text() {
        let source = relational("source");
        source.seed_view("v_active", "CREATE VIEW \"v_active\" AS SELECT 2");
        let target = relational("t1");
        target.seed_view("v_active", "CREATE VIEW \"v_active\" AS SELECT 1");

        let options = SyncOptions {
            sync_all_views: true,
            ..Default::default()
        };
        let report = SyncOrchestrator::new(options)
            .run(source, vec![target.clone()])
            .await;

        assert_eq!(single_outcome(&report).status, ObjectStatus::Synced);
        assert_eq!(
            target
                .get_definition(ObjectKind::View, "v_active")
                .await
                .unwrap(),
            ObjectDefinition::text("CREATE VIEW \"v_active\" AS SELECT 2")
        );
        // Rollback carries the replaced definition verbatim.
        let entries = target.log_entries();
        assert_eq!(
            entries[0].rollback_action,
            "CREATE VIEW \"v_active\" AS SELECT 1"
        );
        assert_eq!(
            entries[0].original_state.as_deref(),
            Some("CREATE VIEW \"v_active\" AS SELECT 1")
        );
    }

    #[tokio::test]
    async fn test_force_created_existing_procedure_fails_validation_cleanly() {
        // createOnTarget forces the create branch for procedures even when
        // the body already matches; the test gate then rejects the duplicate
        // create and nothing is applied or logged.
        let body = "CREATE PROCEDURE \"refresh_totals\" AS BEGIN END";
        let source = relational("source");
        source.seed_procedure("refresh_totals", body);
        let target = relational("t1");
        target.seed_procedure("refresh_totals", body);

        let options = SyncOptions {
            sync_all_procedures: true,
            create_on_target: true,
            ..Default::default()
        };
        let report = SyncOrchestrator::new(options)
            .run(source, vec![target.clone()])
            .await;

        assert_eq!(
            single_outcome(&report).status,
            ObjectStatus::ValidationFailed
        );
        assert!(target.log_entries().is_empty());
        assert_eq!(
            target
                .get_definition(ObjectKind::Procedure, "refresh_totals")
                .await
                .unwrap(),
            ObjectDefinition::text(body)
        );
    }

    #[tokio::test]
    async fn test_log_write_failure_is_reported_but_change_stays_applied() {
        let source = relational("source");
        source.seed_table("orders", vec![ColumnDef::new("id", "int")]);
        let target = relational("t1");
        target.fail_log_appends(true);

        let report = SyncOrchestrator::new(all_tables())
            .run(source, vec![target.clone()])
            .await;

        assert_eq!(single_outcome(&report).status, ObjectStatus::LogWriteFailed);
        assert!(target
            .object_exists(ObjectKind::Table, "orders")
            .await
            .unwrap());
        assert!(target.log_entries().is_empty());
    }

    #[tokio::test]
    async fn test_object_level_failures_do_not_abort_the_target() {
        // "a_gone" lists but its definition read fails, as if it were
        // dropped between discovery and read; "b_ok" must still sync.
        let source = relational("source");
        source.seed_table("a_gone", vec![ColumnDef::new("id", "int")]);
        source.seed_table("b_ok", vec![ColumnDef::new("id", "int")]);
        source.hide_definition("a_gone");
        let target = relational("t1");

        let report = SyncOrchestrator::new(all_tables())
            .run(source, vec![target.clone()])
            .await;

        let outcomes = &report.targets[0].outcomes;
        assert!(report.targets[0].aborted.is_none());
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].name, "a_gone");
        assert_eq!(outcomes[0].status, ObjectStatus::ExecutionFailed);
        assert_eq!(outcomes[1].name, "b_ok");
        assert_eq!(outcomes[1].status, ObjectStatus::Created);
        assert!(target
            .object_exists(ObjectKind::Table, "b_ok")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_connection_failure_aborts_only_that_target() {
        let source = relational("source");
        source.seed_table("orders", vec![ColumnDef::new("id", "int")]);
        let healthy = relational("t1");
        let wedged = relational("t2");
        // A transaction someone else left open makes every gate call fail
        // at the connection level.
        wedged.begin_test_transaction().await.unwrap();

        let report = SyncOrchestrator::new(all_tables())
            .run(source, vec![healthy.clone(), wedged.clone()])
            .await;

        assert_eq!(report.targets[0].outcomes[0].status, ObjectStatus::Created);
        assert!(report.targets[0].aborted.is_none());
        assert!(report.targets[1].aborted.is_some());
        assert!(wedged.log_entries().is_empty());
    }

    #[tokio::test]
    async fn test_execute_failure_after_validation_is_reported_without_a_log_entry() {
        let source = relational("source");
        source.seed_table("orders", vec![ColumnDef::new("id", "int")]);
        let target = relational("t1");
        target.fail_next_execute();

        let report = SyncOrchestrator::new(all_tables())
            .run(source, vec![target.clone()])
            .await;

        let outcome = single_outcome(&report);
        assert_eq!(outcome.status, ObjectStatus::ExecutionFailed);
        assert!(report.targets[0].aborted.is_none());
        assert!(target.log_entries().is_empty());
        assert!(!target
            .object_exists(ObjectKind::Table, "orders")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_unsupported_kinds_surface_per_target_family() {
        let source = relational("source");
        source.seed_table("users", vec![ColumnDef::new("id", "int")]);
        source.seed_view("v_users", "CREATE VIEW \"v_users\" AS SELECT 1");
        let target = Arc::new(MemoryBackend::new("docs", BackendFamily::DocumentStore));

        let options = SyncOptions {
            sync_all_tables: true,
            sync_all_views: true,
            create_on_target: true,
            ..Default::default()
        };
        let report = SyncOrchestrator::new(options)
            .run(source, vec![target.clone()])
            .await;

        let outcomes = &report.targets[0].outcomes;
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].status, ObjectStatus::Created);
        assert_eq!(outcomes[1].kind, ObjectKind::View);
        assert_eq!(outcomes[1].name, "*");
        assert_eq!(outcomes[1].status, ObjectStatus::Unsupported);
        assert!(target
            .object_exists(ObjectKind::Table, "users")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_targets_fail_independently() {
        let source = relational("source");
        source.seed_table("orders", vec![ColumnDef::new("id", "int")]);
        let healthy = relational("t1");
        let broken = relational("t2");
        broken.fail_log_appends(true);

        let report = SyncOrchestrator::new(all_tables())
            .run(source, vec![healthy.clone(), broken.clone()])
            .await;

        assert_eq!(report.targets.len(), 2);
        assert_eq!(report.targets[0].target, "t1");
        assert_eq!(report.targets[0].outcomes[0].status, ObjectStatus::Created);
        assert_eq!(
            report.targets[1].outcomes[0].status,
            ObjectStatus::LogWriteFailed
        );
    }

    #[tokio::test]
    async fn test_cancellation_stops_between_objects() {
        let source = relational("source");
        source.seed_table("a_first", vec![ColumnDef::new("id", "int")]);
        source.seed_table("b_second", vec![ColumnDef::new("id", "int")]);
        let target = relational("t1");

        let orchestrator = SyncOrchestrator::new(all_tables());
        orchestrator.cancel();
        let report = orchestrator.run(source, vec![target.clone()]).await;

        assert_eq!(report.targets[0].aborted.as_deref(), Some("sync cancelled"));
        assert!(report.targets[0].outcomes.is_empty());
        assert!(target.log_entries().is_empty());
    }

    #[tokio::test]
    async fn test_nothing_selected_does_nothing() {
        let source = relational("source");
        source.seed_table("orders", vec![ColumnDef::new("id", "int")]);
        let target = relational("t1");

        let report = SyncOrchestrator::new(SyncOptions::default())
            .run(source, vec![target.clone()])
            .await;

        assert!(report.targets[0].outcomes.is_empty());
        assert_eq!(report.changes_applied(), 0);
    }
}
