//! Object diff engine
//!
//! Pure comparison of one object's source definition against the target's
//! current definition. No side effects, no I/O beyond the definitions
//! already fetched; the result is consumed immediately by the orchestrator.
//!
//! The diff is asymmetric and source-wins: only source-present /
//! target-absent differences produce changes. Columns present only on the
//! target persist indefinitely, and columns whose type differs between
//! source and target are not reconciled (only presence of a column name is
//! compared). This bounds the engine to append-only convergence.

use crate::model::{ColumnDef, ObjectDefinition, ObjectKind, SyncAction};
use crate::statement::SchemaChange;

/// Flags consumed from the caller's operation selectors.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiffOptions {
    /// Generate incremental ALTER statements for existing tables.
    pub alter_sync: bool,
    /// Create objects on the target when the source has them and the target
    /// does not.
    pub create_on_target: bool,
}

/// One computed, not-yet-applied change. The candidate and rollback
/// statements are rendered from the structured changes by the statement
/// builder at apply time.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedChange {
    pub action: SyncAction,
    pub change: SchemaChange,
    pub rollback: SchemaChange,
    /// Target's definition before the change; `None` when the object did not
    /// previously exist.
    pub original_state: Option<ObjectDefinition>,
}

/// Result of diffing one object.
#[derive(Debug, Clone, PartialEq)]
pub enum DiffOutcome {
    /// Source and target already match.
    UpToDate,
    /// Target lacks the object and `create_on_target` is unset; reported as
    /// an informational event, no statement generated.
    MissingOnTarget,
    /// Target table lacks these source columns but `alter_sync` is unset;
    /// informational only.
    AlterSuppressed(Vec<ColumnDef>),
    /// Ordered changes needed to converge the target.
    Planned(Vec<PlannedChange>),
}

/// The comparison engine. One pure function per object kind.
pub struct DiffEngine;

impl DiffEngine {
    /// Diff one object. `target` is `None` when the object does not exist on
    /// the target database.
    pub fn diff(
        kind: ObjectKind,
        name: &str,
        source: &ObjectDefinition,
        target: Option<&ObjectDefinition>,
        opts: &DiffOptions,
    ) -> DiffOutcome {
        match source {
            ObjectDefinition::Table { columns } => {
                Self::diff_table(name, columns, target.and_then(|t| t.as_columns()), opts)
            }
            ObjectDefinition::Text(text) => {
                Self::diff_text(kind, name, text, target.and_then(|t| t.as_text()), opts)
            }
        }
    }

    fn diff_table(
        name: &str,
        source_columns: &[ColumnDef],
        target_columns: Option<&[ColumnDef]>,
        opts: &DiffOptions,
    ) -> DiffOutcome {
        let Some(target_columns) = target_columns else {
            if !opts.create_on_target {
                return DiffOutcome::MissingOnTarget;
            }
            return DiffOutcome::Planned(vec![PlannedChange {
                action: SyncAction::Create,
                change: SchemaChange::CreateTable {
                    name: name.to_string(),
                    columns: source_columns.to_vec(),
                },
                rollback: SchemaChange::DropTable {
                    name: name.to_string(),
                },
                original_state: None,
            }]);
        };

        // Name is the key; target-only columns and type mismatches are left
        // alone.
        let target_names: std::collections::HashSet<&str> =
            target_columns.iter().map(|c| c.name.as_str()).collect();
        let missing: Vec<ColumnDef> = source_columns
            .iter()
            .filter(|c| !target_names.contains(c.name.as_str()))
            .cloned()
            .collect();

        if missing.is_empty() {
            return DiffOutcome::UpToDate;
        }
        if !opts.alter_sync {
            return DiffOutcome::AlterSuppressed(missing);
        }

        // Each step records the definition it actually changes, including
        // columns added by earlier steps in the same plan.
        let mut current = target_columns.to_vec();
        let changes = missing
            .into_iter()
            .map(|column| {
                let planned = PlannedChange {
                    action: SyncAction::Alter,
                    rollback: SchemaChange::DropColumn {
                        table: name.to_string(),
                        column: column.name.clone(),
                    },
                    change: SchemaChange::AddColumn {
                        table: name.to_string(),
                        column: column.clone(),
                    },
                    original_state: Some(ObjectDefinition::table(current.clone())),
                };
                current.push(column);
                planned
            })
            .collect();
        DiffOutcome::Planned(changes)
    }

    fn diff_text(
        kind: ObjectKind,
        name: &str,
        source_text: &str,
        target_text: Option<&str>,
        opts: &DiffOptions,
    ) -> DiffOutcome {
        // Procedures keep the original tool's behavior: create_on_target
        // forces the create branch even when the procedure already exists,
        // which can append redundant Create entries for identical bodies.
        // Recorded as an open question in DESIGN.md; do not "fix" here.
        let force_create = kind == ObjectKind::Procedure && opts.create_on_target;

        match target_text {
            None if !opts.create_on_target => DiffOutcome::MissingOnTarget,
            None => DiffOutcome::Planned(vec![Self::create_from_text(kind, name, source_text)]),
            Some(_) if force_create => {
                DiffOutcome::Planned(vec![Self::create_from_text(kind, name, source_text)])
            }
            Some(target_text) if target_text != source_text => {
                DiffOutcome::Planned(vec![PlannedChange {
                    action: SyncAction::Sync,
                    change: SchemaChange::Recreate {
                        kind,
                        name: name.to_string(),
                        definition: source_text.to_string(),
                    },
                    // Prior definition re-applied verbatim, itself routed
                    // through the test gate on rollback.
                    rollback: SchemaChange::ApplyDefinition {
                        kind,
                        name: name.to_string(),
                        definition: target_text.to_string(),
                    },
                    original_state: Some(ObjectDefinition::text(target_text)),
                }])
            }
            Some(_) => DiffOutcome::UpToDate,
        }
    }

    fn create_from_text(kind: ObjectKind, name: &str, source_text: &str) -> PlannedChange {
        PlannedChange {
            action: SyncAction::Create,
            change: SchemaChange::ApplyDefinition {
                kind,
                name: name.to_string(),
                definition: source_text.to_string(),
            },
            rollback: SchemaChange::DropObject {
                kind,
                name: name.to_string(),
            },
            original_state: None,
        }
    }
}
