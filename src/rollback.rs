//! Rollback resolver
//!
//! Reverses the most recent logged change for one object on one target,
//! using the rollback material captured at apply time. The log itself is
//! never rewritten: a rollback executes statements, it does not erase
//! history.

use crate::backend::SchemaBackend;
use crate::error::{SyncError, SyncResult};
use crate::gate::TestGate;
use crate::log::ActionLog;
use crate::model::{ObjectKind, SyncAction};
use crate::statement::StatementBuilder;
use tracing::info;

/// What the rollback did to the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackOutcome {
    /// The object was created by the logged change and has been dropped.
    Dropped,
    /// The object's prior state has been re-applied.
    Restored,
}

pub struct RollbackResolver;

impl RollbackResolver {
    /// Reverse the latest logged change for `(kind, name)`.
    ///
    /// `NotFound` when the object has no sync history on this target; the
    /// caller decides how loudly to report that.
    pub async fn rollback(
        target: &dyn SchemaBackend,
        kind: ObjectKind,
        name: &str,
    ) -> SyncResult<RollbackOutcome> {
        // A target that has never been synced has no log storage yet;
        // creating it here lets the lookup answer "no history" instead of
        // erroring on a missing table.
        target.ensure_log_storage().await?;

        let entry = ActionLog::latest(target, kind, name)
            .await?
            .ok_or_else(|| {
                SyncError::NotFound(format!(
                    "no sync history for {kind} {name} on {}",
                    target.name()
                ))
            })?;

        let builder = StatementBuilder::new(target.dialect());
        let outcome = match entry.action {
            // Undoing a create is a plain drop; nothing to validate against
            // a prior state that never existed.
            SyncAction::Create => {
                target.execute(&builder.drop_statement(kind, name)).await?;
                RollbackOutcome::Dropped
            }
            SyncAction::Alter => {
                Self::validated_execute(target, &entry.rollback_action).await?;
                RollbackOutcome::Restored
            }
            // The logged rollback is the prior definition verbatim; the
            // current definition must be dropped before it can come back.
            SyncAction::Sync => {
                let statement = format!(
                    "{}\n{}",
                    builder.drop_statement(kind, name),
                    entry.rollback_action
                );
                Self::validated_execute(target, &statement).await?;
                RollbackOutcome::Restored
            }
        };

        info!(
            target = target.name(),
            object = name,
            action = %entry.action,
            "rolled back latest change"
        );
        Ok(outcome)
    }

    async fn validated_execute(target: &dyn SchemaBackend, statement: &str) -> SyncResult<()> {
        if !TestGate::validate(target, statement).await? {
            return Err(SyncError::Validation(format!(
                "rollback statement rejected by test transaction: {statement}"
            )));
        }
        target.execute(statement).await
    }
}
