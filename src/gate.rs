//! Test gate
//!
//! Transactional dry-run validation of candidate statements: execute inside
//! a transaction that is always rolled back, and report whether execution
//! raised an error. The target is unchanged after the call either way.

use crate::backend::SchemaBackend;
use crate::error::SyncResult;
use tracing::warn;

/// Wraps a candidate statement in an always-rolled-back transaction.
///
/// Known limitation, inherited by design: validity at test time does not
/// guarantee the real apply, executed moments later outside the test
/// transaction, will also succeed. Concurrent schema mutation on the target
/// between test and apply is a race this gate does not close; it is
/// best-effort, not exactly-once, and no locking is layered on top.
pub struct TestGate;

impl TestGate {
    /// Returns `Ok(true)` when the statement executed cleanly inside the
    /// test transaction, `Ok(false)` when the backend rejected it. Errors
    /// from the transaction primitives themselves propagate: if the gate
    /// cannot open or roll back a transaction the backend is unusable.
    pub async fn validate(backend: &dyn SchemaBackend, statement: &str) -> SyncResult<bool> {
        backend.begin_test_transaction().await?;
        let result = backend.execute(statement).await;
        // Roll back no matter what the statement did.
        backend.rollback_test_transaction().await?;

        match result {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!(
                    backend = backend.name(),
                    error = %e,
                    "candidate statement rejected during validation: {statement}"
                );
                Ok(false)
            }
        }
    }
}
