//! Run reporting
//!
//! Structured per-object and per-target outcomes returned to the caller.
//! The engine reports results, it does not print them.

use crate::model::ObjectKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of synchronizing one object on one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectStatus {
    /// Source and target already matched.
    UpToDate,
    Created,
    Altered,
    Synced,
    /// Target lacks the object and create-on-target is unset.
    MissingOnTarget,
    /// Table columns are missing on the target but alter-sync is unset.
    AlterSuppressed,
    /// The test gate rejected the candidate statement; nothing was applied.
    ValidationFailed,
    /// Apply failed after validation succeeded; the target may no longer
    /// match either its pre- or post-change shape.
    ExecutionFailed,
    /// The change was applied but could not be logged; rollback capability
    /// for it is lost.
    LogWriteFailed,
    /// The backend family has no notion of this object kind.
    Unsupported,
}

impl ObjectStatus {
    /// Statuses that represent a committed change on the target.
    pub fn is_change(&self) -> bool {
        matches!(
            self,
            ObjectStatus::Created | ObjectStatus::Altered | ObjectStatus::Synced
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            ObjectStatus::ValidationFailed
                | ObjectStatus::ExecutionFailed
                | ObjectStatus::LogWriteFailed
        )
    }
}

/// One per-object result line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectOutcome {
    pub kind: ObjectKind,
    pub name: String,
    pub status: ObjectStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ObjectOutcome {
    pub fn new(kind: ObjectKind, name: impl Into<String>, status: ObjectStatus) -> Self {
        Self {
            kind,
            name: name.into(),
            status,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Result of one target's run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetReport {
    pub target: String,
    pub outcomes: Vec<ObjectOutcome>,
    /// Set when a backend-level failure stopped this target's run early.
    /// Other targets are unaffected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl TargetReport {
    pub fn changes_applied(&self) -> usize {
        self.outcomes.iter().filter(|o| o.status.is_change()).count()
    }

    pub fn failures(&self) -> usize {
        self.outcomes.iter().filter(|o| o.status.is_failure()).count()
    }
}

/// Result of a whole run across all configured targets. A run with zero
/// successes is not itself a process failure; partial convergence is
/// expected and visible per object.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub targets: Vec<TargetReport>,
}

impl RunReport {
    pub fn changes_applied(&self) -> usize {
        self.targets.iter().map(|t| t.changes_applied()).sum()
    }

    pub fn failures(&self) -> usize {
        self.targets.iter().map(|t| t.failures()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_counters() {
        let report = TargetReport {
            target: "t1".to_string(),
            outcomes: vec![
                ObjectOutcome::new(ObjectKind::Table, "orders", ObjectStatus::Created),
                ObjectOutcome::new(ObjectKind::Table, "customers", ObjectStatus::UpToDate),
                ObjectOutcome::new(ObjectKind::View, "v1", ObjectStatus::ValidationFailed),
            ],
            aborted: None,
            started_at: Utc::now(),
            finished_at: Utc::now(),
        };
        assert_eq!(report.changes_applied(), 1);
        assert_eq!(report.failures(), 1);
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&ObjectStatus::ValidationFailed).unwrap();
        assert_eq!(json, "\"validation_failed\"");
    }
}
