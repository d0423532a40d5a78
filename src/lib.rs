//! # schemasync
//!
//! Object-level schema synchronization between one read-only source database
//! and any number of targets. Tables converge column-by-column, views and
//! stored procedures by whole-definition replacement; every candidate
//! statement is validated in an always-rolled-back transaction before the
//! real apply, and every applied change is appended to a per-target sync log
//! that the rollback resolver can replay in reverse.
//!
//! Convergence is deliberately one-way and append-only: the source is never
//! written, target-only columns are never removed, and column type
//! differences are never reconciled.
//!
//! ```no_run
//! use schemasync::{backend, SyncConfig, SyncOptions, SyncOrchestrator};
//!
//! # async fn run() -> schemasync::SyncResult<()> {
//! let config = SyncConfig::from_file("schemasync.json")?;
//! let source = backend::connect(&config.source).await?;
//! let mut targets = Vec::new();
//! for entry in &config.targets {
//!     targets.push(backend::connect(entry).await?);
//! }
//!
//! let orchestrator = SyncOrchestrator::new(SyncOptions {
//!     sync_all_tables: true,
//!     alter_sync: true,
//!     create_on_target: true,
//!     ..Default::default()
//! });
//! let report = orchestrator.run(source, targets).await;
//! println!("{} changes applied", report.changes_applied());
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod diff;
pub mod error;
pub mod gate;
pub mod log;
pub mod model;
pub mod report;
pub mod rollback;
pub mod statement;
pub mod sync;
pub mod telemetry;

pub use backend::{BackendFamily, SchemaBackend};
pub use config::{PostgresConfig, RollbackSpec, SyncConfig, TargetEntry};
pub use diff::{DiffEngine, DiffOptions, DiffOutcome, PlannedChange};
pub use error::{SyncError, SyncResult};
pub use gate::TestGate;
pub use log::ActionLog;
pub use model::{
    ColumnDef, ObjectDefinition, ObjectKind, SchemaObjectRef, SyncAction, SyncDirection,
    SyncLogEntry,
};
pub use report::{ObjectOutcome, ObjectStatus, RunReport, TargetReport};
pub use rollback::{RollbackOutcome, RollbackResolver};
pub use statement::{SchemaChange, SqlDialect, StatementBuilder};
pub use sync::{SyncOptions, SyncOrchestrator};
