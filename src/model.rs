//! Schema object model
//!
//! Types shared by every component: object identities, definition snapshots
//! read fresh from a backend, and the append-only sync log entry.

use crate::error::SyncError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Kinds of schema objects the engine synchronizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Table,
    View,
    Procedure,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Table => "table",
            ObjectKind::View => "view",
            ObjectKind::Procedure => "procedure",
        }
    }

    /// Pass order for a sync run: tables, then views, then procedures.
    pub const ALL: [ObjectKind; 3] = [ObjectKind::Table, ObjectKind::View, ObjectKind::Procedure];
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "table" => Ok(ObjectKind::Table),
            "view" => Ok(ObjectKind::View),
            "procedure" => Ok(ObjectKind::Procedure),
            other => Err(SyncError::Config(format!(
                "unknown object kind '{other}' (expected table, view or procedure)"
            ))),
        }
    }
}

/// Identity of one schema object within a database. Uniqueness is required
/// per `(kind, name)` within one database.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaObjectRef {
    pub kind: ObjectKind,
    pub name: String,
}

impl SchemaObjectRef {
    pub fn new(kind: ObjectKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for SchemaObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.name)
    }
}

/// One column of a table definition. Types are copied verbatim between
/// engines; they are never translated or reconciled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDef {
    pub name: String,
    pub data_type: String,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }
}

/// A snapshot of an object's current shape, read fresh from a backend.
///
/// Tables carry their column list (name-keyed for comparison, source order
/// preserved for rendering); views and procedures carry one DDL text compared
/// verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ObjectDefinition {
    Table { columns: Vec<ColumnDef> },
    Text(String),
}

impl ObjectDefinition {
    pub fn table(columns: Vec<ColumnDef>) -> Self {
        ObjectDefinition::Table { columns }
    }

    pub fn text(definition: impl Into<String>) -> Self {
        ObjectDefinition::Text(definition.into())
    }

    pub fn as_columns(&self) -> Option<&[ColumnDef]> {
        match self {
            ObjectDefinition::Table { columns } => Some(columns),
            ObjectDefinition::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ObjectDefinition::Text(text) => Some(text),
            ObjectDefinition::Table { .. } => None,
        }
    }

    /// Name-to-type lookup for table definitions. Column order is irrelevant
    /// for comparison; the name is the key.
    pub fn column_map(&self) -> HashMap<&str, &str> {
        match self {
            ObjectDefinition::Table { columns } => columns
                .iter()
                .map(|c| (c.name.as_str(), c.data_type.as_str()))
                .collect(),
            ObjectDefinition::Text(_) => HashMap::new(),
        }
    }

    /// SHA-256 over a canonical rendering of the definition, recorded in
    /// every log entry as `source_code_hash` to identify what was applied.
    pub fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        match self {
            ObjectDefinition::Table { columns } => {
                // Hash columns in sorted order for consistency
                let mut lines: Vec<String> = columns
                    .iter()
                    .map(|c| format!("{}:{}", c.name, c.data_type))
                    .collect();
                lines.sort();
                for line in &lines {
                    hasher.update(line.as_bytes());
                    hasher.update(b"\n");
                }
            }
            ObjectDefinition::Text(text) => hasher.update(text.as_bytes()),
        }
        format!("{:x}", hasher.finalize())
    }
}

/// What a change did to the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    /// Object did not exist on the target and was created.
    Create,
    /// Incremental column addition on an existing table.
    Alter,
    /// Definition replaced with the source text.
    Sync,
}

impl SyncAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncAction::Create => "create",
            SyncAction::Alter => "alter",
            SyncAction::Sync => "sync",
        }
    }
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncAction {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(SyncAction::Create),
            "alter" => Ok(SyncAction::Alter),
            "sync" => Ok(SyncAction::Sync),
            other => Err(SyncError::Config(format!("unknown sync action '{other}'"))),
        }
    }
}

/// Direction of a recorded change. The engine only ever converges targets
/// toward the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    SourceToTarget,
}

impl SyncDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncDirection::SourceToTarget => "source_to_target",
        }
    }
}

/// One appended record of an applied change, carrying enough state to
/// reverse it. Entries are never mutated or deleted by the engine; for a
/// given `(object_type, object_name)` the entry with the latest timestamp is
/// authoritative for rollback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncLogEntry {
    pub object_type: ObjectKind,
    pub object_name: String,
    pub action: SyncAction,
    pub source_code_hash: String,
    pub sync_direction: SyncDirection,
    /// Target's definition before the change; `None` when the object did not
    /// previously exist.
    pub original_state: Option<String>,
    pub new_state: String,
    /// Literal inverse statement, or the original state reused verbatim
    /// depending on `action`.
    pub rollback_action: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_checksum_ignores_column_order() {
        let a = ObjectDefinition::table(vec![
            ColumnDef::new("id", "integer"),
            ColumnDef::new("total", "decimal"),
        ]);
        let b = ObjectDefinition::table(vec![
            ColumnDef::new("total", "decimal"),
            ColumnDef::new("id", "integer"),
        ]);
        assert_eq!(a.checksum(), b.checksum());
    }

    #[test]
    fn test_checksum_sensitive_to_type() {
        let a = ObjectDefinition::table(vec![ColumnDef::new("id", "integer")]);
        let b = ObjectDefinition::table(vec![ColumnDef::new("id", "bigint")]);
        assert_ne!(a.checksum(), b.checksum());
    }

    #[test]
    fn test_kind_round_trip() {
        for kind in ObjectKind::ALL {
            assert_eq!(kind.as_str().parse::<ObjectKind>().unwrap(), kind);
        }
        assert!("sequence".parse::<ObjectKind>().is_err());
    }

    #[test]
    fn test_column_map_keys_by_name() {
        let def = ObjectDefinition::table(vec![
            ColumnDef::new("id", "integer"),
            ColumnDef::new("total", "decimal"),
        ]);
        let map = def.column_map();
        assert_eq!(map.get("id"), Some(&"integer"));
        assert_eq!(map.get("total"), Some(&"decimal"));
        assert_eq!(map.get("status"), None);
    }
}
