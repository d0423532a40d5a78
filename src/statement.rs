//! Statement builder
//!
//! Renders structured schema changes to DDL text, keyed by backend dialect.
//! The diff engine stays dialect-agnostic and only emits [`SchemaChange`]
//! values; all quoting lives here.

use crate::model::{ColumnDef, ObjectDefinition, ObjectKind};
use serde::{Deserialize, Serialize};

/// SQL dialect of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlDialect {
    Postgres,
    /// Plain ANSI-flavored rendering, used by the in-memory adapter.
    Ansi,
}

/// A structured, not-yet-rendered schema change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SchemaChange {
    CreateTable {
        name: String,
        columns: Vec<ColumnDef>,
    },
    DropTable {
        name: String,
    },
    AddColumn {
        table: String,
        column: ColumnDef,
    },
    DropColumn {
        table: String,
        column: String,
    },
    /// Apply a definition text verbatim (create from source, or restore a
    /// prior definition during rollback).
    ApplyDefinition {
        kind: ObjectKind,
        name: String,
        definition: String,
    },
    /// Drop-then-recreate from a definition text.
    Recreate {
        kind: ObjectKind,
        name: String,
        definition: String,
    },
    DropObject {
        kind: ObjectKind,
        name: String,
    },
}

/// Per-dialect DDL renderer.
#[derive(Debug, Clone, Copy)]
pub struct StatementBuilder {
    dialect: SqlDialect,
}

impl StatementBuilder {
    pub fn new(dialect: SqlDialect) -> Self {
        Self { dialect }
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    /// Quote an identifier, doubling any embedded quote characters.
    pub fn quote_ident(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    /// Render one structured change to executable DDL.
    pub fn render(&self, change: &SchemaChange) -> String {
        match change {
            SchemaChange::CreateTable { name, columns } => self.create_table_sql(name, columns),
            SchemaChange::DropTable { name } => self.drop_statement(ObjectKind::Table, name),
            SchemaChange::AddColumn { table, column } => format!(
                "ALTER TABLE {} ADD COLUMN {} {};",
                self.quote_ident(table),
                self.quote_ident(&column.name),
                column.data_type
            ),
            SchemaChange::DropColumn { table, column } => format!(
                "ALTER TABLE {} DROP COLUMN {};",
                self.quote_ident(table),
                self.quote_ident(column)
            ),
            SchemaChange::ApplyDefinition { definition, .. } => definition.clone(),
            SchemaChange::Recreate {
                kind,
                name,
                definition,
            } => format!("{}\n{}", self.drop_statement(*kind, name), definition),
            SchemaChange::DropObject { kind, name } => self.drop_statement(*kind, name),
        }
    }

    /// Drop statement derived from the object kind, used both for Create
    /// rollbacks and by the rollback resolver.
    pub fn drop_statement(&self, kind: ObjectKind, name: &str) -> String {
        let keyword = match (kind, self.dialect) {
            (ObjectKind::Table, _) => "TABLE",
            (ObjectKind::View, _) => "VIEW",
            // Postgres exposes routines through pg_get_functiondef; the
            // matching drop is DROP FUNCTION.
            (ObjectKind::Procedure, SqlDialect::Postgres) => "FUNCTION",
            (ObjectKind::Procedure, SqlDialect::Ansi) => "PROCEDURE",
        };
        format!("DROP {} IF EXISTS {};", keyword, self.quote_ident(name))
    }

    /// Render a definition snapshot as DDL text, e.g. for the
    /// `original_state` column of a log entry.
    pub fn render_definition(&self, name: &str, definition: &ObjectDefinition) -> String {
        match definition {
            ObjectDefinition::Table { columns } => self.create_table_sql(name, columns),
            ObjectDefinition::Text(text) => text.clone(),
        }
    }

    fn create_table_sql(&self, name: &str, columns: &[ColumnDef]) -> String {
        let cols: Vec<String> = columns
            .iter()
            .map(|c| format!("    {} {}", self.quote_ident(&c.name), c.data_type))
            .collect();
        format!(
            "CREATE TABLE {} (\n{}\n);",
            self.quote_ident(name),
            cols.join(",\n")
        )
    }
}
