//! In-memory backend
//!
//! HashMap-backed adapter used for non-relational families and as the test
//! double for the engine. It executes the ANSI rendering of the statement
//! builder against an in-process catalog, with snapshot-based test
//! transactions, so validation and apply behave like a real backend without
//! a server.

use crate::backend::{BackendFamily, SchemaBackend};
use crate::error::{SyncError, SyncResult};
use crate::model::{ColumnDef, ObjectDefinition, ObjectKind, SyncLogEntry};
use crate::statement::SqlDialect;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// Configuration entry payload for `"type": "memory"` backends.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryConfig {
    pub family: BackendFamily,
}

#[derive(Debug, Clone, Default)]
struct Catalog {
    tables: HashMap<String, Vec<ColumnDef>>,
    views: HashMap<String, String>,
    procedures: HashMap<String, String>,
}

#[derive(Debug, Default)]
struct Inner {
    catalog: Catalog,
    /// Catalog snapshot taken when a test transaction is open.
    snapshot: Option<Catalog>,
    log: Vec<(u64, SyncLogEntry)>,
    next_seq: u64,
    fail_log_appends: bool,
    fail_next_live_execute: bool,
    hidden_definitions: HashSet<String>,
    log_storage_required: bool,
    log_storage_created: bool,
}

impl Inner {
    fn check_log_storage(&self) -> SyncResult<()> {
        if self.log_storage_required && !self.log_storage_created {
            return Err(SyncError::Execution(
                "relation \"sync_log\" does not exist".to_string(),
            ));
        }
        Ok(())
    }
}

/// In-memory schema store parameterized by backend family. Document and
/// graph families answer `Unsupported` for view and procedure operations.
pub struct MemoryBackend {
    name: String,
    family: BackendFamily,
    inner: Mutex<Inner>,
}

impl MemoryBackend {
    pub fn new(name: impl Into<String>, family: BackendFamily) -> Self {
        Self {
            name: name.into(),
            family,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn seed_table(&self, name: &str, columns: Vec<ColumnDef>) {
        let mut inner = self.inner.lock().unwrap();
        inner.catalog.tables.insert(name.to_string(), columns);
    }

    pub fn seed_view(&self, name: &str, definition: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .catalog
            .views
            .insert(name.to_string(), definition.to_string());
    }

    pub fn seed_procedure(&self, name: &str, definition: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .catalog
            .procedures
            .insert(name.to_string(), definition.to_string());
    }

    /// Failure injection for log-write paths.
    pub fn fail_log_appends(&self, fail: bool) {
        self.inner.lock().unwrap().fail_log_appends = fail;
    }

    /// Failure injection for the apply path: the next statement executed
    /// outside a test transaction fails, so validation passes and the real
    /// apply does not.
    pub fn fail_next_execute(&self) {
        self.inner.lock().unwrap().fail_next_live_execute = true;
    }

    /// Hide an object from definition reads while leaving it listed,
    /// simulating a drop that lands between discovery and read.
    pub fn hide_definition(&self, name: &str) {
        self.inner
            .lock()
            .unwrap()
            .hidden_definitions
            .insert(name.to_string());
    }

    /// Make log operations fail until `ensure_log_storage` has been called,
    /// like a database whose `sync_log` table does not exist yet.
    pub fn require_log_init(&self) {
        self.inner.lock().unwrap().log_storage_required = true;
    }

    /// All log entries, in insertion order.
    pub fn log_entries(&self) -> Vec<SyncLogEntry> {
        let inner = self.inner.lock().unwrap();
        inner.log.iter().map(|(_, e)| e.clone()).collect()
    }

    fn ensure_supported(&self, kind: ObjectKind) -> SyncResult<()> {
        if self.family.supports(kind) {
            Ok(())
        } else {
            Err(SyncError::Unsupported(format!(
                "{:?} backend '{}' has no notion of {kind}s",
                self.family, self.name
            )))
        }
    }
}

#[async_trait]
impl SchemaBackend for MemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn family(&self) -> BackendFamily {
        self.family
    }

    fn dialect(&self) -> SqlDialect {
        SqlDialect::Ansi
    }

    async fn list_objects(&self, kind: ObjectKind) -> SyncResult<Vec<String>> {
        self.ensure_supported(kind)?;
        let inner = self.inner.lock().unwrap();
        let mut names: Vec<String> = match kind {
            ObjectKind::Table => inner.catalog.tables.keys().cloned().collect(),
            ObjectKind::View => inner.catalog.views.keys().cloned().collect(),
            ObjectKind::Procedure => inner.catalog.procedures.keys().cloned().collect(),
        };
        names.sort();
        Ok(names)
    }

    async fn get_definition(&self, kind: ObjectKind, name: &str) -> SyncResult<ObjectDefinition> {
        self.ensure_supported(kind)?;
        let inner = self.inner.lock().unwrap();
        if inner.hidden_definitions.contains(name) {
            return Err(SyncError::NotFound(format!("{kind} {name} does not exist")));
        }
        match kind {
            ObjectKind::Table => inner
                .catalog
                .tables
                .get(name)
                .map(|cols| ObjectDefinition::table(cols.clone())),
            ObjectKind::View => inner
                .catalog
                .views
                .get(name)
                .map(|d| ObjectDefinition::text(d.clone())),
            ObjectKind::Procedure => inner
                .catalog
                .procedures
                .get(name)
                .map(|d| ObjectDefinition::text(d.clone())),
        }
        .ok_or_else(|| SyncError::NotFound(format!("{kind} {name} does not exist")))
    }

    async fn object_exists(&self, kind: ObjectKind, name: &str) -> SyncResult<bool> {
        self.ensure_supported(kind)?;
        let inner = self.inner.lock().unwrap();
        Ok(match kind {
            ObjectKind::Table => inner.catalog.tables.contains_key(name),
            ObjectKind::View => inner.catalog.views.contains_key(name),
            ObjectKind::Procedure => inner.catalog.procedures.contains_key(name),
        })
    }

    async fn execute(&self, statement: &str) -> SyncResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.snapshot.is_none() && inner.fail_next_live_execute {
            inner.fail_next_live_execute = false;
            return Err(SyncError::Execution(
                "statement failed outside the test transaction (injected failure)".to_string(),
            ));
        }
        // Statements are separated by ";\n" (the Recreate rendering); a
        // definition body never contains that sequence in this dialect.
        for piece in statement.split(";\n") {
            let piece = piece.trim();
            if piece.is_empty() {
                continue;
            }
            apply_statement(&mut inner.catalog, self.family, piece)?;
        }
        Ok(())
    }

    async fn begin_test_transaction(&self) -> SyncResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.snapshot.is_some() {
            return Err(SyncError::Connection(
                "test transaction already open".to_string(),
            ));
        }
        inner.snapshot = Some(inner.catalog.clone());
        Ok(())
    }

    async fn rollback_test_transaction(&self) -> SyncResult<()> {
        let mut inner = self.inner.lock().unwrap();
        match inner.snapshot.take() {
            Some(snapshot) => {
                inner.catalog = snapshot;
                Ok(())
            }
            None => Err(SyncError::Connection(
                "no test transaction to roll back".to_string(),
            )),
        }
    }

    async fn ensure_log_storage(&self) -> SyncResult<()> {
        self.inner.lock().unwrap().log_storage_created = true;
        Ok(())
    }

    async fn append_log_entry(&self, entry: &SyncLogEntry) -> SyncResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.check_log_storage()?;
        if inner.fail_log_appends {
            return Err(SyncError::Execution(
                "log storage unavailable (injected failure)".to_string(),
            ));
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.log.push((seq, entry.clone()));
        Ok(())
    }

    async fn latest_log_entry(
        &self,
        kind: ObjectKind,
        name: &str,
    ) -> SyncResult<Option<SyncLogEntry>> {
        let inner = self.inner.lock().unwrap();
        inner.check_log_storage()?;
        Ok(inner
            .log
            .iter()
            .filter(|(_, e)| e.object_type == kind && e.object_name == name)
            .max_by_key(|(seq, e)| (e.timestamp, *seq))
            .map(|(_, e)| e.clone()))
    }
}

/// Interpret one statement of the ANSI rendering against the catalog.
fn apply_statement(
    catalog: &mut Catalog,
    family: BackendFamily,
    statement: &str,
) -> SyncResult<()> {
    let upper = statement.to_uppercase();
    if upper.starts_with("CREATE TABLE") {
        create_table(catalog, statement)
    } else if upper.starts_with("ALTER TABLE") {
        alter_table(catalog, statement)
    } else if upper.starts_with("DROP TABLE") {
        drop_object(catalog, ObjectKind::Table, statement, "DROP TABLE")
    } else if upper.starts_with("DROP VIEW") {
        supported(family, ObjectKind::View)?;
        drop_object(catalog, ObjectKind::View, statement, "DROP VIEW")
    } else if upper.starts_with("DROP PROCEDURE") || upper.starts_with("DROP FUNCTION") {
        supported(family, ObjectKind::Procedure)?;
        let keyword = if upper.starts_with("DROP PROCEDURE") {
            "DROP PROCEDURE"
        } else {
            "DROP FUNCTION"
        };
        drop_object(catalog, ObjectKind::Procedure, statement, keyword)
    } else if upper.starts_with("CREATE VIEW") || upper.starts_with("CREATE OR REPLACE VIEW") {
        supported(family, ObjectKind::View)?;
        create_text_object(catalog, ObjectKind::View, statement)
    } else if upper.starts_with("CREATE PROCEDURE")
        || upper.starts_with("CREATE OR REPLACE PROCEDURE")
        || upper.starts_with("CREATE FUNCTION")
        || upper.starts_with("CREATE OR REPLACE FUNCTION")
    {
        supported(family, ObjectKind::Procedure)?;
        create_text_object(catalog, ObjectKind::Procedure, statement)
    } else {
        Err(SyncError::Execution(format!(
            "unrecognized statement: {statement}"
        )))
    }
}

fn supported(family: BackendFamily, kind: ObjectKind) -> SyncResult<()> {
    if family.supports(kind) {
        Ok(())
    } else {
        Err(SyncError::Unsupported(format!(
            "{family:?} backends have no notion of {kind}s"
        )))
    }
}

fn create_table(catalog: &mut Catalog, statement: &str) -> SyncResult<()> {
    let rest = &statement["CREATE TABLE".len()..];
    let (name, rest) = take_ident(rest)?;
    if catalog.tables.contains_key(&name) {
        return Err(SyncError::Execution(format!("table {name} already exists")));
    }
    let rest = rest.trim();
    let open = rest
        .find('(')
        .ok_or_else(|| SyncError::Execution("missing column list".to_string()))?;
    let close = rest
        .rfind(')')
        .ok_or_else(|| SyncError::Execution("unterminated column list".to_string()))?;
    let mut columns = Vec::new();
    for part in rest[open + 1..close].split(",\n") {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (col_name, col_type) = take_ident(part)?;
        let col_type = col_type.trim();
        if col_type.is_empty() {
            return Err(SyncError::Execution(format!(
                "column {col_name} has no type"
            )));
        }
        columns.push(ColumnDef::new(col_name, col_type));
    }
    catalog.tables.insert(name, columns);
    Ok(())
}

fn alter_table(catalog: &mut Catalog, statement: &str) -> SyncResult<()> {
    let rest = &statement["ALTER TABLE".len()..];
    let (table, rest) = take_ident(rest)?;
    let rest = rest.trim();
    let upper = rest.to_uppercase();

    let columns = catalog
        .tables
        .get_mut(&table)
        .ok_or_else(|| SyncError::Execution(format!("table {table} does not exist")))?;

    if upper.starts_with("ADD COLUMN") {
        let (col_name, col_type) = take_ident(&rest["ADD COLUMN".len()..])?;
        let col_type = col_type.trim().trim_end_matches(';').trim();
        if col_type.is_empty() {
            return Err(SyncError::Execution(format!(
                "column {col_name} has no type"
            )));
        }
        if columns.iter().any(|c| c.name == col_name) {
            return Err(SyncError::Execution(format!(
                "column {col_name} already exists on {table}"
            )));
        }
        columns.push(ColumnDef::new(col_name, col_type));
        Ok(())
    } else if upper.starts_with("DROP COLUMN") {
        let (col_name, _) = take_ident(&rest["DROP COLUMN".len()..])?;
        let before = columns.len();
        columns.retain(|c| c.name != col_name);
        if columns.len() == before {
            return Err(SyncError::Execution(format!(
                "column {col_name} does not exist on {table}"
            )));
        }
        Ok(())
    } else {
        Err(SyncError::Execution(format!(
            "unrecognized ALTER TABLE clause: {rest}"
        )))
    }
}

fn drop_object(
    catalog: &mut Catalog,
    kind: ObjectKind,
    statement: &str,
    keyword: &str,
) -> SyncResult<()> {
    let mut rest = statement[keyword.len()..].trim();
    let if_exists = rest.to_uppercase().starts_with("IF EXISTS");
    if if_exists {
        rest = rest["IF EXISTS".len()..].trim();
    }
    let (name, _) = take_ident(rest)?;
    let removed = match kind {
        ObjectKind::Table => catalog.tables.remove(&name).is_some(),
        ObjectKind::View => catalog.views.remove(&name).is_some(),
        ObjectKind::Procedure => catalog.procedures.remove(&name).is_some(),
    };
    if !removed && !if_exists {
        return Err(SyncError::Execution(format!("{kind} {name} does not exist")));
    }
    Ok(())
}

fn create_text_object(
    catalog: &mut Catalog,
    kind: ObjectKind,
    statement: &str,
) -> SyncResult<()> {
    // Name is the first identifier after the CREATE [OR REPLACE] KIND words.
    let mut rest = statement["CREATE".len()..].trim();
    let or_replace = rest.to_uppercase().starts_with("OR REPLACE");
    if or_replace {
        rest = rest["OR REPLACE".len()..].trim();
    }
    let keyword_len = rest
        .find(char::is_whitespace)
        .ok_or_else(|| SyncError::Execution(format!("truncated statement: {statement}")))?;
    let (name, _) = take_ident(&rest[keyword_len..])?;

    let map = match kind {
        ObjectKind::View => &mut catalog.views,
        ObjectKind::Procedure => &mut catalog.procedures,
        ObjectKind::Table => unreachable!("tables are not text objects"),
    };
    if map.contains_key(&name) && !or_replace {
        return Err(SyncError::Execution(format!("{kind} {name} already exists")));
    }
    // The stored definition is the executed text itself, so a later
    // verbatim comparison against the source is exact.
    map.insert(name, statement.to_string());
    Ok(())
}

/// Read one identifier, quoted (with doubled-quote escapes) or bare.
fn take_ident(input: &str) -> SyncResult<(String, &str)> {
    let s = input.trim_start();
    if let Some(rest) = s.strip_prefix('"') {
        let mut name = String::new();
        let bytes = rest.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'"' {
                if bytes.get(i + 1) == Some(&b'"') {
                    name.push('"');
                    i += 2;
                } else {
                    return Ok((name, &rest[i + 1..]));
                }
            } else {
                let ch_len = rest[i..].chars().next().map(char::len_utf8).unwrap_or(1);
                name.push_str(&rest[i..i + ch_len]);
                i += ch_len;
            }
        }
        Err(SyncError::Execution(format!(
            "unterminated quoted identifier in: {input}"
        )))
    } else {
        let end = s
            .find(|c: char| c.is_whitespace() || c == '(' || c == ';')
            .unwrap_or(s.len());
        if end == 0 {
            return Err(SyncError::Execution(format!(
                "expected identifier in: {input}"
            )));
        }
        Ok((s[..end].to_string(), &s[end..]))
    }
}
