//! In-memory backend with Postgres-like failure behavior, for tests and
//! for hosts that embed the engine without a database.

use crate::{BoxFuture, Database, DbError, DbErrorKind, MigrationAction};
use indexmap::IndexMap;
use klage_db_schema::{DefaultValue, IndexKind, LiveTableSnapshot, SqlType};
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;

#[derive(Default)]
struct MemoryState {
    /// Keyed by lowercase table name.
    tables: IndexMap<String, LiveTableSnapshot>,
    applied: Vec<MigrationAction>,
    /// (table, column) -> message, lowercase keys.
    column_failures: HashMap<(String, String), String>,
    unreadable: HashMap<String, String>,
    locks: HashSet<i64>,
    /// Row counts by lowercase table name. Absent means empty.
    rows: HashMap<String, u64>,
    /// (table, column) added to populated tables, every row holding the default.
    backfilled: HashSet<(String, String)>,
}

/// A [`Database`] that keeps tables in memory.
///
/// Names are matched case-insensitively. Errors carry the same kinds a
/// Postgres server would report, so idempotence paths are exercised for real.
#[derive(Default)]
pub struct MemoryDatabase {
    state: Mutex<MemoryState>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tables(tables: impl IntoIterator<Item = LiveTableSnapshot>) -> Self {
        let tables = tables
            .into_iter()
            .map(|t| (t.name.to_ascii_lowercase(), t))
            .collect();
        Self {
            state: Mutex::new(MemoryState {
                tables,
                ..Default::default()
            }),
        }
    }

    pub async fn create_table(&self, table: LiveTableSnapshot) {
        let mut state = self.state.lock().await;
        state.tables.insert(table.name.to_ascii_lowercase(), table);
    }

    pub async fn table(&self, name: &str) -> Option<LiveTableSnapshot> {
        self.state
            .lock()
            .await
            .tables
            .get(&name.to_ascii_lowercase())
            .cloned()
    }

    /// Every action that changed the schema, in order.
    pub async fn applied(&self) -> Vec<MigrationAction> {
        self.state.lock().await.applied.clone()
    }

    /// Make any action touching `table.column` fail with `message`.
    pub async fn fail_column(&self, table: &str, column: &str, message: &str) {
        self.state.lock().await.column_failures.insert(
            (table.to_ascii_lowercase(), column.to_ascii_lowercase()),
            message.to_string(),
        );
    }

    /// Pretend `table` holds `rows` rows of existing data.
    ///
    /// Adding a `NOT NULL` column without a default then fails, and so does a
    /// unique key over columns every row got the same default for.
    pub async fn set_row_count(&self, table: &str, rows: u64) {
        self.state
            .lock()
            .await
            .rows
            .insert(table.to_ascii_lowercase(), rows);
    }

    /// Make inspecting `table` fail with `message`.
    pub async fn fail_inspection(&self, table: &str, message: &str) {
        self.state
            .lock()
            .await
            .unreadable
            .insert(table.to_ascii_lowercase(), message.to_string());
    }
}

impl MemoryState {
    fn injected_failure(&self, action: &MigrationAction) -> Option<DbError> {
        let table = action.table().to_ascii_lowercase();
        let columns: Vec<&str> = match action {
            MigrationAction::AddColumn { column, .. }
            | MigrationAction::ModifyColumn { column, .. } => vec![column.name.as_str()],
            MigrationAction::DropColumn { name, .. } => vec![name.as_str()],
            MigrationAction::AddIndex { index, .. } => {
                index.columns.iter().map(String::as_str).collect()
            }
            MigrationAction::DropIndex { .. } => Vec::new(),
        };
        columns.iter().find_map(|col| {
            self.column_failures
                .get(&(table.clone(), col.to_ascii_lowercase()))
                .map(|msg| DbError::other(msg.clone()))
        })
    }

    fn index_owner(&self, name: &str) -> Option<String> {
        self.tables
            .iter()
            .find(|(_, t)| t.has_index(name))
            .map(|(key, _)| key.clone())
    }

    fn apply(&mut self, action: &MigrationAction) -> Result<(), DbError> {
        if let Some(err) = self.injected_failure(action) {
            return Err(err);
        }

        let key = action.table().to_ascii_lowercase();
        if !self.tables.contains_key(&key) {
            return Err(DbError::new(
                DbErrorKind::UndefinedTable,
                format!("relation \"{}\" does not exist", action.table()),
            ));
        }

        // Index names are global, like in a Postgres schema.
        if let MigrationAction::AddIndex { index, .. } = action {
            if self.index_owner(&index.name).is_some() {
                return Err(DbError::new(
                    DbErrorKind::DuplicateObject,
                    format!("relation \"{}\" already exists", index.name),
                ));
            }
        }
        if let MigrationAction::DropIndex { name, .. } = action {
            match self.index_owner(name) {
                Some(owner) if owner != key => {
                    return Err(DbError::other(format!(
                        "index \"{}\" does not belong to table \"{}\"",
                        name,
                        action.table()
                    )));
                }
                Some(_) => {}
                None => {
                    return Err(DbError::new(
                        DbErrorKind::UndefinedObject,
                        format!("index \"{}\" does not exist", name),
                    ));
                }
            }
        }

        let rows = self.rows.get(&key).copied().unwrap_or(0);
        let Some(table) = self.tables.get_mut(&key) else {
            return Err(DbError::other("table vanished"));
        };

        match action {
            MigrationAction::AddColumn { column, .. } => {
                if table.has_column(&column.name) {
                    return Err(DbError::new(
                        DbErrorKind::DuplicateObject,
                        format!(
                            "column \"{}\" of relation \"{}\" already exists",
                            column.name, table.name
                        ),
                    ));
                }
                if rows > 0 {
                    let fills = matches!(column.default, Some(ref d) if *d != DefaultValue::Null);
                    if !column.nullable && !fills && column.sql_type != SqlType::BigSerial {
                        return Err(DbError::other(format!(
                            "column \"{}\" of relation \"{}\" contains null values",
                            column.name, table.name
                        )));
                    }
                    self.backfilled
                        .insert((key.clone(), column.name.to_ascii_lowercase()));
                }
                table.columns.push(column.clone());
            }
            MigrationAction::AddIndex { index, .. } => {
                if let Some(col) = index.columns.iter().find(|c| !table.has_column(c)) {
                    return Err(DbError::new(
                        DbErrorKind::UndefinedObject,
                        format!("column \"{}\" does not exist", col),
                    ));
                }
                let uniform = index.columns.iter().all(|c| {
                    self.backfilled
                        .contains(&(key.clone(), c.to_ascii_lowercase()))
                });
                if index.kind != IndexKind::Plain && rows > 1 && uniform {
                    return Err(DbError::other(format!(
                        "could not create unique index \"{}\"",
                        index.name
                    )));
                }
                if index.kind == IndexKind::Primary && table.primary_index().is_some() {
                    return Err(DbError::other(format!(
                        "multiple primary keys for table \"{}\" are not allowed",
                        table.name
                    )));
                }
                table.indexes.push(index.clone());
            }
            MigrationAction::DropIndex { name, .. } => {
                if table
                    .index(name)
                    .is_some_and(|i| i.kind == IndexKind::Primary)
                {
                    return Err(DbError::other(format!(
                        "cannot drop index {} because constraint {} on table {} requires it",
                        name, name, table.name
                    )));
                }
                table.indexes.retain(|i| !i.name.eq_ignore_ascii_case(name));
            }
            MigrationAction::DropColumn { name, .. } => {
                if !table.has_column(name) {
                    return Err(DbError::new(
                        DbErrorKind::UndefinedObject,
                        format!(
                            "column \"{}\" of relation \"{}\" does not exist",
                            name, table.name
                        ),
                    ));
                }
                table.columns.retain(|c| !c.name.eq_ignore_ascii_case(name));
                table.indexes.retain(|i| !i.covers(name));
                self.backfilled
                    .remove(&(key.clone(), name.to_ascii_lowercase()));
            }
            MigrationAction::ModifyColumn { column, .. } => {
                let table_name = table.name.clone();
                let Some(live) = table
                    .columns
                    .iter_mut()
                    .find(|c| c.name.eq_ignore_ascii_case(&column.name))
                else {
                    return Err(DbError::new(
                        DbErrorKind::UndefinedObject,
                        format!(
                            "column \"{}\" of relation \"{}\" does not exist",
                            column.name, table_name
                        ),
                    ));
                };
                live.sql_type = column.sql_type.canonical();
                live.nullable = column.nullable;
                if column.default.is_some() {
                    live.default = column.default.clone();
                }
            }
        }

        self.applied.push(action.clone());
        Ok(())
    }
}

impl Database for MemoryDatabase {
    fn inspect_table<'a>(
        &'a self,
        table: &'a str,
    ) -> BoxFuture<'a, Result<Option<LiveTableSnapshot>, DbError>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            let key = table.to_ascii_lowercase();
            if let Some(message) = state.unreadable.get(&key) {
                return Err(DbError::other(message.clone()));
            }
            Ok(state.tables.get(&key).cloned())
        })
    }

    fn apply<'a>(&'a self, action: &'a MigrationAction) -> BoxFuture<'a, Result<(), DbError>> {
        Box::pin(async move { self.state.lock().await.apply(action) })
    }

    fn try_lock(&self, key: i64) -> BoxFuture<'_, Result<bool, DbError>> {
        Box::pin(async move { Ok(self.state.lock().await.locks.insert(key)) })
    }

    fn unlock(&self, key: i64) -> BoxFuture<'_, Result<(), DbError>> {
        Box::pin(async move {
            let held = self.state.lock().await.locks.remove(&key);
            if held {
                Ok(())
            } else {
                Err(DbError::other(format!("advisory lock {} is not held", key)))
            }
        })
    }
}
