//! Schema diffing: compare a declared table against its live snapshot.
//!
//! The automatic path is strictly additive. [`diff_table`] only ever
//! produces `AddColumn` and `AddIndex`; anything the live table has beyond
//! the declaration is left alone. Columns always come before indexes, so an
//! index over a freshly added column is created after that column.
//!
//! Primary keys are never diffed. Tables are created with their primary key,
//! and adding one to a populated table is an operator decision.
//!
//! Changes to existing columns are planned separately by
//! [`plan_modify_column`], which consults the [`SafetyGuard`] first.

use crate::guard::{Authorization, DestructiveTarget, SafetyGuard};
use crate::{Error, GuardDenied, MigrationAction};
use klage_db_schema::{ColumnSpec, IndexKind, LiveTableSnapshot, TableSchema};
use std::collections::HashSet;

/// Additive changes for a single table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableDiff {
    pub table: String,
    pub actions: Vec<MigrationAction>,
}

impl TableDiff {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn to_sql(&self, prefix: &str) -> String {
        let mut sql = format!("-- Table: {}\n", self.table);
        for action in &self.actions {
            sql.push_str(&action.to_sql(prefix));
            sql.push('\n');
        }
        sql
    }
}

impl std::fmt::Display for TableDiff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return writeln!(f, "{}: up to date", self.table);
        }
        writeln!(f, "{}:", self.table)?;
        for action in &self.actions {
            writeln!(f, "  {}", action)?;
        }
        Ok(())
    }
}

/// Compute the additive changes that bring `actual` up to `desired`.
///
/// Deterministic: the same inputs always give the same actions in the same
/// order (declaration order, columns first).
pub fn diff_table(desired: &TableSchema, actual: &LiveTableSnapshot) -> TableDiff {
    let mut actions = diff_columns(desired, actual);

    let mut available: HashSet<String> = actual
        .columns
        .iter()
        .map(|c| c.name.to_ascii_lowercase())
        .collect();
    for action in &actions {
        if let MigrationAction::AddColumn { column, .. } = action {
            available.insert(column.name.to_ascii_lowercase());
        }
    }

    actions.extend(diff_indexes(desired, actual, &available));

    TableDiff {
        table: desired.name.clone(),
        actions,
    }
}

fn diff_columns(desired: &TableSchema, actual: &LiveTableSnapshot) -> Vec<MigrationAction> {
    desired
        .columns
        .iter()
        .filter(|col| !actual.has_column(&col.name))
        .map(|col| MigrationAction::AddColumn {
            table: desired.name.clone(),
            column: col.clone(),
        })
        .collect()
}

fn diff_indexes(
    desired: &TableSchema,
    actual: &LiveTableSnapshot,
    available: &HashSet<String>,
) -> Vec<MigrationAction> {
    let mut actions = Vec::new();

    for idx in &desired.indexes {
        if idx.kind == IndexKind::Primary || actual.has_index(&idx.name) {
            continue;
        }

        let missing: Vec<&str> = idx
            .columns
            .iter()
            .filter(|c| !available.contains(&c.to_ascii_lowercase()))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            tracing::warn!(
                table = %desired.name,
                index = %idx.name,
                missing = ?missing,
                "skipping index over columns that will not exist"
            );
            continue;
        }

        actions.push(MigrationAction::AddIndex {
            table: desired.name.clone(),
            index: idx.clone(),
        });
    }

    actions
}

/// Whether a live column already has the shape `desired` asks for.
///
/// Types are compared in canonical form, defaults the way Postgres reports
/// them (see [`klage_db_schema::DefaultValue::is_equivalent`]). A desired
/// column without a default leaves the live default alone, so any live
/// default matches it.
pub fn column_matches(live: &ColumnSpec, desired: &ColumnSpec) -> bool {
    live.sql_type.canonical() == desired.sql_type.canonical()
        && live.nullable == desired.nullable
        && desired
            .default
            .as_ref()
            .is_none_or(|d| live.default.as_ref().is_some_and(|l| d.is_equivalent(l)))
}

/// Plan an operator-requested change to an existing column.
///
/// Returns `Ok(None)` when the live column already matches. System columns
/// and primary key columns are refused before any SQL is produced.
pub fn plan_modify_column(
    desired: &ColumnSpec,
    actual: &LiveTableSnapshot,
    guard: &SafetyGuard,
) -> Result<Option<MigrationAction>, Error> {
    let live = actual
        .column(&desired.name)
        .ok_or_else(|| Error::ColumnNotFound {
            table: actual.name.clone(),
            column: desired.name.clone(),
        })?;

    if let Authorization::Denied(reason) =
        guard.authorize_destructive(actual, DestructiveTarget::Column(live))
    {
        return Err(GuardDenied {
            table: actual.name.clone(),
            target: live.name.clone(),
            reason,
        }
        .into());
    }

    if column_matches(live, desired) {
        return Ok(None);
    }

    let mut column = desired.clone();
    // Keep the live spelling so case-only differences do not matter.
    column.name = live.name.clone();
    Ok(Some(MigrationAction::ModifyColumn {
        table: actual.name.clone(),
        column,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DenyReason;
    use klage_db_schema::{DefaultValue, IndexSpec, SqlType};

    fn make_column(name: &str, sql_type: SqlType, nullable: bool) -> ColumnSpec {
        ColumnSpec::new(name, sql_type).nullable(nullable)
    }

    fn cases_table() -> TableSchema {
        TableSchema::new("klage_cases")
            .column(make_column("id", SqlType::BigSerial, false))
            .column(make_column("case_id", SqlType::Varchar(100), false))
            .column(make_column("case_status", SqlType::Varchar(20), true).default_text("draft"))
            .column(make_column("datenquelle", SqlType::Varchar(50), true))
            .primary_key(&["id"])
            .unique(&["case_id"])
            .index(&["datenquelle"])
    }

    fn live_without(table: &TableSchema, columns: &[&str], indexes: &[&str]) -> LiveTableSnapshot {
        let mut live = LiveTableSnapshot::from(table);
        live.columns.retain(|c| !columns.contains(&c.name.as_str()));
        live.indexes.retain(|i| !indexes.contains(&i.name.as_str()));
        live
    }

    #[test]
    fn test_diff_no_changes() {
        let table = cases_table();
        let diff = diff_table(&table, &LiveTableSnapshot::from(&table));
        assert!(diff.is_empty());
    }

    #[test]
    fn test_diff_add_column_then_index() {
        let table = cases_table();
        let live = live_without(&table, &["datenquelle"], &["idx_klage_cases_datenquelle"]);

        let diff = diff_table(&table, &live);
        insta::assert_snapshot!(diff.to_string(), @r"
        klage_cases:
          + klage_cases.datenquelle: VARCHAR(50) (nullable)
          + klage_cases.INDEX idx_klage_cases_datenquelle (datenquelle)
        ");
    }

    #[test]
    fn test_diff_ignores_extra_live_columns() {
        let table = cases_table();
        let mut live = LiveTableSnapshot::from(&table);
        live.columns.push(make_column("legacy_notes", SqlType::Text, true));
        live.indexes.push(IndexSpec::new(
            "idx_legacy_notes",
            IndexKind::Plain,
            ["legacy_notes"],
        ));

        assert!(diff_table(&table, &live).is_empty());
    }

    #[test]
    fn test_diff_matches_names_case_insensitively() {
        let table = cases_table();
        let mut live = LiveTableSnapshot::from(&table);
        for col in &mut live.columns {
            col.name = col.name.to_uppercase();
        }
        for idx in &mut live.indexes {
            idx.name = idx.name.to_uppercase();
        }

        assert!(diff_table(&table, &live).is_empty());
    }

    #[test]
    fn test_diff_never_adds_primary_key() {
        let table = cases_table();
        let live = live_without(&table, &[], &["klage_cases_pkey"]);
        assert!(diff_table(&table, &live).is_empty());
    }

    #[test]
    fn test_diff_skips_index_over_unknown_column() {
        // Bypasses catalog validation on purpose.
        let mut table = cases_table();
        table.indexes.push(IndexSpec::new(
            "idx_klage_cases_ghost",
            IndexKind::Plain,
            ["ghost"],
        ));

        let diff = diff_table(&table, &LiveTableSnapshot::from(&cases_table()));
        assert!(diff.is_empty());
    }

    #[test]
    fn test_diff_to_sql() {
        let table = cases_table();
        let live = live_without(&table, &["case_status"], &["uq_klage_cases_case_id"]);

        insta::assert_snapshot!(diff_table(&table, &live).to_sql("wp_"), @r#"
        -- Table: klage_cases
        ALTER TABLE "wp_klage_cases" ADD COLUMN "case_status" VARCHAR(20) DEFAULT 'draft';
        CREATE UNIQUE INDEX "wp_uq_klage_cases_case_id" ON "wp_klage_cases" ("case_id");
        "#);
    }

    #[test]
    fn test_column_matches_canonical_types() {
        let desired = make_column("id", SqlType::BigSerial, false);
        let live = make_column("id", SqlType::BigInt, false)
            .with_default(DefaultValue::Expr("nextval('klage_cases_id_seq'::regclass)".into()));
        assert!(column_matches(&live, &desired));

        let widened = make_column("id", SqlType::Numeric { precision: 20, scale: 0 }, false);
        assert!(!column_matches(&live, &widened));
    }

    #[test]
    fn test_column_matches_defaults_read_back_from_postgres() {
        let desired = make_column("case_status", SqlType::Varchar(20), true).default_text("draft");
        let live = make_column("case_status", SqlType::Varchar(20), true)
            .with_default(DefaultValue::Expr("'draft'::character varying".into()));
        assert!(column_matches(&live, &desired));

        let table = cases_table();
        let mut live_table = LiveTableSnapshot::from(&table);
        live_table.columns[2] = live;
        let planned = plan_modify_column(&desired, &live_table, &SafetyGuard::new()).unwrap();
        assert_eq!(planned, None);

        let other = make_column("case_status", SqlType::Varchar(20), true)
            .with_default(DefaultValue::Expr("'open'::character varying".into()));
        assert!(!column_matches(&other, &desired));
    }

    #[test]
    fn test_diff_missing_unique_column_orders_column_first() {
        let catalog = crate::claims_catalog().unwrap();
        let cases = catalog.get("klage_cases").unwrap();
        let live = live_without(cases, &["case_id"], &["uq_klage_cases_case_id"]);

        let actions = diff_table(cases, &live).actions;
        assert_eq!(actions.len(), 2, "{actions:?}");
        assert!(matches!(
            &actions[0],
            MigrationAction::AddColumn { column, .. } if column.name == "case_id"
        ));
        assert!(matches!(
            &actions[1],
            MigrationAction::AddIndex { index, .. }
                if index.name == "uq_klage_cases_case_id" && index.kind == IndexKind::Unique
        ));
    }

    #[test]
    fn test_plan_modify_column() {
        let table = cases_table();
        let live = LiveTableSnapshot::from(&table);
        let guard = SafetyGuard::new();

        let desired = make_column("case_status", SqlType::Varchar(40), false);
        let action = plan_modify_column(&desired, &live, &guard).unwrap();
        assert_eq!(
            action,
            Some(MigrationAction::ModifyColumn {
                table: "klage_cases".to_string(),
                column: desired,
            })
        );

        let unchanged = make_column("case_status", SqlType::Varchar(20), true);
        assert_eq!(plan_modify_column(&unchanged, &live, &guard).unwrap(), None);
    }

    #[test]
    fn test_plan_modify_column_refuses_system_and_key_columns() {
        let table = cases_table();
        let live = LiveTableSnapshot::from(&table);
        let guard = SafetyGuard::new();

        let err = plan_modify_column(&make_column("id", SqlType::Text, true), &live, &guard)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Denied(GuardDenied {
                reason: DenyReason::SystemColumn,
                ..
            })
        ));

        let err = plan_modify_column(&make_column("missing", SqlType::Text, true), &live, &guard)
            .unwrap_err();
        assert!(matches!(err, Error::ColumnNotFound { .. }));
    }
}
