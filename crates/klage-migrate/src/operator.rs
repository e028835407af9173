//! Explicit, guarded schema changes requested by an administrator.

use crate::diff::plan_modify_column;
use crate::guard::{DestructiveTarget, SafetyGuard};
use crate::{
    ActionOutcome, Database, Error, MigrationAction, MigrationExecutor, Result, SchemaInspector,
};
use klage_db_schema::{
    ColumnSpec, ConfigurationError, IndexSpec, LiveTableSnapshot, SchemaCatalog,
    is_valid_identifier,
};

/// A successful operator request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorOutcome {
    Applied,
    AlreadySatisfied,
}

/// Entry point for one-off structural changes.
///
/// Destructive requests pass through the [`SafetyGuard`] first; a refusal is
/// returned as [`Error::Denied`] and no SQL is issued. Database failures are
/// returned as [`Error::Execution`].
pub struct SchemaOperator<'a, D: ?Sized> {
    db: &'a D,
    catalog: Option<&'a SchemaCatalog>,
    guard: SafetyGuard,
}

impl<'a, D: Database + ?Sized> SchemaOperator<'a, D> {
    pub fn new(db: &'a D) -> Self {
        Self {
            db,
            catalog: None,
            guard: SafetyGuard::new(),
        }
    }

    /// Also protect columns the catalog marks as system columns.
    pub fn with_catalog(mut self, catalog: &'a SchemaCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub async fn add_column(&self, table: &str, column: ColumnSpec) -> Result<OperatorOutcome> {
        check_identifier(&column.name, "column name")?;
        self.live(table).await?;
        self.run(MigrationAction::AddColumn {
            table: table.to_string(),
            column,
        })
        .await
    }

    pub async fn add_index(&self, table: &str, index: IndexSpec) -> Result<OperatorOutcome> {
        check_identifier(&index.name, "index name")?;
        if index.columns.is_empty() {
            return Err(ConfigurationError::EmptyIndex {
                table: table.to_string(),
                index: index.name,
            }
            .into());
        }

        let live = self.live(table).await?;
        if let Some(column) = index.columns.iter().find(|c| !live.has_column(c)) {
            return Err(Error::ColumnNotFound {
                table: table.to_string(),
                column: column.clone(),
            });
        }

        self.run(MigrationAction::AddIndex {
            table: table.to_string(),
            index,
        })
        .await
    }

    pub async fn drop_column(&self, table: &str, name: &str) -> Result<OperatorOutcome> {
        let live = self.live(table).await?;
        let column = live.column(name).ok_or_else(|| Error::ColumnNotFound {
            table: table.to_string(),
            column: name.to_string(),
        })?;
        self.guard.check(&live, DestructiveTarget::Column(column))?;

        self.run(MigrationAction::DropColumn {
            table: table.to_string(),
            name: column.name.clone(),
        })
        .await
    }

    pub async fn drop_index(&self, table: &str, name: &str) -> Result<OperatorOutcome> {
        let live = self.live(table).await?;
        let index = live.index(name).ok_or_else(|| Error::IndexNotFound {
            table: table.to_string(),
            index: name.to_string(),
        })?;
        self.guard.check(&live, DestructiveTarget::Index(index))?;

        self.run(MigrationAction::DropIndex {
            table: table.to_string(),
            name: index.name.clone(),
        })
        .await
    }

    /// Change type, nullability and (if given) default of an existing column.
    pub async fn modify_column(&self, table: &str, column: ColumnSpec) -> Result<OperatorOutcome> {
        let live = self.live(table).await?;
        match plan_modify_column(&column, &live, &self.guard)? {
            Some(action) => self.run(action).await,
            None => Ok(OperatorOutcome::AlreadySatisfied),
        }
    }

    /// Inspect `table`, folding in the catalog's system flags.
    async fn live(&self, table: &str) -> Result<LiveTableSnapshot> {
        let mut live = SchemaInspector::new(self.db)
            .inspect(table)
            .await?
            .ok_or_else(|| Error::TableNotFound(table.to_string()))?;

        if let Some(declared) = self.catalog.and_then(|c| c.get(table)) {
            for col in &mut live.columns {
                if declared.column_named(&col.name).is_some_and(|c| c.is_system) {
                    col.is_system = true;
                }
            }
        }
        Ok(live)
    }

    async fn run(&self, action: MigrationAction) -> Result<OperatorOutcome> {
        tracing::info!(%action, "operator schema change requested");
        match MigrationExecutor::new(self.db).execute(&action).await {
            ActionOutcome::Applied => Ok(OperatorOutcome::Applied),
            ActionOutcome::AlreadySatisfied => Ok(OperatorOutcome::AlreadySatisfied),
            ActionOutcome::Failed(e) => Err(e.into()),
        }
    }
}

fn check_identifier(name: &str, context: &str) -> std::result::Result<(), ConfigurationError> {
    if is_valid_identifier(name) {
        Ok(())
    } else {
        Err(ConfigurationError::InvalidIdentifier {
            context: context.to_string(),
            name: name.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DenyReason, GuardDenied, MemoryDatabase};
    use klage_db_schema::{IndexKind, SqlType, TableSchema};

    fn cases() -> TableSchema {
        TableSchema::new("klage_cases")
            .column(ColumnSpec::new("id", SqlType::BigSerial).not_null())
            .column(ColumnSpec::new("case_id", SqlType::Varchar(100)).not_null().default_text(""))
            .column(ColumnSpec::new("legacy_ref", SqlType::Varchar(50)).system())
            .column(ColumnSpec::new("case_notes", SqlType::Text))
            .primary_key(&["id"])
            .unique(&["case_id"])
    }

    fn db() -> MemoryDatabase {
        MemoryDatabase::with_tables([LiveTableSnapshot::from(&cases())])
    }

    #[tokio::test]
    async fn test_drop_system_column_is_denied_without_sql() {
        let db = db();
        let operator = SchemaOperator::new(&db);

        let err = operator.drop_column("klage_cases", "created_at").await;
        assert!(matches!(err, Err(Error::ColumnNotFound { .. })));

        let err = operator.drop_column("klage_cases", "id").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Denied(GuardDenied {
                reason: DenyReason::SystemColumn,
                ..
            })
        ));
        assert!(db.applied().await.is_empty());
    }

    #[tokio::test]
    async fn test_catalog_system_flags_are_honored() {
        let catalog = SchemaCatalog::new([cases()]).unwrap();
        let db = MemoryDatabase::with_tables([{
            let mut live = LiveTableSnapshot::from(&cases());
            // Introspection cannot know about declaration-only flags.
            for col in &mut live.columns {
                col.is_system = klage_db_schema::is_system_column_name(&col.name);
            }
            live
        }]);

        let err = SchemaOperator::new(&db)
            .with_catalog(&catalog)
            .drop_column("klage_cases", "legacy_ref")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Denied(_)));

        // Without the catalog, the column is ordinary.
        let outcome = SchemaOperator::new(&db)
            .drop_column("klage_cases", "legacy_ref")
            .await
            .unwrap();
        assert_eq!(outcome, OperatorOutcome::Applied);
    }

    #[tokio::test]
    async fn test_drop_primary_key_is_denied() {
        let db = db();
        let err = SchemaOperator::new(&db)
            .drop_index("klage_cases", "klage_cases_pkey")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Denied(GuardDenied {
                reason: DenyReason::PrimaryKey,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_drop_ordinary_index_and_column() {
        let db = db();
        let operator = SchemaOperator::new(&db);
        assert_eq!(
            operator
                .drop_index("klage_cases", "UQ_KLAGE_CASES_CASE_ID")
                .await
                .unwrap(),
            OperatorOutcome::Applied
        );
        assert_eq!(
            operator.drop_column("klage_cases", "case_notes").await.unwrap(),
            OperatorOutcome::Applied
        );

        let table = db.table("klage_cases").await.unwrap();
        assert!(!table.has_index("uq_klage_cases_case_id"));
        assert!(!table.has_column("case_notes"));
    }

    #[tokio::test]
    async fn test_add_column_and_index() {
        let db = db();
        let operator = SchemaOperator::new(&db);

        let column = ColumnSpec::new("mandant", SqlType::Varchar(100));
        assert_eq!(
            operator.add_column("klage_cases", column.clone()).await.unwrap(),
            OperatorOutcome::Applied
        );
        assert_eq!(
            operator.add_column("klage_cases", column).await.unwrap(),
            OperatorOutcome::AlreadySatisfied
        );

        let index = IndexSpec::new("idx_klage_cases_mandant", IndexKind::Plain, ["mandant"]);
        assert_eq!(
            operator.add_index("klage_cases", index).await.unwrap(),
            OperatorOutcome::Applied
        );

        let bad = IndexSpec::new("idx_klage_cases_ghost", IndexKind::Plain, ["ghost"]);
        assert!(matches!(
            operator.add_index("klage_cases", bad).await,
            Err(Error::ColumnNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_add_column_rejects_bad_names_and_missing_table() {
        let db = db();
        let operator = SchemaOperator::new(&db);

        let err = operator
            .add_column("klage_cases", ColumnSpec::new("Bonität", SqlType::Text))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));

        let err = operator
            .add_column("klage_nowhere", ColumnSpec::new("x", SqlType::Text))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TableNotFound(t) if t == "klage_nowhere"));
    }

    #[tokio::test]
    async fn test_modify_column() {
        let db = db();
        let operator = SchemaOperator::new(&db);

        let widened = ColumnSpec::new("case_id", SqlType::Varchar(150)).not_null();
        assert_eq!(
            operator.modify_column("klage_cases", widened.clone()).await.unwrap(),
            OperatorOutcome::Applied
        );
        assert_eq!(
            operator.modify_column("klage_cases", widened).await.unwrap(),
            OperatorOutcome::AlreadySatisfied
        );

        let err = operator
            .modify_column("klage_cases", ColumnSpec::new("updated_at", SqlType::Text))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ColumnNotFound { .. }));
    }

    #[tokio::test]
    async fn test_database_failure_is_an_error() {
        let db = db();
        db.fail_column("klage_cases", "case_notes", "must be owner of table klage_cases")
            .await;
        let err = SchemaOperator::new(&db)
            .drop_column("klage_cases", "case_notes")
            .await
            .unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"schema change failed: must be owner of table klage_cases");
    }
}
