//! Property tests for the automatic path, the guard and version ordering.

use klage_migrate::{
    Authorization, ColumnSpec, DestructiveTarget, LiveTableSnapshot, MemoryDatabase,
    MigrationAction, MigrationExecutor, SafetyGuard, SchemaCatalog, SchemaVersion, SqlType,
    TableSchema, claims_catalog, diff_table,
};
use proptest::prelude::*;
use proptest::sample::subsequence;

fn catalog() -> SchemaCatalog {
    claims_catalog().unwrap()
}

fn debtors(catalog: &SchemaCatalog) -> &TableSchema {
    catalog.get("klage_debtors").unwrap()
}

fn column_names(table: &TableSchema) -> Vec<String> {
    table.columns.iter().map(|c| c.name.clone()).collect()
}

/// The table with `removed` columns (and the indexes over them) missing.
fn without(table: &TableSchema, removed: &[String]) -> LiveTableSnapshot {
    let mut live = LiveTableSnapshot::from(table);
    live.columns.retain(|c| !removed.contains(&c.name));
    live.indexes
        .retain(|i| !i.columns.iter().any(|c| removed.contains(c)));
    live
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn mixed_case(name: &str, mask: u64) -> String {
    name.chars()
        .enumerate()
        .map(|(i, c)| {
            if mask & (1 << (i % 64)) != 0 {
                c.to_ascii_uppercase()
            } else {
                c
            }
        })
        .collect()
}

proptest! {
    #[test]
    fn diff_is_additive_and_ordered(
        removed in subsequence(column_names(debtors(&catalog())), 0..=10)
    ) {
        let catalog = catalog();
        let table = debtors(&catalog);
        let diff = diff_table(table, &without(table, &removed));

        prop_assert!(diff.actions.iter().all(|a| !a.is_destructive()));

        let first_index = diff
            .actions
            .iter()
            .position(|a| matches!(a, MigrationAction::AddIndex { .. }))
            .unwrap_or(diff.actions.len());
        prop_assert!(diff.actions[first_index..]
            .iter()
            .all(|a| matches!(a, MigrationAction::AddIndex { .. })),
            "all actions after the first AddIndex must be AddIndex");

        let added = diff
            .actions
            .iter()
            .filter(|a| matches!(a, MigrationAction::AddColumn { .. }))
            .count();
        prop_assert_eq!(added, removed.len());
    }

    #[test]
    fn applying_the_diff_reaches_a_fixed_point(
        removed in subsequence(column_names(debtors(&catalog())), 0..=10)
    ) {
        let catalog = catalog();
        let table = debtors(&catalog);
        let db = MemoryDatabase::with_tables([without(table, &removed)]);

        runtime().block_on(async {
            let diff = diff_table(table, &db.table(&table.name).await.unwrap());
            let executor = MigrationExecutor::new(&db);
            for action in &diff.actions {
                prop_assert!(executor.execute(action).await.is_success());
            }

            let live = db.table(&table.name).await.unwrap();
            prop_assert!(diff_table(table, &live).is_empty());

            // Replaying the same actions changes nothing.
            let applied = db.applied().await.len();
            for action in &diff.actions {
                prop_assert!(executor.execute(action).await.is_success());
            }
            prop_assert_eq!(db.applied().await.len(), applied);
            Ok(())
        })?;
    }

    #[test]
    fn guard_always_denies_system_columns(
        which in 0usize..3,
        mask in any::<u64>(),
        ty in prop_oneof![Just(SqlType::Text), Just(SqlType::BigInt), Just(SqlType::Timestamp)],
    ) {
        let catalog = catalog();
        let table = LiveTableSnapshot::from(debtors(&catalog));
        let name = mixed_case(klage_db_schema::SYSTEM_COLUMNS[which], mask);
        let mut column = ColumnSpec::new(name, ty);
        column.is_system = false;

        prop_assert_ne!(
            SafetyGuard::new().authorize_destructive(&table, DestructiveTarget::Column(&column)),
            Authorization::Allowed
        );
    }

    #[test]
    fn guard_allows_ordinary_columns(name in "[a-z][a-z0-9_]{2,30}") {
        prop_assume!(!klage_db_schema::is_system_column_name(&name));
        let catalog = catalog();
        let table = LiveTableSnapshot::from(debtors(&catalog));
        let column = ColumnSpec::new(name, SqlType::Text);

        prop_assert_eq!(
            SafetyGuard::new().authorize_destructive(&table, DestructiveTarget::Column(&column)),
            Authorization::Allowed
        );
    }

    #[test]
    fn version_order_matches_numeric_order(
        a in (0u64..50, 0u64..50, 0u64..50),
        b in (0u64..50, 0u64..50, 0u64..50),
    ) {
        let va: SchemaVersion = format!("{}.{}.{}", a.0, a.1, a.2).parse().unwrap();
        let vb: SchemaVersion = format!("{}.{}.{}", b.0, b.1, b.2).parse().unwrap();
        prop_assert_eq!(va.cmp(&vb), a.cmp(&b));
    }

    #[test]
    fn trailing_zeros_do_not_matter(major in 0u64..100, minor in 0u64..100) {
        let short: SchemaVersion = format!("{major}.{minor}").parse().unwrap();
        let long: SchemaVersion = format!("{major}.{minor}.0").parse().unwrap();
        prop_assert_eq!(short, long);
    }
}
