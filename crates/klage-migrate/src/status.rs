//! Read-only comparison of the catalog against the live database.

use crate::{Database, SchemaInspector};
use klage_db_schema::{IndexKind, LiveTableSnapshot, SchemaCatalog, TableSchema};
use std::fmt;

/// How one catalog table compares to the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableStatus {
    Synchronized,
    Missing,
    OutOfSync {
        missing_columns: Vec<String>,
        missing_indexes: Vec<String>,
        /// Live columns the catalog does not declare. Never dropped automatically.
        extra_columns: Vec<String>,
    },
    /// The table could not be inspected.
    Unavailable(String),
}

impl TableStatus {
    pub fn is_synchronized(&self) -> bool {
        matches!(self, TableStatus::Synchronized)
    }
}

impl fmt::Display for TableStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableStatus::Synchronized => write!(f, "ok"),
            TableStatus::Missing => write!(f, "missing"),
            TableStatus::OutOfSync {
                missing_columns,
                missing_indexes,
                extra_columns,
            } => {
                let mut parts = Vec::new();
                if !missing_columns.is_empty() {
                    parts.push(format!("missing columns: {}", missing_columns.join(", ")));
                }
                if !missing_indexes.is_empty() {
                    parts.push(format!("missing indexes: {}", missing_indexes.join(", ")));
                }
                if !extra_columns.is_empty() {
                    parts.push(format!("extra columns: {}", extra_columns.join(", ")));
                }
                write!(f, "out of sync ({})", parts.join("; "))
            }
            TableStatus::Unavailable(message) => write!(f, "unavailable: {}", message),
        }
    }
}

/// Status of every catalog table, in catalog order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaStatus {
    pub tables: Vec<(String, TableStatus)>,
}

impl SchemaStatus {
    pub fn is_synchronized(&self) -> bool {
        self.tables.iter().all(|(_, s)| s.is_synchronized())
    }
}

impl fmt::Display for SchemaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (table, status) in &self.tables {
            writeln!(f, "{}: {}", table, status)?;
        }
        Ok(())
    }
}

/// Compare a declared table against its snapshot.
pub fn table_status(desired: &TableSchema, live: &LiveTableSnapshot) -> TableStatus {
    let missing_columns: Vec<String> = desired
        .columns
        .iter()
        .filter(|c| !live.has_column(&c.name))
        .map(|c| c.name.clone())
        .collect();

    // Primary keys are matched by kind, since only one can exist.
    let missing_indexes: Vec<String> = desired
        .indexes
        .iter()
        .filter(|i| match i.kind {
            IndexKind::Primary => live.primary_index().is_none(),
            _ => !live.has_index(&i.name),
        })
        .map(|i| i.name.clone())
        .collect();

    let extra_columns: Vec<String> = live
        .columns
        .iter()
        .filter(|c| desired.column_named(&c.name).is_none())
        .map(|c| c.name.clone())
        .collect();

    if missing_columns.is_empty() && missing_indexes.is_empty() && extra_columns.is_empty() {
        TableStatus::Synchronized
    } else {
        TableStatus::OutOfSync {
            missing_columns,
            missing_indexes,
            extra_columns,
        }
    }
}

/// Inspect every catalog table and report how it compares. Changes nothing.
pub async fn schema_status<D: Database + ?Sized>(catalog: &SchemaCatalog, db: &D) -> SchemaStatus {
    let inspector = SchemaInspector::new(db);
    let mut status = SchemaStatus::default();

    for table in catalog.tables() {
        let table_status = match inspector.inspect(&table.name).await {
            Ok(Some(live)) => table_status(table, &live),
            Ok(None) => TableStatus::Missing,
            Err(e) => {
                tracing::error!(table = %table.name, error = %e.source, "failed to inspect table");
                TableStatus::Unavailable(e.source.to_string())
            }
        };
        status.tables.push((table.name.clone(), table_status));
    }

    status
}
