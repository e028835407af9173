//! Read-only view of live table structure.

use crate::{Database, InspectionError};
use klage_db_schema::{LiveTableSnapshot, is_system_column_name};

/// Reads table structure through a [`Database`].
///
/// Snapshots are never cached: each call reflects the database at that moment.
pub struct SchemaInspector<'d, D: ?Sized> {
    db: &'d D,
}

impl<'d, D: Database + ?Sized> SchemaInspector<'d, D> {
    pub fn new(db: &'d D) -> Self {
        Self { db }
    }

    /// Snapshot `table`, or `None` if it does not exist.
    pub async fn inspect(&self, table: &str) -> Result<Option<LiveTableSnapshot>, InspectionError> {
        let snapshot = self
            .db
            .inspect_table(table)
            .await
            .map_err(|source| InspectionError {
                table: table.to_string(),
                source,
            })?;

        let Some(mut snapshot) = snapshot else {
            tracing::debug!(table, "table does not exist");
            return Ok(None);
        };

        for col in &mut snapshot.columns {
            col.is_system = col.is_system || is_system_column_name(&col.name);
        }

        tracing::debug!(
            table,
            columns = snapshot.columns.len(),
            indexes = snapshot.indexes.len(),
            "inspected table"
        );
        Ok(Some(snapshot))
    }
}
