//! Structural changes, one DDL statement each.

use klage_db_schema::{ColumnSpec, IndexKind, IndexSpec, quote_ident};

/// A single structural change against one table.
///
/// Produced by the diff (additive variants only) or by the schema operator
/// (all variants, after the safety guard allowed them).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationAction {
    /// Add a missing column.
    AddColumn { table: String, column: ColumnSpec },
    /// Create a missing index or unique key.
    AddIndex { table: String, index: IndexSpec },
    /// Drop an index. Operator only.
    DropIndex { table: String, name: String },
    /// Drop a column. Operator only.
    DropColumn { table: String, name: String },
    /// Change type, nullability and default of a column. Operator only.
    ModifyColumn { table: String, column: ColumnSpec },
}

impl MigrationAction {
    pub fn table(&self) -> &str {
        match self {
            MigrationAction::AddColumn { table, .. }
            | MigrationAction::AddIndex { table, .. }
            | MigrationAction::DropIndex { table, .. }
            | MigrationAction::DropColumn { table, .. }
            | MigrationAction::ModifyColumn { table, .. } => table,
        }
    }

    /// Whether the action can lose data or constraints.
    pub fn is_destructive(&self) -> bool {
        !matches!(
            self,
            MigrationAction::AddColumn { .. } | MigrationAction::AddIndex { .. }
        )
    }

    /// Render the statement. `prefix` is prepended to table and index names.
    pub fn to_sql(&self, prefix: &str) -> String {
        let table = quote_ident(&format!("{}{}", prefix, self.table()));
        match self {
            MigrationAction::AddColumn { column, .. } => {
                format!(
                    "ALTER TABLE {} ADD COLUMN {};",
                    table,
                    column.to_definition_sql()
                )
            }
            MigrationAction::AddIndex { index, .. } => {
                let name = quote_ident(&format!("{}{}", prefix, index.name));
                let columns = index
                    .columns
                    .iter()
                    .map(|c| quote_ident(c))
                    .collect::<Vec<_>>()
                    .join(", ");
                match index.kind {
                    IndexKind::Primary => format!(
                        "ALTER TABLE {} ADD CONSTRAINT {} PRIMARY KEY ({});",
                        table, name, columns
                    ),
                    IndexKind::Unique => {
                        format!("CREATE UNIQUE INDEX {} ON {} ({});", name, table, columns)
                    }
                    IndexKind::Plain => {
                        format!("CREATE INDEX {} ON {} ({});", name, table, columns)
                    }
                }
            }
            MigrationAction::DropIndex { name, .. } => {
                format!("DROP INDEX {};", quote_ident(&format!("{}{}", prefix, name)))
            }
            MigrationAction::DropColumn { name, .. } => {
                format!("ALTER TABLE {} DROP COLUMN {};", table, quote_ident(name))
            }
            MigrationAction::ModifyColumn { column, .. } => {
                let name = quote_ident(&column.name);
                let mut clauses = vec![format!(
                    "ALTER COLUMN {name} TYPE {ty} USING {name}::{ty}",
                    ty = column.sql_type
                )];
                if column.nullable {
                    clauses.push(format!("ALTER COLUMN {} DROP NOT NULL", name));
                } else {
                    clauses.push(format!("ALTER COLUMN {} SET NOT NULL", name));
                }
                // No default means "leave the current default alone".
                if let Some(default) = &column.default {
                    clauses.push(format!(
                        "ALTER COLUMN {} SET DEFAULT {}",
                        name,
                        default.to_sql()
                    ));
                }
                format!("ALTER TABLE {} {};", table, clauses.join(", "))
            }
        }
    }
}

impl std::fmt::Display for MigrationAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrationAction::AddColumn { table, column } => {
                let nullable = if column.nullable { " (nullable)" } else { "" };
                write!(
                    f,
                    "+ {}.{}: {}{}",
                    table, column.name, column.sql_type, nullable
                )
            }
            MigrationAction::AddIndex { table, index } => write!(
                f,
                "+ {}.{} {} ({})",
                table,
                index.kind,
                index.name,
                index.columns.join(", ")
            ),
            MigrationAction::DropIndex { table, name } => write!(f, "- {}.INDEX {}", table, name),
            MigrationAction::DropColumn { table, name } => write!(f, "- {}.{}", table, name),
            MigrationAction::ModifyColumn { table, column } => {
                let nullable = if column.nullable { "nullable" } else { "not null" };
                write!(
                    f,
                    "~ {}.{}: {}, {}",
                    table, column.name, column.sql_type, nullable
                )?;
                if let Some(default) = &column.default {
                    write!(f, ", default {}", default)?;
                }
                Ok(())
            }
        }
    }
}
