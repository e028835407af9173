//! Idempotent application of single structural changes.

use crate::diff::column_matches;
use crate::{Database, DbError, DbErrorKind, ExecutionError, MigrationAction, SchemaInspector};
use klage_db_schema::{IndexKind, LiveTableSnapshot};

/// What happened to one action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    /// The statement ran.
    Applied,
    /// The change was already in place, either before we looked or because a
    /// concurrent run got there first.
    AlreadySatisfied,
    /// The statement failed. Recorded, never fatal to the batch.
    Failed(ExecutionError),
}

impl ActionOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, ActionOutcome::Failed(_))
    }
}

/// Applies actions one at a time, re-checking the live state before each.
///
/// Each action is its own statement. There is no cross-action transaction:
/// one failure never rolls back the others.
pub struct MigrationExecutor<'d, D: ?Sized> {
    db: &'d D,
    inspector: SchemaInspector<'d, D>,
}

impl<'d, D: Database + ?Sized> MigrationExecutor<'d, D> {
    pub fn new(db: &'d D) -> Self {
        Self {
            db,
            inspector: SchemaInspector::new(db),
        }
    }

    pub async fn execute(&self, action: &MigrationAction) -> ActionOutcome {
        let table = action.table();
        let live = match self.inspector.inspect(table).await {
            Ok(Some(live)) => live,
            Ok(None) => {
                let err = ExecutionError::new(format!("table {} does not exist", table));
                tracing::warn!(%action, error = %err, "schema change failed");
                return ActionOutcome::Failed(err);
            }
            Err(e) => {
                tracing::warn!(%action, error = %e, "schema change failed");
                return ActionOutcome::Failed(e.into());
            }
        };

        if is_satisfied(action, &live) {
            tracing::debug!(%action, "already satisfied");
            return ActionOutcome::AlreadySatisfied;
        }

        match self.db.apply(action).await {
            Ok(()) => {
                tracing::info!(%action, "applied schema change");
                ActionOutcome::Applied
            }
            Err(e) if lost_race(action, &e) => {
                tracing::debug!(%action, error = %e, "concurrent run applied it first");
                ActionOutcome::AlreadySatisfied
            }
            Err(e) => {
                tracing::warn!(%action, error = %e, code = ?e.code, "schema change failed");
                ActionOutcome::Failed(e.into())
            }
        }
    }
}

/// Whether the effect of `action` is already present in `live`.
fn is_satisfied(action: &MigrationAction, live: &LiveTableSnapshot) -> bool {
    match action {
        MigrationAction::AddColumn { column, .. } => live.has_column(&column.name),
        MigrationAction::AddIndex { index, .. } => {
            live.has_index(&index.name)
                || (index.kind == IndexKind::Primary && live.primary_index().is_some())
        }
        MigrationAction::DropIndex { name, .. } => !live.has_index(name),
        MigrationAction::DropColumn { name, .. } => !live.has_column(name),
        MigrationAction::ModifyColumn { column, .. } => live
            .column(&column.name)
            .is_some_and(|c| column_matches(c, column)),
    }
}

/// Duplicate on add and undefined on drop mean someone else got there first.
fn lost_race(action: &MigrationAction, err: &DbError) -> bool {
    match action {
        MigrationAction::AddColumn { .. } | MigrationAction::AddIndex { .. } => {
            err.kind == DbErrorKind::DuplicateObject
        }
        MigrationAction::DropIndex { .. } | MigrationAction::DropColumn { .. } => {
            err.kind == DbErrorKind::UndefinedObject
        }
        MigrationAction::ModifyColumn { .. } => false,
    }
}
