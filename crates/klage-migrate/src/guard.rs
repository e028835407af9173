//! Refuses destructive operations on identity and audit structure.

use crate::{DenyReason, GuardDenied};
use klage_db_schema::{ColumnSpec, IndexKind, IndexSpec, LiveTableSnapshot, SYSTEM_COLUMNS};

/// What a destructive request would touch.
#[derive(Debug, Clone, Copy)]
pub enum DestructiveTarget<'a> {
    Column(&'a ColumnSpec),
    Index(&'a IndexSpec),
}

impl DestructiveTarget<'_> {
    pub fn name(&self) -> &str {
        match self {
            DestructiveTarget::Column(col) => &col.name,
            DestructiveTarget::Index(idx) => &idx.name,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authorization {
    Allowed,
    Denied(DenyReason),
}

/// Pure policy over the fixed system column set and primary keys.
///
/// The automatic path never asks: it only adds. Every operator drop or
/// modify must be allowed here before any SQL is issued.
#[derive(Debug, Clone)]
pub struct SafetyGuard {
    protected: &'static [&'static str],
}

impl Default for SafetyGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl SafetyGuard {
    pub const fn new() -> Self {
        Self {
            protected: SYSTEM_COLUMNS,
        }
    }

    pub fn authorize_destructive(
        &self,
        table: &LiveTableSnapshot,
        target: DestructiveTarget<'_>,
    ) -> Authorization {
        match target {
            DestructiveTarget::Column(col) => {
                let protected = self
                    .protected
                    .iter()
                    .any(|p| p.eq_ignore_ascii_case(&col.name));
                if col.is_system || protected {
                    return Authorization::Denied(DenyReason::SystemColumn);
                }
                // Dropping or retyping a key column takes the primary key with it.
                if table.primary_index().is_some_and(|pk| pk.covers(&col.name)) {
                    return Authorization::Denied(DenyReason::PrimaryKey);
                }
                Authorization::Allowed
            }
            DestructiveTarget::Index(idx) => {
                let is_primary = idx.kind == IndexKind::Primary
                    || table
                        .primary_index()
                        .is_some_and(|pk| pk.name.eq_ignore_ascii_case(&idx.name));
                if is_primary {
                    Authorization::Denied(DenyReason::PrimaryKey)
                } else {
                    Authorization::Allowed
                }
            }
        }
    }

    /// Like [`authorize_destructive`](Self::authorize_destructive), as a `Result`.
    pub fn check(
        &self,
        table: &LiveTableSnapshot,
        target: DestructiveTarget<'_>,
    ) -> Result<(), GuardDenied> {
        match self.authorize_destructive(table, target) {
            Authorization::Allowed => Ok(()),
            Authorization::Denied(reason) => {
                tracing::warn!(
                    table = %table.name,
                    target = %target.name(),
                    %reason,
                    "refused destructive change"
                );
                Err(GuardDenied {
                    table: table.name.clone(),
                    target: target.name().to_string(),
                    reason,
                })
            }
        }
    }
}
