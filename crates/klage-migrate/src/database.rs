//! The seam between the engine and a concrete database.

use crate::{BoxFuture, DbError, MigrationAction};
use klage_db_schema::LiveTableSnapshot;

/// Everything the engine needs from a database.
///
/// Table and index names passed in and returned are logical (unprefixed).
/// Backends map them to physical names.
///
/// Implemented by [`PgDatabase`](crate::PgDatabase) and
/// [`MemoryDatabase`](crate::MemoryDatabase).
pub trait Database: Send + Sync {
    /// Read the current structure of `table`, or `None` if it does not exist.
    fn inspect_table<'a>(
        &'a self,
        table: &'a str,
    ) -> BoxFuture<'a, Result<Option<LiveTableSnapshot>, DbError>>;

    /// Issue exactly one structural change.
    fn apply<'a>(&'a self, action: &'a MigrationAction) -> BoxFuture<'a, Result<(), DbError>>;

    /// Take the named session lock if it is free. Never waits.
    fn try_lock(&self, key: i64) -> BoxFuture<'_, Result<bool, DbError>>;

    /// Release a lock taken with [`Database::try_lock`].
    fn unlock(&self, key: i64) -> BoxFuture<'_, Result<(), DbError>>;
}
