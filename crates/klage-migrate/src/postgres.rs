//! Postgres backend: introspection, DDL, advisory locks and the options table.

use crate::{
    BoxFuture, Connection, ConnectionExt, Database, DbError, DbErrorKind, MigrationAction,
    VersionStore,
};
use klage_db_schema::{
    ColumnSpec, DefaultValue, IndexKind, IndexSpec, LiveTableSnapshot, SqlType,
    is_system_column_name, quote_ident,
};
use tokio_postgres::error::SqlState;

impl From<tokio_postgres::Error> for DbError {
    fn from(err: tokio_postgres::Error) -> Self {
        let code = err.code();
        let kind = match code {
            Some(c)
                if *c == SqlState::DUPLICATE_COLUMN
                    || *c == SqlState::DUPLICATE_TABLE
                    || *c == SqlState::DUPLICATE_OBJECT =>
            {
                DbErrorKind::DuplicateObject
            }
            Some(c) if *c == SqlState::UNDEFINED_COLUMN || *c == SqlState::UNDEFINED_OBJECT => {
                DbErrorKind::UndefinedObject
            }
            Some(c) if *c == SqlState::UNDEFINED_TABLE => DbErrorKind::UndefinedTable,
            _ => DbErrorKind::Other,
        };
        let message = match err.as_db_error() {
            Some(db) => db.message().to_string(),
            None => err.to_string(),
        };
        DbError {
            kind,
            message,
            code: code.map(|c| c.code().to_string()),
        }
    }
}

const TABLE_EXISTS_SQL: &str = "\
SELECT 1
FROM information_schema.tables
WHERE table_schema::text = current_schema()
  AND table_name::text = $1";

const COLUMNS_SQL: &str = "\
SELECT column_name::text AS column_name,
       data_type::text AS data_type,
       character_maximum_length::int4 AS character_maximum_length,
       numeric_precision::int4 AS numeric_precision,
       numeric_scale::int4 AS numeric_scale,
       is_nullable::text AS is_nullable,
       column_default::text AS column_default
FROM information_schema.columns
WHERE table_schema::text = current_schema()
  AND table_name::text = $1
ORDER BY ordinal_position";

const INDEXES_SQL: &str = "\
SELECT i.relname::text AS index_name,
       ix.indisunique AS is_unique,
       ix.indisprimary AS is_primary,
       a.attname::text AS column_name
FROM pg_index ix
JOIN pg_class t ON t.oid = ix.indrelid
JOIN pg_class i ON i.oid = ix.indexrelid
JOIN pg_namespace n ON n.oid = t.relnamespace
JOIN LATERAL unnest(ix.indkey) WITH ORDINALITY AS ord(attnum, ordinality) ON true
JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = ord.attnum
WHERE n.nspname::text = current_schema()
  AND t.relname::text = $1
ORDER BY i.relname, ord.ordinality";

/// A [`Database`] over a Postgres connection.
///
/// Logical names from the catalog get `table_prefix` prepended on the way
/// out; introspected names have it stripped on the way back in.
///
/// Advisory locks belong to the session. If a run is cancelled while holding
/// one, the lock lives as long as the connection; pooled connections should
/// be recycled with `RecyclingMethod::Clean`, which unlocks them.
pub struct PgDatabase<C: Connection> {
    conn: C,
    prefix: String,
}

impl<C: Connection> PgDatabase<C> {
    pub fn new(conn: C) -> Self {
        Self::with_prefix(conn, "")
    }

    pub fn with_prefix(conn: C, prefix: impl Into<String>) -> Self {
        Self {
            conn,
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn connection(&self) -> &C {
        &self.conn
    }

    fn physical(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    fn logical(&self, name: &str) -> String {
        name.strip_prefix(self.prefix.as_str())
            .unwrap_or(name)
            .to_string()
    }

    async fn read_table(&self, table: &str) -> Result<Option<LiveTableSnapshot>, DbError> {
        let physical = self.physical(table);
        let conn = self.conn.traced();

        if conn.query_opt(TABLE_EXISTS_SQL, &[&physical]).await?.is_none() {
            return Ok(None);
        }

        let mut snapshot = LiveTableSnapshot::new(table);

        for row in conn.query(COLUMNS_SQL, &[&physical]).await? {
            let name: String = row.try_get("column_name")?;
            let data_type: String = row.try_get("data_type")?;
            let sql_type = SqlType::from_information_schema(
                &data_type,
                row.try_get("character_maximum_length")?,
                row.try_get("numeric_precision")?,
                row.try_get("numeric_scale")?,
            );
            let is_nullable: String = row.try_get("is_nullable")?;
            let default: Option<String> = row.try_get("column_default")?;
            let is_system = is_system_column_name(&name);

            snapshot.columns.push(ColumnSpec {
                name,
                sql_type,
                nullable: is_nullable == "YES",
                default: default.map(DefaultValue::Expr),
                is_system,
            });
        }

        for row in conn.query(INDEXES_SQL, &[&physical]).await? {
            let index_name: String = row.try_get("index_name")?;
            let index_name = self.logical(&index_name);
            let column: String = row.try_get("column_name")?;

            if let Some(existing) = snapshot.indexes.iter_mut().find(|i| i.name == index_name) {
                existing.columns.push(column);
                continue;
            }

            let kind = if row.try_get::<_, bool>("is_primary")? {
                IndexKind::Primary
            } else if row.try_get::<_, bool>("is_unique")? {
                IndexKind::Unique
            } else {
                IndexKind::Plain
            };
            snapshot
                .indexes
                .push(IndexSpec::new(index_name, kind, [column]));
        }

        Ok(Some(snapshot))
    }
}

impl<C: Connection> Database for PgDatabase<C> {
    fn inspect_table<'a>(
        &'a self,
        table: &'a str,
    ) -> BoxFuture<'a, Result<Option<LiveTableSnapshot>, DbError>> {
        Box::pin(self.read_table(table))
    }

    fn apply<'a>(&'a self, action: &'a MigrationAction) -> BoxFuture<'a, Result<(), DbError>> {
        Box::pin(async move {
            let sql = action.to_sql(&self.prefix);
            self.conn.traced().execute(&sql, &[]).await?;
            Ok(())
        })
    }

    fn try_lock(&self, key: i64) -> BoxFuture<'_, Result<bool, DbError>> {
        Box::pin(async move {
            let row = self
                .conn
                .traced()
                .query_opt("SELECT pg_try_advisory_lock($1)", &[&key])
                .await?;
            match row {
                Some(row) => Ok(row.try_get::<_, bool>(0)?),
                None => Ok(false),
            }
        })
    }

    fn unlock(&self, key: i64) -> BoxFuture<'_, Result<(), DbError>> {
        Box::pin(async move {
            let row = self
                .conn
                .traced()
                .query_opt("SELECT pg_advisory_unlock($1)", &[&key])
                .await?;
            let released = match row {
                Some(row) => row.try_get::<_, bool>(0)?,
                None => false,
            };
            if released {
                Ok(())
            } else {
                Err(DbError::other(format!("advisory lock {} is not held", key)))
            }
        })
    }
}

/// A [`VersionStore`] over a two-column key/value table.
pub struct PgOptionStore<C: Connection> {
    conn: C,
    table: String,
}

impl<C: Connection> PgOptionStore<C> {
    /// `table` is the physical table name, prefix included.
    pub fn new(conn: C, table: impl Into<String>) -> Self {
        Self {
            conn,
            table: table.into(),
        }
    }

    /// Create the options table if it does not exist.
    pub async fn ensure_table(&self) -> Result<(), DbError> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (option_name TEXT PRIMARY KEY, option_value TEXT NOT NULL)",
            quote_ident(&self.table)
        );
        self.conn.traced().execute(&sql, &[]).await?;
        Ok(())
    }
}

impl<C: Connection> VersionStore for PgOptionStore<C> {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>, DbError>> {
        Box::pin(async move {
            let sql = format!(
                "SELECT option_value FROM {} WHERE option_name = $1",
                quote_ident(&self.table)
            );
            let row = self.conn.traced().query_opt(&sql, &[&key]).await?;
            match row {
                Some(row) => Ok(Some(row.try_get(0)?)),
                None => Ok(None),
            }
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: &'a str) -> BoxFuture<'a, Result<(), DbError>> {
        Box::pin(async move {
            let sql = format!(
                "INSERT INTO {} (option_name, option_value) VALUES ($1, $2) \
                 ON CONFLICT (option_name) DO UPDATE SET option_value = EXCLUDED.option_value",
                quote_ident(&self.table)
            );
            self.conn.traced().execute(&sql, &[&key, &value]).await?;
            Ok(())
        })
    }
}
