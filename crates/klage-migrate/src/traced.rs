//! Traced database connection wrapper.
//!
//! Every statement the engine sends (introspection, DDL, advisory locks,
//! version reads and writes) goes through [`TracedConn`], so running with
//! `RUST_LOG=klage_migrate=debug` shows the exact SQL of a reconciliation.

use crate::BoxFuture;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Error, Row};
use tracing::field::Empty;
use tracing::{Instrument, Span};

/// Borrowed connection whose statements each run inside a debug span.
///
/// The span carries the SQL text and parameter count, and gets the row count
/// or the error recorded once the statement finishes.
///
/// ```ignore
/// use klage_migrate::ConnectionExt;
///
/// let conn = pool.get().await?;
/// let row = conn
///     .traced()
///     .query_opt("SELECT pg_try_advisory_lock($1)", &[&key])
///     .await?;
/// ```
pub struct TracedConn<'a, C: Connection> {
    conn: &'a C,
}

impl<'a, C: Connection> TracedConn<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }

    /// DDL and writes. Records `affected`.
    pub async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<u64, Error> {
        let span = tracing::debug_span!(
            "db.execute",
            sql = %sql,
            params = params.len(),
            affected = Empty,
            error = Empty,
        );
        finish(span, "affected", self.conn.execute(sql, params), |n| *n).await
    }

    pub async fn query(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<Row>, Error> {
        finish(query_span(sql, params), "rows", self.conn.query(sql, params), |rows| {
            rows.len() as u64
        })
        .await
    }

    pub async fn query_opt(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Option<Row>, Error> {
        finish(query_span(sql, params), "rows", self.conn.query_opt(sql, params), |row| {
            u64::from(row.is_some())
        })
        .await
    }
}

fn query_span(sql: &str, params: &[&(dyn ToSql + Sync)]) -> Span {
    tracing::debug_span!(
        "db.query",
        sql = %sql,
        params = params.len(),
        rows = Empty,
        error = Empty,
    )
}

async fn finish<T>(
    span: Span,
    count_field: &'static str,
    statement: BoxFuture<'_, Result<T, Error>>,
    count: impl FnOnce(&T) -> u64,
) -> Result<T, Error> {
    match statement.instrument(span.clone()).await {
        Ok(out) => {
            span.record(count_field, count(&out));
            Ok(out)
        }
        Err(e) => {
            span.record("error", tracing::field::display(&e));
            Err(e)
        }
    }
}

/// Extension trait to get a traced wrapper from a connection.
pub trait ConnectionExt: Connection + Sized {
    fn traced(&self) -> TracedConn<'_, Self> {
        TracedConn::new(self)
    }
}

impl<C: Connection> ConnectionExt for C {}

/// A raw Postgres connection.
///
/// Implemented for `tokio_postgres::Client` and `deadpool_postgres::Object`.
pub trait Connection: Send + Sync {
    fn execute<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [&'a (dyn ToSql + Sync)],
    ) -> BoxFuture<'a, Result<u64, Error>>;

    fn query<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [&'a (dyn ToSql + Sync)],
    ) -> BoxFuture<'a, Result<Vec<Row>, Error>>;

    fn query_opt<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [&'a (dyn ToSql + Sync)],
    ) -> BoxFuture<'a, Result<Option<Row>, Error>>;
}

impl Connection for tokio_postgres::Client {
    fn execute<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [&'a (dyn ToSql + Sync)],
    ) -> BoxFuture<'a, Result<u64, Error>> {
        Box::pin(tokio_postgres::Client::execute(self, sql, params))
    }

    fn query<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [&'a (dyn ToSql + Sync)],
    ) -> BoxFuture<'a, Result<Vec<Row>, Error>> {
        Box::pin(tokio_postgres::Client::query(self, sql, params))
    }

    fn query_opt<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [&'a (dyn ToSql + Sync)],
    ) -> BoxFuture<'a, Result<Option<Row>, Error>> {
        Box::pin(tokio_postgres::Client::query_opt(self, sql, params))
    }
}

// Client methods by path, so the call cannot resolve back to this trait.
impl Connection for deadpool_postgres::Object {
    fn execute<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [&'a (dyn ToSql + Sync)],
    ) -> BoxFuture<'a, Result<u64, Error>> {
        Box::pin(tokio_postgres::Client::execute(self, sql, params))
    }

    fn query<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [&'a (dyn ToSql + Sync)],
    ) -> BoxFuture<'a, Result<Vec<Row>, Error>> {
        Box::pin(tokio_postgres::Client::query(self, sql, params))
    }

    fn query_opt<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [&'a (dyn ToSql + Sync)],
    ) -> BoxFuture<'a, Result<Option<Row>, Error>> {
        Box::pin(tokio_postgres::Client::query_opt(self, sql, params))
    }
}
