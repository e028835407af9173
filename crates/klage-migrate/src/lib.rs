//! Additive, version-gated schema reconciliation for Postgres.
//!
//! The declared schema lives in a [`SchemaCatalog`] (see [`claims_catalog`]).
//! On every host startup the [`ReconciliationCoordinator`] compares a
//! declared version against the one stored in the database and, if it is
//! newer, brings every existing table up to the catalog:
//!
//! - missing columns are added, then missing indexes and unique keys
//! - nothing is ever dropped or retyped on this path
//! - every action re-checks the live table right before it runs, so a rerun
//!   or a concurrent run finds it already satisfied
//! - per-action failures are collected, never fatal to the run
//!
//! Drops and type changes are only available through the
//! [`SchemaOperator`], and only for what the [`SafetyGuard`] allows: system
//! columns (`id`, `created_at`, `updated_at`) and primary keys are refused.
//!
//! ```ignore
//! use klage_migrate::{
//!     DECLARED_VERSION, PgDatabase, PgOptionStore, ReconcileConfig,
//!     ReconciliationCoordinator, claims_catalog,
//! };
//!
//! let catalog = claims_catalog()?;
//! let config = ReconcileConfig::default();
//! let db = PgDatabase::with_prefix(pool.get().await?, &config.table_prefix);
//! let store = PgOptionStore::new(pool.get().await?, config.options_table_name());
//! store.ensure_table().await?;
//!
//! let result = ReconciliationCoordinator::new(&catalog, &db, &store, &config)
//!     .reconcile(DECLARED_VERSION)
//!     .await?;
//! println!("{result}");
//! ```

use std::future::Future;
use std::pin::Pin;

mod action;
mod catalog;
mod config;
mod database;
pub mod diff;
mod error;
mod execute;
pub mod guard;
mod inspect;
mod memory;
mod operator;
mod postgres;
mod reconcile;
mod status;
mod traced;
mod version;

pub use action::MigrationAction;
pub use catalog::{DECLARED_VERSION, claims_catalog};
pub use config::{
    DEFAULT_OPTIONS_TABLE, DEFAULT_VERSION_KEY, LockPolicy, ReconcileConfig, advisory_lock_key,
};
pub use database::Database;
pub use diff::{TableDiff, diff_table};
pub use error::{
    DbError, DbErrorKind, DenyReason, Error, ExecutionError, GuardDenied, InspectionError,
};
pub use execute::{ActionOutcome, MigrationExecutor};
pub use guard::{Authorization, DestructiveTarget, SafetyGuard};
pub use inspect::SchemaInspector;
pub use memory::MemoryDatabase;
pub use operator::{OperatorOutcome, SchemaOperator};
pub use postgres::{PgDatabase, PgOptionStore};
pub use reconcile::{FailedAction, Phase, ReconciliationCoordinator, ReconciliationResult};
pub use status::{SchemaStatus, TableStatus, schema_status, table_status};
pub use traced::{Connection, ConnectionExt, TracedConn};
pub use version::{GateDecision, MemoryVersionStore, SchemaVersion, VersionGate, VersionStore};

pub use klage_db_schema::{
    ColumnSpec, ConfigurationError, DefaultValue, IndexKind, IndexSpec, LiveTableSnapshot,
    SchemaCatalog, SqlType, TableSchema,
};

/// A boxed, sendable future, used at the trait seams.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub type Result<T, E = Error> = std::result::Result<T, E>;
