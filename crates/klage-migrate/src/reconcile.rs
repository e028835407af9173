//! Top-level reconciliation: gate, inspect, diff, execute, persist.
//!
//! A run moves through the phases in [`Phase`] order:
//!
//! ```text
//! Idle -> GateCheck -> Inspecting -> Diffing -> Executing -> Persisting -> Done
//!              \-> Done (skipped)
//! ```
//!
//! With [`LockPolicy::Advisory`] the gate is checked once without the lock and
//! once more after taking it, so the second of two concurrent callers sees the
//! first caller's completed version and skips. Waiting for the lock is bounded
//! by [`ReconcileConfig::lock_timeout`].
//!
//! Per-table and per-action failures are collected into the
//! [`ReconciliationResult`]; they never abort the run. The version is recorded
//! as complete even when some actions failed, and the failures are reported
//! instead.

use crate::diff::diff_table;
use crate::version::GateDecision;
use crate::{
    ActionOutcome, Database, Error, LockPolicy, MigrationAction, MigrationExecutor,
    ReconcileConfig, Result, SchemaInspector, SchemaVersion, VersionGate, VersionStore,
};
use klage_db_schema::{LiveTableSnapshot, SchemaCatalog, TableSchema};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::Instrument;

/// Delay between attempts to take a busy advisory lock.
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    GateCheck,
    Inspecting,
    Diffing,
    Executing,
    Persisting,
    Done,
}

/// An action that failed, with the database's message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedAction {
    pub action: MigrationAction,
    pub message: String,
}

/// Summary of one reconciliation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationResult {
    pub declared_version: String,
    /// Version stored after the run, `None` if nothing was ever stored.
    pub final_version: Option<String>,
    /// The gate was closed and nothing was inspected.
    pub skipped: bool,
    pub actions_attempted: usize,
    /// Includes `already_satisfied`.
    pub actions_succeeded: usize,
    pub already_satisfied: usize,
    pub actions_failed: Vec<FailedAction>,
    /// Catalog tables that do not exist. Creating them is out of scope.
    pub missing_tables: Vec<String>,
    /// `(table, message)` for tables that could not be inspected.
    pub inspection_failures: Vec<(String, String)>,
}

impl ReconciliationResult {
    fn skipped(declared: &SchemaVersion, stored: &SchemaVersion) -> Self {
        Self {
            declared_version: declared.to_string(),
            final_version: Some(stored.to_string()),
            skipped: true,
            ..Default::default()
        }
    }

    /// No failed actions, missing tables or inspection failures.
    pub fn is_clean(&self) -> bool {
        self.actions_failed.is_empty()
            && self.missing_tables.is_empty()
            && self.inspection_failures.is_empty()
    }
}

impl fmt::Display for ReconciliationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.skipped {
            return writeln!(
                f,
                "Schema is at {} (declared {}), nothing to do.",
                self.final_version.as_deref().unwrap_or("?"),
                self.declared_version
            );
        }

        writeln!(
            f,
            "Reconciled to {}: {}/{} actions succeeded ({} already satisfied).",
            self.declared_version,
            self.actions_succeeded,
            self.actions_attempted,
            self.already_satisfied
        )?;
        for failed in &self.actions_failed {
            writeln!(f, "  failed {}: {}", failed.action, failed.message)?;
        }
        for table in &self.missing_tables {
            writeln!(f, "  missing table {}", table)?;
        }
        for (table, message) in &self.inspection_failures {
            writeln!(f, "  could not inspect {}: {}", table, message)?;
        }
        Ok(())
    }
}

/// Drives a reconciliation against one database and version store.
pub struct ReconciliationCoordinator<'a, D: ?Sized, S: ?Sized> {
    catalog: &'a SchemaCatalog,
    db: &'a D,
    gate: VersionGate<'a, S>,
    lock: LockPolicy,
    lock_key: i64,
    lock_timeout: Duration,
}

/// Tracks a taken advisory lock until it is released.
///
/// Dropped while still held, the run was cancelled: the session keeps the lock
/// until its connection is closed or recycled.
struct HeldLock {
    key: i64,
    released: bool,
}

impl Drop for HeldLock {
    fn drop(&mut self) {
        if !self.released {
            tracing::error!(
                key = self.key,
                "reconciliation cancelled while holding the advisory lock"
            );
        }
    }
}

impl<'a, D, S> ReconciliationCoordinator<'a, D, S>
where
    D: Database + ?Sized,
    S: VersionStore + ?Sized,
{
    pub fn new(
        catalog: &'a SchemaCatalog,
        db: &'a D,
        store: &'a S,
        config: &ReconcileConfig,
    ) -> Self {
        Self {
            catalog,
            db,
            gate: VersionGate::new(store, config.version_key.clone()),
            lock: config.lock,
            lock_key: config.lock_key(),
            lock_timeout: config.lock_timeout(),
        }
    }

    /// Bring the live schema up to the catalog if `declared` is newer than the
    /// stored version.
    ///
    /// Only an unparsable `declared`, a failing version store, or a lock that
    /// fails or stays busy past the timeout return `Err`. Everything else
    /// lands in the result.
    pub async fn reconcile(&self, declared: &str) -> Result<ReconciliationResult> {
        let declared: SchemaVersion = declared.parse()?;
        let span = tracing::info_span!("reconcile", version = %declared);
        self.run(&declared).instrument(span).await
    }

    async fn run(&self, declared: &SchemaVersion) -> Result<ReconciliationResult> {
        self.enter(Phase::GateCheck);
        if let GateDecision::Closed { stored } = self.gate.check(declared).await? {
            tracing::info!(%stored, "schema version is current, skipping");
            self.enter(Phase::Done);
            return Ok(ReconciliationResult::skipped(declared, &stored));
        }

        match self.lock {
            LockPolicy::Disabled => self.run_unlocked(declared).await,
            LockPolicy::Advisory => {
                let mut held = self.acquire_lock().await?;

                let result = self.run_locked(declared).await;

                let unlocked = self.db.unlock(self.lock_key).await;
                held.released = true;
                if let Err(e) = unlocked {
                    tracing::warn!(
                        key = self.lock_key,
                        error = %e,
                        "failed to release advisory lock"
                    );
                    if result.is_ok() {
                        return Err(e.into());
                    }
                }
                result
            }
        }
    }

    /// Poll for the advisory lock until it is taken or the timeout passes.
    async fn acquire_lock(&self) -> Result<HeldLock> {
        let started = Instant::now();
        let deadline = started + self.lock_timeout;
        loop {
            if self.db.try_lock(self.lock_key).await? {
                tracing::debug!(key = self.lock_key, "advisory lock taken");
                return Ok(HeldLock {
                    key: self.lock_key,
                    released: false,
                });
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::LockTimeout {
                    key: self.lock_key,
                    waited: now - started,
                });
            }
            tracing::debug!(key = self.lock_key, "advisory lock busy, waiting");
            tokio::time::sleep(LOCK_RETRY_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn run_locked(&self, declared: &SchemaVersion) -> Result<ReconciliationResult> {
        // Another process may have finished while we waited for the lock.
        if let GateDecision::Closed { stored } = self.gate.check(declared).await? {
            tracing::info!(%stored, "schema reconciled concurrently, skipping");
            self.enter(Phase::Done);
            return Ok(ReconciliationResult::skipped(declared, &stored));
        }
        self.run_unlocked(declared).await
    }

    async fn run_unlocked(&self, declared: &SchemaVersion) -> Result<ReconciliationResult> {
        let mut result = ReconciliationResult {
            declared_version: declared.to_string(),
            ..Default::default()
        };

        self.enter(Phase::Inspecting);
        let snapshots = self.inspect_all(&mut result).await;

        self.enter(Phase::Diffing);
        let actions: Vec<MigrationAction> = snapshots
            .iter()
            .flat_map(|(table, live)| diff_table(table, live).actions)
            .collect();

        self.enter(Phase::Executing);
        let executor = MigrationExecutor::new(self.db);
        for action in actions {
            result.actions_attempted += 1;
            match executor.execute(&action).await {
                ActionOutcome::Applied => result.actions_succeeded += 1,
                ActionOutcome::AlreadySatisfied => {
                    result.actions_succeeded += 1;
                    result.already_satisfied += 1;
                }
                ActionOutcome::Failed(e) => result.actions_failed.push(FailedAction {
                    action,
                    message: e.message,
                }),
            }
        }

        self.enter(Phase::Persisting);
        self.gate.mark_complete(declared).await?;
        result.final_version = Some(declared.to_string());

        self.enter(Phase::Done);
        if result.is_clean() {
            tracing::info!(
                attempted = result.actions_attempted,
                succeeded = result.actions_succeeded,
                already_satisfied = result.already_satisfied,
                "schema reconciled"
            );
        } else {
            tracing::warn!(
                attempted = result.actions_attempted,
                succeeded = result.actions_succeeded,
                failed = result.actions_failed.len(),
                missing_tables = result.missing_tables.len(),
                inspection_failures = result.inspection_failures.len(),
                "schema reconciled with problems"
            );
        }
        Ok(result)
    }

    async fn inspect_all(
        &self,
        result: &mut ReconciliationResult,
    ) -> Vec<(&'a TableSchema, LiveTableSnapshot)> {
        let inspector = SchemaInspector::new(self.db);
        let mut snapshots = Vec::with_capacity(self.catalog.len());

        for table in self.catalog.tables() {
            match inspector.inspect(&table.name).await {
                Ok(Some(live)) => snapshots.push((table, live)),
                Ok(None) => {
                    tracing::warn!(table = %table.name, "catalog table does not exist, skipping");
                    result.missing_tables.push(table.name.clone());
                }
                Err(e) => {
                    tracing::error!(
                        table = %table.name,
                        error = %e.source,
                        "failed to inspect table"
                    );
                    result
                        .inspection_failures
                        .push((table.name.clone(), e.source.to_string()));
                }
            }
        }

        snapshots
    }

    fn enter(&self, phase: Phase) {
        tracing::debug!(?phase, "reconciliation phase");
    }
}
