//! Reconciliation settings.

use klage_db_schema::{ConfigurationError, is_valid_identifier};
use serde::Deserialize;
use std::time::Duration;

/// Option key under which the last completed schema version is stored.
pub const DEFAULT_VERSION_KEY: &str = "klage_schema_version";

/// Table holding the option key/value pairs.
pub const DEFAULT_OPTIONS_TABLE: &str = "klage_options";

/// How concurrent reconciliations are serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockPolicy {
    /// Take a database advisory lock and re-check the version gate under it.
    #[default]
    Advisory,
    /// No lock. Concurrent runs rely on idempotent actions alone.
    #[serde(rename = "none")]
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconcileConfig {
    /// Prepended to every physical table and index name.
    pub table_prefix: String,
    pub version_key: String,
    pub options_table: String,
    pub lock: LockPolicy,
    /// How long to wait for another run to release the advisory lock.
    pub lock_timeout_secs: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            table_prefix: String::new(),
            version_key: DEFAULT_VERSION_KEY.to_string(),
            options_table: DEFAULT_OPTIONS_TABLE.to_string(),
            lock: LockPolicy::Advisory,
            lock_timeout_secs: 60,
        }
    }
}

impl ReconcileConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !self.table_prefix.is_empty() && !is_valid_identifier(&self.table_prefix) {
            return Err(ConfigurationError::InvalidIdentifier {
                context: "table_prefix".to_string(),
                name: self.table_prefix.clone(),
            });
        }
        if !is_valid_identifier(&self.options_table) {
            return Err(ConfigurationError::InvalidIdentifier {
                context: "options_table".to_string(),
                name: self.options_table.clone(),
            });
        }
        Ok(())
    }

    /// Physical name of the options table.
    pub fn options_table_name(&self) -> String {
        format!("{}{}", self.table_prefix, self.options_table)
    }

    pub fn lock_key(&self) -> i64 {
        advisory_lock_key(&self.version_key)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }
}

/// Derive a stable `pg_advisory_lock` key from a name.
///
/// First eight bytes of the BLAKE3 hash, little endian.
pub fn advisory_lock_key(name: &str) -> i64 {
    let hash = blake3::hash(name.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash.as_bytes()[..8]);
    i64::from_le_bytes(bytes)
}
