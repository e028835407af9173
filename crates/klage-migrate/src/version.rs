//! Schema versions and the gate that skips reconciliation when nothing changed.

use crate::{BoxFuture, DbError, Error, Result};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tokio::sync::Mutex;

/// A dotted version such as `1.4.8` or `2.0.0-beta1`.
///
/// Missing trailing components count as zero, so `1.4` equals `1.4.0`.
/// A pre-release sorts before the release it precedes.
#[derive(Debug, Clone)]
pub struct SchemaVersion {
    raw: String,
    parts: Vec<u64>,
    pre: Option<String>,
}

impl SchemaVersion {
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for SchemaVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidVersion(s.to_string());
        let raw = s.trim();

        let (numbers, pre) = match raw.split_once('-') {
            Some((numbers, pre)) if !pre.is_empty() => (numbers, Some(pre.to_string())),
            Some(_) => return Err(invalid()),
            None => (raw, None),
        };

        let parts = numbers
            .split('.')
            .map(|p| {
                if p.is_empty() || !p.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(invalid());
                }
                p.parse::<u64>().map_err(|_| invalid())
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            raw: raw.to_string(),
            parts,
            pre,
        })
    }
}

impl Ord for SchemaVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.parts.len().max(other.parts.len());
        for i in 0..len {
            let a = self.parts.get(i).copied().unwrap_or(0);
            let b = other.parts.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => {}
                ord => return ord,
            }
        }
        match (&self.pre, &other.pre) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(a), Some(b)) => cmp_pre_release(a, b),
        }
    }
}

/// Semver-style pre-release ordering, one dot-separated identifier at a time.
///
/// Numeric identifiers compare numerically and sort below alphanumeric ones.
/// A trailing number on an alphanumeric identifier also compares numerically,
/// so `beta2 < beta10`. A shorter tag sorts first when it is a prefix.
fn cmp_pre_release(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');
    loop {
        let ord = match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => cmp_identifier(x, y),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
}

fn cmp_identifier(a: &str, b: &str) -> Ordering {
    let (a_word, a_num) = split_numeric_suffix(a);
    let (b_word, b_num) = split_numeric_suffix(b);
    match (a_word.is_empty(), b_word.is_empty()) {
        (true, false) => return Ordering::Less,
        (false, true) => return Ordering::Greater,
        _ => {}
    }
    a_word
        .cmp(b_word)
        .then_with(|| match (a_num, b_num) {
            (Some(x), Some(y)) => x.cmp(&y),
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        // `beta01` and `beta1` carry the same number; keep the order total.
        .then_with(|| a.cmp(b))
}

/// `"beta10"` becomes `("beta", Some(10))`, `"7"` becomes `("", Some(7))`.
fn split_numeric_suffix(ident: &str) -> (&str, Option<u64>) {
    let word_len = ident.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    let (word, digits) = ident.split_at(word_len);
    match digits.parse::<u64>() {
        Ok(n) => (word, Some(n)),
        Err(_) => (ident, None),
    }
}

impl PartialOrd for SchemaVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for SchemaVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SchemaVersion {}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Durable key/value storage for the last completed schema version.
pub trait VersionStore: Send + Sync {
    fn get<'a>(
        &'a self,
        key: &'a str,
    ) -> BoxFuture<'a, std::result::Result<Option<String>, DbError>>;

    fn set<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
    ) -> BoxFuture<'a, std::result::Result<(), DbError>>;
}

/// A [`VersionStore`] backed by a map.
#[derive(Debug, Default)]
pub struct MemoryVersionStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryVersionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            values: Mutex::new(HashMap::from([(key.into(), value.into())])),
        }
    }
}

impl VersionStore for MemoryVersionStore {
    fn get<'a>(
        &'a self,
        key: &'a str,
    ) -> BoxFuture<'a, std::result::Result<Option<String>, DbError>> {
        Box::pin(async move { Ok(self.values.lock().await.get(key).cloned()) })
    }

    fn set<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
    ) -> BoxFuture<'a, std::result::Result<(), DbError>> {
        Box::pin(async move {
            self.values
                .lock()
                .await
                .insert(key.to_string(), value.to_string());
            Ok(())
        })
    }
}

/// Result of consulting the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// Stored version is absent, unreadable or older: reconcile.
    Open { stored: Option<SchemaVersion> },
    /// Stored version is the declared one or newer: skip.
    Closed { stored: SchemaVersion },
}

impl GateDecision {
    pub fn should_run(&self) -> bool {
        matches!(self, GateDecision::Open { .. })
    }
}

/// Compares the declared version against the stored one.
pub struct VersionGate<'s, S: ?Sized> {
    store: &'s S,
    key: String,
}

impl<'s, S: VersionStore + ?Sized> VersionGate<'s, S> {
    pub fn new(store: &'s S, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// The stored version. An unparsable value counts as absent.
    pub async fn stored_version(&self) -> Result<Option<SchemaVersion>> {
        let Some(raw) = self.store.get(&self.key).await? else {
            return Ok(None);
        };
        match raw.parse::<SchemaVersion>() {
            Ok(version) => Ok(Some(version)),
            Err(_) => {
                tracing::warn!(
                    key = %self.key,
                    stored = %raw,
                    "ignoring unparsable stored schema version"
                );
                Ok(None)
            }
        }
    }

    pub async fn check(&self, declared: &SchemaVersion) -> Result<GateDecision> {
        let decision = match self.stored_version().await? {
            Some(stored) if stored >= *declared => GateDecision::Closed { stored },
            stored => GateDecision::Open { stored },
        };
        tracing::debug!(key = %self.key, %declared, ?decision, "checked schema version");
        Ok(decision)
    }

    pub async fn should_run(&self, declared: &SchemaVersion) -> Result<bool> {
        Ok(self.check(declared).await?.should_run())
    }

    /// Record `declared` as completed. Unconditional, even after failed actions.
    pub async fn mark_complete(&self, declared: &SchemaVersion) -> Result<()> {
        self.store.set(&self.key, declared.as_str()).await?;
        Ok(())
    }
}
