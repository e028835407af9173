//! Schema types for the klage schema evolution engine.
//!
//! This crate holds the passive data model shared by the engine
//! (`klage-migrate`) and the collaborators that only need the declared shape
//! of the tables (form rendering, CSV templates):
//!
//! - [`SchemaCatalog`]: the declared target schema, one [`TableSchema`] per table
//! - [`LiveTableSnapshot`]: the same shape, observed from a live database
//!
//! Catalogs are validated once, when they are built. A catalog that made it
//! past [`SchemaCatalog::new`] never references a missing column, never
//! declares a name twice, has exactly one primary key per table and never
//! declares a `NOT NULL` column that existing rows could not be filled for.
//!
//! ## Example
//!
//! ```
//! use klage_db_schema::{ColumnSpec, SchemaCatalog, SqlType, TableSchema};
//!
//! let catalog = SchemaCatalog::new([TableSchema::new("klage_audit")
//!     .column(ColumnSpec::new("id", SqlType::BigSerial).not_null())
//!     .column(ColumnSpec::new("action", SqlType::Varchar(50)).not_null().default_text(""))
//!     .primary_key(&["id"])
//!     .index(&["action"])])
//! .unwrap();
//!
//! assert_eq!(catalog.len(), 1);
//! ```

use indexmap::IndexMap;
use std::fmt;
use std::str::FromStr;

mod sql;
pub use sql::{Ident, Lit, quote_ident};

/// Columns that identify or audit a row. They are never dropped or retyped.
pub const SYSTEM_COLUMNS: &[&str] = &["id", "created_at", "updated_at"];

/// Postgres truncates identifiers longer than this many bytes.
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Returns true if `name` belongs to the fixed system column set.
pub fn is_system_column_name(name: &str) -> bool {
    SYSTEM_COLUMNS.iter().any(|c| c.eq_ignore_ascii_case(name))
}

/// Check an identifier against `[a-z_][a-z0-9_]*`.
pub fn is_valid_identifier(name: &str) -> bool {
    if name.len() > MAX_IDENTIFIER_LEN {
        return false;
    }
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Generate a standard index name for a table and columns.
///
/// Uses the convention `idx_{table}_{columns}` where columns are joined by underscore.
///
/// ```
/// let name = klage_db_schema::index_name("klage_cases", &["case_status"]);
/// assert_eq!(name, "idx_klage_cases_case_status");
/// ```
pub fn index_name(table: &str, columns: &[impl AsRef<str>]) -> String {
    let cols: Vec<&str> = columns.iter().map(|c| c.as_ref()).collect();
    format!("idx_{}_{}", table, cols.join("_"))
}

/// Generate a standard unique index name for a table and columns.
///
/// Uses the convention `uq_{table}_{columns}` where columns are joined by underscore.
///
/// ```
/// let name = klage_db_schema::unique_index_name("klage_cases", &["case_id"]);
/// assert_eq!(name, "uq_klage_cases_case_id");
/// ```
pub fn unique_index_name(table: &str, columns: &[impl AsRef<str>]) -> String {
    let cols: Vec<&str> = columns.iter().map(|c| c.as_ref()).collect();
    format!("uq_{}_{}", table, cols.join("_"))
}

/// Name of the primary key constraint, following the Postgres default.
pub fn primary_key_name(table: &str) -> String {
    format!("{}_pkey", table)
}

/// A malformed catalog. Detected when the catalog is built, never at diff time.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("invalid identifier {name:?} ({context})")]
    InvalidIdentifier { context: String, name: String },

    #[error("table {0} is declared twice")]
    DuplicateTable(String),

    #[error("table {0} declares no columns")]
    EmptyTable(String),

    #[error("table {table}: column {column} is declared twice")]
    DuplicateColumn { table: String, column: String },

    #[error("table {table}: index {index} is declared twice")]
    DuplicateIndex { table: String, index: String },

    #[error("index {index} is declared by both {first} and {second}")]
    IndexNameClash {
        index: String,
        first: String,
        second: String,
    },

    #[error("table {table}: index {index} has no columns")]
    EmptyIndex { table: String, index: String },

    #[error("table {table}: index {index} references unknown column {column}")]
    UnknownIndexColumn {
        table: String,
        index: String,
        column: String,
    },

    #[error("table {table}: column {column} is NOT NULL but has no default for existing rows")]
    NotNullWithoutDefault { table: String, column: String },

    #[error("table {table}: expected exactly one primary key, found {found}")]
    PrimaryKeyCount { table: String, found: usize },

    #[error("unsupported column type {0:?}")]
    InvalidType(String),
}

/// Column types the engine knows how to declare.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SqlType {
    /// SMALLINT (2 bytes)
    SmallInt,
    /// INTEGER (4 bytes)
    Integer,
    /// BIGINT (8 bytes)
    BigInt,
    /// BIGSERIAL, a BIGINT fed by a sequence
    BigSerial,
    /// NUMERIC(precision, scale)
    Numeric { precision: u32, scale: u32 },
    /// BOOLEAN
    Boolean,
    /// VARCHAR(length)
    Varchar(u32),
    /// TEXT
    Text,
    /// DATE
    Date,
    /// TIMESTAMP (without time zone)
    Timestamp,
    /// TIMESTAMPTZ
    Timestamptz,
    /// A type read back from the database that has no dedicated variant.
    Other(String),
}

impl SqlType {
    /// The type as stored. `BIGSERIAL` reads back as `BIGINT`.
    pub fn canonical(&self) -> SqlType {
        match self {
            SqlType::BigSerial => SqlType::BigInt,
            other => other.clone(),
        }
    }

    /// Whether defaults for this type are string literals.
    pub fn is_textual(&self) -> bool {
        matches!(self, SqlType::Varchar(_) | SqlType::Text)
    }

    /// Map a row of `information_schema.columns` back to a type.
    pub fn from_information_schema(
        data_type: &str,
        character_maximum_length: Option<i32>,
        numeric_precision: Option<i32>,
        numeric_scale: Option<i32>,
    ) -> SqlType {
        match data_type {
            "smallint" => SqlType::SmallInt,
            "integer" => SqlType::Integer,
            "bigint" => SqlType::BigInt,
            "boolean" => SqlType::Boolean,
            "text" => SqlType::Text,
            "date" => SqlType::Date,
            "timestamp without time zone" => SqlType::Timestamp,
            "timestamp with time zone" => SqlType::Timestamptz,
            "character varying" => match character_maximum_length {
                Some(len) if len > 0 => SqlType::Varchar(len as u32),
                _ => SqlType::Text,
            },
            "numeric" => match (numeric_precision, numeric_scale) {
                (Some(p), Some(s)) if p > 0 && s >= 0 => SqlType::Numeric {
                    precision: p as u32,
                    scale: s as u32,
                },
                _ => SqlType::Other("numeric".to_string()),
            },
            other => SqlType::Other(other.to_string()),
        }
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlType::SmallInt => write!(f, "SMALLINT"),
            SqlType::Integer => write!(f, "INTEGER"),
            SqlType::BigInt => write!(f, "BIGINT"),
            SqlType::BigSerial => write!(f, "BIGSERIAL"),
            SqlType::Numeric { precision, scale } => write!(f, "NUMERIC({},{})", precision, scale),
            SqlType::Boolean => write!(f, "BOOLEAN"),
            SqlType::Varchar(len) => write!(f, "VARCHAR({})", len),
            SqlType::Text => write!(f, "TEXT"),
            SqlType::Date => write!(f, "DATE"),
            SqlType::Timestamp => write!(f, "TIMESTAMP"),
            SqlType::Timestamptz => write!(f, "TIMESTAMPTZ"),
            SqlType::Other(name) => write!(f, "{}", name),
        }
    }
}

impl FromStr for SqlType {
    type Err = ConfigurationError;

    /// Parse a type as an operator would type it into the admin form.
    ///
    /// Accepts Postgres spellings and the MySQL spellings used by older
    /// declarations (`datetime`, `tinyint(1)`, `decimal(10,2)`, `int(5)`).
    /// Display widths and `unsigned` are ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigurationError::InvalidType(s.to_string());

        let lower = s.trim().to_ascii_lowercase();
        let lower = lower.strip_suffix(" unsigned").unwrap_or(&lower).trim();

        let (base, args) = match lower.split_once('(') {
            Some((base, rest)) => {
                let inner = rest.strip_suffix(')').ok_or_else(invalid)?;
                let args = inner
                    .split(',')
                    .map(|a| a.trim().parse::<u32>().map_err(|_| invalid()))
                    .collect::<Result<Vec<_>, _>>()?;
                (base.trim(), args)
            }
            None => (lower, Vec::new()),
        };

        let ty = match (base, args.as_slice()) {
            ("smallint" | "int2" | "tinyint", _) => SqlType::SmallInt,
            ("int" | "integer" | "int4", _) => SqlType::Integer,
            ("bigint" | "int8", _) => SqlType::BigInt,
            ("bigserial" | "serial8", []) => SqlType::BigSerial,
            ("numeric" | "decimal", [precision]) => SqlType::Numeric {
                precision: *precision,
                scale: 0,
            },
            ("numeric" | "decimal", [precision, scale]) if scale <= precision => SqlType::Numeric {
                precision: *precision,
                scale: *scale,
            },
            ("bool" | "boolean", []) => SqlType::Boolean,
            ("varchar" | "character varying", [len]) if *len > 0 => SqlType::Varchar(*len),
            ("varchar" | "character varying", []) => SqlType::Text,
            ("text", []) => SqlType::Text,
            ("date", []) => SqlType::Date,
            ("timestamp" | "datetime" | "timestamp without time zone", []) => SqlType::Timestamp,
            ("timestamptz" | "timestamp with time zone", []) => SqlType::Timestamptz,
            _ => return Err(invalid()),
        };
        Ok(ty)
    }
}

/// A column default.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DefaultValue {
    /// `DEFAULT NULL`
    Null,
    /// A string literal, escaped and quoted when rendered.
    Text(String),
    /// A numeric literal, rendered as-is.
    Number(String),
    /// A raw SQL expression such as `CURRENT_TIMESTAMP`. Defaults read back
    /// from the database always land here, verbatim.
    Expr(String),
}

impl DefaultValue {
    /// Render the value for a `DEFAULT` clause.
    pub fn to_sql(&self) -> String {
        match self {
            DefaultValue::Null => "NULL".to_string(),
            DefaultValue::Text(s) => Lit(s).to_string(),
            DefaultValue::Number(n) | DefaultValue::Expr(n) => n.clone(),
        }
    }

    /// Whether `live`, as read back from the database, is this default.
    ///
    /// Postgres reports defaults with a trailing cast (`'draft'::character varying`,
    /// `NULL::numeric`, `'-1'::integer`), which is ignored. Keywords compare
    /// case-insensitively, string literals exactly.
    pub fn is_equivalent(&self, live: &DefaultValue) -> bool {
        let desired = self.to_sql();
        let desired = strip_trailing_cast(&desired);
        let live = live.to_sql();
        let live = strip_trailing_cast(&live);

        if desired.starts_with('\'') || live.starts_with('\'') {
            if desired == live {
                return true;
            }
            // a quoted number against a bare one
            return matches!(self, DefaultValue::Number(_))
                && live.strip_prefix('\'').and_then(|l| l.strip_suffix('\'')) == Some(desired);
        }
        desired.eq_ignore_ascii_case(live)
    }
}

/// `'draft'::character varying` becomes `'draft'`. Casts inside an expression
/// (`nextval('seq'::regclass)`) are left alone.
fn strip_trailing_cast(expr: &str) -> &str {
    let expr = expr.trim();
    match expr.rfind("::") {
        Some(pos) if is_type_name(&expr[pos + 2..]) => expr[..pos].trim_end(),
        _ => expr,
    }
}

fn is_type_name(s: &str) -> bool {
    let base = match s.split_once('(') {
        Some((base, rest)) => {
            let Some(args) = rest.strip_suffix(')') else {
                return false;
            };
            if !args.chars().all(|c| c.is_ascii_digit() || c == ',' || c == ' ') {
                return false;
            }
            base
        }
        None => s,
    };
    let base = base.trim();
    !base.is_empty()
        && base
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | ' ' | '[' | ']'))
}

impl fmt::Display for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_sql())
    }
}

/// One desired (or observed) column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    /// Column name, unique within its table
    pub name: String,
    /// Column type
    pub sql_type: SqlType,
    /// Whether the column allows NULL
    pub nullable: bool,
    /// Default clause, if any
    pub default: Option<DefaultValue>,
    /// Identity/audit column, protected from destructive operations
    pub is_system: bool,
}

impl ColumnSpec {
    /// A nullable column without a default.
    ///
    /// Columns named after a [`SYSTEM_COLUMNS`] entry are system columns.
    pub fn new(name: impl Into<String>, sql_type: SqlType) -> Self {
        let name = name.into();
        let is_system = is_system_column_name(&name);
        Self {
            name,
            sql_type,
            nullable: true,
            default: None,
            is_system,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn default_null(self) -> Self {
        self.with_default(DefaultValue::Null)
    }

    pub fn default_text(self, value: impl Into<String>) -> Self {
        self.with_default(DefaultValue::Text(value.into()))
    }

    pub fn default_number(self, value: impl Into<String>) -> Self {
        self.with_default(DefaultValue::Number(value.into()))
    }

    pub fn default_expr(self, expr: impl Into<String>) -> Self {
        self.with_default(DefaultValue::Expr(expr.into()))
    }

    pub fn with_default(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }

    /// Mark the column as a system column regardless of its name.
    pub fn system(mut self) -> Self {
        self.is_system = true;
        self
    }

    /// Render the column definition used by `ADD COLUMN`.
    pub fn to_definition_sql(&self) -> String {
        let mut def = format!("{} {}", quote_ident(&self.name), self.sql_type);
        if !self.nullable {
            def.push_str(" NOT NULL");
        }
        if let Some(default) = &self.default {
            def.push_str(&format!(" DEFAULT {}", default.to_sql()));
        }
        def
    }
}

/// What kind of index an [`IndexSpec`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexKind {
    Primary,
    Unique,
    Plain,
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexKind::Primary => write!(f, "PRIMARY KEY"),
            IndexKind::Unique => write!(f, "UNIQUE KEY"),
            IndexKind::Plain => write!(f, "INDEX"),
        }
    }
}

/// One desired (or observed) index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    /// Index name
    pub name: String,
    /// Indexed columns, in order
    pub columns: Vec<String>,
    pub kind: IndexKind,
}

impl IndexSpec {
    pub fn new(
        name: impl Into<String>,
        kind: IndexKind,
        columns: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            kind,
        }
    }

    /// Returns true if the index covers `column`.
    pub fn covers(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c.eq_ignore_ascii_case(column))
    }
}

/// A declared table: ordered columns and indexes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSpec>,
    pub indexes: Vec<IndexSpec>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            indexes: Vec::new(),
        }
    }

    pub fn column(mut self, column: ColumnSpec) -> Self {
        self.columns.push(column);
        self
    }

    /// Declare the primary key, named `{table}_pkey`.
    pub fn primary_key(self, columns: &[&str]) -> Self {
        let name = primary_key_name(&self.name);
        self.named_index(name, IndexKind::Primary, columns)
    }

    /// Declare a plain index named `idx_{table}_{columns}`.
    pub fn index(self, columns: &[&str]) -> Self {
        let name = index_name(&self.name, columns);
        self.named_index(name, IndexKind::Plain, columns)
    }

    /// Declare a unique key named `uq_{table}_{columns}`.
    pub fn unique(self, columns: &[&str]) -> Self {
        let name = unique_index_name(&self.name, columns);
        self.named_index(name, IndexKind::Unique, columns)
    }

    pub fn named_index(
        mut self,
        name: impl Into<String>,
        kind: IndexKind,
        columns: &[&str],
    ) -> Self {
        self.indexes
            .push(IndexSpec::new(name, kind, columns.iter().copied()));
        self
    }

    /// Look up a column by name (case-insensitive).
    pub fn column_named(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Look up an index by name (case-insensitive).
    pub fn index_named(&self, name: &str) -> Option<&IndexSpec> {
        self.indexes
            .iter()
            .find(|i| i.name.eq_ignore_ascii_case(name))
    }

    pub fn primary_index(&self) -> Option<&IndexSpec> {
        self.indexes.iter().find(|i| i.kind == IndexKind::Primary)
    }

    /// Columns an operator may fill in: everything except system columns.
    ///
    /// Form and CSV collaborators derive their field lists from this.
    pub fn editable_columns(&self) -> impl Iterator<Item = &ColumnSpec> {
        self.columns.iter().filter(|c| !c.is_system)
    }

    /// Check this table in isolation.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        check_identifier(&self.name, || "table name".to_string())?;

        if self.columns.is_empty() {
            return Err(ConfigurationError::EmptyTable(self.name.clone()));
        }

        for (i, col) in self.columns.iter().enumerate() {
            check_identifier(&col.name, || format!("column of {}", self.name))?;
            if self.columns[..i]
                .iter()
                .any(|c| c.name.eq_ignore_ascii_case(&col.name))
            {
                return Err(ConfigurationError::DuplicateColumn {
                    table: self.name.clone(),
                    column: col.name.clone(),
                });
            }
            // added to a populated table, the column must be fillable
            let fillable = matches!(col.default, Some(ref d) if *d != DefaultValue::Null);
            if !col.nullable && !fillable && col.sql_type != SqlType::BigSerial {
                return Err(ConfigurationError::NotNullWithoutDefault {
                    table: self.name.clone(),
                    column: col.name.clone(),
                });
            }
        }

        for (i, idx) in self.indexes.iter().enumerate() {
            check_identifier(&idx.name, || format!("index of {}", self.name))?;
            if self.indexes[..i]
                .iter()
                .any(|other| other.name.eq_ignore_ascii_case(&idx.name))
            {
                return Err(ConfigurationError::DuplicateIndex {
                    table: self.name.clone(),
                    index: idx.name.clone(),
                });
            }
            if idx.columns.is_empty() {
                return Err(ConfigurationError::EmptyIndex {
                    table: self.name.clone(),
                    index: idx.name.clone(),
                });
            }
            if let Some(missing) = idx.columns.iter().find(|c| self.column_named(c).is_none()) {
                return Err(ConfigurationError::UnknownIndexColumn {
                    table: self.name.clone(),
                    index: idx.name.clone(),
                    column: missing.clone(),
                });
            }
        }

        let primaries = self
            .indexes
            .iter()
            .filter(|i| i.kind == IndexKind::Primary)
            .count();
        if primaries != 1 {
            return Err(ConfigurationError::PrimaryKeyCount {
                table: self.name.clone(),
                found: primaries,
            });
        }

        Ok(())
    }
}

fn check_identifier(
    name: &str,
    context: impl FnOnce() -> String,
) -> Result<(), ConfigurationError> {
    if is_valid_identifier(name) {
        Ok(())
    } else {
        Err(ConfigurationError::InvalidIdentifier {
            context: context(),
            name: name.to_string(),
        })
    }
}

/// A table as observed in the live database at inspection time.
///
/// Never cached beyond a single reconciliation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveTableSnapshot {
    pub name: String,
    pub columns: Vec<ColumnSpec>,
    pub indexes: Vec<IndexSpec>,
}

impl LiveTableSnapshot {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            indexes: Vec::new(),
        }
    }

    /// Column presence, matched case-insensitively.
    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn has_index(&self, name: &str) -> bool {
        self.index(name).is_some()
    }

    pub fn index(&self, name: &str) -> Option<&IndexSpec> {
        self.indexes
            .iter()
            .find(|i| i.name.eq_ignore_ascii_case(name))
    }

    pub fn primary_index(&self) -> Option<&IndexSpec> {
        self.indexes.iter().find(|i| i.kind == IndexKind::Primary)
    }
}

impl From<&TableSchema> for LiveTableSnapshot {
    fn from(table: &TableSchema) -> Self {
        Self {
            name: table.name.clone(),
            columns: table.columns.clone(),
            indexes: table.indexes.clone(),
        }
    }
}

/// The declared target schema: table name to [`TableSchema`], in declaration order.
///
/// Built once at process start and immutable afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaCatalog {
    tables: IndexMap<String, TableSchema>,
}

impl SchemaCatalog {
    /// Build and validate a catalog.
    ///
    /// Index names must be unique across the whole catalog, since Postgres
    /// scopes index names to the schema rather than the table.
    pub fn new(tables: impl IntoIterator<Item = TableSchema>) -> Result<Self, ConfigurationError> {
        let mut map: IndexMap<String, TableSchema> = IndexMap::new();
        let mut index_owners: IndexMap<String, String> = IndexMap::new();

        for table in tables {
            table.validate()?;

            if map.contains_key(&table.name) {
                return Err(ConfigurationError::DuplicateTable(table.name));
            }

            for idx in &table.indexes {
                let key = idx.name.to_ascii_lowercase();
                if let Some(first) = index_owners.get(&key) {
                    return Err(ConfigurationError::IndexNameClash {
                        index: idx.name.clone(),
                        first: first.clone(),
                        second: table.name.clone(),
                    });
                }
                index_owners.insert(key, table.name.clone());
            }

            map.insert(table.name.clone(), table);
        }

        Ok(Self { tables: map })
    }

    pub fn get(&self, table: &str) -> Option<&TableSchema> {
        self.tables.get(table)
    }

    /// Tables in declaration order.
    pub fn tables(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.values()
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests;
