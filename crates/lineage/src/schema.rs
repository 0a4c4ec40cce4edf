//! Schema representation types.
//!
//! A [`SchemaSnapshot`] describes a set of tables either as declared by the
//! application (the migration target) or as reflected from a live database.
//! Both sides of an autogenerate comparison use the same types, so the diff
//! engine never needs to know where a shape came from.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{MigrateError, Result};

/// SQL data types supported by the migration system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SqlType {
    /// Integer (32-bit).
    Integer,
    /// Big integer (64-bit).
    BigInt,
    /// Small integer (16-bit).
    SmallInt,
    /// Unbounded text.
    Text,
    /// Variable-length character string.
    Varchar(usize),
    /// Fixed-length character string.
    Char(usize),
    /// Boolean.
    Boolean,
    /// Date and time.
    DateTime,
    /// Date only.
    Date,
    /// Time only.
    Time,
    /// Timestamp (alias for DateTime in most databases).
    Timestamp,
    /// Floating point (single precision).
    Real,
    /// Floating point (double precision).
    Double,
    /// Exact numeric with optional precision and scale.
    Decimal(Option<u8>, Option<u8>),
    /// Binary large object.
    Blob,
    /// Binary data with max length.
    Binary(usize),
    /// Variable-length binary data.
    VarBinary(usize),
    /// JSON data.
    Json,
    /// UUID.
    Uuid,
    /// Untyped placeholder: the database reported no type, or the model
    /// left it open. Never compared.
    Null,
    /// A type name this crate doesn't model, kept verbatim.
    Other(String),
}

/// Broad family a type belongs to. Types of different families are always
/// considered changed by the default type comparison.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeAffinity {
    Integer,
    String,
    Boolean,
    DateTime,
    Date,
    Time,
    Float,
    Numeric,
    Binary,
    Json,
    Uuid,
    Null,
    Other(String),
}

impl SqlType {
    /// Parses a type name as reported by a database driver.
    ///
    /// Unknown names are preserved in [`SqlType::Other`]; an empty name is
    /// the untyped placeholder.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Self::Null;
        }
        let upper = trimmed.to_ascii_uppercase();
        let (base, args) = match upper.find('(') {
            Some(open) => {
                let close = upper.rfind(')').unwrap_or(upper.len());
                let args: Vec<&str> = upper[open + 1..close.max(open + 1)]
                    .split(',')
                    .map(str::trim)
                    .filter(|a| !a.is_empty())
                    .collect();
                (upper[..open].trim().to_string(), args)
            }
            None => (upper.clone(), Vec::new()),
        };
        let first = args.first().and_then(|a| a.parse::<usize>().ok());
        let second = args.get(1).and_then(|a| a.parse::<u8>().ok());

        match (base.as_str(), first) {
            ("INTEGER" | "INT" | "INT4" | "MEDIUMINT", _) => Self::Integer,
            ("BIGINT" | "INT8", _) => Self::BigInt,
            ("SMALLINT" | "INT2" | "TINYINT", _) => Self::SmallInt,
            ("TEXT" | "CLOB", _) => Self::Text,
            ("VARCHAR" | "CHARACTER VARYING" | "NVARCHAR", Some(len)) => Self::Varchar(len),
            ("VARCHAR" | "CHARACTER VARYING" | "NVARCHAR", None) => Self::Text,
            ("CHAR" | "CHARACTER" | "NCHAR", Some(len)) => Self::Char(len),
            ("CHAR" | "CHARACTER" | "NCHAR", None) => Self::Char(1),
            ("BOOLEAN" | "BOOL", _) => Self::Boolean,
            ("DATETIME", _) => Self::DateTime,
            ("TIMESTAMP" | "TIMESTAMP WITHOUT TIME ZONE", _) => Self::Timestamp,
            ("DATE", _) => Self::Date,
            ("TIME" | "TIME WITHOUT TIME ZONE", _) => Self::Time,
            ("REAL" | "FLOAT" | "FLOAT4", _) => Self::Real,
            ("DOUBLE" | "DOUBLE PRECISION" | "FLOAT8", _) => Self::Double,
            ("DECIMAL" | "NUMERIC", precision) => {
                Self::Decimal(precision.and_then(|p| u8::try_from(p).ok()), second)
            }
            ("BLOB" | "BYTEA", _) => Self::Blob,
            ("BINARY", Some(len)) => Self::Binary(len),
            ("VARBINARY", Some(len)) => Self::VarBinary(len),
            ("JSON" | "JSONB", _) => Self::Json,
            ("UUID", _) => Self::Uuid,
            _ => Self::Other(trimmed.to_string()),
        }
    }

    /// Returns the family this type belongs to.
    #[must_use]
    pub fn affinity(&self) -> TypeAffinity {
        match self {
            Self::Integer | Self::BigInt | Self::SmallInt => TypeAffinity::Integer,
            Self::Text | Self::Varchar(_) | Self::Char(_) => TypeAffinity::String,
            Self::Boolean => TypeAffinity::Boolean,
            Self::DateTime | Self::Timestamp => TypeAffinity::DateTime,
            Self::Date => TypeAffinity::Date,
            Self::Time => TypeAffinity::Time,
            Self::Real | Self::Double => TypeAffinity::Float,
            Self::Decimal(_, _) => TypeAffinity::Numeric,
            Self::Blob | Self::Binary(_) | Self::VarBinary(_) => TypeAffinity::Binary,
            Self::Json => TypeAffinity::Json,
            Self::Uuid => TypeAffinity::Uuid,
            Self::Null => TypeAffinity::Null,
            Self::Other(name) => TypeAffinity::Other(name.to_ascii_uppercase()),
        }
    }

    /// Whether this is the untyped placeholder.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Declared length of a string type, `None` when unbounded.
    #[must_use]
    pub fn length(&self) -> Option<usize> {
        match self {
            Self::Varchar(len) | Self::Char(len) | Self::Binary(len) | Self::VarBinary(len) => {
                Some(*len)
            }
            _ => None,
        }
    }

    /// Affinity-based comparison.
    ///
    /// Different families always differ. Within a family, strings compare
    /// their length and numerics their precision and scale; every other
    /// family compares equal.
    #[must_use]
    pub fn differs_from(&self, other: &Self) -> bool {
        if self.affinity() != other.affinity() {
            return true;
        }
        match (self, other) {
            (Self::Decimal(p1, s1), Self::Decimal(p2, s2)) => p1 != p2 || s1 != s2,
            _ if self.affinity() == TypeAffinity::String => self.length() != other.length(),
            _ => false,
        }
    }

    /// Returns the SQL type name for PostgreSQL.
    #[must_use]
    pub fn postgres_name(&self) -> String {
        match self {
            Self::Integer => "INTEGER".to_string(),
            Self::BigInt => "BIGINT".to_string(),
            Self::SmallInt => "SMALLINT".to_string(),
            Self::Text => "TEXT".to_string(),
            Self::Varchar(len) => format!("VARCHAR({len})"),
            Self::Char(len) => format!("CHAR({len})"),
            Self::Boolean => "BOOLEAN".to_string(),
            Self::DateTime | Self::Timestamp => "TIMESTAMP".to_string(),
            Self::Date => "DATE".to_string(),
            Self::Time => "TIME".to_string(),
            Self::Real => "REAL".to_string(),
            Self::Double => "DOUBLE PRECISION".to_string(),
            Self::Decimal(_, _) => self.to_string().replace("DECIMAL", "NUMERIC"),
            Self::Blob | Self::Binary(_) | Self::VarBinary(_) => "BYTEA".to_string(),
            Self::Json => "JSONB".to_string(),
            Self::Uuid => "UUID".to_string(),
            Self::Null => String::new(),
            Self::Other(name) => name.clone(),
        }
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer => f.write_str("INTEGER"),
            Self::BigInt => f.write_str("BIGINT"),
            Self::SmallInt => f.write_str("SMALLINT"),
            Self::Text => f.write_str("TEXT"),
            Self::Varchar(len) => write!(f, "VARCHAR({len})"),
            Self::Char(len) => write!(f, "CHAR({len})"),
            Self::Boolean => f.write_str("BOOLEAN"),
            Self::DateTime => f.write_str("DATETIME"),
            Self::Date => f.write_str("DATE"),
            Self::Time => f.write_str("TIME"),
            Self::Timestamp => f.write_str("TIMESTAMP"),
            Self::Real => f.write_str("REAL"),
            Self::Double => f.write_str("DOUBLE"),
            Self::Decimal(Some(p), Some(s)) => write!(f, "DECIMAL({p}, {s})"),
            Self::Decimal(Some(p), None) => write!(f, "DECIMAL({p})"),
            Self::Decimal(_, _) => f.write_str("DECIMAL"),
            Self::Blob => f.write_str("BLOB"),
            Self::Binary(len) => write!(f, "BINARY({len})"),
            Self::VarBinary(len) => write!(f, "VARBINARY({len})"),
            Self::Json => f.write_str("JSON"),
            Self::Uuid => f.write_str("UUID"),
            Self::Null => Ok(()),
            Self::Other(name) => f.write_str(name),
        }
    }
}

/// Default value for a column, as written in a declared model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DefaultValue {
    /// NULL default.
    Null,
    /// Boolean default.
    Bool(bool),
    /// Integer default.
    Integer(i64),
    /// Float default.
    Float(f64),
    /// String default.
    String(String),
    /// SQL expression (e.g., "CURRENT_TIMESTAMP").
    Expression(String),
}

impl DefaultValue {
    /// Returns the SQL representation of this default value.
    #[must_use]
    pub fn to_sql(&self) -> String {
        match self {
            Self::Null => "NULL".to_string(),
            Self::Bool(b) => if *b { "1" } else { "0" }.to_string(),
            Self::Integer(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::String(s) => format!("'{}'", s.replace('\'', "''")),
            Self::Expression(expr) => expr.clone(),
        }
    }
}

/// Normalizes server-default text for comparison: trims whitespace and
/// strips redundant outer parentheses.
#[must_use]
pub fn normalize_default(text: &str) -> String {
    let mut current = text.trim();
    while current.starts_with('(') && current.ends_with(')') && wraps_whole(current) {
        current = current[1..current.len() - 1].trim();
    }
    current.to_string()
}

// True when the opening parenthesis at index 0 closes at the last byte.
fn wraps_whole(text: &str) -> bool {
    let mut depth = 0usize;
    for (idx, ch) in text.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return idx == text.len() - 1;
                }
            }
            _ => {}
        }
    }
    false
}

/// Identifies a table: `None` schema means the connection's default schema.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableKey {
    /// Schema name, `None` for the default schema.
    pub schema: Option<String>,
    /// Table name.
    pub name: String,
}

impl TableKey {
    /// Creates a key for `name` inside `schema`.
    #[must_use]
    pub fn new(schema: Option<&str>, name: &str) -> Self {
        Self {
            schema: schema.map(str::to_string),
            name: name.to_string(),
        }
    }

    /// Drops the schema when it is the default one.
    #[must_use]
    pub fn normalized(&self, default_schema: Option<&str>) -> Self {
        match (&self.schema, default_schema) {
            (Some(schema), Some(default)) if schema == default => Self::new(None, &self.name),
            _ => self.clone(),
        }
    }
}

impl From<&str> for TableKey {
    fn from(name: &str) -> Self {
        Self::new(None, name)
    }
}

impl fmt::Display for TableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{schema}.{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// A column as declared or reflected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnShape {
    /// Column name in the database.
    pub name: String,
    /// Logical alias used by the declaring model, if different.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// SQL data type.
    pub sql_type: SqlType,
    /// Whether the column allows NULL values.
    #[serde(default = "default_true")]
    pub nullable: bool,
    /// Server-side default expression, as SQL text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_default: Option<String>,
    /// Whether this column is part of the primary key.
    #[serde(default)]
    pub primary_key: bool,
    /// Whether this column auto-increments.
    #[serde(default)]
    pub auto_increment: bool,
}

fn default_true() -> bool {
    true
}

impl ColumnShape {
    /// Creates a new nullable column.
    #[must_use]
    pub fn new(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            name: name.into(),
            key: None,
            sql_type,
            nullable: true,
            server_default: None,
            primary_key: false,
            auto_increment: false,
        }
    }

    /// Sets the column as NOT NULL.
    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Sets the column as nullable.
    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Sets the server default.
    #[must_use]
    pub fn server_default(mut self, value: DefaultValue) -> Self {
        self.server_default = Some(value.to_sql());
        self
    }

    /// Sets the server default from raw SQL text.
    #[must_use]
    pub fn server_default_sql(mut self, sql: impl Into<String>) -> Self {
        self.server_default = Some(sql.into());
        self
    }

    /// Sets the column as the primary key.
    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    /// Sets the column to auto-increment.
    #[must_use]
    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    /// Sets the logical alias of the column.
    #[must_use]
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Normalized server default, if any.
    #[must_use]
    pub fn rendered_default(&self) -> Option<String> {
        self.server_default.as_deref().map(normalize_default)
    }
}

/// An index as declared or reflected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexShape {
    /// Index name; reflected indexes always have one.
    #[serde(default)]
    pub name: Option<String>,
    /// Columns included in the index, in index order.
    pub columns: Vec<String>,
    /// Whether this is a unique index.
    #[serde(default)]
    pub unique: bool,
}

impl IndexShape {
    /// Creates a named, non-unique index.
    #[must_use]
    pub fn new(name: impl Into<String>, columns: &[&str]) -> Self {
        Self {
            name: Some(name.into()),
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
            unique: false,
        }
    }

    /// Creates an index without a name.
    #[must_use]
    pub fn unnamed(columns: &[&str]) -> Self {
        Self {
            name: None,
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
            unique: false,
        }
    }

    /// Marks the index as unique.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// A unique constraint as declared or reflected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UniqueShape {
    /// Constraint name; may be absent on the declared side.
    #[serde(default)]
    pub name: Option<String>,
    /// Constrained columns.
    pub columns: Vec<String>,
}

impl UniqueShape {
    /// Creates a named unique constraint.
    #[must_use]
    pub fn new(name: impl Into<String>, columns: &[&str]) -> Self {
        Self {
            name: Some(name.into()),
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
        }
    }

    /// Creates a unique constraint without a name.
    #[must_use]
    pub fn unnamed(columns: &[&str]) -> Self {
        Self {
            name: None,
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
        }
    }
}

/// Complete shape of a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableShape {
    /// Schema name, `None` for the default schema.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    /// Table name.
    pub name: String,
    /// Columns in declaration order.
    pub columns: Vec<ColumnShape>,
    /// Primary key column(s).
    #[serde(default)]
    pub primary_key: Vec<String>,
    /// Index definitions.
    #[serde(default)]
    pub indexes: Vec<IndexShape>,
    /// Unique constraint definitions.
    #[serde(default)]
    pub unique_constraints: Vec<UniqueShape>,
}

impl TableShape {
    /// Creates a new table in the default schema.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            schema: None,
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            indexes: Vec::new(),
            unique_constraints: Vec::new(),
        }
    }

    /// Places the table in a schema.
    #[must_use]
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Adds a column to the table.
    #[must_use]
    pub fn column(mut self, column: ColumnShape) -> Self {
        if column.primary_key && !self.primary_key.contains(&column.name) {
            self.primary_key.push(column.name.clone());
        }
        self.columns.push(column);
        self
    }

    /// Sets the primary key columns.
    #[must_use]
    pub fn primary_key(mut self, columns: Vec<String>) -> Self {
        self.primary_key = columns;
        self
    }

    /// Adds an index.
    #[must_use]
    pub fn index(mut self, index: IndexShape) -> Self {
        self.indexes.push(index);
        self
    }

    /// Adds a unique constraint.
    #[must_use]
    pub fn unique_constraint(mut self, constraint: UniqueShape) -> Self {
        self.unique_constraints.push(constraint);
        self
    }

    /// Returns the key identifying this table.
    #[must_use]
    pub fn key(&self) -> TableKey {
        TableKey::new(self.schema.as_deref(), &self.name)
    }

    /// Gets a column by name.
    #[must_use]
    pub fn get_column(&self, name: &str) -> Option<&ColumnShape> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// A set of tables keyed by `(schema, name)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "SnapshotFile", into = "SnapshotFile")]
pub struct SchemaSnapshot {
    /// All tables, in key order.
    pub tables: BTreeMap<TableKey, TableShape>,
    /// The connection's default schema name, when known.
    pub default_schema: Option<String>,
    /// `false` when the driver couldn't report unique constraints; the
    /// comparison then treats that whole class of object as unknown.
    pub unique_constraints_reflected: bool,
}

impl Default for SchemaSnapshot {
    fn default() -> Self {
        Self {
            tables: BTreeMap::new(),
            default_schema: None,
            unique_constraints_reflected: true,
        }
    }
}

impl SchemaSnapshot {
    /// Creates an empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a table to the snapshot.
    #[must_use]
    pub fn table(mut self, table: TableShape) -> Self {
        self.insert(table);
        self
    }

    /// Inserts a table, replacing any table with the same key.
    pub fn insert(&mut self, table: TableShape) {
        self.tables.insert(table.key(), table);
    }

    /// Gets a table by key.
    #[must_use]
    pub fn get_table(&self, key: &TableKey) -> Option<&TableShape> {
        self.tables.get(key)
    }

    /// Number of tables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Whether the snapshot has no tables.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Loads a declared schema from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| MigrateError::ParseError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }
}

/// On-disk form of a snapshot: a plain list of tables.
#[derive(Serialize, Deserialize)]
struct SnapshotFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    default_schema: Option<String>,
    #[serde(default = "default_true")]
    unique_constraints_reflected: bool,
    tables: Vec<TableShape>,
}

impl From<SnapshotFile> for SchemaSnapshot {
    fn from(file: SnapshotFile) -> Self {
        let mut snapshot = Self {
            default_schema: file.default_schema,
            unique_constraints_reflected: file.unique_constraints_reflected,
            ..Self::default()
        };
        for table in file.tables {
            snapshot.insert(table);
        }
        snapshot
    }
}

impl From<SchemaSnapshot> for SnapshotFile {
    fn from(snapshot: SchemaSnapshot) -> Self {
        Self {
            default_schema: snapshot.default_schema,
            unique_constraints_reflected: snapshot.unique_constraints_reflected,
            tables: snapshot.tables.into_values().collect(),
        }
    }
}
