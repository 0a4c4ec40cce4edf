//! Differences found between the current and the target schema.

use std::fmt;

use crate::schema::{ColumnShape, IndexShape, SqlType, TableKey, TableShape, UniqueShape};

/// A `from -> to` pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Change<T> {
    /// Value in the current schema.
    pub from: T,
    /// Value in the target schema.
    pub to: T,
}

impl<T> Change<T> {
    /// Creates a change.
    pub fn new(from: T, to: T) -> Self {
        Self { from, to }
    }
}

/// Everything that differs about one column, plus what it looked like.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnModification {
    /// Table holding the column.
    pub table: TableKey,
    /// Column name.
    pub column: String,
    /// Type in the current schema.
    pub existing_type: SqlType,
    /// Nullability in the current schema.
    pub existing_nullable: bool,
    /// Server default in the current schema.
    pub existing_server_default: Option<String>,
    /// Type change, if any.
    pub type_change: Option<Change<SqlType>>,
    /// Nullability change, if any.
    pub nullable_change: Option<Change<bool>>,
    /// Server default change, if any.
    pub default_change: Option<Change<Option<String>>>,
}

impl ColumnModification {
    /// Starts a modification with no changes recorded.
    #[must_use]
    pub fn new(table: TableKey, current: &ColumnShape) -> Self {
        Self {
            table,
            column: current.name.clone(),
            existing_type: current.sql_type.clone(),
            existing_nullable: current.nullable,
            existing_server_default: current.server_default.clone(),
            type_change: None,
            nullable_change: None,
            default_change: None,
        }
    }

    /// Whether nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.type_change.is_none() && self.nullable_change.is_none() && self.default_change.is_none()
    }
}

/// One schema difference.
#[derive(Debug, Clone, PartialEq)]
pub enum Diff {
    /// A table only the target has.
    AddTable {
        table: TableShape,
    },
    /// A table only the database has.
    RemoveTable {
        table: TableShape,
    },
    /// A column missing from the database.
    AddColumn {
        table: TableKey,
        column: ColumnShape,
    },
    /// A column the target no longer declares.
    RemoveColumn {
        table: TableKey,
        column: ColumnShape,
    },
    /// Type, nullability or default changes on one column.
    ModifyColumn(ColumnModification),
    /// An index missing from the database.
    AddIndex {
        table: TableKey,
        index: IndexShape,
    },
    /// An index the target no longer declares.
    RemoveIndex {
        table: TableKey,
        index: IndexShape,
    },
    /// A unique constraint missing from the database.
    AddConstraint {
        table: TableKey,
        constraint: UniqueShape,
    },
    /// A unique constraint the target no longer declares.
    RemoveConstraint {
        table: TableKey,
        constraint: UniqueShape,
    },
}

impl Diff {
    /// Table the difference applies to.
    #[must_use]
    pub fn table(&self) -> TableKey {
        match self {
            Self::AddTable { table } | Self::RemoveTable { table } => table.key(),
            Self::AddColumn { table, .. }
            | Self::RemoveColumn { table, .. }
            | Self::AddIndex { table, .. }
            | Self::RemoveIndex { table, .. }
            | Self::AddConstraint { table, .. }
            | Self::RemoveConstraint { table, .. } => table.clone(),
            Self::ModifyColumn(modification) => modification.table.clone(),
        }
    }

    /// Short name of the difference kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AddTable { .. } => "add_table",
            Self::RemoveTable { .. } => "remove_table",
            Self::AddColumn { .. } => "add_column",
            Self::RemoveColumn { .. } => "remove_column",
            Self::ModifyColumn(_) => "modify_column",
            Self::AddIndex { .. } => "add_index",
            Self::RemoveIndex { .. } => "remove_index",
            Self::AddConstraint { .. } => "add_constraint",
            Self::RemoveConstraint { .. } => "remove_constraint",
        }
    }
}

fn columns(columns: &[String]) -> String {
    columns.join(", ")
}

fn or_none(value: Option<&str>) -> &str {
    value.unwrap_or("<none>")
}

impl fmt::Display for Diff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddTable { table } => write!(f, "Detected added table '{}'", table.key()),
            Self::RemoveTable { table } => write!(f, "Detected removed table '{}'", table.key()),
            Self::AddColumn { table, column } => {
                write!(f, "Detected added column '{table}.{}'", column.name)
            }
            Self::RemoveColumn { table, column } => {
                write!(f, "Detected removed column '{table}.{}'", column.name)
            }
            Self::ModifyColumn(m) => {
                let mut parts = Vec::new();
                if let Some(change) = &m.type_change {
                    parts.push(format!("type {} -> {}", change.from, change.to));
                }
                if let Some(change) = &m.nullable_change {
                    parts.push(format!(
                        "{} -> {}",
                        if change.from { "NULL" } else { "NOT NULL" },
                        if change.to { "NULL" } else { "NOT NULL" }
                    ));
                }
                if let Some(change) = &m.default_change {
                    parts.push(format!(
                        "default {} -> {}",
                        or_none(change.from.as_deref()),
                        or_none(change.to.as_deref())
                    ));
                }
                write!(
                    f,
                    "Detected modified column '{}.{}': {}",
                    m.table,
                    m.column,
                    parts.join("; ")
                )
            }
            Self::AddIndex { table, index } => write!(
                f,
                "Detected added {}index {} on '{table}' ({})",
                if index.unique { "unique " } else { "" },
                or_none(index.name.as_deref()),
                columns(&index.columns)
            ),
            Self::RemoveIndex { table, index } => write!(
                f,
                "Detected removed index {} on '{table}'",
                or_none(index.name.as_deref())
            ),
            Self::AddConstraint { table, constraint } => write!(
                f,
                "Detected added unique constraint {} on '{table}' ({})",
                or_none(constraint.name.as_deref()),
                columns(&constraint.columns)
            ),
            Self::RemoveConstraint { table, constraint } => write!(
                f,
                "Detected removed unique constraint {} on '{table}'",
                or_none(constraint.name.as_deref())
            ),
        }
    }
}
