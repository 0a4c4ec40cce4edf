//! Migration operations.
//!
//! Revision steps describe their schema changes through [`Operations`], which
//! records [`MigrationOperation`] values. The runner renders each recorded
//! operation with the active dialect; revision files store them as JSON.

use serde::{Deserialize, Serialize};

use crate::schema::{ColumnShape, IndexShape, SqlType, TableKey, TableShape, UniqueShape};

/// New server default for an altered column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DefaultChange {
    /// Set the default to this SQL text.
    Set(String),
    /// Remove the default.
    Drop,
}

impl DefaultChange {
    /// Builds the change that moves a column to `value`.
    #[must_use]
    pub fn to_value(value: Option<String>) -> Self {
        value.map_or(Self::Drop, Self::Set)
    }
}

/// Changes to apply to an existing column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ColumnChanges {
    /// New data type (if changing).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql_type: Option<SqlType>,
    /// New nullability (if changing).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nullable: Option<bool>,
    /// New server default (if changing).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_default: Option<DefaultChange>,
}

impl ColumnChanges {
    /// Creates empty column changes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a new type.
    #[must_use]
    pub fn set_type(mut self, sql_type: SqlType) -> Self {
        self.sql_type = Some(sql_type);
        self
    }

    /// Sets nullability.
    #[must_use]
    pub fn set_nullable(mut self, nullable: bool) -> Self {
        self.nullable = Some(nullable);
        self
    }

    /// Sets or drops the server default.
    #[must_use]
    pub fn set_server_default(mut self, default: Option<String>) -> Self {
        self.server_default = Some(DefaultChange::to_value(default));
        self
    }

    /// Returns true if no changes are specified.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sql_type.is_none() && self.nullable.is_none() && self.server_default.is_none()
    }
}

/// What an altered column looked like before the change. Dialects that must
/// restate the full column definition read it from here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ExistingColumn {
    /// Current data type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql_type: Option<SqlType>,
    /// Current nullability.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nullable: Option<bool>,
    /// Current server default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_default: Option<String>,
}

/// A single migration operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MigrationOperation {
    /// Create a new table, including its inline unique constraints.
    CreateTable {
        /// Table definition.
        table: TableShape,
    },

    /// Drop a table.
    DropTable {
        /// Table to drop.
        table: TableKey,
    },

    /// Rename a table.
    RenameTable {
        /// Table to rename.
        table: TableKey,
        /// New table name.
        new_name: String,
    },

    /// Add a column to a table.
    AddColumn {
        /// Table name.
        table: TableKey,
        /// Column definition.
        column: ColumnShape,
    },

    /// Drop a column from a table.
    DropColumn {
        /// Table name.
        table: TableKey,
        /// Column name.
        column_name: String,
    },

    /// Rename a column.
    RenameColumn {
        /// Table name.
        table: TableKey,
        /// Old column name.
        old_name: String,
        /// New column name.
        new_name: String,
    },

    /// Alter a column's type, nullability or default.
    AlterColumn {
        /// Table name.
        table: TableKey,
        /// Column name.
        column_name: String,
        /// Changes to apply.
        changes: ColumnChanges,
        /// The column as it is before the change.
        #[serde(default)]
        existing: ExistingColumn,
    },

    /// Create an index.
    CreateIndex {
        /// Table name.
        table: TableKey,
        /// Index definition.
        index: IndexShape,
    },

    /// Drop an index.
    DropIndex {
        /// Table the index belongs to.
        table: TableKey,
        /// Index name.
        name: String,
    },

    /// Add a unique constraint.
    AddUniqueConstraint {
        /// Table name.
        table: TableKey,
        /// Constraint definition.
        constraint: UniqueShape,
    },

    /// Drop a unique constraint.
    DropUniqueConstraint {
        /// Table name.
        table: TableKey,
        /// Constraint name.
        name: String,
    },

    /// Run raw SQL.
    RunSql {
        /// Statement to execute.
        sql: String,
    },
}

impl MigrationOperation {
    /// Creates a CREATE TABLE operation.
    #[must_use]
    pub fn create_table(table: TableShape) -> Self {
        Self::CreateTable { table }
    }

    /// Creates a DROP TABLE operation.
    #[must_use]
    pub fn drop_table(table: impl Into<TableKey>) -> Self {
        Self::DropTable {
            table: table.into(),
        }
    }

    /// Creates a RENAME TABLE operation.
    #[must_use]
    pub fn rename_table(table: impl Into<TableKey>, new_name: impl Into<String>) -> Self {
        Self::RenameTable {
            table: table.into(),
            new_name: new_name.into(),
        }
    }

    /// Creates an ADD COLUMN operation.
    #[must_use]
    pub fn add_column(table: impl Into<TableKey>, column: ColumnShape) -> Self {
        Self::AddColumn {
            table: table.into(),
            column,
        }
    }

    /// Creates a DROP COLUMN operation.
    #[must_use]
    pub fn drop_column(table: impl Into<TableKey>, column_name: impl Into<String>) -> Self {
        Self::DropColumn {
            table: table.into(),
            column_name: column_name.into(),
        }
    }

    /// Creates a RENAME COLUMN operation.
    #[must_use]
    pub fn rename_column(
        table: impl Into<TableKey>,
        old_name: impl Into<String>,
        new_name: impl Into<String>,
    ) -> Self {
        Self::RenameColumn {
            table: table.into(),
            old_name: old_name.into(),
            new_name: new_name.into(),
        }
    }

    /// Creates an ALTER COLUMN operation.
    #[must_use]
    pub fn alter_column(
        table: impl Into<TableKey>,
        column_name: impl Into<String>,
        changes: ColumnChanges,
        existing: ExistingColumn,
    ) -> Self {
        Self::AlterColumn {
            table: table.into(),
            column_name: column_name.into(),
            changes,
            existing,
        }
    }

    /// Creates a CREATE INDEX operation.
    #[must_use]
    pub fn create_index(table: impl Into<TableKey>, index: IndexShape) -> Self {
        Self::CreateIndex {
            table: table.into(),
            index,
        }
    }

    /// Creates a DROP INDEX operation.
    #[must_use]
    pub fn drop_index(table: impl Into<TableKey>, name: impl Into<String>) -> Self {
        Self::DropIndex {
            table: table.into(),
            name: name.into(),
        }
    }

    /// Creates an ADD CONSTRAINT ... UNIQUE operation.
    #[must_use]
    pub fn add_unique_constraint(table: impl Into<TableKey>, constraint: UniqueShape) -> Self {
        Self::AddUniqueConstraint {
            table: table.into(),
            constraint,
        }
    }

    /// Creates a DROP CONSTRAINT operation for a unique constraint.
    #[must_use]
    pub fn drop_unique_constraint(table: impl Into<TableKey>, name: impl Into<String>) -> Self {
        Self::DropUniqueConstraint {
            table: table.into(),
            name: name.into(),
        }
    }

    /// Creates a raw SQL operation.
    #[must_use]
    pub fn run_sql(sql: impl Into<String>) -> Self {
        Self::RunSql { sql: sql.into() }
    }

    /// Returns a human-readable description of this operation.
    #[must_use]
    pub fn description(&self) -> String {
        match self {
            Self::CreateTable { table } => format!("Create table '{}'", table.key()),
            Self::DropTable { table } => format!("Drop table '{table}'"),
            Self::RenameTable { table, new_name } => {
                format!("Rename table '{table}' to '{new_name}'")
            }
            Self::AddColumn { table, column } => {
                format!("Add column '{}' to table '{table}'", column.name)
            }
            Self::DropColumn { table, column_name } => {
                format!("Drop column '{column_name}' from table '{table}'")
            }
            Self::RenameColumn {
                table,
                old_name,
                new_name,
            } => format!("Rename column '{old_name}' to '{new_name}' in table '{table}'"),
            Self::AlterColumn {
                table, column_name, ..
            } => format!("Alter column '{column_name}' in table '{table}'"),
            Self::CreateIndex { table, index } => format!(
                "Create index '{}' on table '{table}'",
                index_name(&table.name, index)
            ),
            Self::DropIndex { table, name } => format!("Drop index '{name}' on table '{table}'"),
            Self::AddUniqueConstraint { table, constraint } => format!(
                "Add unique constraint '{}' to table '{table}'",
                unique_name(&table.name, constraint)
            ),
            Self::DropUniqueConstraint { table, name } => {
                format!("Drop unique constraint '{name}' from table '{table}'")
            }
            Self::RunSql { .. } => "Run custom SQL".to_string(),
        }
    }
}

/// Name of an index, falling back to `ix_<table>_<columns>`.
#[must_use]
pub fn index_name(table: &str, index: &IndexShape) -> String {
    index
        .name
        .clone()
        .unwrap_or_else(|| format!("ix_{table}_{}", index.columns.join("_")))
}

/// Name of a unique constraint, falling back to `uq_<table>_<columns>`.
#[must_use]
pub fn unique_name(table: &str, constraint: &UniqueShape) -> String {
    constraint
        .name
        .clone()
        .unwrap_or_else(|| format!("uq_{table}_{}", constraint.columns.join("_")))
}

/// Records the operations a revision step performs.
///
/// Step callables receive a `&mut Operations` and call its methods in
/// order; the runner then renders what was recorded.
#[derive(Debug, Clone, Default)]
pub struct Operations {
    recorded: Vec<MigrationOperation>,
}

impl Operations {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an arbitrary operation.
    pub fn push(&mut self, operation: MigrationOperation) -> &mut Self {
        self.recorded.push(operation);
        self
    }

    /// Records several operations in order.
    pub fn extend(&mut self, operations: impl IntoIterator<Item = MigrationOperation>) -> &mut Self {
        self.recorded.extend(operations);
        self
    }

    /// Records a CREATE TABLE.
    pub fn create_table(&mut self, table: TableShape) -> &mut Self {
        self.push(MigrationOperation::create_table(table))
    }

    /// Records a DROP TABLE.
    pub fn drop_table(&mut self, table: impl Into<TableKey>) -> &mut Self {
        self.push(MigrationOperation::drop_table(table))
    }

    /// Records a RENAME TABLE.
    pub fn rename_table(&mut self, table: impl Into<TableKey>, new_name: &str) -> &mut Self {
        self.push(MigrationOperation::rename_table(table, new_name))
    }

    /// Records an ADD COLUMN.
    pub fn add_column(&mut self, table: impl Into<TableKey>, column: ColumnShape) -> &mut Self {
        self.push(MigrationOperation::add_column(table, column))
    }

    /// Records a DROP COLUMN.
    pub fn drop_column(&mut self, table: impl Into<TableKey>, column_name: &str) -> &mut Self {
        self.push(MigrationOperation::drop_column(table, column_name))
    }

    /// Records an ALTER COLUMN.
    pub fn alter_column(
        &mut self,
        table: impl Into<TableKey>,
        column_name: &str,
        changes: ColumnChanges,
        existing: ExistingColumn,
    ) -> &mut Self {
        self.push(MigrationOperation::alter_column(
            table,
            column_name,
            changes,
            existing,
        ))
    }

    /// Records a CREATE INDEX.
    pub fn create_index(&mut self, table: impl Into<TableKey>, index: IndexShape) -> &mut Self {
        self.push(MigrationOperation::create_index(table, index))
    }

    /// Records a DROP INDEX.
    pub fn drop_index(&mut self, table: impl Into<TableKey>, name: &str) -> &mut Self {
        self.push(MigrationOperation::drop_index(table, name))
    }

    /// Records an ADD CONSTRAINT ... UNIQUE.
    pub fn create_unique_constraint(
        &mut self,
        table: impl Into<TableKey>,
        constraint: UniqueShape,
    ) -> &mut Self {
        self.push(MigrationOperation::add_unique_constraint(table, constraint))
    }

    /// Records a DROP CONSTRAINT.
    pub fn drop_constraint(&mut self, table: impl Into<TableKey>, name: &str) -> &mut Self {
        self.push(MigrationOperation::drop_unique_constraint(table, name))
    }

    /// Records raw SQL.
    pub fn execute(&mut self, sql: &str) -> &mut Self {
        self.push(MigrationOperation::run_sql(sql))
    }

    /// Recorded operations, in order.
    #[must_use]
    pub fn operations(&self) -> &[MigrationOperation] {
        &self.recorded
    }

    /// Consumes the recorder.
    #[must_use]
    pub fn into_operations(self) -> Vec<MigrationOperation> {
        self.recorded
    }

    /// Whether nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.recorded.is_empty()
    }
}
