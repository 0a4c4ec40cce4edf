//! Database dialect implementations.
//!
//! Each dialect knows how to generate SQL for migration operations specific
//! to that database system, and how to compensate for what its driver
//! reports during reflection. Dialects are looked up by name in a
//! [`DialectRegistry`] that the caller builds and passes around.

mod postgres;
mod sqlite;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

pub use postgres::PostgresDialect;
pub use sqlite::SqliteDialect;

use crate::error::{MigrateError, Result};
use crate::operations::{index_name, unique_name, MigrationOperation};
use crate::schema::{ColumnShape, IndexShape, SqlType, TableKey, TableShape, UniqueShape};

/// Trait for database-specific SQL generation and autogenerate hooks.
pub trait MigrationDialect: Send + Sync {
    /// Returns the dialect name.
    fn name(&self) -> &'static str;

    /// Generates SQL for a migration operation.
    fn generate_sql(&self, operation: &MigrationOperation) -> Vec<String>;

    /// Returns the SQL type name for the given type.
    fn type_name(&self, sql_type: &SqlType) -> String;

    /// Returns the auto-increment keyword for this dialect.
    fn auto_increment_keyword(&self) -> &'static str;

    /// Whether DDL statements take part in transactions.
    fn transactional_ddl(&self) -> bool {
        true
    }

    /// Quote an identifier (table name, column name, etc.).
    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Quotes a possibly schema-qualified name.
    fn qualified_name(&self, schema: Option<&str>, name: &str) -> String {
        match schema {
            Some(schema) => format!(
                "{}.{}",
                self.quote_identifier(schema),
                self.quote_identifier(name)
            ),
            None => self.quote_identifier(name),
        }
    }

    /// Quotes a table key.
    fn table_name(&self, table: &TableKey) -> String {
        self.qualified_name(table.schema.as_deref(), &table.name)
    }

    /// Type rendered in a column definition.
    fn column_type(&self, column: &ColumnShape) -> String {
        self.type_name(&column.sql_type)
    }

    /// Generates column definition SQL.
    fn column_definition(&self, column: &ColumnShape) -> String {
        let mut parts = vec![self.quote_identifier(&column.name)];
        let column_type = self.column_type(column);
        if !column_type.is_empty() {
            parts.push(column_type);
        }

        if column.primary_key {
            parts.push("PRIMARY KEY".to_string());
            let keyword = self.auto_increment_keyword();
            if column.auto_increment && !keyword.is_empty() {
                parts.push(keyword.to_string());
            }
        }

        if !column.nullable && !column.primary_key {
            parts.push("NOT NULL".to_string());
        }

        if let Some(default_sql) = &column.server_default {
            parts.push(format!("DEFAULT {default_sql}"));
        }

        parts.join(" ")
    }

    /// Generates SQL for creating a table with its inline unique constraints.
    fn create_table_sql(&self, table: &TableShape) -> String {
        let inline_pk = table.primary_key.len() == 1;
        let mut defs: Vec<String> = table
            .columns
            .iter()
            .map(|column| {
                if column.primary_key && !inline_pk {
                    let mut plain = column.clone();
                    plain.primary_key = false;
                    self.column_definition(&plain)
                } else {
                    self.column_definition(column)
                }
            })
            .collect();

        let declared_inline = table
            .columns
            .iter()
            .any(|c| c.primary_key && table.primary_key.contains(&c.name));
        if table.primary_key.len() > 1 || (inline_pk && !declared_inline) {
            defs.push(format!("PRIMARY KEY ({})", self.column_list(&table.primary_key)));
        }

        for constraint in &table.unique_constraints {
            let columns = self.column_list(&constraint.columns);
            match &constraint.name {
                Some(name) => defs.push(format!(
                    "CONSTRAINT {} UNIQUE ({columns})",
                    self.quote_identifier(name)
                )),
                None => defs.push(format!("UNIQUE ({columns})")),
            }
        }

        format!(
            "CREATE TABLE {} (\n  {}\n)",
            self.table_name(&table.key()),
            defs.join(",\n  ")
        )
    }

    /// Comma-separated quoted column names.
    fn column_list(&self, columns: &[String]) -> String {
        columns
            .iter()
            .map(|c| self.quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Generates SQL for dropping a table.
    fn drop_table_sql(&self, table: &TableKey) -> String {
        format!("DROP TABLE {}", self.table_name(table))
    }

    /// Generates SQL for renaming a table.
    fn rename_table_sql(&self, table: &TableKey, new_name: &str) -> String {
        format!(
            "ALTER TABLE {} RENAME TO {}",
            self.table_name(table),
            self.quote_identifier(new_name)
        )
    }

    /// Generates SQL for adding a column.
    fn add_column_sql(&self, table: &TableKey, column: &ColumnShape) -> String {
        format!(
            "ALTER TABLE {} ADD COLUMN {}",
            self.table_name(table),
            self.column_definition(column)
        )
    }

    /// Generates SQL for dropping a column.
    fn drop_column_sql(&self, table: &TableKey, column_name: &str) -> String {
        format!(
            "ALTER TABLE {} DROP COLUMN {}",
            self.table_name(table),
            self.quote_identifier(column_name)
        )
    }

    /// Generates SQL for renaming a column.
    fn rename_column_sql(&self, table: &TableKey, old_name: &str, new_name: &str) -> String {
        format!(
            "ALTER TABLE {} RENAME COLUMN {} TO {}",
            self.table_name(table),
            self.quote_identifier(old_name),
            self.quote_identifier(new_name)
        )
    }

    /// Generates SQL for creating an index.
    fn create_index_sql(&self, table: &TableKey, index: &IndexShape) -> String {
        format!(
            "CREATE {}INDEX {} ON {} ({})",
            if index.unique { "UNIQUE " } else { "" },
            self.quote_identifier(&index_name(&table.name, index)),
            self.table_name(table),
            self.column_list(&index.columns)
        )
    }

    /// Generates SQL for dropping an index.
    fn drop_index_sql(&self, table: &TableKey, name: &str) -> String {
        format!(
            "DROP INDEX {}",
            self.qualified_name(table.schema.as_deref(), name)
        )
    }

    /// Generates SQL for adding a unique constraint.
    fn add_unique_sql(&self, table: &TableKey, constraint: &UniqueShape) -> String {
        format!(
            "ALTER TABLE {} ADD CONSTRAINT {} UNIQUE ({})",
            self.table_name(table),
            self.quote_identifier(&unique_name(&table.name, constraint)),
            self.column_list(&constraint.columns)
        )
    }

    /// Adjusts reflected and declared indexes / unique constraints before
    /// they are compared, for objects the database adds implicitly or can't
    /// report accurately. Runs before any user filter.
    fn correct_for_autogen(
        &self,
        _current_uniques: &mut Vec<UniqueShape>,
        _current_indexes: &mut Vec<IndexShape>,
        _target_uniques: &mut Vec<UniqueShape>,
        _target_indexes: &mut Vec<IndexShape>,
    ) {
    }

    /// Whether a column's type changed. Both types are known (not
    /// [`SqlType::Null`]) when this is called.
    fn compare_type(&self, current: &ColumnShape, target: &ColumnShape) -> bool {
        current.sql_type.differs_from(&target.sql_type)
    }

    /// Whether a column's server default changed, given both defaults
    /// rendered as normalized text.
    fn compare_server_default(
        &self,
        _current: &ColumnShape,
        _target: &ColumnShape,
        rendered_current: Option<&str>,
        rendered_target: Option<&str>,
    ) -> bool {
        rendered_current != rendered_target
    }
}

/// Dialects available to a run, keyed by name.
#[derive(Default, Clone)]
pub struct DialectRegistry {
    dialects: BTreeMap<&'static str, Arc<dyn MigrationDialect>>,
}

impl DialectRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in dialects.
    #[must_use]
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(SqliteDialect::new()));
        registry.register(Arc::new(PostgresDialect::new()));
        registry
    }

    /// Registers a dialect under its own name, replacing any previous one.
    pub fn register(&mut self, dialect: Arc<dyn MigrationDialect>) {
        self.dialects.insert(dialect.name(), dialect);
    }

    /// Looks a dialect up by name.
    pub fn get(&self, name: &str) -> Result<Arc<dyn MigrationDialect>> {
        let key = match name {
            "postgres" | "pg" => "postgresql",
            other => other,
        };
        self.dialects
            .get(key)
            .cloned()
            .ok_or_else(|| MigrateError::UnknownDialect(name.to_string()))
    }

    /// Registered dialect names.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.dialects.keys().copied()
    }
}

impl fmt::Debug for DialectRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup() {
        let registry = DialectRegistry::with_builtin();
        assert_eq!(registry.get("sqlite").unwrap().name(), "sqlite");
        assert_eq!(registry.get("postgres").unwrap().name(), "postgresql");
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["postgresql", "sqlite"]);
        assert!(matches!(
            registry.get("oracle"),
            Err(MigrateError::UnknownDialect(_))
        ));
    }

    #[test]
    fn test_composite_primary_key() {
        let table = TableShape::new("membership")
            .column(ColumnShape::new("user_id", SqlType::Integer).primary_key())
            .column(ColumnShape::new("group_id", SqlType::Integer).primary_key());

        let sql = SqliteDialect::new().create_table_sql(&table);
        assert_eq!(
            sql,
            "CREATE TABLE \"membership\" (\n  \"user_id\" INTEGER NOT NULL,\n  \"group_id\" INTEGER NOT NULL,\n  PRIMARY KEY (\"user_id\", \"group_id\")\n)"
        );
    }

    #[test]
    fn test_quote_identifier_escapes() {
        assert_eq!(SqliteDialect::new().quote_identifier("a\"b"), "\"a\"\"b\"");
    }
}
