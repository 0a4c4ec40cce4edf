//! SQLite dialect for migrations.
//!
//! SQLite has limited ALTER TABLE support: column type, nullability and
//! default changes need the table recreation strategy, which is not
//! generated here. Unique constraints added after creation become unique
//! indexes.

use std::collections::BTreeSet;

use crate::matcher::signature;
use crate::operations::{unique_name, MigrationOperation};
use crate::schema::{ColumnShape, IndexShape, SqlType, TableKey, UniqueShape};

use super::MigrationDialect;

const AUTOINDEX_PREFIX: &str = "sqlite_autoindex_";

/// SQLite migration dialect.
#[derive(Debug, Clone, Default)]
pub struct SqliteDialect;

impl SqliteDialect {
    /// Creates a new SQLite dialect.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    // SQLite puts the schema on the index name, not on the table.
    fn create_index_in_schema(
        &self,
        table: &TableKey,
        name: &str,
        columns: &[String],
        unique: bool,
    ) -> String {
        format!(
            "CREATE {}INDEX {} ON {} ({})",
            if unique { "UNIQUE " } else { "" },
            self.qualified_name(table.schema.as_deref(), name),
            self.quote_identifier(&table.name),
            self.column_list(columns)
        )
    }
}

fn is_autoindex(name: Option<&str>) -> bool {
    name.is_some_and(|n| n.starts_with(AUTOINDEX_PREFIX))
}

impl MigrationDialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn generate_sql(&self, operation: &MigrationOperation) -> Vec<String> {
        match operation {
            MigrationOperation::CreateTable { table } => vec![self.create_table_sql(table)],

            MigrationOperation::DropTable { table } => vec![self.drop_table_sql(table)],

            MigrationOperation::RenameTable { table, new_name } => {
                vec![self.rename_table_sql(table, new_name)]
            }

            MigrationOperation::AddColumn { table, column } => {
                vec![self.add_column_sql(table, column)]
            }

            MigrationOperation::DropColumn { table, column_name } => {
                vec![self.drop_column_sql(table, column_name)]
            }

            MigrationOperation::RenameColumn {
                table,
                old_name,
                new_name,
            } => vec![self.rename_column_sql(table, old_name, new_name)],

            MigrationOperation::AlterColumn {
                table, column_name, ..
            } => {
                vec![format!(
                    "-- ALTER COLUMN not directly supported in SQLite. \
                     Table recreation required for: {table}.{column_name}"
                )]
            }

            MigrationOperation::CreateIndex { table, index } => {
                let name = crate::operations::index_name(&table.name, index);
                vec![self.create_index_in_schema(table, &name, &index.columns, index.unique)]
            }

            MigrationOperation::DropIndex { table, name }
            | MigrationOperation::DropUniqueConstraint { table, name } => {
                if is_autoindex(Some(name)) {
                    vec![format!(
                        "-- DROP of inline UNIQUE constraint not directly supported in SQLite. \
                         Table recreation required for: {table}.{name}"
                    )]
                } else {
                    vec![self.drop_index_sql(table, name)]
                }
            }

            MigrationOperation::AddUniqueConstraint { table, constraint } => {
                let name = unique_name(&table.name, constraint);
                vec![self.create_index_in_schema(table, &name, &constraint.columns, true)]
            }

            MigrationOperation::RunSql { sql } => vec![sql.clone()],
        }
    }

    /// SQLite keeps the declared type name verbatim.
    fn type_name(&self, sql_type: &SqlType) -> String {
        sql_type.to_string()
    }

    // AUTOINCREMENT is only accepted on a column declared exactly INTEGER.
    fn column_type(&self, column: &ColumnShape) -> String {
        if column.primary_key && column.auto_increment {
            "INTEGER".to_string()
        } else {
            self.type_name(&column.sql_type)
        }
    }

    fn auto_increment_keyword(&self) -> &'static str {
        "AUTOINCREMENT"
    }

    fn correct_for_autogen(
        &self,
        current_uniques: &mut Vec<UniqueShape>,
        current_indexes: &mut Vec<IndexShape>,
        target_uniques: &mut Vec<UniqueShape>,
        _target_indexes: &mut Vec<IndexShape>,
    ) {
        // Auto-indexes back inline UNIQUE constraints, already reported as such.
        current_indexes.retain(|ix| !is_autoindex(ix.name.as_deref()));

        // Constraints added after creation exist only as unique indexes.
        let declared: BTreeSet<&str> = target_uniques
            .iter()
            .filter_map(|uq| uq.name.as_deref())
            .collect();
        let reported: BTreeSet<String> = current_uniques
            .iter()
            .filter_map(|uq| uq.name.clone())
            .collect();
        let (promoted, kept): (Vec<IndexShape>, Vec<IndexShape>) =
            current_indexes.drain(..).partition(|ix| {
                ix.unique
                    && ix
                        .name
                        .as_deref()
                        .is_some_and(|n| declared.contains(n) && !reported.contains(n))
            });
        *current_indexes = kept;
        current_uniques.extend(promoted.into_iter().map(|ix| UniqueShape {
            name: ix.name,
            columns: ix.columns,
        }));

        // Inline constraints come back under their auto-index name.
        for wanted in target_uniques.iter() {
            let Some(name) = wanted.name.as_deref() else {
                continue;
            };
            if current_uniques
                .iter()
                .any(|uq| uq.name.as_deref() == Some(name))
            {
                continue;
            }
            let sig = signature(&wanted.columns);
            if let Some(found) = current_uniques
                .iter_mut()
                .find(|uq| is_autoindex(uq.name.as_deref()) && signature(&uq.columns) == sig)
            {
                found.name = Some(name.to_string());
            }
        }
    }
}
