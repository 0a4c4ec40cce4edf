//! PostgreSQL dialect for migrations.

use std::sync::OnceLock;

use regex::Regex;

use crate::operations::{ColumnChanges, DefaultChange, MigrationOperation};
use crate::schema::{ColumnShape, SqlType, TableKey};

use super::MigrationDialect;

/// PostgreSQL migration dialect.
#[derive(Debug, Clone, Default)]
pub struct PostgresDialect;

impl PostgresDialect {
    /// Creates a new PostgreSQL dialect.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn alter_column_sql(
        &self,
        table: &TableKey,
        column_name: &str,
        changes: &ColumnChanges,
    ) -> Vec<String> {
        let prefix = format!(
            "ALTER TABLE {} ALTER COLUMN {}",
            self.table_name(table),
            self.quote_identifier(column_name)
        );
        let mut statements = Vec::new();

        if let Some(sql_type) = &changes.sql_type {
            statements.push(format!("{prefix} TYPE {}", self.type_name(sql_type)));
        }
        match changes.nullable {
            Some(true) => statements.push(format!("{prefix} DROP NOT NULL")),
            Some(false) => statements.push(format!("{prefix} SET NOT NULL")),
            None => {}
        }
        match &changes.server_default {
            Some(DefaultChange::Set(sql)) => {
                statements.push(format!("{prefix} SET DEFAULT {sql}"));
            }
            Some(DefaultChange::Drop) => statements.push(format!("{prefix} DROP DEFAULT")),
            None => {}
        }

        statements
    }
}

// Trailing `::type` casts PostgreSQL adds to reflected defaults.
fn cast_suffix() -> &'static Regex {
    static CAST: OnceLock<Regex> = OnceLock::new();
    CAST.get_or_init(|| {
        Regex::new(r#"::[A-Za-z_][A-Za-z0-9_ ]*(\(\d+(,\s*\d+)?\))?(\[\])?$"#)
            .unwrap_or_else(|_| unreachable!("cast pattern is valid"))
    })
}

fn strip_casts(text: &str) -> &str {
    let mut current = text.trim();
    while let Some(found) = cast_suffix().find(current) {
        current = current[..found.start()].trim_end();
    }
    current
}

impl MigrationDialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgresql"
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
                table,
                column_name,
                changes,
                ..
            } => self.alter_column_sql(table, column_name, changes),

            MigrationOperation::CreateIndex { table, index } => {
                vec![self.create_index_sql(table, index)]
            }

            MigrationOperation::DropIndex { table, name } => {
                vec![self.drop_index_sql(table, name)]
            }

            MigrationOperation::AddUniqueConstraint { table, constraint } => {
                vec![self.add_unique_sql(table, constraint)]
            }

            MigrationOperation::DropUniqueConstraint { table, name } => vec![format!(
                "ALTER TABLE {} DROP CONSTRAINT {}",
                self.table_name(table),
                self.quote_identifier(name)
            )],

            MigrationOperation::RunSql { sql } => vec![sql.clone()],
        }
    }

    fn type_name(&self, sql_type: &SqlType) -> String {
        sql_type.postgres_name()
    }

    fn column_type(&self, column: &ColumnShape) -> String {
        match (&column.sql_type, column.auto_increment) {
            (SqlType::BigInt, true) => "BIGSERIAL".to_string(),
            (SqlType::SmallInt, true) => "SMALLSERIAL".to_string(),
            (_, true) => "SERIAL".to_string(),
            (sql_type, false) => self.type_name(sql_type),
        }
    }

    fn auto_increment_keyword(&self) -> &'static str {
        ""
    }

    fn compare_server_default(
        &self,
        current: &ColumnShape,
        target: &ColumnShape,
        rendered_current: Option<&str>,
        rendered_target: Option<&str>,
    ) -> bool {
        match (rendered_current, rendered_target) {
            // Serial columns report their sequence as the default.
            (Some(reflected), None) if target.auto_increment || current.auto_increment => {
                !reflected.starts_with("nextval(")
            }
            (Some(reflected), Some(declared)) => strip_casts(reflected) != strip_casts(declared),
            (reflected, declared) => reflected != declared,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::ExistingColumn;
    use crate::schema::{IndexShape, TableShape, UniqueShape};

    fn dialect() -> PostgresDialect {
        PostgresDialect::new()
    }

    #[test]
    fn test_create_table_serial() {
        let op = MigrationOperation::create_table(
            TableShape::new("users")
                .schema("app")
                .column(
                    ColumnShape::new("id", SqlType::BigInt)
                        .primary_key()
                        .auto_increment(),
                )
                .column(ColumnShape::new("created", SqlType::DateTime)),
        );

        let sql = dialect().generate_sql(&op);
        assert_eq!(
            sql[0],
            "CREATE TABLE \"app\".\"users\" (\n  \"id\" BIGSERIAL PRIMARY KEY,\n  \"created\" TIMESTAMP\n)"
        );
    }

    #[test]
    fn test_alter_column_all_changes() {
        let op = MigrationOperation::alter_column(
            "users",
            "email",
            ColumnChanges::new()
                .set_type(SqlType::Varchar(100))
                .set_nullable(false)
                .set_server_default(None),
            ExistingColumn::default(),
        );

        let sql = dialect().generate_sql(&op);
        assert_eq!(
            sql,
            vec![
                "ALTER TABLE \"users\" ALTER COLUMN \"email\" TYPE VARCHAR(100)",
                "ALTER TABLE \"users\" ALTER COLUMN \"email\" SET NOT NULL",
                "ALTER TABLE \"users\" ALTER COLUMN \"email\" DROP DEFAULT",
            ]
        );
    }

    #[test]
    fn test_constraints_and_indexes() {
        let d = dialect();
        let sql = d.generate_sql(&MigrationOperation::add_unique_constraint(
            "users",
            UniqueShape::new("uq_email", &["email"]),
        ));
        assert_eq!(
            sql[0],
            "ALTER TABLE \"users\" ADD CONSTRAINT \"uq_email\" UNIQUE (\"email\")"
        );

        let sql = d.generate_sql(&MigrationOperation::drop_unique_constraint("users", "uq_email"));
        assert_eq!(sql[0], "ALTER TABLE \"users\" DROP CONSTRAINT \"uq_email\"");

        let sql = d.generate_sql(&MigrationOperation::create_index(
            TableKey::new(Some("app"), "users"),
            IndexShape::new("ix_name", &["name"]),
        ));
        assert_eq!(sql[0], "CREATE INDEX \"ix_name\" ON \"app\".\"users\" (\"name\")");

        let sql = d.generate_sql(&MigrationOperation::drop_index(
            TableKey::new(Some("app"), "users"),
            "ix_name",
        ));
        assert_eq!(sql[0], "DROP INDEX \"app\".\"ix_name\"");
    }

    #[test]
    fn test_default_comparison_ignores_casts() {
        let d = dialect();
        let current = ColumnShape::new("name", SqlType::Varchar(20));
        let target = current.clone();
        assert!(!d.compare_server_default(
            &current,
            &target,
            Some("'x'::character varying"),
            Some("'x'")
        ));
        assert!(d.compare_server_default(&current, &target, Some("'x'::text"), Some("'y'")));
        assert!(d.compare_server_default(&current, &target, None, Some("'y'")));
    }

    #[test]
    fn test_serial_default_is_not_a_change() {
        let d = dialect();
        let current = ColumnShape::new("id", SqlType::Integer);
        let target = ColumnShape::new("id", SqlType::Integer)
            .primary_key()
            .auto_increment();
        assert!(!d.compare_server_default(
            &current,
            &target,
            Some("nextval('users_id_seq'::regclass)"),
            None
        ));
    }
}
