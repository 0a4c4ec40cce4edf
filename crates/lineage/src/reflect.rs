//! Reading the current schema out of a database.
//!
//! An [`Inspector`] answers per-table questions; [`reflect_schema`] walks
//! it into a [`SchemaSnapshot`] and [`compare_metadata`] compares that
//! snapshot with a declared target.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;
use tracing::{debug, warn};

use crate::compare::{CompareOptions, SchemaComparator};
use crate::dialect::MigrationDialect;
use crate::diff::Diff;
use crate::error::{MigrateError, Result};
use crate::schema::{ColumnShape, IndexShape, SchemaSnapshot, SqlType, TableKey, TableShape, UniqueShape};

/// Read access to a database's schema.
#[async_trait]
pub trait Inspector: Send + Sync {
    /// Name of the schema unqualified tables live in.
    async fn default_schema(&self) -> Result<Option<String>>;

    /// All schema names, the default one included.
    async fn schema_names(&self) -> Result<Vec<String>>;

    /// Table names in a schema (`None` for the default schema).
    async fn table_names(&self, schema: Option<&str>) -> Result<Vec<String>>;

    /// Columns of a table, in declaration order.
    async fn columns(&self, table: &str, schema: Option<&str>) -> Result<Vec<ColumnShape>>;

    /// Indexes of a table, primary key index excluded.
    async fn indexes(&self, table: &str, schema: Option<&str>) -> Result<Vec<IndexShape>>;

    /// Unique constraints of a table. Fails with
    /// [`MigrateError::Unsupported`] when the backend can't tell.
    async fn unique_constraints(&self, table: &str, schema: Option<&str>)
        -> Result<Vec<UniqueShape>>;
}

/// Reflects every table the options cover, skipping the version table.
///
/// When the inspector can't report unique constraints, the snapshot has
/// none and is marked with `unique_constraints_reflected = false`.
pub async fn reflect_schema(
    inspector: &dyn Inspector,
    options: &CompareOptions,
) -> Result<SchemaSnapshot> {
    let default_schema = inspector.default_schema().await?;

    let mut schemas: Vec<Option<String>> = vec![None];
    if options.include_schemas {
        schemas.extend(
            inspector
                .schema_names()
                .await?
                .into_iter()
                .filter(|name| Some(name) != default_schema.as_ref())
                .map(Some),
        );
    }

    let mut snapshot = SchemaSnapshot {
        default_schema,
        ..SchemaSnapshot::default()
    };

    for schema in &schemas {
        let schema = schema.as_deref();
        for name in inspector.table_names(schema).await? {
            if schema.is_none() && name == options.version_table {
                continue;
            }

            let columns = inspector.columns(&name, schema).await?;
            let indexes = inspector.indexes(&name, schema).await?;
            let unique_constraints = if snapshot.unique_constraints_reflected {
                match inspector.unique_constraints(&name, schema).await {
                    Ok(found) => found,
                    Err(MigrateError::Unsupported(reason)) => {
                        warn!(%reason, "Unique constraints can't be reflected, skipping them");
                        snapshot.unique_constraints_reflected = false;
                        Vec::new()
                    }
                    Err(err) => return Err(err),
                }
            } else {
                Vec::new()
            };

            let mut table = TableShape::new(name);
            table.schema = schema.map(str::to_string);
            table.primary_key = columns
                .iter()
                .filter(|c| c.primary_key)
                .map(|c| c.name.clone())
                .collect();
            table.columns = columns;
            table.indexes = indexes;
            table.unique_constraints = unique_constraints;

            debug!(table = %table.key(), columns = table.columns.len(), "Reflected table");
            snapshot.insert(table);
        }
    }

    if !snapshot.unique_constraints_reflected {
        for table in snapshot.tables.values_mut() {
            table.unique_constraints.clear();
        }
    }

    Ok(snapshot)
}

/// Reflects the current schema and compares it with `target`.
pub async fn compare_metadata(
    inspector: &dyn Inspector,
    dialect: Arc<dyn MigrationDialect>,
    target: &SchemaSnapshot,
    options: CompareOptions,
) -> Result<Vec<Diff>> {
    let current = reflect_schema(inspector, &options).await?;
    Ok(SchemaComparator::new(dialect, options).compare(&current, target))
}

/// Serves a fixed snapshot, for offline comparison and tests.
#[derive(Debug, Clone)]
pub struct StaticInspector {
    snapshot: SchemaSnapshot,
    uniques_supported: bool,
}

impl StaticInspector {
    /// Creates an inspector over a snapshot.
    #[must_use]
    pub fn new(snapshot: SchemaSnapshot) -> Self {
        Self {
            snapshot,
            uniques_supported: true,
        }
    }

    /// Behaves like a driver that can't report unique constraints.
    #[must_use]
    pub fn without_unique_support(mut self) -> Self {
        self.uniques_supported = false;
        self
    }

    fn table(&self, table: &str, schema: Option<&str>) -> Result<&TableShape> {
        let key = TableKey::new(schema, table);
        self.snapshot
            .get_table(&key)
            .ok_or_else(|| MigrateError::InvalidState(format!("no table '{key}'")))
    }
}

#[async_trait]
impl Inspector for StaticInspector {
    async fn default_schema(&self) -> Result<Option<String>> {
        Ok(self.snapshot.default_schema.clone())
    }

    async fn schema_names(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .snapshot
            .tables
            .keys()
            .filter_map(|key| key.schema.clone())
            .chain(self.snapshot.default_schema.clone())
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    async fn table_names(&self, schema: Option<&str>) -> Result<Vec<String>> {
        Ok(self
            .snapshot
            .tables
            .keys()
            .filter(|key| key.schema.as_deref() == schema)
            .map(|key| key.name.clone())
            .collect())
    }

    async fn columns(&self, table: &str, schema: Option<&str>) -> Result<Vec<ColumnShape>> {
        Ok(self.table(table, schema)?.columns.clone())
    }

    async fn indexes(&self, table: &str, schema: Option<&str>) -> Result<Vec<IndexShape>> {
        Ok(self.table(table, schema)?.indexes.clone())
    }

    async fn unique_constraints(
        &self,
        table: &str,
        schema: Option<&str>,
    ) -> Result<Vec<UniqueShape>> {
        if !self.uniques_supported {
            return Err(MigrateError::Unsupported(
                "unique constraint reflection".to_string(),
            ));
        }
        Ok(self.table(table, schema)?.unique_constraints.clone())
    }
}

/// Reflects SQLite databases through the `pragma_*` table-valued functions.
#[derive(Debug, Clone)]
pub struct SqliteInspector {
    pool: SqlitePool,
}

impl SqliteInspector {
    /// Creates an inspector over a pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn schema_or_main(schema: Option<&str>) -> &str {
        schema.unwrap_or("main")
    }

    fn quoted_schema(schema: Option<&str>) -> String {
        format!("\"{}\"", Self::schema_or_main(schema).replace('"', "\"\""))
    }

    async fn index_columns(&self, index: &str, schema: Option<&str>) -> Result<Vec<String>> {
        let rows: Vec<(Option<String>,)> =
            sqlx::query_as("SELECT name FROM pragma_index_info(?, ?) ORDER BY seqno")
                .bind(index)
                .bind(Self::schema_or_main(schema))
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().filter_map(|(name,)| name).collect())
    }

    // (name, unique, origin) for every index but the primary key's.
    async fn index_list(&self, table: &str, schema: Option<&str>) -> Result<Vec<(String, bool, String)>> {
        let rows: Vec<(String, i64, String)> = sqlx::query_as(
            "SELECT name, \"unique\", origin FROM pragma_index_list(?, ?) ORDER BY name",
        )
        .bind(table)
        .bind(Self::schema_or_main(schema))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .filter(|(_, _, origin)| origin != "pk")
            .map(|(name, unique, origin)| (name, unique != 0, origin))
            .collect())
    }
}

#[async_trait]
impl Inspector for SqliteInspector {
    async fn default_schema(&self) -> Result<Option<String>> {
        Ok(Some("main".to_string()))
    }

    async fn schema_names(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM pragma_database_list WHERE name <> 'temp' ORDER BY seq")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    async fn table_names(&self, schema: Option<&str>) -> Result<Vec<String>> {
        let sql = format!(
            "SELECT name FROM {}.sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            Self::quoted_schema(schema)
        );
        let rows: Vec<(String,)> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    async fn columns(&self, table: &str, schema: Option<&str>) -> Result<Vec<ColumnShape>> {
        let rows: Vec<(String, String, i64, Option<String>, i64)> = sqlx::query_as(
            "SELECT name, type, \"notnull\", dflt_value, pk \
             FROM pragma_table_info(?, ?) ORDER BY cid",
        )
        .bind(table)
        .bind(Self::schema_or_main(schema))
        .fetch_all(&self.pool)
        .await?;

        let create_sql: Option<(Option<String>,)> = sqlx::query_as(&format!(
            "SELECT sql FROM {}.sqlite_master WHERE type = 'table' AND name = ?",
            Self::quoted_schema(schema)
        ))
        .bind(table)
        .fetch_optional(&self.pool)
        .await?;
        let autoincrement = create_sql
            .and_then(|(sql,)| sql)
            .is_some_and(|sql| sql.to_ascii_uppercase().contains("AUTOINCREMENT"));
        let pk_count = rows.iter().filter(|row| row.4 > 0).count();

        Ok(rows
            .into_iter()
            .map(|(name, declared, notnull, default, pk)| {
                let primary_key = pk > 0;
                ColumnShape {
                    name,
                    key: None,
                    sql_type: SqlType::parse(&declared),
                    nullable: notnull == 0 && !primary_key,
                    server_default: default,
                    primary_key,
                    auto_increment: primary_key && pk_count == 1 && autoincrement,
                }
            })
            .collect())
    }

    async fn indexes(&self, table: &str, schema: Option<&str>) -> Result<Vec<IndexShape>> {
        let mut indexes = Vec::new();
        for (name, unique, _) in self.index_list(table, schema).await? {
            let columns = self.index_columns(&name, schema).await?;
            indexes.push(IndexShape {
                name: Some(name),
                columns,
                unique,
            });
        }
        Ok(indexes)
    }

    async fn unique_constraints(
        &self,
        table: &str,
        schema: Option<&str>,
    ) -> Result<Vec<UniqueShape>> {
        let mut constraints = Vec::new();
        for (name, _, origin) in self.index_list(table, schema).await? {
            if origin != "u" {
                continue;
            }
            let columns = self.index_columns(&name, schema).await?;
            constraints.push(UniqueShape {
                name: Some(name),
                columns,
            });
        }
        Ok(constraints)
    }
}
