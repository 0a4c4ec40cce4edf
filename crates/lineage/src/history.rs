//! The version table.
//!
//! A single-row table with one `version_num` column records the revision
//! the database is at. No row means no revision has been applied. The
//! runner reads it before planning and rewrites it after every step, inside
//! the step's transaction.

use sqlx::sqlite::SqliteConnection;

use crate::compare::DEFAULT_VERSION_TABLE;
use crate::error::{MigrateError, Result};

/// Reads and writes the applied revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionTable {
    name: String,
}

impl Default for VersionTable {
    fn default() -> Self {
        Self::new(DEFAULT_VERSION_TABLE)
    }
}

impl VersionTable {
    /// Uses the table with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Table name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn quoted(&self) -> String {
        format!("\"{}\"", self.name.replace('"', "\"\""))
    }

    /// SQL creating the table if it doesn't exist.
    #[must_use]
    pub fn create_sql(&self) -> String {
        let constraint = format!("\"{}_pkc\"", self.name.replace('"', "\"\""));
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n  \
             version_num VARCHAR(32) NOT NULL,\n  \
             CONSTRAINT {constraint} PRIMARY KEY (version_num)\n)",
            self.quoted()
        )
    }

    /// SQL moving the recorded revision from `from` to `to`, with the ids
    /// inlined. `None` when both are base.
    #[must_use]
    pub fn update_sql(&self, from: Option<&str>, to: Option<&str>) -> Option<String> {
        let table = self.quoted();
        match (from, to) {
            (None, None) => None,
            (None, Some(to)) => Some(format!(
                "INSERT INTO {table} (version_num) VALUES ({})",
                literal(to)
            )),
            (Some(from), Some(to)) => Some(format!(
                "UPDATE {table} SET version_num = {} WHERE version_num = {}",
                literal(to),
                literal(from)
            )),
            (Some(from), None) => Some(format!(
                "DELETE FROM {table} WHERE version_num = {}",
                literal(from)
            )),
        }
    }

    /// Creates the table if it doesn't exist.
    pub async fn ensure(&self, conn: &mut SqliteConnection) -> Result<()> {
        sqlx::query(&self.create_sql()).execute(&mut *conn).await?;
        Ok(())
    }

    /// Whether the table exists.
    pub async fn exists(&self, conn: &mut SqliteConnection) -> Result<bool> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?")
                .bind(&self.name)
                .fetch_optional(&mut *conn)
                .await?;
        Ok(row.is_some())
    }

    /// The applied revision, `None` when at base or the table is missing.
    pub async fn current(&self, conn: &mut SqliteConnection) -> Result<Option<String>> {
        if !self.exists(conn).await? {
            return Ok(None);
        }
        let rows: Vec<(String,)> =
            sqlx::query_as(&format!("SELECT version_num FROM {}", self.quoted()))
                .fetch_all(&mut *conn)
                .await?;

        match rows.as_slice() {
            [] => Ok(None),
            [(version,)] => Ok(Some(version.clone())),
            _ => Err(MigrateError::InvalidState(format!(
                "version table '{}' holds {} rows",
                self.name,
                rows.len()
            ))),
        }
    }

    /// Records `version` as applied; `None` clears the table.
    pub async fn set(&self, conn: &mut SqliteConnection, version: Option<&str>) -> Result<()> {
        let table = self.quoted();
        let Some(version) = version else {
            sqlx::query(&format!("DELETE FROM {table}"))
                .execute(&mut *conn)
                .await?;
            return Ok(());
        };

        let updated = sqlx::query(&format!("UPDATE {table} SET version_num = ?"))
            .bind(version)
            .execute(&mut *conn)
            .await?;
        if updated.rows_affected() == 0 {
            sqlx::query(&format!("INSERT INTO {table} (version_num) VALUES (?)"))
                .bind(version)
                .execute(&mut *conn)
                .await?;
        }
        Ok(())
    }
}

fn literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
