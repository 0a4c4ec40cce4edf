//! Migration runner.
//!
//! Applies upgrade and downgrade steps against a SQLite database. Each step
//! runs its revision callable into an [`Operations`] recorder, renders the
//! recorded operations with the active dialect, executes the statements and
//! moves the version table, all inside one transaction.

use std::fmt;
use std::sync::Arc;

use sqlx::sqlite::{SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};

use crate::dialect::MigrationDialect;
use crate::error::{MigrateError, Result};
use crate::graph::RevisionGraph;
use crate::history::VersionTable;
use crate::operations::{MigrationOperation, Operations};
use crate::range::{downgrade_plan, upgrade_plan, RevisionSpec};
use crate::revision::Revision;

/// How steps are grouped into transactions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransactionMode {
    /// One transaction around the whole run.
    #[default]
    PerRun,
    /// One transaction per step.
    PerMigration,
}

/// Which way a step moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Runs the upgrade step, towards the heads.
    Upgrade,
    /// Runs the downgrade step, towards the base.
    Downgrade,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upgrade => f.write_str("upgrade"),
            Self::Downgrade => f.write_str("downgrade"),
        }
    }
}

/// One revision applied in one direction.
#[derive(Debug, Clone, Copy)]
pub struct MigrationStep<'a> {
    /// The revision whose callable runs.
    pub revision: &'a Revision,
    /// Direction of the step.
    pub direction: Direction,
}

impl<'a> MigrationStep<'a> {
    /// An upgrade step.
    #[must_use]
    pub fn upgrade(revision: &'a Revision) -> Self {
        Self {
            revision,
            direction: Direction::Upgrade,
        }
    }

    /// A downgrade step.
    #[must_use]
    pub fn downgrade(revision: &'a Revision) -> Self {
        Self {
            revision,
            direction: Direction::Downgrade,
        }
    }

    /// Version the database is at before the step.
    #[must_use]
    pub fn from_version(&self) -> Option<&'a str> {
        match self.direction {
            Direction::Upgrade => self.revision.down_revision.as_deref(),
            Direction::Downgrade => Some(self.revision.id.as_str()),
        }
    }

    /// Version the database is at after the step.
    #[must_use]
    pub fn to_version(&self) -> Option<&'a str> {
        match self.direction {
            Direction::Upgrade => Some(self.revision.id.as_str()),
            Direction::Downgrade => self.revision.down_revision.as_deref(),
        }
    }

    /// Runs the revision callable and returns what it recorded.
    pub fn operations(&self) -> Result<Vec<MigrationOperation>> {
        let mut ops = Operations::new();
        match self.direction {
            Direction::Upgrade => self.revision.run_upgrade(&mut ops)?,
            Direction::Downgrade => self.revision.run_downgrade(&mut ops)?,
        }
        Ok(ops.into_operations())
    }
}

impl fmt::Display for MigrationStep<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} -> {}",
            self.direction,
            self.from_version().unwrap_or("base"),
            self.to_version().unwrap_or("base")
        )
    }
}

/// Runs migrations against a database.
pub struct MigrationRunner {
    pool: SqlitePool,
    dialect: Arc<dyn MigrationDialect>,
    version_table: VersionTable,
    mode: TransactionMode,
}

impl fmt::Debug for MigrationRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationRunner")
            .field("dialect", &self.dialect.name())
            .field("version_table", &self.version_table)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl MigrationRunner {
    /// Creates a runner with the default version table and one transaction
    /// per run.
    pub fn new(pool: SqlitePool, dialect: Arc<dyn MigrationDialect>) -> Self {
        Self {
            pool,
            dialect,
            version_table: VersionTable::default(),
            mode: TransactionMode::default(),
        }
    }

    /// Uses a different version table.
    #[must_use]
    pub fn with_version_table(mut self, version_table: VersionTable) -> Self {
        self.version_table = version_table;
        self
    }

    /// Sets the transaction mode.
    #[must_use]
    pub fn with_transaction_mode(mut self, mode: TransactionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Returns the dialect.
    #[must_use]
    pub fn dialect(&self) -> &dyn MigrationDialect {
        self.dialect.as_ref()
    }

    /// Returns the pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Ensures the version table exists.
    pub async fn init(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        self.version_table.ensure(&mut conn).await
    }

    /// The applied revision, `None` at base.
    pub async fn current(&self) -> Result<Option<String>> {
        let mut conn = self.pool.acquire().await?;
        self.version_table.current(&mut conn).await
    }

    /// Upgrades to `destination` and returns the applied revision ids.
    pub async fn upgrade(&self, graph: &RevisionGraph, destination: &str) -> Result<Vec<String>> {
        let current = self.current().await?;
        let plan = upgrade_plan(graph, current.as_deref(), destination)?;
        let steps: Vec<MigrationStep<'_>> = plan.into_iter().map(MigrationStep::upgrade).collect();
        self.run(&steps).await?;
        Ok(steps.iter().map(|s| s.revision.id.clone()).collect())
    }

    /// Downgrades to `destination` and returns the reverted revision ids.
    pub async fn downgrade(
        &self,
        graph: &RevisionGraph,
        destination: &str,
    ) -> Result<Vec<String>> {
        let current = self.current().await?;
        let plan = downgrade_plan(graph, current.as_deref(), destination)?;
        let steps: Vec<MigrationStep<'_>> =
            plan.into_iter().map(MigrationStep::downgrade).collect();
        self.run(&steps).await?;
        Ok(steps.iter().map(|s| s.revision.id.clone()).collect())
    }

    /// Records `destination` as applied without running anything.
    pub async fn stamp(&self, graph: &RevisionGraph, destination: &str) -> Result<Option<String>> {
        let spec: RevisionSpec = destination.parse()?;
        let version = spec.resolve(graph)?.map(str::to_string);

        let mut tx = self.pool.begin().await?;
        self.version_table.ensure(&mut tx).await?;
        self.version_table.set(&mut tx, version.as_deref()).await?;
        tx.commit().await?;

        info!(version = version.as_deref().unwrap_or("base"), "Stamped database");
        Ok(version)
    }

    /// SQL an upgrade from `start` to `destination` would run.
    pub fn upgrade_sql(
        &self,
        graph: &RevisionGraph,
        start: Option<&str>,
        destination: &str,
    ) -> Result<Vec<String>> {
        let plan = upgrade_plan(graph, start, destination)?;
        let mut statements = Vec::new();
        if start.is_none() {
            statements.push(self.version_table.create_sql());
        }
        for revision in plan {
            self.step_sql(&MigrationStep::upgrade(revision), &mut statements)?;
        }
        Ok(self.wrap_offline(statements))
    }

    /// SQL a downgrade from `start` to `destination` would run.
    pub fn downgrade_sql(
        &self,
        graph: &RevisionGraph,
        start: &str,
        destination: &str,
    ) -> Result<Vec<String>> {
        let plan = downgrade_plan(graph, Some(start), destination)?;
        let mut statements = Vec::new();
        for revision in plan {
            self.step_sql(&MigrationStep::downgrade(revision), &mut statements)?;
        }
        Ok(self.wrap_offline(statements))
    }

    fn step_sql(&self, step: &MigrationStep<'_>, statements: &mut Vec<String>) -> Result<()> {
        statements.push(format!("-- Running {step}"));
        let operations = step
            .operations()
            .map_err(|err| err.in_step(step.from_version(), step.to_version()))?;
        for operation in &operations {
            statements.extend(self.dialect.generate_sql(operation));
        }
        statements.extend(
            self.version_table
                .update_sql(step.from_version(), step.to_version()),
        );
        Ok(())
    }

    fn wrap_offline(&self, statements: Vec<String>) -> Vec<String> {
        if statements.is_empty() || !self.dialect.transactional_ddl() {
            return statements;
        }
        let mut wrapped = Vec::with_capacity(statements.len() + 2);
        wrapped.push("BEGIN".to_string());
        wrapped.extend(statements);
        wrapped.push("COMMIT".to_string());
        wrapped
    }

    async fn run(&self, steps: &[MigrationStep<'_>]) -> Result<()> {
        if steps.is_empty() {
            info!("Nothing to do");
            return Ok(());
        }
        if !self.dialect.transactional_ddl() {
            warn!(
                dialect = self.dialect.name(),
                "Dialect doesn't support transactional DDL; a failure may leave partial changes"
            );
        }

        match self.mode {
            TransactionMode::PerRun => {
                let mut tx = self.pool.begin().await?;
                self.version_table.ensure(&mut tx).await?;
                for step in steps {
                    if let Err(err) = self.run_step(&mut tx, step).await {
                        if let Err(rollback) = tx.rollback().await {
                            warn!(error = %rollback, "Rollback failed");
                        }
                        return Err(err);
                    }
                }
                tx.commit().await?;
            }
            TransactionMode::PerMigration => {
                self.init().await?;
                for step in steps {
                    let mut tx = self.pool.begin().await?;
                    if let Err(err) = self.run_step(&mut tx, step).await {
                        if let Err(rollback) = tx.rollback().await {
                            warn!(error = %rollback, "Rollback failed");
                        }
                        return Err(err);
                    }
                    tx.commit().await?;
                }
            }
        }
        Ok(())
    }

    async fn run_step(&self, conn: &mut SqliteConnection, step: &MigrationStep<'_>) -> Result<()> {
        let from = step.from_version();
        let to = step.to_version();
        info!(
            from = from.unwrap_or("base"),
            to = to.unwrap_or("base"),
            "Running {}",
            step.direction
        );

        let result = self.execute_step(conn, step).await;
        result.map_err(|err| err.in_step(from, to))
    }

    async fn execute_step(&self, conn: &mut SqliteConnection, step: &MigrationStep<'_>) -> Result<()> {
        for operation in step.operations()? {
            for sql in self.dialect.generate_sql(&operation) {
                if sql.starts_with("--") {
                    warn!(comment = %sql, "Skipping comment (unsupported operation)");
                    continue;
                }
                debug!(sql = %sql, "Executing SQL");
                sqlx::query(&sql).execute(&mut *conn).await?;
            }
        }
        self.version_table.set(conn, step.to_version()).await
    }
}

/// The revision the database records as applied. An id missing from the
/// graph is a state error.
pub fn applied_revision<'a>(
    graph: &'a RevisionGraph,
    current: Option<&str>,
) -> Result<Option<&'a Revision>> {
    current
        .map(|id| {
            graph.get(id).ok_or_else(|| {
                MigrateError::InvalidState(format!(
                    "database is at revision '{id}', which is not in the script directory"
                ))
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::SqliteDialect;
    use crate::schema::{ColumnShape, SqlType, TableShape};
    use sqlx::sqlite::SqlitePoolOptions;

    async fn create_test_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .expect("Failed to create pool")
    }

    fn graph() -> RevisionGraph {
        RevisionGraph::build(vec![
            Revision::new("a1", None)
                .upgrade(|ops| {
                    ops.create_table(
                        TableShape::new("users")
                            .column(ColumnShape::new("id", SqlType::Integer).primary_key()),
                    );
                    Ok(())
                })
                .downgrade(|ops| {
                    ops.drop_table("users");
                    Ok(())
                }),
            Revision::new("b2", Some("a1"))
                .upgrade(|ops| {
                    ops.add_column("users", ColumnShape::new("email", SqlType::Text));
                    Ok(())
                })
                .downgrade(|ops| {
                    ops.drop_column("users", "email");
                    Ok(())
                }),
        ])
    }

    async fn table_exists(pool: &SqlitePool, name: &str) -> bool {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table' AND name=?")
                .bind(name)
                .fetch_optional(pool)
                .await
                .unwrap();
        row.is_some()
    }

    #[tokio::test]
    async fn test_upgrade_and_downgrade() {
        let pool = create_test_pool().await;
        let runner = MigrationRunner::new(pool.clone(), Arc::new(SqliteDialect::new()));
        let graph = graph();

        let applied = runner.upgrade(&graph, "head").await.unwrap();
        assert_eq!(applied, vec!["a1", "b2"]);
        assert_eq!(runner.current().await.unwrap().as_deref(), Some("b2"));
        assert!(table_exists(&pool, "users").await);

        let reverted = runner.downgrade(&graph, "-1").await.unwrap();
        assert_eq!(reverted, vec!["b2"]);
        assert_eq!(runner.current().await.unwrap().as_deref(), Some("a1"));

        runner.downgrade(&graph, "base").await.unwrap();
        assert_eq!(runner.current().await.unwrap(), None);
        assert!(!table_exists(&pool, "users").await);
    }

    #[tokio::test]
    async fn test_upgrade_is_noop_at_head() {
        let pool = create_test_pool().await;
        let runner = MigrationRunner::new(pool, Arc::new(SqliteDialect::new()));
        let graph = graph();
        runner.upgrade(&graph, "head").await.unwrap();
        assert!(runner.upgrade(&graph, "head").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failing_step_rolls_back_run() {
        let pool = create_test_pool().await;
        let runner = MigrationRunner::new(pool.clone(), Arc::new(SqliteDialect::new()));
        let mut graph = graph();
        graph
            .add_revision(Revision::new("c3", Some("b2")).upgrade(|ops| {
                ops.execute("INSERT INTO missing_table VALUES (1)");
                Ok(())
            }))
            .unwrap();

        let err = runner.upgrade(&graph, "head").await.unwrap_err();
        assert!(matches!(
            &err,
            MigrateError::StepFailed { from: Some(from), to: Some(to), .. }
                if from == "b2" && to == "c3"
        ));
        assert_eq!(runner.current().await.unwrap(), None);
        assert!(!table_exists(&pool, "users").await);
    }

    #[tokio::test]
    async fn test_failed_rollback_keeps_step_error() {
        let pool = create_test_pool().await;
        let runner = MigrationRunner::new(pool, Arc::new(SqliteDialect::new()));
        let mut graph = graph();
        graph
            .add_revision(Revision::new("c3", Some("b2")).upgrade(|ops| {
                // Ends the transaction early, so the runner's rollback fails too.
                ops.execute("ROLLBACK")
                    .execute("INSERT INTO missing_table VALUES (1)");
                Ok(())
            }))
            .unwrap();

        let err = runner.upgrade(&graph, "head").await.unwrap_err();
        assert!(
            matches!(&err, MigrateError::StepFailed { to: Some(to), .. } if to == "c3"),
            "unexpected error: {err:?}"
        );
    }

    #[tokio::test]
    async fn test_per_migration_keeps_completed_steps() {
        let pool = create_test_pool().await;
        let runner = MigrationRunner::new(pool.clone(), Arc::new(SqliteDialect::new()))
            .with_transaction_mode(TransactionMode::PerMigration);
        let mut graph = graph();
        graph
            .add_revision(Revision::new("c3", Some("b2")).upgrade(|ops| {
                ops.execute("INSERT INTO missing_table VALUES (1)");
                Ok(())
            }))
            .unwrap();

        assert!(runner.upgrade(&graph, "head").await.is_err());
        assert_eq!(runner.current().await.unwrap().as_deref(), Some("b2"));
        assert!(table_exists(&pool, "users").await);
    }

    #[tokio::test]
    async fn test_stamp() {
        let pool = create_test_pool().await;
        let runner = MigrationRunner::new(pool.clone(), Arc::new(SqliteDialect::new()))
            .with_version_table(VersionTable::new("custom_version"));
        let graph = graph();

        assert_eq!(
            runner.stamp(&graph, "head").await.unwrap().as_deref(),
            Some("b2")
        );
        assert_eq!(runner.current().await.unwrap().as_deref(), Some("b2"));
        assert!(table_exists(&pool, "custom_version").await);
        assert!(!table_exists(&pool, "users").await);

        assert_eq!(runner.stamp(&graph, "base").await.unwrap(), None);
        assert_eq!(runner.current().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_offline_sql() {
        let pool = create_test_pool().await;
        let runner = MigrationRunner::new(pool, Arc::new(SqliteDialect::new()));
        let graph = graph();

        let sql = runner.upgrade_sql(&graph, None, "head").unwrap();
        assert_eq!(sql.first().map(String::as_str), Some("BEGIN"));
        assert_eq!(sql.last().map(String::as_str), Some("COMMIT"));
        assert!(sql.iter().any(|s| s.starts_with("CREATE TABLE \"users\"")));
        assert!(sql
            .iter()
            .any(|s| s == "INSERT INTO \"lineage_version\" (version_num) VALUES ('a1')"));
        assert!(sql.iter().any(|s| s
            == "UPDATE \"lineage_version\" SET version_num = 'b2' WHERE version_num = 'a1'"));

        let sql = runner.downgrade_sql(&graph, "b2", "base").unwrap();
        assert!(sql.iter().any(|s| s == "-- Running downgrade b2 -> a1"));
        assert!(sql
            .iter()
            .any(|s| s == "DELETE FROM \"lineage_version\" WHERE version_num = 'a1'"));
    }

    #[test]
    fn test_applied_revision_must_be_known() {
        let graph = graph();
        assert!(applied_revision(&graph, None).unwrap().is_none());
        assert_eq!(applied_revision(&graph, Some("a1")).unwrap().unwrap().id, "a1");
        assert!(matches!(
            applied_revision(&graph, Some("zz")),
            Err(MigrateError::InvalidState(_))
        ));
    }
}
