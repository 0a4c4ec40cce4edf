//! Integration tests for schema autogeneration.
//!
//! These tests reflect real SQLite databases, compare them with declared
//! target snapshots, and check that the generated revisions bring the
//! database to the target.

mod common;

use std::sync::Arc;

use common::setup_pool;
use lineage::prelude::*;
use sqlx::SqlitePool;
use tempfile::TempDir;

fn sqlite() -> Arc<dyn MigrationDialect> {
    Arc::new(SqliteDialect::new())
}

async fn execute_all(pool: &SqlitePool, statements: &[&str]) {
    for sql in statements {
        sqlx::query(sql)
            .execute(pool)
            .await
            .unwrap_or_else(|e| panic!("Failed to run: {sql}\nError: {e:?}"));
    }
}

async fn diffs_against(pool: &SqlitePool, target: &SchemaSnapshot) -> Vec<Diff> {
    compare_metadata(
        &SqliteInspector::new(pool.clone()),
        sqlite(),
        target,
        CompareOptions::new(),
    )
    .await
    .unwrap()
}

// =============================================================================
// Comparison against a reflected database
// =============================================================================

#[tokio::test]
async fn test_columns_tables_and_defaults() {
    let pool = setup_pool().await;
    execute_all(
        &pool,
        &["CREATE TABLE t (id INTEGER PRIMARY KEY, old_data TEXT, x INTEGER NOT NULL)"],
    )
    .await;

    let target = SchemaSnapshot::new()
        .table(
            TableShape::new("t")
                .column(ColumnShape::new("id", SqlType::Integer).primary_key())
                .column(ColumnShape::new("data", SqlType::Text))
                .column(
                    ColumnShape::new("x", SqlType::Integer)
                        .not_null()
                        .server_default_sql("0"),
                ),
        )
        .table(
            TableShape::new("bat")
                .column(ColumnShape::new("id", SqlType::Integer).primary_key()),
        );

    let diffs = diffs_against(&pool, &target).await;
    assert_eq!(diffs.len(), 4, "unexpected diffs: {diffs:?}");
    assert!(matches!(&diffs[0], Diff::AddTable { table } if table.name == "bat"));
    assert!(matches!(&diffs[1], Diff::AddColumn { column, .. } if column.name == "data"));
    assert!(matches!(&diffs[2], Diff::RemoveColumn { column, .. } if column.name == "old_data"));
    let Diff::ModifyColumn(modification) = &diffs[3] else {
        panic!("Expected a column modification, got {:?}", diffs[3]);
    };
    assert_eq!(modification.column, "x");
    assert!(modification.type_change.is_none());
    assert!(modification.nullable_change.is_none());
    let default = modification.default_change.as_ref().unwrap();
    assert_eq!(default.from, None);
    assert_eq!(default.to.as_deref(), Some("0"));

    assert_eq!(diffs[0].to_string(), "Detected added table 'bat'");
}

#[tokio::test]
async fn test_unique_index_satisfies_unnamed_unique_constraint() {
    let pool = setup_pool().await;
    execute_all(
        &pool,
        &[
            "CREATE TABLE users (id INTEGER PRIMARY KEY, email VARCHAR(255))",
            "CREATE UNIQUE INDEX ix_users_email ON users (email)",
        ],
    )
    .await;

    let target = SchemaSnapshot::new().table(
        TableShape::new("users")
            .column(ColumnShape::new("id", SqlType::Integer).primary_key())
            .column(ColumnShape::new("email", SqlType::Varchar(255)))
            .unique_constraint(UniqueShape::unnamed(&["email"])),
    );

    let diffs = diffs_against(&pool, &target).await;
    assert!(diffs.is_empty(), "unexpected diffs: {diffs:?}");
}

#[tokio::test]
async fn test_missing_unique_reflection_suppresses_adds() {
    let current = SchemaSnapshot::new().table(
        TableShape::new("users")
            .column(ColumnShape::new("id", SqlType::Integer).primary_key())
            .column(ColumnShape::new("email", SqlType::Text)),
    );
    let target = SchemaSnapshot::new().table(
        TableShape::new("users")
            .column(ColumnShape::new("id", SqlType::Integer).primary_key())
            .column(ColumnShape::new("email", SqlType::Text))
            .unique_constraint(UniqueShape::new("uq_users_email", &["email"])),
    );

    let blind = StaticInspector::new(current.clone()).without_unique_support();
    let diffs = compare_metadata(&blind, sqlite(), &target, CompareOptions::new())
        .await
        .unwrap();
    assert!(diffs.is_empty(), "unexpected diffs: {diffs:?}");

    let sighted = StaticInspector::new(current);
    let diffs = compare_metadata(&sighted, sqlite(), &target, CompareOptions::new())
        .await
        .unwrap();
    assert!(matches!(
        diffs.as_slice(),
        [Diff::AddConstraint { constraint, .. }]
            if constraint.name.as_deref() == Some("uq_users_email")
    ));
}

#[tokio::test]
async fn test_dropping_an_inline_unique_does_not_fail_the_upgrade() {
    let pool = setup_pool().await;
    execute_all(
        &pool,
        &["CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT, \
           CONSTRAINT uq_email UNIQUE (email))"],
    )
    .await;

    let target = SchemaSnapshot::new().table(
        TableShape::new("users")
            .column(ColumnShape::new("id", SqlType::Integer).primary_key())
            .column(ColumnShape::new("email", SqlType::Text)),
    );
    let diffs = diffs_against(&pool, &target).await;
    assert!(
        matches!(diffs.as_slice(), [Diff::RemoveConstraint { .. }]),
        "unexpected diffs: {diffs:?}"
    );

    let graph = RevisionGraph::build(vec![Revision::from_operations(
        "1975ea83b712",
        None,
        upgrade_operations(&diffs),
        downgrade_operations(&diffs),
    )]);
    let runner = MigrationRunner::new(pool.clone(), sqlite());
    assert_eq!(runner.upgrade(&graph, "head").await.unwrap(), vec!["1975ea83b712"]);
    assert_eq!(runner.current().await.unwrap().as_deref(), Some("1975ea83b712"));
}

#[tokio::test]
async fn test_version_table_is_ignored() {
    let pool = setup_pool().await;
    let runner = MigrationRunner::new(pool.clone(), sqlite());
    runner.init().await.unwrap();

    let diffs = diffs_against(&pool, &SchemaSnapshot::new()).await;
    assert!(diffs.is_empty(), "unexpected diffs: {diffs:?}");
}

// =============================================================================
// Autogenerate, write, upgrade, downgrade
// =============================================================================

fn model_v1() -> SchemaSnapshot {
    SchemaSnapshot::new().table(
        TableShape::new("users")
            .column(ColumnShape::new("id", SqlType::Integer).primary_key())
            .column(ColumnShape::new("email", SqlType::Varchar(255)).not_null())
            .index(IndexShape::unnamed(&["email"])),
    )
}

fn model_v2() -> SchemaSnapshot {
    SchemaSnapshot::new()
        .table(
            TableShape::new("users")
                .column(ColumnShape::new("id", SqlType::Integer).primary_key())
                .column(ColumnShape::new("email", SqlType::Varchar(255)).not_null())
                .column(ColumnShape::new("name", SqlType::Text))
                .index(IndexShape::unnamed(&["email"])),
        )
        .table(
            TableShape::new("tags")
                .column(ColumnShape::new("id", SqlType::Integer).primary_key())
                .column(ColumnShape::new("label", SqlType::Text).not_null()),
        )
}

async fn autogenerate(
    pool: &SqlitePool,
    scripts: &ScriptDirectory,
    target: &SchemaSnapshot,
    message: &str,
    rev_id: &str,
) {
    let diffs = diffs_against(pool, target).await;
    assert!(!diffs.is_empty());
    scripts
        .generate_revision(
            message,
            Some(rev_id),
            upgrade_operations(&diffs),
            downgrade_operations(&diffs),
        )
        .unwrap();
}

#[tokio::test]
async fn test_generated_revisions_reach_the_model() {
    let tmp = TempDir::new().unwrap();
    let scripts = ScriptDirectory::new(tmp.path().join("migrations"));
    scripts.init().unwrap();

    let pool = setup_pool().await;
    let runner = MigrationRunner::new(pool.clone(), sqlite());

    autogenerate(&pool, &scripts, &model_v1(), "create users", "1975ea83b712").await;
    let graph = scripts.graph().unwrap();
    assert_eq!(runner.upgrade(&graph, "head").await.unwrap(), vec!["1975ea83b712"]);
    let diffs = diffs_against(&pool, &model_v1()).await;
    assert!(diffs.is_empty(), "unexpected diffs after v1: {diffs:?}");

    autogenerate(&pool, &scripts, &model_v2(), "add tags", "27c6a30d7c24").await;
    let graph = scripts.graph().unwrap();
    assert_eq!(
        graph.get("27c6a30d7c24").unwrap().down_revision.as_deref(),
        Some("1975ea83b712")
    );
    assert_eq!(runner.upgrade(&graph, "head").await.unwrap(), vec!["27c6a30d7c24"]);
    let diffs = diffs_against(&pool, &model_v2()).await;
    assert!(diffs.is_empty(), "unexpected diffs after v2: {diffs:?}");

    assert_eq!(runner.downgrade(&graph, "-1").await.unwrap(), vec!["27c6a30d7c24"]);
    assert_eq!(runner.current().await.unwrap().as_deref(), Some("1975ea83b712"));
    let diffs = diffs_against(&pool, &model_v1()).await;
    assert!(diffs.is_empty(), "unexpected diffs after downgrade: {diffs:?}");
}

#[tokio::test]
async fn test_downgrade_restores_indexes_of_a_removed_table() {
    let tmp = TempDir::new().unwrap();
    let scripts = ScriptDirectory::new(tmp.path().join("migrations"));
    scripts.init().unwrap();

    let pool = setup_pool().await;
    execute_all(
        &pool,
        &[
            "CREATE TABLE legacy (id INTEGER PRIMARY KEY, name TEXT)",
            "CREATE INDEX ix_legacy_name ON legacy (name)",
        ],
    )
    .await;
    let runner = MigrationRunner::new(pool.clone(), sqlite());

    autogenerate(&pool, &scripts, &SchemaSnapshot::new(), "drop legacy", "ae1027a6acf").await;
    let graph = scripts.graph().unwrap();
    assert_eq!(runner.upgrade(&graph, "head").await.unwrap(), vec!["ae1027a6acf"]);
    let diffs = diffs_against(&pool, &SchemaSnapshot::new()).await;
    assert!(diffs.is_empty(), "unexpected diffs after upgrade: {diffs:?}");

    assert_eq!(runner.downgrade(&graph, "base").await.unwrap(), vec!["ae1027a6acf"]);
    let legacy = SchemaSnapshot::new().table(
        TableShape::new("legacy")
            .column(ColumnShape::new("id", SqlType::Integer).primary_key())
            .column(ColumnShape::new("name", SqlType::Text))
            .index(IndexShape::new("ix_legacy_name", &["name"])),
    );
    let diffs = diffs_against(&pool, &legacy).await;
    assert!(diffs.is_empty(), "unexpected diffs after downgrade: {diffs:?}");
}

#[tokio::test]
async fn test_offline_sql_for_generated_revision() {
    let tmp = TempDir::new().unwrap();
    let scripts = ScriptDirectory::new(tmp.path());
    let diffs = SchemaComparator::new(sqlite(), CompareOptions::new())
        .compare(&SchemaSnapshot::new(), &model_v1());
    scripts
        .generate_revision(
            "create users",
            Some("1975ea83b712"),
            upgrade_operations(&diffs),
            downgrade_operations(&diffs),
        )
        .unwrap();
    let graph = scripts.graph().unwrap();

    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .connect_lazy("sqlite::memory:")
        .unwrap();
    let runner = MigrationRunner::new(pool, Arc::new(PostgresDialect::new()));
    let sql = runner.upgrade_sql(&graph, None, "head").unwrap();

    assert_eq!(sql.first().map(String::as_str), Some("BEGIN"));
    assert_eq!(sql.last().map(String::as_str), Some("COMMIT"));
    assert!(sql.iter().any(|s| s.starts_with("CREATE TABLE \"users\"")));
    assert!(sql
        .iter()
        .any(|s| s.contains("CREATE INDEX \"ix_users_email\" ON \"users\"")));
    assert!(sql
        .iter()
        .any(|s| s.contains("VALUES ('1975ea83b712')")));
}
