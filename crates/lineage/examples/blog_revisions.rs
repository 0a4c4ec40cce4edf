//! Example: Blog Application Revisions
//!
//! This example demonstrates how to use lineage to manage database schema
//! changes for a blog application with users, posts, and tags.
//!
//! Run with: cargo run --example blog_revisions -p lineage

use std::sync::Arc;

use lineage::prelude::*;

// =============================================================================
// Revision Definitions
// =============================================================================

fn users_table() -> TableShape {
    TableShape::new("users")
        .column(
            ColumnShape::new("id", SqlType::BigInt)
                .primary_key()
                .auto_increment(),
        )
        .column(ColumnShape::new("username", SqlType::Varchar(100)).not_null())
        .column(ColumnShape::new("email", SqlType::Varchar(255)).not_null())
        .column(
            ColumnShape::new("is_active", SqlType::Boolean)
                .not_null()
                .server_default(DefaultValue::Bool(true)),
        )
        .unique_constraint(UniqueShape::new("uq_users_username", &["username"]))
}

fn posts_table() -> TableShape {
    TableShape::new("posts")
        .column(
            ColumnShape::new("id", SqlType::BigInt)
                .primary_key()
                .auto_increment(),
        )
        .column(ColumnShape::new("author_id", SqlType::BigInt).not_null())
        .column(ColumnShape::new("title", SqlType::Varchar(200)).not_null())
        .column(ColumnShape::new("content", SqlType::Text).not_null())
        .column(
            ColumnShape::new("created_at", SqlType::Timestamp)
                .not_null()
                .server_default(DefaultValue::Expression("CURRENT_TIMESTAMP".to_string())),
        )
}

fn revisions() -> Vec<Revision> {
    vec![
        Revision::new("1975ea83b712", None)
            .doc("create users")
            .upgrade(|ops| {
                ops.create_table(users_table());
                Ok(())
            })
            .downgrade(|ops| {
                ops.drop_table("users");
                Ok(())
            }),
        Revision::new("ae1027a6acf", Some("1975ea83b712"))
            .doc("create posts")
            .upgrade(|ops| {
                ops.create_table(posts_table())
                    .create_index("posts", IndexShape::new("ix_posts_author_id", &["author_id"]));
                Ok(())
            })
            .downgrade(|ops| {
                ops.drop_index("posts", "ix_posts_author_id")
                    .drop_table("posts");
                Ok(())
            }),
        Revision::new("27c6a30d7c24", Some("ae1027a6acf"))
            .doc("add user profile")
            .upgrade(|ops| {
                ops.add_column("users", ColumnShape::new("display_name", SqlType::Varchar(100)))
                    .add_column("users", ColumnShape::new("bio", SqlType::Text));
                Ok(())
            })
            .downgrade(|ops| {
                ops.drop_column("users", "bio")
                    .drop_column("users", "display_name");
                Ok(())
            }),
    ]
}

// =============================================================================
// Main: Demonstrate the Revision Graph
// =============================================================================

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    println!("{}", "=".repeat(70));
    println!(" LINEAGE: Blog Application Example");
    println!("{}", "=".repeat(70));
    println!();

    let graph = RevisionGraph::build(revisions());

    println!("[1] Revision history (newest first):\n");
    for revision in graph.walk_revisions() {
        println!("    {}", revision.log_entry());
    }
    println!();

    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect(":memory:")
        .await?;
    let dialect: Arc<dyn MigrationDialect> = Arc::new(SqliteDialect::new());
    let runner = MigrationRunner::new(pool.clone(), Arc::clone(&dialect));

    println!("[2] Offline SQL for base:head:");
    println!("{}", "-".repeat(70));
    for statement in runner.upgrade_sql(&graph, None, "head")? {
        println!("{statement};");
    }
    println!("{}", "-".repeat(70));
    println!();

    println!("[3] Upgrading to head...\n");
    for id in runner.upgrade(&graph, "head").await? {
        println!("    Applied {id}");
    }
    println!(
        "    Database is at {}\n",
        runner.current().await?.as_deref().unwrap_or("<base>")
    );

    println!("[4] Comparing the database with a model that adds tags...\n");
    let mut target = SchemaSnapshot::new()
        .table(
            users_table()
                .column(ColumnShape::new("display_name", SqlType::Varchar(100)))
                .column(ColumnShape::new("bio", SqlType::Text)),
        )
        .table(posts_table().index(IndexShape::new("ix_posts_author_id", &["author_id"])));
    target.insert(
        TableShape::new("tags")
            .column(ColumnShape::new("id", SqlType::Integer).primary_key())
            .column(ColumnShape::new("name", SqlType::Varchar(50)).not_null())
            .index(IndexShape::unnamed(&["name"]).unique()),
    );

    let inspector = SqliteInspector::new(pool);
    let diffs = compare_metadata(&inspector, dialect, &target, CompareOptions::new()).await?;
    for diff in &diffs {
        println!("    {diff}");
    }
    println!();
    println!("    Upgrade operations:");
    for op in upgrade_operations(&diffs) {
        println!("    - {}", op.description());
    }
    println!("    Downgrade operations:");
    for op in downgrade_operations(&diffs) {
        println!("    - {}", op.description());
    }
    println!();

    println!("[5] Stepping back one revision...\n");
    for id in runner.downgrade(&graph, "-1").await? {
        println!("    Reverted {id}");
    }
    println!(
        "    Database is at {}\n",
        runner.current().await?.as_deref().unwrap_or("<base>")
    );

    println!("{}", "=".repeat(70));
    println!(" Example completed successfully!");
    println!("{}", "=".repeat(70));

    Ok(())
}
