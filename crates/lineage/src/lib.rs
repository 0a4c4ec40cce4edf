//! Revision-graph database migrations with schema autogeneration.
//!
//! `lineage` tracks schema changes as a graph of revisions, where each
//! revision names its parent and carries an upgrade and a downgrade step:
//! - Revisions form a tree; heads, bases and branch points fall out of the
//!   parent links
//! - Upgrade and downgrade targets are written as ids, id prefixes, `head`,
//!   `base` or relative steps like `+2` and `-1`
//! - A reflected database schema can be diffed against a target schema to
//!   draft the operations of the next revision
//! - SQL generation is dialect-aware (SQLite, PostgreSQL)
//!
//! # Architecture
//!
//! - **Revision graph** - [`graph::RevisionGraph`] indexes revisions and
//!   walks them; [`range`] turns target specs into ordered plans
//! - **Runner** - [`executor::MigrationRunner`] applies plans to a database
//!   and keeps the version table current
//! - **Autogenerate** - [`reflect`] captures the current schema,
//!   [`compare::SchemaComparator`] diffs it against the target, and
//!   [`translate`] turns the diffs into operations
//! - **Scripts** - [`script::ScriptDirectory`] stores one JSON file per
//!   revision
//! - **Dialect** - Database-specific SQL generation and reflection fixups
//!
//! # Example
//!
//! ```rust,ignore
//! use lineage::prelude::*;
//!
//! let graph = RevisionGraph::build(vec![
//!     Revision::new("ae1027a6acf", None)
//!         .doc("create users")
//!         .upgrade(|ops| {
//!             ops.create_table(
//!                 TableShape::new("users")
//!                     .column(ColumnShape::new("id", SqlType::Integer).primary_key())
//!                     .column(ColumnShape::new("email", SqlType::Varchar(255)).not_null()),
//!             );
//!             Ok(())
//!         })
//!         .downgrade(|ops| {
//!             ops.drop_table("users");
//!             Ok(())
//!         }),
//! ]);
//!
//! let runner = MigrationRunner::new(pool, Arc::new(SqliteDialect::new()));
//! runner.upgrade(&graph, "head").await?;
//! ```
//!
//! # CLI Usage
//!
//! ```bash
//! # Draft a revision from the difference between the database and a target schema
//! lineage revision -m "add email" --autogenerate --target schema.json
//!
//! # Apply everything up to the head
//! lineage upgrade head
//!
//! # Step back one revision
//! lineage downgrade -1
//!
//! # Print the SQL instead of running it
//! lineage upgrade head --sql
//! ```

pub mod compare;
pub mod dialect;
pub mod diff;
pub mod error;
pub mod executor;
pub mod graph;
pub mod history;
pub mod matcher;
pub mod operations;
pub mod range;
pub mod reflect;
pub mod revision;
pub mod schema;
pub mod script;
pub mod translate;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::compare::{CompareOptions, SchemaComparator, SchemaObject};
    pub use crate::dialect::{DialectRegistry, MigrationDialect, PostgresDialect, SqliteDialect};
    pub use crate::diff::{Change, ColumnModification, Diff};
    pub use crate::error::{MigrateError, Result};
    pub use crate::executor::{MigrationRunner, TransactionMode};
    pub use crate::graph::RevisionGraph;
    pub use crate::history::VersionTable;
    pub use crate::operations::{ColumnChanges, MigrationOperation, Operations};
    pub use crate::range::{downgrade_plan, resolve_range, upgrade_plan, RevisionSpec};
    pub use crate::reflect::{compare_metadata, Inspector, SqliteInspector, StaticInspector};
    pub use crate::revision::Revision;
    pub use crate::schema::{
        ColumnShape, DefaultValue, IndexShape, SchemaSnapshot, SqlType, TableKey, TableShape,
        UniqueShape,
    };
    pub use crate::script::{RevisionSource, ScriptDirectory};
    pub use crate::translate::{downgrade_operations, upgrade_operations};
}

#[cfg(test)]
mod tests {
    use crate::prelude::*;

    #[test]
    fn test_prelude_builds_a_graph() {
        let graph = RevisionGraph::build(vec![
            Revision::new("a", None),
            Revision::new("b", Some("a")),
        ]);
        assert_eq!(graph.heads(), vec!["b"]);
        assert_eq!(
            "-1".parse::<RevisionSpec>().unwrap(),
            RevisionSpec::Relative(-1)
        );
    }
}
