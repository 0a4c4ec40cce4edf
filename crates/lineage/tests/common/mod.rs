#![allow(dead_code)]

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use lineage::prelude::*;

pub async fn setup_pool() -> SqlitePool {
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect(":memory:")
        .await
        .expect("Failed to create pool")
}

/// Revisions without steps, given as `(id, parent)` pairs.
pub fn graph(links: &[(&str, Option<&str>)]) -> RevisionGraph {
    RevisionGraph::build(links.iter().map(|(id, parent)| Revision::new(*id, *parent)))
}

pub fn ids<'a>(revisions: impl IntoIterator<Item = &'a Revision>) -> Vec<&'a str> {
    revisions.into_iter().map(|r| r.id.as_str()).collect()
}
