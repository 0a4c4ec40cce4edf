//! A single node of the revision graph.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::operations::{MigrationOperation, Operations};

/// A migration step body. It records its schema changes into the given
/// [`Operations`]; the graph never looks inside it.
pub type StepFn = Arc<dyn Fn(&mut Operations) -> Result<()> + Send + Sync>;

/// One migration step in the history.
#[derive(Clone)]
pub struct Revision {
    /// Unique identifier.
    pub id: String,
    /// Parent revision, `None` for a root.
    pub down_revision: Option<String>,
    /// Free-text description.
    pub doc: String,
    upgrade: StepFn,
    downgrade: StepFn,
    pub(crate) children: BTreeSet<String>,
}

fn noop() -> StepFn {
    Arc::new(|_: &mut Operations| -> Result<()> { Ok(()) })
}

impl Revision {
    /// Creates a revision whose steps do nothing.
    #[must_use]
    pub fn new(id: impl Into<String>, down_revision: Option<&str>) -> Self {
        Self {
            id: id.into(),
            down_revision: down_revision.map(str::to_string),
            doc: String::new(),
            upgrade: noop(),
            downgrade: noop(),
            children: BTreeSet::new(),
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = doc.into();
        self
    }

    /// Sets the upgrade step.
    #[must_use]
    pub fn upgrade<F>(mut self, step: F) -> Self
    where
        F: Fn(&mut Operations) -> Result<()> + Send + Sync + 'static,
    {
        self.upgrade = Arc::new(step);
        self
    }

    /// Sets the downgrade step.
    #[must_use]
    pub fn downgrade<F>(mut self, step: F) -> Self
    where
        F: Fn(&mut Operations) -> Result<()> + Send + Sync + 'static,
    {
        self.downgrade = Arc::new(step);
        self
    }

    /// Builds a revision whose steps replay fixed operation lists.
    #[must_use]
    pub fn from_operations(
        id: impl Into<String>,
        down_revision: Option<&str>,
        upgrade: Vec<MigrationOperation>,
        downgrade: Vec<MigrationOperation>,
    ) -> Self {
        let upgrade = Arc::new(upgrade);
        let downgrade = Arc::new(downgrade);
        Self::new(id, down_revision)
            .upgrade(move |ops| {
                ops.extend(upgrade.iter().cloned());
                Ok(())
            })
            .downgrade(move |ops| {
                ops.extend(downgrade.iter().cloned());
                Ok(())
            })
    }

    /// Runs the upgrade step.
    pub fn run_upgrade(&self, ops: &mut Operations) -> Result<()> {
        (self.upgrade)(ops)
    }

    /// Runs the downgrade step.
    pub fn run_downgrade(&self, ops: &mut Operations) -> Result<()> {
        (self.downgrade)(ops)
    }

    /// Child ids, known once the revision is part of a graph.
    pub fn children(&self) -> impl Iterator<Item = &str> {
        self.children.iter().map(String::as_str)
    }

    /// No revision builds on this one.
    #[must_use]
    pub fn is_head(&self) -> bool {
        self.children.is_empty()
    }

    /// This revision has no parent.
    #[must_use]
    pub fn is_base(&self) -> bool {
        self.down_revision.is_none()
    }

    /// More than one revision builds on this one.
    #[must_use]
    pub fn is_branch_point(&self) -> bool {
        self.children.len() > 1
    }

    /// One-line summary: `parent -> id (head), doc`.
    #[must_use]
    pub fn log_entry(&self) -> String {
        let mut entry = format!(
            "{} -> {}",
            self.down_revision.as_deref().unwrap_or("<base>"),
            self.id
        );
        if self.is_head() {
            entry.push_str(" (head)");
        }
        if self.is_branch_point() {
            entry.push_str(" (branchpoint)");
        }
        if !self.doc.is_empty() {
            entry.push_str(", ");
            entry.push_str(&self.doc);
        }
        entry
    }
}

impl fmt::Debug for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Revision")
            .field("id", &self.id)
            .field("down_revision", &self.down_revision)
            .field("doc", &self.doc)
            .field("children", &self.children)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}
