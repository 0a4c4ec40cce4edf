//! The revision graph.
//!
//! Revisions form a forest where every node has at most one parent and any
//! number of children. The graph is built once from a loaded revision list,
//! repairs what it can (with a warning) and then only answers questions:
//! which revisions are heads, what a symbolic name resolves to, and which
//! revisions lie between two points.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::ops::Bound;

use tracing::warn;

use crate::error::{MigrateError, Result};
use crate::revision::Revision;
use crate::script::RevisionSource;

/// All known revisions, indexed by id.
#[derive(Debug, Clone, Default)]
pub struct RevisionGraph {
    revisions: BTreeMap<String, Revision>,
}

impl RevisionGraph {
    /// Builds a graph from a list of revisions.
    ///
    /// Integrity problems never fail the build:
    /// - a repeated id keeps the last definition,
    /// - a parent that isn't in the list is dropped, making the revision a root,
    /// - a parent chain that loops is cut where it closes.
    ///
    /// Each repair is logged as a warning.
    pub fn build(revisions: impl IntoIterator<Item = Revision>) -> Self {
        let mut map: BTreeMap<String, Revision> = BTreeMap::new();
        for mut revision in revisions {
            revision.children.clear();
            if let Some(previous) = map.insert(revision.id.clone(), revision) {
                warn!(
                    revision = %previous.id,
                    "Revision is present more than once; keeping the last definition"
                );
            }
        }

        let ids: BTreeSet<String> = map.keys().cloned().collect();
        for revision in map.values_mut() {
            let dangling = revision
                .down_revision
                .as_ref()
                .filter(|parent| !ids.contains(*parent))
                .cloned();
            if let Some(parent) = dangling {
                warn!(
                    revision = %revision.id,
                    parent = %parent,
                    "Revision refers to an unknown parent; treating it as a root"
                );
                revision.down_revision = None;
            }
        }

        break_cycles(&mut map);

        let links: Vec<(String, String)> = map
            .values()
            .filter_map(|r| r.down_revision.clone().map(|p| (p, r.id.clone())))
            .collect();
        for (parent, child) in links {
            if let Some(revision) = map.get_mut(&parent) {
                revision.children.insert(child);
            }
        }

        Self { revisions: map }
    }

    /// Builds a graph from everything a source yields.
    pub fn from_source(source: &dyn RevisionSource) -> Result<Self> {
        Ok(Self::build(source.load_revisions()?))
    }

    /// Appends a new leaf.
    ///
    /// The id must be new and the parent, if any, must already be present.
    pub fn add_revision(&mut self, mut revision: Revision) -> Result<()> {
        if self.revisions.contains_key(&revision.id) {
            return Err(MigrateError::DuplicateRevision(revision.id));
        }
        if let Some(parent) = &revision.down_revision {
            let Some(parent_rev) = self.revisions.get_mut(parent) else {
                return Err(MigrateError::MissingParent {
                    revision: revision.id.clone(),
                    parent: parent.clone(),
                });
            };
            parent_rev.children.insert(revision.id.clone());
        }
        revision.children.clear();
        self.revisions.insert(revision.id.clone(), revision);
        Ok(())
    }

    /// Number of revisions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.revisions.len()
    }

    /// Whether the graph has no revisions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.revisions.is_empty()
    }

    /// Gets a revision by exact id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Revision> {
        self.revisions.get(id)
    }

    /// All revisions in id order.
    pub fn revisions(&self) -> impl Iterator<Item = &Revision> {
        self.revisions.values()
    }

    /// Ids of revisions nothing builds on, sorted.
    #[must_use]
    pub fn heads(&self) -> Vec<&str> {
        self.revisions
            .values()
            .filter(|r| r.is_head())
            .map(|r| r.id.as_str())
            .collect()
    }

    /// Ids of revisions without a parent, sorted.
    #[must_use]
    pub fn bases(&self) -> Vec<&str> {
        self.revisions
            .values()
            .filter(|r| r.is_base())
            .map(|r| r.id.as_str())
            .collect()
    }

    /// The single root revision.
    ///
    /// Returns `None` for an empty graph and fails when there are several
    /// roots.
    pub fn base(&self) -> Result<Option<&str>> {
        let bases = self.bases();
        match bases.as_slice() {
            [] => Ok(None),
            [only] => Ok(Some(*only)),
            _ => Err(MigrateError::MultipleBases {
                bases: bases.iter().map(|b| (*b).to_string()).collect(),
            }),
        }
    }

    /// Revisions with more than one child, sorted by id.
    #[must_use]
    pub fn branch_points(&self) -> Vec<&Revision> {
        self.revisions
            .values()
            .filter(|r| r.is_branch_point())
            .collect()
    }

    /// The single head, or `None` when the graph is empty.
    pub fn current_head(&self) -> Result<Option<&str>> {
        let heads = self.heads();
        match heads.as_slice() {
            [] => Ok(None),
            [only] => Ok(Some(*only)),
            _ => Err(MigrateError::MultipleHeads {
                heads: heads.iter().map(|h| (*h).to_string()).collect(),
            }),
        }
    }

    /// Resolves `head`, `base`, a full id or a unique id prefix.
    ///
    /// `base` stands for "before the first revision" and resolves to `None`.
    pub fn resolve_symbolic(&self, token: &str) -> Result<Option<&str>> {
        match token {
            "head" => self.current_head(),
            "base" => Ok(None),
            _ => self.lookup(token).map(|r| Some(r.id.as_str())),
        }
    }

    /// Finds a revision by exact id, else by unique prefix.
    pub fn lookup(&self, token: &str) -> Result<&Revision> {
        if let Some(revision) = self.revisions.get(token) {
            return Ok(revision);
        }
        if token.is_empty() {
            return Err(MigrateError::RevisionNotFound(token.to_string()));
        }
        let candidates: Vec<&Revision> = self
            .revisions
            .range::<str, _>((Bound::Included(token), Bound::Unbounded))
            .take_while(|(id, _)| id.starts_with(token))
            .map(|(_, r)| r)
            .collect();
        match candidates.as_slice() {
            [] => Err(MigrateError::RevisionNotFound(token.to_string())),
            [only] => Ok(*only),
            _ => Err(MigrateError::AmbiguousRevision {
                prefix: token.to_string(),
                candidates: candidates.iter().map(|r| r.id.clone()).collect(),
            }),
        }
    }

    /// Revisions from `upper` down to, but not including, `lower`.
    ///
    /// Both ends are resolved ids; `None` means base. The walk follows
    /// parents only, so `lower` must be an ancestor of `upper`.
    pub fn iterate_revisions<'a>(
        &'a self,
        upper: Option<&'a str>,
        lower: Option<&str>,
    ) -> Result<Vec<&'a Revision>> {
        let mut path = Vec::new();
        let mut cursor = upper;
        loop {
            if cursor == lower {
                return Ok(path);
            }
            let Some(id) = cursor else {
                return Err(MigrateError::NotAnAncestor {
                    lower: lower.unwrap_or("base").to_string(),
                    upper: upper.unwrap_or("base").to_string(),
                });
            };
            let revision = self
                .revisions
                .get(id)
                .ok_or_else(|| MigrateError::RevisionNotFound(id.to_string()))?;
            path.push(revision);
            cursor = revision.down_revision.as_deref();
        }
    }

    /// Lazily walks every revision starting from the heads.
    ///
    /// Children always come before their parent; a branch point waits until
    /// every branch above it has been walked. Each revision is yielded once.
    #[must_use]
    pub fn walk_revisions(&self) -> WalkRevisions<'_> {
        WalkRevisions {
            graph: self,
            pending: self.heads().into_iter().map(str::to_string).collect(),
            cursor: None,
            visited: HashSet::new(),
            stalled: 0,
        }
    }
}

// Cuts the parent link that closes a loop, so every chain ends at a root.
fn break_cycles(map: &mut BTreeMap<String, Revision>) {
    let ids: Vec<String> = map.keys().cloned().collect();
    let mut settled: HashSet<String> = HashSet::new();

    for start in ids {
        let mut path: Vec<String> = Vec::new();
        let mut on_path: HashSet<String> = HashSet::new();
        let mut cursor = Some(start);

        while let Some(id) = cursor {
            if settled.contains(&id) {
                break;
            }
            if !on_path.insert(id.clone()) {
                if let Some(revision) = path.last().and_then(|last| map.get_mut(last)) {
                    warn!(
                        revision = %revision.id,
                        parent = %id,
                        "Revision parent chain loops; treating it as a root"
                    );
                    revision.down_revision = None;
                }
                break;
            }
            cursor = map.get(&id).and_then(|r| r.down_revision.clone());
            path.push(id);
        }

        settled.extend(path);
    }
}

/// Iterator returned by [`RevisionGraph::walk_revisions`].
#[derive(Debug)]
pub struct WalkRevisions<'a> {
    graph: &'a RevisionGraph,
    pending: VecDeque<String>,
    cursor: Option<String>,
    visited: HashSet<String>,
    stalled: usize,
}

impl<'a> Iterator for WalkRevisions<'a> {
    type Item = &'a Revision;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let id = match self.cursor.take() {
                Some(id) => id,
                None => self.pending.pop_front()?,
            };
            if self.visited.contains(&id) {
                continue;
            }
            let Some(revision) = self.graph.revisions.get(&id) else {
                continue;
            };

            let ready = revision.children().all(|c| self.visited.contains(c));
            // Once every queued start has been deferred in a row nothing can
            // make progress, so the revision is released anyway.
            if !ready && self.stalled <= self.pending.len() {
                self.stalled += 1;
                self.pending.push_back(id);
                continue;
            }

            self.stalled = 0;
            self.cursor = revision.down_revision.clone();
            self.visited.insert(id);
            return Some(revision);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear() -> RevisionGraph {
        RevisionGraph::build(vec![
            Revision::new("a", None),
            Revision::new("b", Some("a")),
            Revision::new("c", Some("b")),
        ])
    }

    fn ids<'a>(revisions: impl IntoIterator<Item = &'a Revision>) -> Vec<&'a str> {
        revisions.into_iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn test_heads_and_base() {
        let graph = linear();
        assert_eq!(graph.heads(), vec!["c"]);
        assert_eq!(graph.base().unwrap(), Some("a"));
        assert_eq!(graph.get("a").unwrap().children().collect::<Vec<_>>(), vec!["b"]);
    }

    #[test]
    fn test_empty_graph() {
        let graph = RevisionGraph::build(Vec::new());
        assert!(graph.is_empty());
        assert_eq!(graph.resolve_symbolic("head").unwrap(), None);
        assert_eq!(graph.base().unwrap(), None);
        assert_eq!(graph.walk_revisions().count(), 0);
    }

    #[test]
    fn test_multiple_heads_error_names_both() {
        let graph = RevisionGraph::build(vec![
            Revision::new("a", None),
            Revision::new("b1", Some("a")),
            Revision::new("b2", Some("a")),
        ]);
        let err = graph.resolve_symbolic("head").unwrap_err();
        match err {
            MigrateError::MultipleHeads { heads } => assert_eq!(heads, vec!["b1", "b2"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_multiple_bases_error() {
        let graph = RevisionGraph::build(vec![Revision::new("x", None), Revision::new("y", None)]);
        assert!(matches!(
            graph.base(),
            Err(MigrateError::MultipleBases { .. })
        ));
    }

    #[test]
    fn test_resolve_by_prefix() {
        let graph = RevisionGraph::build(vec![
            Revision::new("ae1027a6acf", None),
            Revision::new("ae10f0e0aa1", Some("ae1027a6acf")),
            Revision::new("27c6a30d7c24", Some("ae10f0e0aa1")),
        ]);

        assert_eq!(graph.resolve_symbolic("27c").unwrap(), Some("27c6a30d7c24"));
        assert_eq!(graph.resolve_symbolic("ae102").unwrap(), Some("ae1027a6acf"));
        assert_eq!(graph.resolve_symbolic("base").unwrap(), None);

        match graph.resolve_symbolic("ae10").unwrap_err() {
            MigrateError::AmbiguousRevision { candidates, .. } => {
                assert_eq!(candidates, vec!["ae1027a6acf", "ae10f0e0aa1"]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(matches!(
            graph.resolve_symbolic("ffff"),
            Err(MigrateError::RevisionNotFound(_))
        ));
    }

    #[test]
    fn test_dangling_parent_becomes_root() {
        let graph = RevisionGraph::build(vec![
            Revision::new("a", None),
            Revision::new("b", Some("missing")),
        ]);
        assert_eq!(graph.bases(), vec!["a", "b"]);
        assert!(graph.get("b").unwrap().down_revision.is_none());
    }

    #[test]
    fn test_duplicate_keeps_last() {
        let graph = RevisionGraph::build(vec![
            Revision::new("a", None).doc("first"),
            Revision::new("a", None).doc("second"),
        ]);
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.get("a").unwrap().doc, "second");
    }

    #[test]
    fn test_parent_loop_is_cut() {
        let graph = RevisionGraph::build(vec![
            Revision::new("a", Some("b")),
            Revision::new("b", Some("a")),
        ]);
        assert_eq!(graph.bases().len(), 1);
        assert_eq!(graph.heads().len(), 1);
        assert_eq!(graph.walk_revisions().count(), 2);
    }

    #[test]
    fn test_iterate_revisions() {
        let graph = linear();
        assert_eq!(ids(graph.iterate_revisions(Some("c"), None).unwrap()), vec!["c", "b", "a"]);
        assert_eq!(ids(graph.iterate_revisions(Some("c"), Some("a")).unwrap()), vec!["c", "b"]);
        assert!(graph.iterate_revisions(Some("b"), Some("b")).unwrap().is_empty());
        assert!(graph.iterate_revisions(None, None).unwrap().is_empty());
    }

    #[test]
    fn test_iterate_revisions_not_an_ancestor() {
        let graph = RevisionGraph::build(vec![
            Revision::new("a", None),
            Revision::new("b1", Some("a")),
            Revision::new("b2", Some("a")),
        ]);
        let err = graph.iterate_revisions(Some("b1"), Some("b2")).unwrap_err();
        assert_eq!(err.to_string(), "Revision b2 is not an ancestor of b1");
    }

    #[test]
    fn test_walk_linear() {
        let graph = linear();
        assert_eq!(ids(graph.walk_revisions()), vec!["c", "b", "a"]);
    }

    #[test]
    fn test_walk_defers_branch_points() {
        // a -> bx -> {c1, c2}; a -> by
        let graph = RevisionGraph::build(vec![
            Revision::new("a", None),
            Revision::new("bx", Some("a")),
            Revision::new("by", Some("a")),
            Revision::new("c1", Some("bx")),
            Revision::new("c2", Some("bx")),
        ]);
        let order = ids(graph.walk_revisions());
        assert_eq!(order, vec!["by", "c1", "c2", "bx", "a"]);

        let position = |id: &str| order.iter().position(|o| *o == id).unwrap();
        for revision in graph.revisions() {
            for child in revision.children() {
                assert!(position(child) < position(&revision.id));
            }
        }
    }

    #[test]
    fn test_add_revision() {
        let mut graph = linear();
        graph.add_revision(Revision::new("d", Some("c"))).unwrap();
        assert_eq!(graph.heads(), vec!["d"]);

        assert!(matches!(
            graph.add_revision(Revision::new("d", Some("c"))),
            Err(MigrateError::DuplicateRevision(_))
        ));
        assert!(matches!(
            graph.add_revision(Revision::new("e", Some("zzz"))),
            Err(MigrateError::MissingParent { .. })
        ));
    }
}
