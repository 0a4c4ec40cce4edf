//! Pairing of objects between the current and the target schema.
//!
//! Tables and columns pair up by key. Indexes and unique constraints pair up
//! by name when they have one, and unnamed target-side objects pair up with
//! current-side objects through their column signature (the sorted column
//! names), since the database always invents a name the model never had.

use std::collections::{BTreeMap, BTreeSet};

use crate::schema::{ColumnShape, IndexShape, SchemaSnapshot, TableKey, TableShape, UniqueShape};

/// Keys present on one side only, or on both, each list sorted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition<K> {
    /// Keys only the current side has.
    pub only_current: Vec<K>,
    /// Keys only the target side has.
    pub only_target: Vec<K>,
    /// Keys both sides have.
    pub both: Vec<K>,
}

/// Splits two key sets into current-only, target-only and common keys.
#[must_use]
pub fn partition<K: Ord + Clone>(current: &BTreeSet<K>, target: &BTreeSet<K>) -> Partition<K> {
    Partition {
        only_current: current.difference(target).cloned().collect(),
        only_target: target.difference(current).cloned().collect(),
        both: current.intersection(target).cloned().collect(),
    }
}

/// Tables of a snapshot keyed with the default schema folded into `None`.
#[must_use]
pub fn normalized_tables<'a>(
    snapshot: &'a SchemaSnapshot,
    default_schema: Option<&str>,
) -> BTreeMap<TableKey, &'a TableShape> {
    snapshot
        .tables
        .iter()
        .map(|(key, table)| (key.normalized(default_schema), table))
        .collect()
}

/// Columns of a table keyed by name.
#[must_use]
pub fn columns_by_name(table: &TableShape) -> BTreeMap<&str, &ColumnShape> {
    table.columns.iter().map(|c| (c.name.as_str(), c)).collect()
}

/// Whether a signature describes an index or a unique constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConstraintKind {
    Index,
    UniqueConstraint,
}

/// The object a signature was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintRef<'a> {
    Index(&'a IndexShape),
    Unique(&'a UniqueShape),
}

/// A uniform view over indexes and unique constraints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstraintSig<'a> {
    /// Index or unique constraint.
    pub kind: ConstraintKind,
    /// Name, if the object has one.
    pub name: Option<&'a str>,
    /// Sorted column names.
    pub columns: Vec<&'a str>,
    /// Whether the object enforces uniqueness.
    pub unique: bool,
    /// The underlying object.
    pub object: ConstraintRef<'a>,
}

impl<'a> ConstraintSig<'a> {
    /// Signature of an index.
    #[must_use]
    pub fn from_index(index: &'a IndexShape) -> Self {
        Self {
            kind: ConstraintKind::Index,
            name: index.name.as_deref(),
            columns: signature(&index.columns),
            unique: index.unique,
            object: ConstraintRef::Index(index),
        }
    }

    /// Signature of a unique constraint.
    #[must_use]
    pub fn from_unique(constraint: &'a UniqueShape) -> Self {
        Self {
            kind: ConstraintKind::UniqueConstraint,
            name: constraint.name.as_deref(),
            columns: signature(&constraint.columns),
            unique: true,
            object: ConstraintRef::Unique(constraint),
        }
    }

    /// Whether this is an index.
    #[must_use]
    pub fn is_index(&self) -> bool {
        self.kind == ConstraintKind::Index
    }

    /// Name when present, else the joined column signature.
    #[must_use]
    pub fn sort_key(&self) -> String {
        self.name
            .map_or_else(|| self.columns.join(","), str::to_string)
    }
}

/// Sorted column names.
#[must_use]
pub fn signature(columns: &[String]) -> Vec<&str> {
    let mut sig: Vec<&str> = columns.iter().map(String::as_str).collect();
    sig.sort_unstable();
    sig
}

/// Outcome of pairing one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstraintChange<'a> {
    /// Only the target has it.
    Added(ConstraintSig<'a>),
    /// Only the current schema has it.
    Removed(ConstraintSig<'a>),
    /// Same name, different columns or uniqueness.
    Changed {
        /// The current object.
        old: ConstraintSig<'a>,
        /// The target object.
        new: ConstraintSig<'a>,
    },
}

impl ConstraintChange<'_> {
    /// Key the change sorts by within its table.
    #[must_use]
    pub fn sort_key(&self) -> String {
        match self {
            Self::Added(sig) | Self::Removed(sig) => sig.sort_key(),
            Self::Changed { new, .. } => new.sort_key(),
        }
    }
}

/// Pairs current-side and target-side indexes and unique constraints.
///
/// 1. A target name also present on the current side pairs with the object
///    of the same kind (a backend may report one name as both an index and a
///    unique constraint). A kind mismatch is a remove plus an add; different
///    columns or uniqueness is a change.
/// 2. An unnamed target object pairs with an unclaimed current object that
///    has the same signature and uniqueness.
/// 3. Unpaired target objects are added.
/// 4. Unclaimed current objects are removed. A doubled name is removed as a
///    pair, and only when no target object shares its signature.
#[must_use]
pub fn match_constraints<'a>(
    current: &[ConstraintSig<'a>],
    target: &[ConstraintSig<'a>],
) -> Vec<ConstraintChange<'a>> {
    let mut changes = Vec::new();
    let mut claimed = vec![false; current.len()];

    let mut current_by_name: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (slot, sig) in current.iter().enumerate() {
        if let Some(name) = sig.name {
            current_by_name.entry(name).or_default().push(slot);
        }
    }
    let target_by_name: BTreeMap<&str, &ConstraintSig<'a>> = target
        .iter()
        .filter_map(|sig| sig.name.map(|name| (name, sig)))
        .collect();

    for (name, wanted) in &target_by_name {
        let Some(slots) = current_by_name.get(name) else {
            changes.push(ConstraintChange::Added((*wanted).clone()));
            continue;
        };
        for &slot in slots {
            claimed[slot] = true;
        }
        let existing = slots
            .iter()
            .map(|&slot| &current[slot])
            .find(|sig| sig.kind == wanted.kind)
            .unwrap_or(&current[slots[0]]);

        if existing.kind != wanted.kind {
            changes.push(ConstraintChange::Removed(existing.clone()));
            changes.push(ConstraintChange::Added((*wanted).clone()));
        } else if existing.unique != wanted.unique || existing.columns != wanted.columns {
            changes.push(ConstraintChange::Changed {
                old: existing.clone(),
                new: (*wanted).clone(),
            });
        }
    }

    for wanted in target.iter().filter(|sig| sig.name.is_none()) {
        let found = current
            .iter()
            .enumerate()
            .filter(|(slot, sig)| {
                !claimed[*slot] && sig.unique == wanted.unique && sig.columns == wanted.columns
            })
            .min_by_key(|(_, sig)| sig.kind != wanted.kind);

        match found {
            Some((slot, sig)) => {
                claimed[slot] = true;
                if let Some(twins) = sig.name.and_then(|name| current_by_name.get(name)) {
                    for &twin in twins {
                        claimed[twin] = true;
                    }
                }
            }
            None => changes.push(ConstraintChange::Added(wanted.clone())),
        }
    }

    let target_sigs: BTreeSet<&[&str]> = target.iter().map(|sig| sig.columns.as_slice()).collect();
    for (slot, sig) in current.iter().enumerate() {
        if claimed[slot] {
            continue;
        }
        let doubled = sig
            .name
            .and_then(|name| current_by_name.get(name))
            .filter(|slots| slots.len() > 1);
        match doubled {
            Some(slots) => {
                for &twin in slots {
                    claimed[twin] = true;
                }
                if !target_sigs.contains(sig.columns.as_slice()) {
                    for &twin in slots {
                        changes.push(ConstraintChange::Removed(current[twin].clone()));
                    }
                }
            }
            None => {
                claimed[slot] = true;
                changes.push(ConstraintChange::Removed(sig.clone()));
            }
        }
    }

    changes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_is_sorted() {
        let current: BTreeSet<&str> = ["t", "old", "a"].into_iter().collect();
        let target: BTreeSet<&str> = ["t", "bat", "a"].into_iter().collect();
        let parts = partition(&current, &target);
        assert_eq!(parts.only_current, vec!["old"]);
        assert_eq!(parts.only_target, vec!["bat"]);
        assert_eq!(parts.both, vec!["a", "t"]);
    }

    #[test]
    fn test_normalized_tables_fold_default_schema() {
        let snapshot = SchemaSnapshot::new()
            .table(TableShape::new("users").schema("public"))
            .table(TableShape::new("log").schema("audit"));
        let tables = normalized_tables(&snapshot, Some("public"));
        assert!(tables.contains_key(&TableKey::from("users")));
        assert!(tables.contains_key(&TableKey::new(Some("audit"), "log")));
    }

    #[test]
    fn test_signature_is_order_insensitive() {
        let a = IndexShape::new("ix_a", &["b", "a"]);
        let b = UniqueShape::unnamed(&["a", "b"]);
        assert_eq!(
            ConstraintSig::from_index(&a).columns,
            ConstraintSig::from_unique(&b).columns
        );
    }

    #[test]
    fn test_unnamed_target_unique_matches_unique_index() {
        let index = IndexShape::new("ix_user_email", &["email"]).unique();
        let constraint = UniqueShape::unnamed(&["email"]);
        let changes = match_constraints(
            &[ConstraintSig::from_index(&index)],
            &[ConstraintSig::from_unique(&constraint)],
        );
        assert!(changes.is_empty());
    }

    #[test]
    fn test_unnamed_target_unique_does_not_match_plain_index() {
        let index = IndexShape::new("ix_user_email", &["email"]);
        let constraint = UniqueShape::unnamed(&["email"]);
        let changes = match_constraints(
            &[ConstraintSig::from_index(&index)],
            &[ConstraintSig::from_unique(&constraint)],
        );
        assert_eq!(changes.len(), 2);
        assert!(matches!(changes[0], ConstraintChange::Added(_)));
        assert!(matches!(changes[1], ConstraintChange::Removed(_)));
    }

    #[test]
    fn test_same_name_different_columns_is_a_change() {
        let old = IndexShape::new("ix_t", &["a"]);
        let new = IndexShape::new("ix_t", &["a", "b"]);
        let changes = match_constraints(
            &[ConstraintSig::from_index(&old)],
            &[ConstraintSig::from_index(&new)],
        );
        assert!(matches!(changes.as_slice(), [ConstraintChange::Changed { .. }]));
    }

    #[test]
    fn test_same_name_different_kind_is_remove_and_add() {
        let old = IndexShape::new("uq_t_a", &["a"]).unique();
        let new = UniqueShape::new("uq_t_a", &["a"]);
        let changes = match_constraints(
            &[ConstraintSig::from_index(&old)],
            &[ConstraintSig::from_unique(&new)],
        );
        assert!(matches!(
            changes.as_slice(),
            [ConstraintChange::Removed(_), ConstraintChange::Added(_)]
        ));
    }

    #[test]
    fn test_doubled_name_pairs_with_target_kind() {
        let uq = UniqueShape::new("uq_email", &["email"]);
        let ix = IndexShape::new("uq_email", &["email"]).unique();
        let current = [ConstraintSig::from_unique(&uq), ConstraintSig::from_index(&ix)];

        let wanted = UniqueShape::new("uq_email", &["email"]);
        assert!(match_constraints(&current, &[ConstraintSig::from_unique(&wanted)]).is_empty());
    }

    #[test]
    fn test_doubled_name_removed_as_pair() {
        let uq = UniqueShape::new("uq_email", &["email"]);
        let ix = IndexShape::new("uq_email", &["email"]).unique();
        let current = [ConstraintSig::from_unique(&uq), ConstraintSig::from_index(&ix)];

        let changes = match_constraints(&current, &[]);
        assert_eq!(changes.len(), 2);
        assert!(changes
            .iter()
            .all(|c| matches!(c, ConstraintChange::Removed(_))));
    }

    #[test]
    fn test_doubled_name_kept_when_signature_still_wanted() {
        let uq = UniqueShape::new("uq_email", &["email"]);
        let ix = IndexShape::new("uq_email", &["email"]).unique();
        let current = [ConstraintSig::from_unique(&uq), ConstraintSig::from_index(&ix)];

        // A plain index on the same column keeps the doubled pair alive but
        // is itself new.
        let wanted = IndexShape::new("ix_email", &["email"]);
        let changes = match_constraints(&current, &[ConstraintSig::from_index(&wanted)]);
        assert!(matches!(changes.as_slice(), [ConstraintChange::Added(_)]));
    }
}
